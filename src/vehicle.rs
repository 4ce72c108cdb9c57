pub use self::control::{BrakeFlags, BrakingState, ControlOutput};
pub use self::horn::HornCue;
pub use self::profile::{BehaviourProfile, VehicleKind};
use self::horn::Horn;
use crate::ehmi::TurnIndicators;
use crate::light::Colour;
use crate::math::heading_error;
use crate::perception::{Kinematics, PerceptionSnapshot};
use crate::spawn::SpawnPointAttributes;
use crate::waypoint::Path;
use crate::{GiveWayId, RouteId, SlowZoneId, SpawnPointId, TrafficLightId, VehicleId, ZebraCrossingId};
use arrayvec::ArrayVec;
use cgmath::prelude::*;
use smallvec::SmallVec;

mod control;
mod horn;
mod profile;

/// A waypoint counts as reached within this distance.
const WAYPOINT_REACHED_DIST: f64 = 2.0;

/// A pooled vehicle.
///
/// Vehicles are created once and toggled between active and inactive as
/// they are spawned and retired.
#[derive(Clone, Debug)]
pub struct Vehicle {
    /// The vehicle's ID
    id: VehicleId,
    kind: VehicleKind,
    profile: BehaviourProfile,
    /// Whether the vehicle is driving in the scene.
    active: bool,
    /// Whether the vehicle was spawned and has not been ticked yet.
    fresh: bool,
    /// The pose reported by the world at the start of the tick.
    kin: Kinematics,
    /// The path of the current run.
    path: Path,
    /// The index of the node being driven towards.
    node: usize,
    /// The route the path was built from.
    route: Option<RouteId>,
    /// The spawn point of the current run.
    spawn_point: Option<SpawnPointId>,
    light: Option<TrafficLightId>,
    zebra_crossing: Option<ZebraCrossingId>,
    give_way: SmallVec<[GiveWayId; 2]>,
    /// Whether the vehicle turns on this path.
    will_turn: bool,
    /// Whether the vehicle is inside a turning zone.
    waiting_to_turn: bool,
    /// The slow zone the vehicle is inside, and its speed modifier.
    slow_zone: Option<(SlowZoneId, f64)>,
    /// The stopping distance at red lights for this run.
    traffic_dist: f64,
    /// The speed cap in effect.
    current_max_speed: f64,
    /// The clamped steering angle in degrees.
    steer_angle: f64,
    flags: BrakeFlags,
    state: BrakingState,
    output: ControlOutput,
    indicators: TurnIndicators,
    horn: Horn,
}

impl Vehicle {
    /// Creates an inactive vehicle.
    pub(crate) fn new(id: VehicleId, kind: VehicleKind, profile: BehaviourProfile) -> Self {
        Self {
            id,
            kind,
            profile,
            active: false,
            fresh: false,
            kin: Kinematics::default(),
            path: Path::default(),
            node: 0,
            route: None,
            spawn_point: None,
            light: None,
            zebra_crossing: None,
            give_way: SmallVec::new(),
            will_turn: false,
            waiting_to_turn: false,
            slow_zone: None,
            traffic_dist: profile.traffic_dist,
            current_max_speed: profile.max_speed,
            steer_angle: 0.0,
            flags: BrakeFlags::default(),
            state: BrakingState::Drive,
            output: ControlOutput::default(),
            indicators: TurnIndicators::default(),
            horn: Horn::default(),
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn kind(&self) -> VehicleKind {
        self.kind
    }

    pub fn profile(&self) -> &BehaviourProfile {
        &self.profile
    }

    /// Whether the vehicle is driving in the scene.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the vehicle was just spawned and has not been ticked.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// The pose as of the last tick.
    pub fn kinematics(&self) -> &Kinematics {
        &self.kin
    }

    /// The path of the current run.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The index of the node the vehicle is driving towards.
    pub fn node_index(&self) -> usize {
        self.node
    }

    pub fn route(&self) -> Option<RouteId> {
        self.route
    }

    pub fn spawn_point(&self) -> Option<SpawnPointId> {
        self.spawn_point
    }

    /// The traffic light the vehicle obeys.
    pub fn light(&self) -> Option<TrafficLightId> {
        self.light
    }

    /// The zebra crossing on the vehicle's path.
    pub fn zebra_crossing(&self) -> Option<ZebraCrossingId> {
        self.zebra_crossing
    }

    /// The give-way zones checked while waiting to turn.
    pub fn give_way(&self) -> &[GiveWayId] {
        &self.give_way
    }

    pub fn will_turn(&self) -> bool {
        self.will_turn
    }

    pub fn is_waiting_to_turn(&self) -> bool {
        self.waiting_to_turn
    }

    /// The speed modifier of the slow zone the vehicle is in.
    pub fn slow_zone_modifier(&self) -> Option<f64> {
        self.slow_zone.map(|(_, modifier)| modifier)
    }

    /// The stopping distance at red lights for this run.
    pub fn traffic_dist(&self) -> f64 {
        self.traffic_dist
    }

    /// The speed cap in effect.
    pub fn current_max_speed(&self) -> f64 {
        self.current_max_speed
    }

    /// The steering angle in degrees.
    pub fn steer_angle(&self) -> f64 {
        self.steer_angle
    }

    /// The braking requests raised on the last tick.
    pub fn brake_flags(&self) -> BrakeFlags {
        self.flags
    }

    pub fn braking_state(&self) -> BrakingState {
        self.state
    }

    /// The actuator commands of the last tick.
    pub fn output(&self) -> &ControlOutput {
        &self.output
    }

    pub fn indicators(&self) -> &TurnIndicators {
        &self.indicators
    }

    /// Configures the vehicle for a new run starting at a spawn point and
    /// activates it.
    pub(crate) fn activate(
        &mut self,
        point_id: SpawnPointId,
        point: &SpawnPointAttributes,
        path: Path,
        traffic_dist: f64,
    ) {
        self.active = true;
        self.fresh = true;
        self.kin = Kinematics::at_rest(point.position, point.heading);
        self.path = path;
        self.node = 0;
        self.route = point.route;
        self.spawn_point = Some(point_id);
        self.light = point.light;
        self.zebra_crossing = point.zebra_crossing;
        self.give_way = point.give_way.iter().copied().collect();
        self.will_turn = point.will_turn;
        self.traffic_dist = traffic_dist;
        self.current_max_speed = self.profile.max_speed;
        self.clear_run_state();
    }

    /// Deactivates the vehicle and returns it to the pool.
    pub(crate) fn retire(&mut self) {
        self.active = false;
        self.fresh = false;
        self.node = 0;
        self.clear_run_state();
    }

    fn clear_run_state(&mut self) {
        self.waiting_to_turn = false;
        self.slow_zone = None;
        self.steer_angle = 0.0;
        self.flags = BrakeFlags::default();
        self.state = BrakingState::Drive;
        self.output = ControlOutput::default();
        self.indicators.clear();
        self.horn.reset();
    }

    /// Takes the pose reported by the world for this tick.
    pub(crate) fn sync(&mut self, kin: Kinematics) {
        self.kin = kin;
        self.fresh = false;
    }

    /// Whether the vehicle has left the playable area.
    pub(crate) fn is_out_of_bounds(&self) -> bool {
        self.profile
            .max_height
            .map_or(false, |max| self.kin.position.y > max)
    }

    /// Steers towards the current waypoint.
    pub(crate) fn apply_steer(&mut self) {
        let Some(target) = self.path.node(self.node) else {
            return;
        };
        let max = self.profile.max_steer_angle;
        self.steer_angle = heading_error(self.kin.forward, self.kin.position, target.position)
            .clamp(-max, max);
    }

    /// Advances to the next waypoint once the current one is reached and
    /// applies its turn markers.
    ///
    /// Returns `true` if that completed the path.
    pub(crate) fn check_waypoint(&mut self, now: f64) -> bool {
        let Some(target) = self.path.node(self.node) else {
            return false;
        };
        if self.kin.position.distance(target.position) >= WAYPOINT_REACHED_DIST {
            return false;
        }
        self.indicators.apply(target.markers, now);
        self.node += 1;
        self.path.is_complete(self.node)
    }

    /// Arbitrates the braking state from a perception snapshot and computes
    /// the actuator commands.
    ///
    /// Returns the new braking state if it changed.
    pub(crate) fn drive(&mut self, snapshot: &PerceptionSnapshot) -> Option<BrakingState> {
        if let Some(cap) = snapshot.slow_zone_cap {
            self.current_max_speed = cap;
        }
        self.flags = snapshot.assess(self.traffic_dist);
        let state = BrakingState::arbitrate(self.flags);
        self.output = ControlOutput::for_state(
            state,
            &self.profile,
            snapshot.speed,
            self.current_max_speed,
            self.steer_angle,
        );
        let prev = std::mem::replace(&mut self.state, state);
        (prev != state).then_some(state)
    }

    /// Updates the horn: a vehicle facing a green light with a pedestrian in
    /// front of it screeches and honks.
    pub(crate) fn sound_horn(&mut self, now: f64, snapshot: &PerceptionSnapshot) -> ArrayVec<HornCue, 2> {
        let green = snapshot
            .light
            .map_or(false, |light| light.colour == Colour::Green);
        let held = green && snapshot.sees_pedestrian();
        self.horn.update(now, held, self.profile.horn_interval)
    }

    pub(crate) fn set_waiting_to_turn(&mut self, waiting: bool) {
        self.waiting_to_turn = waiting;
    }

    pub(crate) fn enter_slow_zone(&mut self, zone: SlowZoneId, modifier: f64) {
        self.slow_zone = Some((zone, modifier));
    }

    /// Leaves a slow zone. Turning vehicles get their full speed cap back.
    pub(crate) fn exit_slow_zone(&mut self, zone: SlowZoneId) {
        if self.slow_zone.map_or(false, |(id, _)| id == zone) {
            self.slow_zone = None;
        }
        if self.will_turn {
            self.current_max_speed = self.profile.max_speed;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::math::{Point3d, Vector3d};
    use crate::perception::LightObservation;
    use crate::waypoint::{PathNode, TurnMarkers};
    use crate::WaypointId;
    use assert_approx_eq::assert_approx_eq;
    use slotmap::KeyData;

    fn vehicle_on(points: &[(f64, f64)]) -> Vehicle {
        let mut vehicle = Vehicle::new(
            VehicleId::default(),
            VehicleKind::Autonomous,
            BehaviourProfile::for_kind(VehicleKind::Autonomous),
        );
        let nodes = points
            .iter()
            .enumerate()
            .map(|(i, (x, z))| PathNode {
                id: WaypointId::from(KeyData::from_ffi(i as u64 + 1)),
                position: Point3d::new(*x, 0.0, *z),
                markers: if i == 0 { TurnMarkers::RIGHT } else { TurnMarkers::NONE },
            })
            .collect();
        let point = SpawnPointAttributes::at(Point3d::new(0.0, 0.0, 0.0), Vector3d::unit_z());
        vehicle.activate(SpawnPointId::default(), &point, Path::from_nodes(nodes), 1.5);
        vehicle
    }

    #[test]
    fn steering_is_clamped() {
        let mut vehicle = vehicle_on(&[(0.0, -10.0)]);
        vehicle.apply_steer();
        assert_approx_eq!(vehicle.steer_angle().abs(), 60.0);

        let mut vehicle = vehicle_on(&[(10.0, 10.0)]);
        vehicle.apply_steer();
        assert_approx_eq!(vehicle.steer_angle(), 45.0);
    }

    #[test]
    fn retires_after_last_waypoint() {
        let mut vehicle = vehicle_on(&[(0.0, 1.0), (0.0, 20.0)]);
        assert!(!vehicle.check_waypoint(0.0));
        assert_eq!(vehicle.node_index(), 1);
        assert!(vehicle.indicators().right_on());

        assert!(!vehicle.check_waypoint(0.1));
        let mut kin = *vehicle.kinematics();
        kin.position = Point3d::new(0.0, 0.0, 19.0);
        vehicle.sync(kin);
        assert!(vehicle.check_waypoint(0.2));

        vehicle.retire();
        assert_eq!(vehicle.node_index(), 0);
        assert!(!vehicle.is_active());
    }

    #[test]
    fn drive_reports_state_changes() {
        let mut vehicle = vehicle_on(&[(0.0, 20.0)]);
        let red = PerceptionSnapshot {
            light: Some(LightObservation {
                colour: Colour::Red,
                stop_distance: 1.0,
                green_man: false,
            }),
            ..Default::default()
        };
        assert_eq!(vehicle.drive(&red), Some(BrakingState::EmergencyBrake));
        assert_eq!(vehicle.drive(&red), None);
        assert_eq!(vehicle.output().brake_torque, 6800.0);
        assert_eq!(vehicle.drive(&PerceptionSnapshot::default()), Some(BrakingState::Drive));
        assert_eq!(vehicle.output().motor_torque, 200.0);
    }

    #[test]
    fn slow_zone_caps_speed_until_exit() {
        let mut vehicle = vehicle_on(&[(0.0, 20.0)]);
        vehicle.will_turn = true;
        let snapshot = PerceptionSnapshot {
            speed: 30.0,
            slow_zone_cap: Some(20.0),
            ..Default::default()
        };
        assert_eq!(vehicle.drive(&snapshot), Some(BrakingState::SlowDown));
        assert_approx_eq!(vehicle.current_max_speed(), 20.0);

        vehicle.exit_slow_zone(SlowZoneId::default());
        assert_approx_eq!(vehicle.current_max_speed(), 50.0);
    }

    #[test]
    fn horn_needs_green_light_and_pedestrian() {
        let mut vehicle = vehicle_on(&[(0.0, 20.0)]);
        let mut snapshot = PerceptionSnapshot {
            light: Some(LightObservation {
                colour: Colour::Green,
                stop_distance: 5.0,
                green_man: false,
            }),
            ..Default::default()
        };
        assert!(vehicle.sound_horn(0.0, &snapshot).is_empty());
        snapshot.far.pedestrian = true;
        assert_eq!(vehicle.sound_horn(0.1, &snapshot).len(), 2);
    }
}
