#[cfg(feature = "debug")]
use crate::debug::take_debug_frame;
use crate::controller::{SignalTiming, TrafficLightController};
use crate::ehmi::{EhmiMode, LampState, VehiclePresentation};
use crate::events::{RetireReason, SimEvent};
use crate::light::{TrafficLight, TrafficLightAttributes};
use crate::math::{angle_between, Point3d, Vector3d};
use crate::perception::{PerceptionContext, WorldQuery};
use crate::record::{BrakeWatch, ExperimentLog, Recorder};
use crate::scheduler::{Scheduler, TimerToken};
use crate::spawn::{
    pick_eligible, CarPool, SpawnPoint, SpawnPointAttributes, SpawnRoll, SpawnSettings, SpawnTask,
    RETRY_DELAY,
};
use crate::trigger::{Contact, TriggerEvent, TriggerPhase, Volume};
use crate::vehicle::{BehaviourProfile, Vehicle, VehicleKind};
use crate::waypoint::WaypointNetwork;
use crate::zone::{GiveWayZone, SlowZone, ZebraCrossing};
use crate::{
    ControllerId, GiveWayId, GiveWaySet, LightSet, SlowZoneId, SpawnPointId, TrafficLightId,
    VehicleId, VehicleSet, ZebraCrossingId, ZebraSet,
};
use log::{debug, info, trace};
use rand::rngs::StdRng;
use rand::SeedableRng;
use slotmap::SlotMap;

/// The pedestrian-triggered spawn only fires for points outside this view
/// angle, in degrees.
const PEDESTRIAN_VIEW_ANGLE: f64 = 60.0;

/// A signalised crossing with pooled vehicles.
pub struct Simulation {
    /// The simulation time in s.
    time: f64,
    /// The current frame of simulation.
    frame: usize,
    /// The random source for spawns and driver behaviour.
    rng: StdRng,
    /// The authored routes.
    network: WaypointNetwork,
    /// The traffic lights.
    lights: LightSet,
    /// The traffic light controllers.
    controllers: SlotMap<ControllerId, TrafficLightController>,
    give_ways: GiveWaySet,
    zebras: ZebraSet,
    slow_zones: SlotMap<SlowZoneId, SlowZone>,
    spawn_points: SlotMap<SpawnPointId, SpawnPoint>,
    /// Every pooled vehicle, active or not.
    vehicles: VehicleSet,
    /// The pool order of the vehicles.
    pool: CarPool,
    /// The random spawn cadence, if enabled.
    spawn_settings: Option<SpawnSettings>,
    /// Deferred spawns.
    spawn_timers: Scheduler<SpawnTask>,
    /// The pending cadence roll.
    roll_timer: Option<TimerToken>,
    /// Events not yet drained.
    events: Vec<SimEvent>,
    /// Experiment measurements.
    recorder: Recorder,
    /// Debugging information from the previously simulated frame.
    #[cfg(feature = "debug")]
    debug: serde_json::Value,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl Simulation {
    /// Creates a new simulation.
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a simulation whose random draws are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            time: 0.0,
            frame: 0,
            rng,
            network: WaypointNetwork::new(),
            lights: LightSet::with_key(),
            controllers: SlotMap::with_key(),
            give_ways: GiveWaySet::with_key(),
            zebras: ZebraSet::with_key(),
            slow_zones: SlotMap::with_key(),
            spawn_points: SlotMap::with_key(),
            vehicles: VehicleSet::with_key(),
            pool: CarPool::default(),
            spawn_settings: None,
            spawn_timers: Scheduler::new(),
            roll_timer: None,
            events: vec![],
            recorder: Recorder::default(),
            #[cfg(feature = "debug")]
            debug: serde_json::Value::Null,
        }
    }

    /// The simulation time in s.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Gets the current simulation frame index.
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// The authored routes.
    pub fn network(&self) -> &WaypointNetwork {
        &self.network
    }

    /// The authored routes, for editing. Edits only affect vehicles spawned
    /// afterwards.
    pub fn network_mut(&mut self) -> &mut WaypointNetwork {
        &mut self.network
    }

    /// Adds a traffic light to the simulation.
    pub fn add_traffic_light(&mut self, attributes: &TrafficLightAttributes) -> TrafficLightId {
        self.lights.insert(TrafficLight::new(attributes))
    }

    /// Adds a controller that switches the given lights together and starts it.
    pub fn add_controller(&mut self, timing: SignalTiming, lights: &[TrafficLightId]) -> ControllerId {
        let mut controller = TrafficLightController::new(timing);
        for light in lights {
            controller.add_light(*light);
        }
        let events = controller.start(self.time, &mut self.lights);
        let id = self.controllers.insert(controller);
        self.events.extend(
            events
                .into_iter()
                .map(|event| SimEvent::Signal { controller: id, event }),
        );
        id
    }

    /// Registers or unregisters a controller as a button listener.
    pub fn set_button_listener(&mut self, controller: ControllerId, listening: bool) {
        if let Some(controller) = self.controllers.get_mut(controller) {
            if listening {
                controller.subscribe();
            } else {
                controller.unsubscribe();
            }
        }
    }

    /// Adds a give-way zone.
    pub fn add_give_way_zone(&mut self) -> GiveWayId {
        self.give_ways.insert(GiveWayZone::new())
    }

    /// Adds a zebra crossing.
    pub fn add_zebra_crossing(&mut self) -> ZebraCrossingId {
        self.zebras.insert(ZebraCrossing::new())
    }

    /// Adds a slow zone.
    pub fn add_slow_zone(&mut self, zone: SlowZone) -> SlowZoneId {
        self.slow_zones.insert(zone)
    }

    /// Adds a spawn point.
    pub fn add_spawn_point(&mut self, attributes: SpawnPointAttributes) -> SpawnPointId {
        self.spawn_points.insert(SpawnPoint::new(attributes))
    }

    /// Adds an inactive vehicle to the end of a pool.
    pub fn add_vehicle(&mut self, kind: VehicleKind, profile: BehaviourProfile) -> VehicleId {
        let id = self
            .vehicles
            .insert_with_key(|id| Vehicle::new(id, kind, profile));
        self.pool.push(kind, id);
        id
    }

    /// Adds `count` inactive vehicles with the default profile of their kind.
    pub fn add_vehicles(&mut self, kind: VehicleKind, count: usize) -> Vec<VehicleId> {
        let profile = BehaviourProfile::for_kind(kind);
        (0..count).map(|_| self.add_vehicle(kind, profile)).collect()
    }

    /// Enables the random spawn cadence, or disables it with `None`.
    pub fn set_spawn_settings(&mut self, settings: Option<SpawnSettings>) {
        if let Some(token) = self.roll_timer.take() {
            self.spawn_timers.cancel(token);
        }
        self.spawn_settings = settings;
        if settings.is_some() {
            self.roll_timer = Some(self.spawn_timers.schedule(self.time, SpawnTask::Roll));
        }
    }

    /// Forwards a trigger volume overlap reported by the host.
    pub fn notify(&mut self, event: TriggerEvent) {
        let inside = event.is_inside();
        match (event.volume, event.contact) {
            (Volume::GiveWay(id), Contact::Vehicle(vehicle)) => {
                if let Some(zone) = self.give_ways.get_mut(id) {
                    if inside && self.vehicles.get(vehicle).map_or(false, |v| v.is_active()) {
                        zone.enter(vehicle);
                    } else if !inside {
                        zone.exit(vehicle);
                    }
                }
            }
            (Volume::ZebraCrossing(id), Contact::Pedestrian) => {
                if let Some(zebra) = self.zebras.get_mut(id) {
                    zebra.set_occupied(inside);
                }
            }
            (Volume::SlowZone(id), Contact::Vehicle(vehicle)) => {
                let (Some(zone), Some(vehicle)) =
                    (self.slow_zones.get(id), self.vehicles.get_mut(vehicle))
                else {
                    return;
                };
                if inside {
                    vehicle.enter_slow_zone(id, zone.modifier);
                } else {
                    vehicle.exit_slow_zone(id);
                }
            }
            (Volume::TurningZone, Contact::Vehicle(vehicle)) => {
                if let Some(vehicle) = self.vehicles.get_mut(vehicle) {
                    vehicle.set_waiting_to_turn(inside);
                }
            }
            (Volume::SpawnPoint(id), Contact::Vehicle(_)) => {
                if let Some(point) = self.spawn_points.get_mut(id) {
                    point.set_blocked(inside);
                }
            }
            (Volume::Button, Contact::Hand) if event.phase == TriggerPhase::Enter => {
                self.press_button();
            }
            _ => {}
        }
    }

    /// Broadcasts a pedestrian button press to every listening controller.
    ///
    /// Returns `true` if a controller started a cycle because of it.
    pub fn press_button(&mut self) -> bool {
        let mut started = false;
        for (_, controller) in &mut self.controllers {
            started |= controller.press_button(self.time, &mut self.lights);
        }
        started
    }

    /// Spawns a vehicle of the given kind at a spawn point, using the first
    /// inactive vehicle of its pool.
    ///
    /// Returns `None` if the point does not exist or the pool is exhausted.
    pub fn spawn_car(&mut self, point: SpawnPointId, kind: VehicleKind) -> Option<VehicleId> {
        let Some(spawn_point) = self.spawn_points.get(point) else {
            trace!("Spawn point {point:?} does not exist");
            return None;
        };
        let Some(vehicle_id) = self.pool.first_free(kind, &self.vehicles) else {
            debug!("No inactive {kind:?} vehicle to spawn");
            return None;
        };

        let attrs = spawn_point.attributes();
        let path = attrs
            .route
            .map(|route| self.network.build_path(route))
            .unwrap_or_default();
        let vehicle = &mut self.vehicles[vehicle_id];
        let traffic_dist = vehicle.profile().sample_traffic_dist(&mut self.rng);
        vehicle.activate(point, attrs, path, traffic_dist);

        info!("Spawned {kind:?} vehicle {vehicle_id:?} at {point:?}");
        self.events.push(SimEvent::Spawned {
            vehicle: vehicle_id,
            kind,
            spawn_point: point,
        });
        Some(vehicle_id)
    }

    /// Spawns at a spawn point, or, if a vehicle blocks it, tries once more
    /// after a short delay.
    ///
    /// Returns the vehicle if it was spawned immediately.
    pub fn try_spawn_car(&mut self, point: SpawnPointId, kind: VehicleKind) -> Option<VehicleId> {
        let blocked = self.spawn_points.get(point)?.is_blocked();
        if blocked {
            debug!("Spawn point {point:?} is blocked; retrying in {RETRY_DELAY}s");
            self.spawn_timers
                .schedule_in(self.time, RETRY_DELAY, SpawnTask::Retry { point, kind });
            return None;
        }
        self.spawn_car(point, kind)
    }

    /// Starts a batch of `count` vehicles at random eligible spawn points.
    pub fn spawn_cars(&mut self, kind: VehicleKind, count: usize) {
        if count > 0 {
            self.spawn_timers.schedule(
                self.time,
                SpawnTask::Batch {
                    kind,
                    remaining: count,
                },
            );
        }
    }

    /// Spawns an autonomous vehicle for the pedestrian at a spawn point,
    /// provided the point is out of the pedestrian's view. Fires at most
    /// once per point.
    ///
    /// The vehicle's first brake starts the crossing measurements, logging
    /// its distance to `crossing`.
    pub fn spawn_for_pedestrian(
        &mut self,
        point: SpawnPointId,
        eye: Point3d,
        view: Vector3d,
        crossing: Point3d,
    ) -> Option<VehicleId> {
        let spawn_point = self.spawn_points.get(point)?;
        if spawn_point.pedestrian_spawned() {
            return None;
        }
        if angle_between(spawn_point.attributes().position - eye, view) <= PEDESTRIAN_VIEW_ANGLE {
            return None;
        }
        let vehicle = self.spawn_car(point, VehicleKind::Autonomous);
        self.spawn_points[point].mark_pedestrian_spawned();
        if let Some(vehicle) = vehicle {
            self.recorder.brake_watch = Some(BrakeWatch { vehicle, crossing });
        }
        vehicle
    }

    /// Returns every vehicle to its pool.
    pub fn disable_all_cars(&mut self) {
        let active: Vec<VehicleId> = self
            .vehicles
            .iter()
            .filter(|(_, v)| v.is_active())
            .map(|(id, _)| id)
            .collect();
        for id in active {
            self.retire_vehicle(id, RetireReason::Disabled);
        }
        self.spawn_timers.clear();
        self.roll_timer = None;
        if self.spawn_settings.is_some() {
            self.roll_timer = Some(self.spawn_timers.schedule(self.time, SpawnTask::Roll));
        }
    }

    /// Starts logging a scenario.
    pub fn begin_scenario(&mut self, number: u32, controlled: bool) {
        self.recorder.begin_scenario(self.time, number, controlled);
    }

    /// Stops the scenario clock and logs the scenario duration.
    pub fn end_scenario(&mut self) -> Option<f64> {
        self.recorder.end_scenario(self.time)
    }

    /// Measures the pedestrian's reaction to a light's green man.
    pub fn watch_reaction(&mut self, light: TrafficLightId) {
        self.recorder.reaction.watch(light);
    }

    /// The pedestrian stepped onto the road. Stops the reaction timer and
    /// starts the crossing timer.
    pub fn pedestrian_started_crossing(&mut self) {
        let recorder = &mut self.recorder;
        recorder.reaction.stop(self.time, &mut recorder.log);
        recorder.crossing.start(self.time);
    }

    /// The pedestrian reached the far side. Logs the crossing time.
    pub fn pedestrian_finished_crossing(&mut self) -> Option<f64> {
        let recorder = &mut self.recorder;
        recorder.crossing.stop(self.time, &mut recorder.log)
    }

    /// The experiment log.
    pub fn log(&self) -> &ExperimentLog {
        &self.recorder.log
    }

    /// The experiment log, for entries logged by the host.
    pub fn log_mut(&mut self) -> &mut ExperimentLog {
        &mut self.recorder.log
    }

    /// Takes the experiment log, leaving an empty one.
    pub fn take_log(&mut self) -> ExperimentLog {
        std::mem::take(&mut self.recorder.log)
    }

    /// Takes the events emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }

    /// Advances the simulation by `dt` seconds, reading vehicle poses and
    /// sensors from `world`.
    pub fn step(&mut self, dt: f64, world: &dyn WorldQuery) {
        self.time += dt;
        self.frame += 1;

        self.update_signals();
        self.update_spawns();
        self.update_vehicles(world);
        self.recorder
            .update(self.time, dt, &self.vehicles, &self.lights);

        for light in self.lights.values() {
            light.debug_stop_line();
        }

        #[cfg(feature = "debug")]
        {
            self.debug = take_debug_frame();
        }
    }

    /// Returns an iterator over all the pooled vehicles.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    /// Returns an iterator over the active vehicles.
    pub fn active_vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values().filter(|v| v.is_active())
    }

    /// Gets a reference to the vehicle with the given ID.
    pub fn get_vehicle(&self, vehicle_id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(vehicle_id)
    }

    /// Returns an iterator over all the traffic lights in the simulation.
    pub fn iter_lights(&self) -> impl Iterator<Item = (TrafficLightId, &TrafficLight)> {
        self.lights.iter()
    }

    /// Gets a reference to the light with the given ID.
    pub fn get_light(&self, light_id: TrafficLightId) -> Option<&TrafficLight> {
        self.lights.get(light_id)
    }

    pub fn get_controller(&self, id: ControllerId) -> Option<&TrafficLightController> {
        self.controllers.get(id)
    }

    pub fn get_spawn_point(&self, id: SpawnPointId) -> Option<&SpawnPoint> {
        self.spawn_points.get(id)
    }

    pub fn get_give_way_zone(&self, id: GiveWayId) -> Option<&GiveWayZone> {
        self.give_ways.get(id)
    }

    pub fn get_zebra_crossing(&self, id: ZebraCrossingId) -> Option<&ZebraCrossing> {
        self.zebras.get(id)
    }

    /// What a vehicle's external displays show under an eHMI mode.
    pub fn vehicle_presentation(&self, id: VehicleId, mode: EhmiMode) -> Option<VehiclePresentation> {
        self.vehicles
            .get(id)
            .map(|vehicle| VehiclePresentation::of(vehicle, mode, self.time))
    }

    /// Which lamps of a light are lit.
    pub fn lamp_state(&self, id: TrafficLightId) -> Option<LampState> {
        self.lights.get(id).map(LampState::of)
    }

    /// Gets the debugging information for the previously simulated frame as JSON array.
    #[cfg(feature = "debug")]
    pub fn debug(&mut self) -> serde_json::Value {
        self.debug.clone()
    }

    /// Runs the controllers.
    fn update_signals(&mut self) {
        for (id, controller) in &mut self.controllers {
            let events = controller.step(self.time, &mut self.lights);
            self.events.extend(
                events
                    .into_iter()
                    .map(|event| SimEvent::Signal { controller: id, event }),
            );
        }
    }

    /// Runs the deferred spawns that are due.
    fn update_spawns(&mut self) {
        while let Some((at, task)) = self.spawn_timers.pop_due(self.time) {
            self.run_spawn_task(at, task);
        }
    }

    fn run_spawn_task(&mut self, at: f64, task: SpawnTask) {
        match task {
            SpawnTask::Roll => {
                self.roll_timer = None;
                let Some(settings) = self.spawn_settings else {
                    return;
                };
                let next_roll_in = match settings.roll(&mut self.rng) {
                    SpawnRoll::Batch { count, next_roll_in } => {
                        self.run_batch_step(at, settings.kind, count);
                        next_roll_in
                    }
                    SpawnRoll::Wait { next_roll_in } => next_roll_in,
                };
                self.roll_timer = Some(self.spawn_timers.schedule(at + next_roll_in, SpawnTask::Roll));
            }
            SpawnTask::Batch { kind, remaining } => self.run_batch_step(at, kind, remaining),
            SpawnTask::Retry { point, kind } => {
                self.spawn_car(point, kind);
            }
        }
    }

    /// Spawns one vehicle of a batch and schedules the next. A batch stops
    /// early when no spawn point is eligible or the pool is exhausted.
    fn run_batch_step(&mut self, at: f64, kind: VehicleKind, remaining: usize) {
        if remaining == 0 {
            return;
        }
        let Some(point) = pick_eligible(self.spawn_points.iter(), &mut self.rng) else {
            debug!("No spawn point available; {remaining} spawns abandoned");
            return;
        };
        if self.spawn_car(point, kind).is_none() {
            debug!("Pool exhausted; {} spawns abandoned", remaining - 1);
            return;
        }
        if remaining > 1 {
            let spacing = self.spawn_settings.unwrap_or_default().spawn_time;
            self.spawn_timers.schedule(
                at + spacing,
                SpawnTask::Batch {
                    kind,
                    remaining: remaining - 1,
                },
            );
        }
    }

    /// Runs the control loop of every active vehicle: sync, steering,
    /// waypoint progress, perception, braking arbitration, output and horn.
    fn update_vehicles(&mut self, world: &dyn WorldQuery) {
        let ctx = PerceptionContext {
            world,
            lights: &self.lights,
            give_ways: &self.give_ways,
            zebras: &self.zebras,
        };
        let mut retired = vec![];

        for (id, vehicle) in &mut self.vehicles {
            if !vehicle.is_active() {
                continue;
            }
            let Some(kin) = world.kinematics(id) else {
                trace!("No body for vehicle {id:?}; skipping");
                continue;
            };
            vehicle.sync(kin);

            if vehicle.is_out_of_bounds() {
                retired.push((id, RetireReason::OutOfBounds));
                continue;
            }

            vehicle.apply_steer();
            if vehicle.check_waypoint(self.time) {
                retired.push((id, RetireReason::PathComplete));
                continue;
            }

            let snapshot = ctx.observe(vehicle);
            if let Some(state) = vehicle.drive(&snapshot) {
                self.events
                    .push(SimEvent::BrakingChanged { vehicle: id, state });
            }
            for cue in vehicle.sound_horn(self.time, &snapshot) {
                self.events.push(SimEvent::Horn { vehicle: id, cue });
            }
        }

        for (id, reason) in retired {
            self.retire_vehicle(id, reason);
        }
    }

    /// Returns a vehicle to its pool.
    fn retire_vehicle(&mut self, id: VehicleId, reason: RetireReason) {
        let Some(vehicle) = self.vehicles.get_mut(id) else {
            return;
        };
        vehicle.retire();
        for zone in self.give_ways.values_mut() {
            zone.exit(id);
        }
        info!("Retired vehicle {id:?} ({reason:?})");
        self.events.push(SimEvent::Retired {
            vehicle: id,
            reason,
        });
    }
}
