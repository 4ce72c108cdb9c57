use crate::debug::debug_line;
use crate::light::Colour;
use crate::math::{normalize_or_zero, rotate_about_up, Point3d, Vector3d};
use crate::vehicle::{BrakeFlags, Vehicle};
use crate::{GiveWaySet, LightSet, VehicleId, ZebraSet};
use arrayvec::ArrayVec;
use cgmath::prelude::*;
use log::trace;
use std::str::FromStr;

/// Distance from the vehicle's centre to the origin of the forward probes.
const PROBE_FORWARD_OFFSET: f64 = 2.0;

/// Lateral offset of the side probes, half the vehicle's width.
const PROBE_HALF_WIDTH: f64 = 0.95;

/// Distance from the vehicle's centre to its front bumper.
pub const HALF_VEHICLE_LENGTH: f64 = 2.4;

/// Category tag of a world object, as reported by casts and trigger volumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectTag {
    AutoCar,
    NormalCar,
    Player,
    ZebraCrossing,
    Hand,
    TrafficLightButton,
    Other,
}

impl ObjectTag {
    /// Whether the tag belongs to a vehicle.
    pub fn is_vehicle(self) -> bool {
        matches!(self, Self::AutoCar | Self::NormalCar)
    }

    /// The scene tag name.
    pub fn name(self) -> &'static str {
        match self {
            Self::AutoCar => "Auto Car",
            Self::NormalCar => "Normal Car",
            Self::Player => "Player",
            Self::ZebraCrossing => "ZebraCrossing",
            Self::Hand => "Hand",
            Self::TrafficLightButton => "Traffic Light Button",
            Self::Other => "Untagged",
        }
    }
}

impl FromStr for ObjectTag {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Auto Car" => Self::AutoCar,
            "Normal Car" => Self::NormalCar,
            "Player" => Self::Player,
            "ZebraCrossing" => Self::ZebraCrossing,
            "Hand" => Self::Hand,
            "Traffic Light Button" => Self::TrafficLightButton,
            _ => Self::Other,
        })
    }
}

/// The result of a ray cast.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Distance from the ray origin to the hit.
    pub distance: f64,
    /// The tag of the object hit.
    pub tag: ObjectTag,
    /// The vehicle hit, if the object is a pooled vehicle.
    pub object: Option<VehicleId>,
}

/// One of the two presence sensors in front of a vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorZone {
    Near,
    Far,
}

/// What a presence sensor currently overlaps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ZoneContact {
    /// A pedestrian is inside the zone.
    pub pedestrian: bool,
    /// The zone overlaps a zebra crossing.
    pub zebra_crossing: bool,
}

/// The pose and velocity of a vehicle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Kinematics {
    /// The world space position of the vehicle's centre.
    pub position: Point3d,
    /// A unit vector along the vehicle's heading.
    pub forward: Vector3d,
    /// A unit vector pointing to the vehicle's right.
    pub right: Vector3d,
    /// The velocity.
    pub velocity: Vector3d,
}

impl Kinematics {
    /// A stationary vehicle at `position` facing along `heading`.
    pub fn at_rest(position: Point3d, heading: Vector3d) -> Self {
        let forward = normalize_or_zero(heading);
        Self {
            position,
            forward,
            right: Vector3d::new(forward.z, 0.0, -forward.x),
            velocity: Vector3d::zero(),
        }
    }

    /// The speed metric used by every threshold in the control loop: the
    /// squared magnitude of the velocity.
    pub fn speed(&self) -> f64 {
        self.velocity.magnitude2()
    }
}

impl Default for Kinematics {
    fn default() -> Self {
        Self::at_rest(Point3d::origin(), Vector3d::unit_z())
    }
}

/// The per-tick world interface implemented by the host scene.
pub trait WorldQuery {
    /// The current pose of a vehicle, or `None` if the scene has no body for it.
    fn kinematics(&self, vehicle: VehicleId) -> Option<Kinematics>;

    /// Casts a ray, ignoring trigger volumes, and returns the nearest hit
    /// within `max_distance`.
    fn raycast(&self, origin: Point3d, direction: Vector3d, max_distance: f64) -> Option<RayHit>;

    /// What one of a vehicle's presence sensors overlaps.
    fn zone_contact(&self, vehicle: VehicleId, zone: SensorZone) -> ZoneContact;
}

/// A vehicle's view of its assigned traffic light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightObservation {
    /// The colour shown.
    pub colour: Colour,
    /// Signed distance from the front of the vehicle to the stop line.
    /// Negative once the line has been passed.
    pub stop_distance: f64,
    /// Whether the pedestrian signal shows a green man.
    pub green_man: bool,
}

/// Everything the control core needs to know about the world for one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PerceptionSnapshot {
    /// The speed metric.
    pub speed: f64,
    /// The length of the forward probes.
    pub braking_distance: f64,
    /// Distance to the nearest vehicle hit by a forward probe.
    pub obstacle_distance: Option<f64>,
    /// The near presence sensor.
    pub near: ZoneContact,
    /// The far presence sensor.
    pub far: ZoneContact,
    /// Whether the assigned zebra crossing has a pedestrian on it.
    /// `None` if no crossing is assigned.
    pub zebra_occupied: Option<bool>,
    /// The assigned traffic light, if any.
    pub light: Option<LightObservation>,
    /// Whether another vehicle occupies a give-way zone.
    /// `None` unless the vehicle is waiting to turn.
    pub give_way_blocked: Option<bool>,
    /// The reduced speed cap imposed by a slow zone, if one applies.
    pub slow_zone_cap: Option<f64>,
}

/// The length of the forward probes for a given speed metric.
pub fn braking_distance(speed: f64) -> f64 {
    speed * 0.06 + 3.0
}

/// Signed distance from the front of a vehicle at `vehicle_pos` to the stop
/// line of a light at `light_pos`, measured along the light's lateral axis.
pub fn stop_line_distance(
    light_pos: Point3d,
    light_axis: Vector3d,
    stop_line_offset: f64,
    vehicle_pos: Point3d,
) -> f64 {
    (light_pos - vehicle_pos).dot(light_axis) - stop_line_offset - HALF_VEHICLE_LENGTH
}

/// The state shared by every vehicle's perception during one tick.
pub(crate) struct PerceptionContext<'a> {
    pub world: &'a dyn WorldQuery,
    pub lights: &'a LightSet,
    pub give_ways: &'a GiveWaySet,
    pub zebras: &'a ZebraSet,
}

impl PerceptionContext<'_> {
    /// Builds the snapshot for a vehicle whose kinematics are up to date.
    pub fn observe(&self, vehicle: &Vehicle) -> PerceptionSnapshot {
        let kin = vehicle.kinematics();
        let speed = kin.speed();
        let braking_distance = braking_distance(speed);

        let light = vehicle.light().and_then(|id| {
            let light = self.lights.get(id);
            if light.is_none() {
                trace!("Vehicle {:?} references a missing light", vehicle.id());
            }
            light.map(|light| LightObservation {
                colour: light.colour(),
                stop_distance: light.stop_line_distance(kin.position),
                green_man: light.green_man(),
            })
        });

        let zebra_occupied = vehicle
            .zebra_crossing()
            .and_then(|id| self.zebras.get(id))
            .map(|zebra| zebra.is_occupied());

        let give_way_blocked = vehicle.is_waiting_to_turn().then(|| {
            vehicle
                .give_way()
                .iter()
                .filter_map(|id| self.give_ways.get(*id))
                .any(|zone| zone.blocks(vehicle.id()))
        });

        let slow_zone_cap = vehicle
            .slow_zone_modifier()
            .filter(|_| vehicle.will_turn())
            .map(|modifier| vehicle.profile().slow_speed() * modifier)
            .filter(|cap| speed > *cap);

        PerceptionSnapshot {
            speed,
            braking_distance,
            obstacle_distance: self.cast_probes(vehicle, braking_distance),
            near: self.world.zone_contact(vehicle.id(), SensorZone::Near),
            far: self.world.zone_contact(vehicle.id(), SensorZone::Far),
            zebra_occupied,
            light,
            give_way_blocked,
            slow_zone_cap,
        }
    }

    /// Casts the centre, left and right probes along the steer-adjusted
    /// heading and returns the nearest distance to another vehicle.
    fn cast_probes(&self, vehicle: &Vehicle, max_distance: f64) -> Option<f64> {
        let kin = vehicle.kinematics();
        let direction = rotate_about_up(kin.forward, vehicle.steer_angle());
        let centre = kin.position + kin.forward * PROBE_FORWARD_OFFSET;
        let origins = [
            centre,
            centre + kin.right * PROBE_HALF_WIDTH,
            centre - kin.right * PROBE_HALF_WIDTH,
        ];

        let hits: ArrayVec<RayHit, 3> = origins
            .iter()
            .inspect(|origin| {
                debug_line("probe", **origin, **origin + direction * max_distance)
            })
            .filter_map(|origin| self.world.raycast(*origin, direction, max_distance))
            .filter(|hit| hit.tag.is_vehicle() && hit.object != Some(vehicle.id()))
            .collect();

        hits.iter()
            .map(|hit| hit.distance)
            .min_by(|a, b| a.total_cmp(b))
    }
}

impl PerceptionSnapshot {
    /// Runs every braking rule. Rules only ever raise flags, so the result
    /// does not depend on the order they run in.
    pub fn assess(&self, traffic_dist: f64) -> BrakeFlags {
        let mut flags = BrakeFlags::default();
        self.check_obstacle(&mut flags);
        self.check_give_way(&mut flags);
        self.check_light(traffic_dist, &mut flags);
        self.check_zebra_crossing(&mut flags);
        self.check_pedestrian(&mut flags);
        self.check_slow_zone(&mut flags);
        flags
    }

    /// Another vehicle ahead within the braking distance.
    pub fn check_obstacle(&self, flags: &mut BrakeFlags) {
        if let Some(distance) = self.obstacle_distance {
            if distance < self.braking_distance {
                flags.slow_down = true;
            }
            if distance < 0.5 * self.braking_distance {
                flags.emergency_brake = true;
            }
        }
    }

    /// A pedestrian inside the near or far sensor.
    pub fn check_pedestrian(&self, flags: &mut BrakeFlags) {
        if self.near.pedestrian {
            flags.emergency_brake = true;
        } else if self.far.pedestrian {
            flags.slow_down = true;
        }
    }

    /// An occupied zebra crossing overlapped by a sensor.
    pub fn check_zebra_crossing(&self, flags: &mut BrakeFlags) {
        if self.zebra_occupied != Some(true) {
            return;
        }
        if self.near.zebra_crossing {
            flags.emergency_brake = true;
        } else if self.far.zebra_crossing {
            flags.slow_down = true;
        }
    }

    /// Yellow and red lights ahead of the stop line.
    pub fn check_light(&self, traffic_dist: f64, flags: &mut BrakeFlags) {
        let Some(light) = self.light else {
            return;
        };
        let d = light.stop_distance;
        if d < 0.0 {
            return;
        }
        match light.colour {
            Colour::Yellow => {
                if d <= 2.0 * traffic_dist {
                    flags.slow_down = true;
                }
            }
            Colour::Red => {
                if d <= 2.0 * traffic_dist {
                    flags.slow_down = true;
                }
                if d <= traffic_dist {
                    flags.emergency_brake = true;
                }
            }
            Colour::Green => {}
        }
    }

    /// Yield while another vehicle occupies a give-way zone.
    pub fn check_give_way(&self, flags: &mut BrakeFlags) {
        if self.give_way_blocked == Some(true) {
            flags.slow_down = true;
        }
    }

    /// Brake down to a slow zone's speed cap.
    pub fn check_slow_zone(&self, flags: &mut BrakeFlags) {
        if self.slow_zone_cap.is_some() {
            flags.slow_down = true;
        }
    }

    /// Whether any pedestrian is seen by either sensor.
    pub fn sees_pedestrian(&self) -> bool {
        self.near.pedestrian || self.far.pedestrian
    }
}
