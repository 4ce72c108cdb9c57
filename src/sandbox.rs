//! A flat-ground reference world that stands in for the host scene.
//!
//! Vehicles are point masses driven by the torque and steering commands of
//! the previous tick. Bodies are discs for ray casts, the sensors are
//! rectangles ahead of each vehicle and trigger volumes are axis-aligned
//! boxes on the ground plane.

use crate::events::SimEvent;
use crate::math::{project_on_axis, rotate_about_up, Point3d, Vector3d};
use crate::perception::{Kinematics, ObjectTag, RayHit, SensorZone, WorldQuery, ZoneContact};
use crate::simulation::Simulation;
use crate::trigger::{Contact, TriggerEvent, TriggerPhase, Volume};
use crate::VehicleId;
use cgmath::prelude::*;
use itertools::iproduct;
use slotmap::SecondaryMap;
use std::collections::HashSet;

/// Acceleration per unit of motor torque in m/s².
const MOTOR_GAIN: f64 = 0.02;
/// Deceleration per unit of brake torque in m/s².
const BRAKE_GAIN: f64 = 0.004;
/// Distance between the axles in m.
const WHEELBASE: f64 = 2.6;
/// Radius of a vehicle body as seen by ray casts in m.
const BODY_RADIUS: f64 = 1.2;
/// Longitudinal extent of the near sensor ahead of the vehicle centre.
const NEAR_RANGE: (f64, f64) = (1.5, 7.0);
/// Longitudinal extent of the far sensor.
const FAR_RANGE: (f64, f64) = (7.0, 16.0);
/// Half the width of both sensors.
const SENSOR_HALF_WIDTH: f64 = 2.0;

/// A box on the ground plane. Heights are ignored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroundBox {
    pub min: Point3d,
    pub max: Point3d,
}

impl GroundBox {
    pub fn new(a: Point3d, b: Point3d) -> Self {
        Self {
            min: Point3d::new(a.x.min(b.x), 0.0, a.z.min(b.z)),
            max: Point3d::new(a.x.max(b.x), 0.0, a.z.max(b.z)),
        }
    }

    /// A box of the given half extents around a centre.
    pub fn around(centre: Point3d, half_x: f64, half_z: f64) -> Self {
        Self::new(
            Point3d::new(centre.x - half_x, 0.0, centre.z - half_z),
            Point3d::new(centre.x + half_x, 0.0, centre.z + half_z),
        )
    }

    pub fn contains(&self, p: Point3d) -> bool {
        (self.min.x..=self.max.x).contains(&p.x) && (self.min.z..=self.max.z).contains(&p.z)
    }
}

#[derive(Clone, Copy, Debug)]
struct Body {
    kin: Kinematics,
    tag: ObjectTag,
}

/// The reference world.
#[derive(Clone, Debug, Default)]
pub struct FlatWorld {
    bodies: SecondaryMap<VehicleId, Body>,
    pedestrian: Option<Point3d>,
    triggers: Vec<(Volume, GroundBox)>,
    /// The (trigger, contact) pairs overlapping after the last tick.
    overlaps: HashSet<(usize, Contact)>,
}

impl FlatWorld {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a trigger volume. Zebra crossing volumes are also what the
    /// vehicle sensors detect as crossings.
    pub fn add_trigger(&mut self, volume: Volume, area: GroundBox) {
        self.triggers.push((volume, area));
    }

    /// Places the pedestrian, or removes it with `None`.
    pub fn set_pedestrian(&mut self, position: Option<Point3d>) {
        self.pedestrian = position;
    }

    pub fn pedestrian(&self) -> Option<Point3d> {
        self.pedestrian
    }

    /// The body of a vehicle.
    pub fn body(&self, vehicle: VehicleId) -> Option<&Kinematics> {
        self.bodies.get(vehicle).map(|body| &body.kin)
    }

    /// Teleports a vehicle's body.
    pub fn place(&mut self, vehicle: VehicleId, kin: Kinematics) {
        if let Some(body) = self.bodies.get_mut(vehicle) {
            body.kin = kin;
        }
    }

    /// Runs one tick: matches the bodies to the pool, reports trigger
    /// overlaps, steps the simulation and integrates the new commands.
    ///
    /// Returns the events emitted during the tick.
    pub fn advance(&mut self, sim: &mut Simulation, dt: f64) -> Vec<SimEvent> {
        self.sync_bodies(sim);
        for event in self.trigger_events() {
            sim.notify(event);
        }
        sim.step(dt, &*self);
        self.integrate(sim, dt);
        sim.drain_events()
    }

    /// Creates bodies for new spawns and removes those of retired vehicles.
    fn sync_bodies(&mut self, sim: &Simulation) {
        for vehicle in sim.iter_vehicles() {
            let id = vehicle.id();
            if !vehicle.is_active() {
                self.bodies.remove(id);
            } else if vehicle.is_fresh() || !self.bodies.contains_key(id) {
                self.bodies.insert(
                    id,
                    Body {
                        kin: *vehicle.kinematics(),
                        tag: vehicle.kind().tag(),
                    },
                );
            }
        }
    }

    /// Diffs the current overlaps against the previous tick.
    fn trigger_events(&mut self) -> Vec<TriggerEvent> {
        let mut contacts: Vec<(Contact, Point3d)> = self
            .bodies
            .iter()
            .map(|(id, body)| (Contact::Vehicle(id), body.kin.position))
            .collect();
        if let Some(pedestrian) = self.pedestrian {
            contacts.push((Contact::Pedestrian, pedestrian));
        }

        let current: HashSet<(usize, Contact)> =
            iproduct!(self.triggers.iter().enumerate(), contacts.iter())
                .filter(|((_, (_, area)), (_, p))| area.contains(*p))
                .map(|((index, _), (contact, _))| (index, *contact))
                .collect();

        let mut events: Vec<TriggerEvent> = self
            .overlaps
            .difference(&current)
            .map(|(index, contact)| {
                TriggerEvent::new(self.triggers[*index].0, TriggerPhase::Exit, *contact)
            })
            .collect();
        events.extend(current.iter().map(|pair| {
            let (index, contact) = pair;
            let phase = if self.overlaps.contains(pair) {
                TriggerPhase::Stay
            } else {
                TriggerPhase::Enter
            };
            TriggerEvent::new(self.triggers[*index].0, phase, *contact)
        }));

        self.overlaps = current;
        events
    }

    /// Applies the commands of every active vehicle to its body.
    fn integrate(&mut self, sim: &Simulation, dt: f64) {
        for vehicle in sim.active_vehicles() {
            let Some(body) = self.bodies.get_mut(vehicle.id()) else {
                continue;
            };
            let out = vehicle.output();
            let kin = &mut body.kin;

            let speed = kin.velocity.magnitude();
            let accel = out.motor_torque * MOTOR_GAIN - out.brake_torque * BRAKE_GAIN;
            let speed = (speed + accel * dt).max(0.0);

            let yaw_rate = speed / WHEELBASE * out.steer_angle.to_radians().tan();
            let forward = rotate_about_up(kin.forward, (yaw_rate * dt).to_degrees());
            let forward = Vector3d::new(forward.x, 0.0, forward.z).normalize();

            kin.position += forward * speed * dt;
            kin.forward = forward;
            kin.right = Vector3d::new(forward.z, 0.0, -forward.x);
            kin.velocity = forward * speed;
        }
    }
}

/// The distance along a ray to the first point of a disc, on the ground plane.
fn ray_disc(origin: Point3d, dir: Vector3d, centre: Point3d, radius: f64) -> Option<f64> {
    let o = Vector3d::new(origin.x - centre.x, 0.0, origin.z - centre.z);
    let d = Vector3d::new(dir.x, 0.0, dir.z);
    let a = d.magnitude2();
    if a == 0.0 {
        return None;
    }
    let c = o.magnitude2() - radius * radius;
    if c <= 0.0 {
        return Some(0.0);
    }
    let b = o.dot(d);
    let disc = b * b - a * c;
    if b > 0.0 || disc < 0.0 {
        return None;
    }
    Some((-b - disc.sqrt()) / a * a.sqrt())
}

impl WorldQuery for FlatWorld {
    fn kinematics(&self, vehicle: VehicleId) -> Option<Kinematics> {
        self.body(vehicle).copied()
    }

    fn raycast(&self, origin: Point3d, direction: Vector3d, max_distance: f64) -> Option<RayHit> {
        self.bodies
            .iter()
            .filter_map(|(id, body)| {
                let distance = ray_disc(origin, direction, body.kin.position, BODY_RADIUS)?;
                (distance <= max_distance).then_some(RayHit {
                    distance,
                    tag: body.tag,
                    object: Some(id),
                })
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    fn zone_contact(&self, vehicle: VehicleId, zone: SensorZone) -> ZoneContact {
        let Some(body) = self.bodies.get(vehicle) else {
            return ZoneContact::default();
        };
        let kin = &body.kin;
        let (near, far) = match zone {
            SensorZone::Near => NEAR_RANGE,
            SensorZone::Far => FAR_RANGE,
        };
        let in_zone = |p: Point3d| {
            let along = project_on_axis(p, kin.position, kin.forward);
            let across = project_on_axis(p, kin.position, kin.right);
            along > near && along <= far && across.abs() <= SENSOR_HALF_WIDTH
        };

        let pedestrian = self.pedestrian.map_or(false, in_zone);

        // Sample the sensor rectangle every half metre.
        let steps = ((far - near) / 0.5).ceil() as usize;
        let samples: Vec<Point3d> = iproduct!(0..=steps, [-1.0, 0.0, 1.0])
            .map(|(i, side)| {
                let along = (near + i as f64 * 0.5).min(far);
                kin.position + kin.forward * along + kin.right * side * SENSOR_HALF_WIDTH
            })
            .collect();
        let zebra_crossing = self
            .triggers
            .iter()
            .filter(|(volume, _)| matches!(volume, Volume::ZebraCrossing(_)))
            .any(|(_, area)| samples.iter().any(|p| area.contains(*p)));

        ZoneContact {
            pedestrian,
            zebra_crossing,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use slotmap::KeyData;

    fn vid(n: u64) -> VehicleId {
        KeyData::from_ffi(n).into()
    }

    #[test]
    fn ray_hits_disc_front() {
        let origin = Point3d::new(0.0, 0.0, 0.0);
        let hit = ray_disc(origin, Vector3d::unit_z(), Point3d::new(0.0, 0.0, 10.0), 1.2);
        assert_approx_eq!(hit.unwrap(), 8.8);
        let miss = ray_disc(origin, Vector3d::unit_z(), Point3d::new(3.0, 0.0, 10.0), 1.2);
        assert_eq!(miss, None);
        let behind = ray_disc(origin, Vector3d::unit_z(), Point3d::new(0.0, 0.0, -10.0), 1.2);
        assert_eq!(behind, None);
    }

    #[test]
    fn nearest_body_is_hit() {
        let mut world = FlatWorld::new();
        let (a, b) = (vid(1), vid(2));
        for (id, z) in [(a, 20.0), (b, 12.0)] {
            world.bodies.insert(
                id,
                Body {
                    kin: Kinematics::at_rest(Point3d::new(0.0, 0.0, z), Vector3d::unit_z()),
                    tag: ObjectTag::AutoCar,
                },
            );
        }
        let hit = world
            .raycast(Point3d::new(0.0, 0.0, 0.0), Vector3d::unit_z(), 30.0)
            .unwrap();
        assert_eq!(hit.object, Some(b));
        assert_approx_eq!(hit.distance, 10.8);
        assert!(world
            .raycast(Point3d::new(0.0, 0.0, 0.0), Vector3d::unit_z(), 5.0)
            .is_none());
    }

    #[test]
    fn sensors_see_pedestrian_and_crossing() {
        let mut world = FlatWorld::new();
        let id = vid(1);
        world.bodies.insert(
            id,
            Body {
                kin: Kinematics::at_rest(Point3d::new(0.0, 0.0, 0.0), Vector3d::unit_z()),
                tag: ObjectTag::AutoCar,
            },
        );

        world.set_pedestrian(Some(Point3d::new(1.0, 0.0, 5.0)));
        assert!(world.zone_contact(id, SensorZone::Near).pedestrian);
        assert!(!world.zone_contact(id, SensorZone::Far).pedestrian);

        world.set_pedestrian(Some(Point3d::new(-1.0, 0.0, 12.0)));
        assert!(!world.zone_contact(id, SensorZone::Near).pedestrian);
        assert!(world.zone_contact(id, SensorZone::Far).pedestrian);

        world.set_pedestrian(Some(Point3d::new(5.0, 0.0, 5.0)));
        assert!(!world.zone_contact(id, SensorZone::Near).pedestrian);

        let zebra = crate::KeyData::from_ffi(1).into();
        world.add_trigger(
            Volume::ZebraCrossing(zebra),
            GroundBox::around(Point3d::new(0.0, 0.0, 10.0), 6.0, 1.5),
        );
        assert!(!world.zone_contact(id, SensorZone::Near).zebra_crossing);
        assert!(world.zone_contact(id, SensorZone::Far).zebra_crossing);
    }
}
