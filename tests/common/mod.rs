//! Scene building helpers shared by the integration tests.
#![allow(dead_code)]

use crossing_sim::cgmath::Vector3;
use crossing_sim::math::{Point3d, Vector3d};
use crossing_sim::sandbox::FlatWorld;
use crossing_sim::{
    SignalGroup, SimEvent, Simulation, SpawnPointAttributes, SpawnPointId, TrafficLightAttributes,
    TurnMarkers,
};

pub fn p(x: f64, z: f64) -> Point3d {
    Point3d::new(x, 0.0, z)
}

pub fn north() -> Vector3d {
    Vector3::unit_z()
}

/// A light facing vehicles that drive towards +z.
pub fn light_at(position: Point3d, group: SignalGroup, has_button: bool) -> TrafficLightAttributes {
    TrafficLightAttributes {
        position,
        axis: north(),
        stop_line_offset: 0.0,
        group,
        has_button,
    }
}

/// Adds a straight route along x = `x` through the given z coordinates and
/// a spawn point at its start facing +z.
pub fn straight_lane(sim: &mut Simulation, x: f64, start: f64, waypoints: &[f64]) -> SpawnPointId {
    let points: Vec<_> = waypoints
        .iter()
        .map(|z| (p(x, *z), TurnMarkers::NONE))
        .collect();
    let route = sim.network_mut().add_route_through(&points);
    sim.add_spawn_point(SpawnPointAttributes {
        route: Some(route),
        ..SpawnPointAttributes::at(p(x, start), north())
    })
}

/// Advances the world `ticks` times and collects the events.
pub fn run(world: &mut FlatWorld, sim: &mut Simulation, dt: f64, ticks: usize) -> Vec<SimEvent> {
    (0..ticks)
        .flat_map(|_| world.advance(sim, dt))
        .collect()
}
