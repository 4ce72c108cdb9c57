//! Signal cycles and pedestrian measurements driven through a full simulation.

mod common;

use assert_approx_eq::assert_approx_eq;
use common::*;
use crossing_sim::math::Vector3d;
use crossing_sim::sandbox::FlatWorld;
use crossing_sim::{
    Colour, Contact, ControlMode, LogValue, PedestrianSignal, SignalEvent, SignalGroup,
    SignalTiming, SimEvent, Simulation, SpawnPointAttributes, TrafficLightId, TriggerEvent,
    TriggerPhase, VehicleKind, Volume,
};

const DT: f64 = 0.25;

fn colours(events: &[SimEvent], id: TrafficLightId) -> Vec<(f64, Colour)> {
    events
        .iter()
        .filter_map(|e| match *e {
            SimEvent::Signal {
                event: SignalEvent::Colour { light, colour, at },
                ..
            } if light == id => Some((at, colour)),
            _ => None,
        })
        .collect()
}

fn scalar(values: &[LogValue]) -> Vec<f64> {
    values
        .iter()
        .filter_map(|v| match v {
            LogValue::Scalar(x) => Some(*x),
            _ => None,
        })
        .collect()
}

/// Test a complete button-triggered cycle, including the pedestrian
/// reaction and crossing measurements.
#[test]
fn button_cycle_and_crossing_measurements() {
    let mut sim = Simulation::with_seed(1);
    let mut world = FlatWorld::new();
    let a = sim.add_traffic_light(&light_at(p(3.0, 0.0), SignalGroup::Group1, true));
    let b = sim.add_traffic_light(&light_at(p(-3.0, 10.0), SignalGroup::Group2, false));
    let ctrl = sim.add_controller(SignalTiming::default(), &[a, b]);
    sim.watch_reaction(a);
    sim.begin_scenario(2, true);

    let mut events = vec![];
    for _ in 0..120 {
        let now = sim.time();
        if now == 1.0 {
            sim.notify(TriggerEvent::new(Volume::Button, TriggerPhase::Enter, Contact::Hand));
            assert!(sim.get_light(a).unwrap().button_pressed());
        }
        if now == 3.0 {
            // Already cycling.
            assert!(!sim.press_button());
        }
        if now == 12.0 {
            sim.pedestrian_started_crossing();
        }
        if now == 20.0 {
            assert_eq!(sim.pedestrian_finished_crossing(), Some(8.0));
        }
        events.extend(world.advance(&mut sim, DT));
    }
    assert_eq!(sim.time(), 30.0);
    assert_eq!(sim.end_scenario(), Some(30.0));

    assert_eq!(
        colours(&events, a),
        vec![(5.0, Colour::Yellow), (9.0, Colour::Red), (29.0, Colour::Green)]
    );
    assert_eq!(
        colours(&events, b),
        vec![(9.0, Colour::Green), (25.0, Colour::Yellow), (29.0, Colour::Red)]
    );
    assert!(events.iter().all(|e| match e {
        SimEvent::Signal { controller, .. } => *controller == ctrl,
        _ => true,
    }));

    let light = sim.get_light(a).unwrap();
    assert_eq!(light.pedestrian(), PedestrianSignal::RedMan);
    assert!(!light.button_pressed());
    assert!(!sim.get_controller(ctrl).unwrap().is_cycling());

    let log = sim.log();
    assert_eq!(scalar(log.series("Scenario Number")), vec![2.0]);
    assert_eq!(log.series("Is Controlled"), &[LogValue::from("True")]);
    assert_eq!(scalar(log.series("Waiting & Reaction Duration")), vec![3.0]);
    assert_eq!(scalar(log.series("Time To Cross Road")), vec![8.0]);
    assert_eq!(scalar(log.series("Scenario Duration")), vec![30.0]);
    let stamps = scalar(log.series("Time"));
    assert_eq!(stamps.first(), Some(&0.0));
    assert_eq!(stamps.last(), Some(&30.0));
}

/// Test that an automatic controller cycles again after its interval.
#[test]
fn automatic_controller_repeats() {
    let mut sim = Simulation::with_seed(1);
    let mut world = FlatWorld::new();
    let a = sim.add_traffic_light(&light_at(p(3.0, 0.0), SignalGroup::Group1, false));
    let b = sim.add_traffic_light(&light_at(p(-3.0, 10.0), SignalGroup::Group2, false));
    sim.add_controller(
        SignalTiming {
            mode: ControlMode::Automatic,
            ..Default::default()
        },
        &[a, b],
    );

    // Until t = 29.5, before the second cycle releases.
    let events = run(&mut world, &mut sim, DT, 118);
    assert_eq!(
        colours(&events, a),
        vec![
            (4.0, Colour::Yellow),
            (8.0, Colour::Red),
            (16.0, Colour::Green),
            (26.0, Colour::Yellow),
        ]
    );
    let finished = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                SimEvent::Signal {
                    event: SignalEvent::CycleFinished { .. },
                    ..
                }
            )
        })
        .count();
    assert_eq!(finished, 1);
}

/// Test that a controller removed from the button broadcast ignores presses.
#[test]
fn unsubscribed_controller_keeps_green() {
    let mut sim = Simulation::with_seed(1);
    let a = sim.add_traffic_light(&light_at(p(3.0, 0.0), SignalGroup::Group1, true));
    let ctrl = sim.add_controller(SignalTiming::default(), &[a]);
    sim.set_button_listener(ctrl, false);

    assert!(!sim.press_button());
    let mut world = FlatWorld::new();
    run(&mut world, &mut sim, DT, 40);
    assert_eq!(sim.get_light(a).unwrap().colour(), Colour::Green);
    assert!(!sim.get_light(a).unwrap().button_pressed());
}

/// Test the spawn triggered behind the pedestrian and the braking
/// measurements that follow it.
#[test]
fn pedestrian_spawn_measures_braking() {
    let mut sim = Simulation::with_seed(1);
    let mut world = FlatWorld::new();
    let behind = straight_lane(&mut sim, 0.0, -40.0, &[40.0]);
    let ahead = sim.add_spawn_point(SpawnPointAttributes::at(p(0.0, 40.0), -north()));
    sim.add_vehicles(VehicleKind::Autonomous, 2);

    let eye = crossing_sim::math::Point3d::new(0.0, 1.7, 0.0);
    let view = Vector3d::new(0.0, 0.0, 1.0);
    let crossing = p(0.0, 0.0);
    assert_eq!(sim.spawn_for_pedestrian(ahead, eye, view, crossing), None);
    let veh = sim.spawn_for_pedestrian(behind, eye, view, crossing).unwrap();
    assert_eq!(sim.spawn_for_pedestrian(behind, eye, view, crossing), None);

    world.set_pedestrian(Some(crossing));
    for _ in 0..200 {
        world.advance(&mut sim, 0.05);
    }

    let log = sim.log();
    let braking = scalar(log.series("Braking Distance"));
    assert_eq!(braking.len(), 1);
    assert!(braking[0] > 14.0 && braking[0] <= 16.5, "braked at {}", braking[0]);
    let deceleration = scalar(log.series("Deceleration Duration"));
    assert_eq!(deceleration.len(), 1);
    assert!(deceleration[0] > 0.0);

    let vehicle = sim.get_vehicle(veh).unwrap();
    assert_approx_eq!(vehicle.kinematics().speed(), 0.0);
    assert!(vehicle.kinematics().position.z < -1.5);
}
