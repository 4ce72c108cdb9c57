use crate::events::SignalEvent;
use crate::light::{Colour, PedestrianSignal};
use crate::scheduler::Scheduler;
use crate::{LightSet, TrafficLightId};
use log::{debug, info, trace};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Delay between the vehicle lights turning red and the green man.
const PEDESTRIAN_WAIT: f64 = 2.0; // s

/// The share of the green man time shown as a steady green man.
const STEADY_SHARE: f64 = 0.25;

/// Half the period of the flashing green man.
const FLASH_HALF_PERIOD: f64 = 1.0; // s

/// How a controller decides when to start a switching cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ControlMode {
    /// Cycles start on a fixed timer.
    Automatic,
    /// Cycles start when a pedestrian presses a button.
    #[default]
    Manual,
}

/// The timing parameters of a controller.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SignalTiming {
    /// The time between colour changes in s.
    pub colour_switch_time: f64,
    /// The duration of the pedestrian green man in s.
    pub green_man_time: f64,
    /// The time between automatic cycles in s, on top of one colour switch time.
    pub interval: f64,
    pub mode: ControlMode,
}

impl Default for SignalTiming {
    fn default() -> Self {
        Self {
            colour_switch_time: 4.0,
            green_man_time: 18.0,
            interval: 18.0,
            mode: ControlMode::Manual,
        }
    }
}

/// The timed steps of a switching cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Stage {
    Trigger,
    /// Green lights turn yellow.
    Amber,
    /// Yellow lights turn red and red lights turn green.
    Release,
    /// Lights released to green turn yellow.
    Clearance,
    /// Every light returns to its pre-cycle colour.
    Restore,
    Steady(TrafficLightId),
    Flash {
        light: TrafficLightId,
        from: f64,
        until: f64,
        k: u32,
    },
    RedMan(TrafficLightId),
}

/// The lights taking part in the running cycle.
#[derive(Clone, Debug)]
struct Cycle {
    started: f64,
    /// Lights that were green when the cycle started.
    releasing: SmallVec<[TrafficLightId; 4]>,
    /// Lights that were red when the cycle started.
    receiving: SmallVec<[TrafficLightId; 4]>,
}

/// Switches a set of traffic lights together, preserving the complementary
/// phase of their groups, and runs the pedestrian crossing cycle of lights
/// whose button was pressed.
#[derive(Clone, Debug)]
pub struct TrafficLightController {
    timing: SignalTiming,
    lights: Vec<TrafficLightId>,
    /// Whether the controller listens for button presses.
    subscribed: bool,
    timers: Scheduler<Stage>,
    cycle: Option<Cycle>,
}

impl TrafficLightController {
    /// Creates a controller with no lights.
    pub fn new(timing: SignalTiming) -> Self {
        Self {
            timing,
            lights: vec![],
            subscribed: true,
            timers: Scheduler::new(),
            cycle: None,
        }
    }

    /// The timing parameters.
    pub fn timing(&self) -> &SignalTiming {
        &self.timing
    }

    /// The managed lights.
    pub fn lights(&self) -> &[TrafficLightId] {
        &self.lights
    }

    /// Adds a light to the set switched by this controller.
    pub fn add_light(&mut self, light: TrafficLightId) {
        if !self.lights.contains(&light) {
            self.lights.push(light);
        }
    }

    /// Starts listening for button presses.
    pub fn subscribe(&mut self) {
        self.subscribed = true;
    }

    /// Stops listening for button presses.
    pub fn unsubscribe(&mut self) {
        self.subscribed = false;
    }

    /// Whether the controller listens for button presses.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Whether a switching cycle is in progress.
    pub fn is_cycling(&self) -> bool {
        self.cycle.is_some()
    }

    /// The time of the next scheduled change.
    pub fn next_change(&self) -> Option<f64> {
        self.timers.next_due()
    }

    /// Resets every light to its group's initial colour and, in automatic
    /// mode, schedules the first cycle at `now`.
    pub fn start(&mut self, now: f64, lights: &mut LightSet) -> Vec<SignalEvent> {
        self.timers.clear();
        self.cycle = None;

        let mut events = vec![];
        for id in &self.lights {
            if let Some(light) = lights.get_mut(*id) {
                let colour = light.group().initial_colour();
                if light.set_colour(colour) {
                    events.push(SignalEvent::Colour {
                        light: *id,
                        colour,
                        at: now,
                    });
                }
            }
        }

        if self.timing.mode == ControlMode::Automatic {
            self.timers.schedule(now, Stage::Trigger);
        }
        events
    }

    /// Handles a pedestrian button press. Every managed light with a button
    /// latches the request. In manual mode an idle controller also starts a
    /// cycle immediately.
    ///
    /// Returns `true` if a cycle was requested.
    pub fn press_button(&mut self, now: f64, lights: &mut LightSet) -> bool {
        if !self.subscribed {
            return false;
        }
        for id in &self.lights {
            if let Some(light) = lights.get_mut(*id) {
                if light.press_button() {
                    debug!("Pedestrian request latched on {id:?}");
                }
            }
        }

        if self.timing.mode != ControlMode::Manual {
            return false;
        }
        if self.cycle.is_some() || self.timers.next_due().is_some() {
            debug!("Manual trigger ignored; a cycle is already running");
            return false;
        }
        self.timers.schedule(now, Stage::Trigger);
        true
    }

    /// Runs every stage due at or before `now`.
    pub fn step(&mut self, now: f64, lights: &mut LightSet) -> Vec<SignalEvent> {
        let mut events = vec![];
        while let Some((at, stage)) = self.timers.pop_due(now) {
            self.run_stage(at, stage, lights, &mut events);
        }
        events
    }

    fn run_stage(
        &mut self,
        at: f64,
        stage: Stage,
        lights: &mut LightSet,
        events: &mut Vec<SignalEvent>,
    ) {
        let cst = self.timing.colour_switch_time;
        match stage {
            Stage::Trigger => self.begin_cycle(at, lights, events),
            Stage::Amber => {
                for id in self.cycle_lights(true) {
                    set_colour(lights, id, Colour::Yellow, at, events);
                }
                self.timers.schedule_in(at, cst, Stage::Release);
            }
            Stage::Release => self.release(at, lights, events),
            Stage::Clearance => {
                for id in self.cycle_lights(false) {
                    set_colour(lights, id, Colour::Yellow, at, events);
                }
            }
            Stage::Restore => {
                for id in self.cycle_lights(false) {
                    set_colour(lights, id, Colour::Red, at, events);
                }
                for id in self.cycle_lights(true) {
                    set_colour(lights, id, Colour::Green, at, events);
                }
                if let Some(cycle) = self.cycle.take() {
                    info!("Signal cycle finished at {at:.2}s");
                    events.push(SignalEvent::CycleFinished { at });
                    if self.timing.mode == ControlMode::Automatic {
                        let next = (cycle.started + self.timing.interval + cst).max(at);
                        self.timers.schedule(next, Stage::Trigger);
                    }
                }
            }
            Stage::Steady(id) => {
                set_pedestrian(lights, id, PedestrianSignal::SteadyGreenMan, at, events);
            }
            Stage::Flash { light, from, until, k } => {
                let lit = k % 2 == 1;
                let signal = PedestrianSignal::FlashingGreenMan { lit };
                set_pedestrian(lights, light, signal, at, events);
                let next = from + f64::from(k + 1) * FLASH_HALF_PERIOD;
                if next < until - 1e-9 {
                    self.timers.schedule(
                        next,
                        Stage::Flash {
                            light,
                            from,
                            until,
                            k: k + 1,
                        },
                    );
                }
            }
            Stage::RedMan(id) => {
                set_pedestrian(lights, id, PedestrianSignal::RedMan, at, events);
            }
        }
    }

    fn begin_cycle(&mut self, at: f64, lights: &LightSet, events: &mut Vec<SignalEvent>) {
        if self.cycle.is_some() {
            debug!("Cycle trigger at {at:.2}s ignored; a cycle is already running");
            return;
        }
        let (releasing, receiving): (SmallVec<_>, SmallVec<_>) = self
            .lights
            .iter()
            .copied()
            .filter(|id| lights.contains_key(*id))
            .partition(|id| lights[*id].colour() == Colour::Green);

        info!("Signal cycle started at {at:.2}s");
        self.cycle = Some(Cycle {
            started: at,
            releasing,
            receiving,
        });
        events.push(SignalEvent::CycleStarted { at });
        self.timers
            .schedule_in(at, self.timing.colour_switch_time, Stage::Amber);
    }

    fn release(&mut self, at: f64, lights: &mut LightSet, events: &mut Vec<SignalEvent>) {
        let SignalTiming {
            colour_switch_time: cst,
            green_man_time: gmt,
            ..
        } = self.timing;

        for id in self.cycle_lights(true) {
            set_colour(lights, id, Colour::Red, at, events);
        }
        for id in self.cycle_lights(false) {
            set_colour(lights, id, Colour::Green, at, events);
        }

        let requests: SmallVec<[TrafficLightId; 4]> = self
            .cycle_lights(true)
            .into_iter()
            .filter(|id| lights.get(*id).map_or(false, |l| l.button_pressed()))
            .collect();

        let mut hold = 2.0 * cst;
        if !requests.is_empty() {
            hold = hold.max(PEDESTRIAN_WAIT + gmt);
            let steady_at = at + PEDESTRIAN_WAIT;
            let flash_at = steady_at + STEADY_SHARE * gmt;
            let end_at = steady_at + gmt;
            for id in requests {
                set_pedestrian(lights, id, PedestrianSignal::Waiting, at, events);
                self.timers.schedule(steady_at, Stage::Steady(id));
                if flash_at < end_at {
                    self.timers.schedule(
                        flash_at,
                        Stage::Flash {
                            light: id,
                            from: flash_at,
                            until: end_at,
                            k: 0,
                        },
                    );
                }
                self.timers.schedule(end_at, Stage::RedMan(id));
            }
        }

        self.timers
            .schedule_in(at, (hold - cst).max(0.0), Stage::Clearance);
        self.timers.schedule_in(at, hold, Stage::Restore);
    }

    /// The releasing or receiving lights of the running cycle.
    fn cycle_lights(&self, releasing: bool) -> SmallVec<[TrafficLightId; 4]> {
        match &self.cycle {
            Some(cycle) if releasing => cycle.releasing.clone(),
            Some(cycle) => cycle.receiving.clone(),
            None => SmallVec::new(),
        }
    }
}

fn set_colour(
    lights: &mut LightSet,
    id: TrafficLightId,
    colour: Colour,
    at: f64,
    events: &mut Vec<SignalEvent>,
) {
    match lights.get_mut(id) {
        Some(light) => {
            if light.set_colour(colour) {
                events.push(SignalEvent::Colour { light: id, colour, at });
            }
        }
        None => trace!("Light {id:?} was removed; skipping"),
    }
}

fn set_pedestrian(
    lights: &mut LightSet,
    id: TrafficLightId,
    signal: PedestrianSignal,
    at: f64,
    events: &mut Vec<SignalEvent>,
) {
    match lights.get_mut(id) {
        Some(light) => {
            if light.set_pedestrian(signal) {
                events.push(SignalEvent::Pedestrian { light: id, signal, at });
            }
        }
        None => trace!("Light {id:?} was removed; skipping"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::light::{SignalGroup, TrafficLight, TrafficLightAttributes};
    use crate::math::{Point3d, Vector3d};
    use assert_approx_eq::assert_approx_eq;

    type Fixture = (TrafficLightController, LightSet, TrafficLightId, TrafficLightId);

    fn setup(mode: ControlMode) -> Fixture {
        let mut lights = LightSet::with_key();
        let mut add = |group, has_button| {
            lights.insert(TrafficLight::new(&TrafficLightAttributes {
                position: Point3d::new(0.0, 0.0, 0.0),
                axis: Vector3d::unit_z(),
                stop_line_offset: 0.0,
                group,
                has_button,
            }))
        };
        let a = add(SignalGroup::Group1, true);
        let b = add(SignalGroup::Group2, false);
        let mut ctrl = TrafficLightController::new(SignalTiming {
            mode,
            ..Default::default()
        });
        ctrl.add_light(a);
        ctrl.add_light(b);
        (ctrl, lights, a, b)
    }

    fn run(
        ctrl: &mut TrafficLightController,
        lights: &mut LightSet,
        until: f64,
        mut on_tick: impl FnMut(f64, &mut TrafficLightController, &mut LightSet),
    ) -> Vec<SignalEvent> {
        let mut events = ctrl.start(0.0, lights);
        let mut t = 0.0;
        while t <= until {
            on_tick(t, ctrl, lights);
            events.extend(ctrl.step(t, lights));
            t += 0.25;
        }
        events
    }

    fn colour_changes(events: &[SignalEvent], id: TrafficLightId) -> Vec<(f64, Colour)> {
        events
            .iter()
            .filter_map(|e| match *e {
                SignalEvent::Colour { light, colour, at } if light == id => Some((at, colour)),
                _ => None,
            })
            .collect()
    }

    fn pedestrian_changes(
        events: &[SignalEvent],
        id: TrafficLightId,
    ) -> Vec<(f64, PedestrianSignal)> {
        events
            .iter()
            .filter_map(|e| match *e {
                SignalEvent::Pedestrian { light, signal, at } if light == id => Some((at, signal)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn unbuttoned_cycle() {
        let (mut ctrl, mut lights, a, b) = setup(ControlMode::Automatic);
        let events = run(&mut ctrl, &mut lights, 20.0, |_, _, _| {});

        assert_eq!(
            colour_changes(&events, a),
            vec![(4.0, Colour::Yellow), (8.0, Colour::Red), (16.0, Colour::Green)]
        );
        assert_eq!(
            colour_changes(&events, b),
            vec![(8.0, Colour::Green), (12.0, Colour::Yellow), (16.0, Colour::Red)]
        );
        assert!(pedestrian_changes(&events, a).is_empty());
        assert!(!ctrl.is_cycling());
        assert_eq!(ctrl.next_change(), Some(22.0));
    }

    #[test]
    fn button_request_extends_red() {
        let (mut ctrl, mut lights, a, b) = setup(ControlMode::Automatic);
        let events = run(&mut ctrl, &mut lights, 30.0, |t, ctrl, lights| {
            if t == 1.0 {
                ctrl.press_button(t, lights);
            }
        });

        assert_eq!(
            colour_changes(&events, a),
            vec![(4.0, Colour::Yellow), (8.0, Colour::Red), (28.0, Colour::Green)]
        );
        assert_eq!(
            colour_changes(&events, b),
            vec![(8.0, Colour::Green), (24.0, Colour::Yellow), (28.0, Colour::Red)]
        );

        let peds = pedestrian_changes(&events, a);
        assert_eq!(peds[0], (8.0, PedestrianSignal::Waiting));
        assert_eq!(peds[1], (10.0, PedestrianSignal::SteadyGreenMan));
        assert_eq!(peds[2], (14.5, PedestrianSignal::FlashingGreenMan { lit: false }));
        let flashes = &peds[2..peds.len() - 1];
        assert_eq!(flashes.len(), 14);
        assert_approx_eq!(flashes[13].0, 27.5);
        assert_eq!(flashes[13].1, PedestrianSignal::FlashingGreenMan { lit: true });
        assert_eq!(*peds.last().unwrap(), (28.0, PedestrianSignal::RedMan));
        assert!(!lights[a].button_pressed());

        let red_man = events
            .iter()
            .position(|e| matches!(e, SignalEvent::Pedestrian { signal: PedestrianSignal::RedMan, .. }));
        let green = events
            .iter()
            .position(|e| *e == SignalEvent::Colour { light: a, colour: Colour::Green, at: 28.0 });
        assert!(red_man < green);
    }

    #[test]
    fn manual_trigger_is_debounced() {
        let (mut ctrl, mut lights, a, _) = setup(ControlMode::Manual);
        ctrl.start(0.0, &mut lights);
        assert_eq!(ctrl.next_change(), None);

        assert!(ctrl.press_button(2.0, &mut lights));
        assert!(!ctrl.press_button(2.5, &mut lights));
        ctrl.step(2.0, &mut lights);
        assert!(ctrl.is_cycling());
        assert!(!ctrl.press_button(3.0, &mut lights));

        ctrl.step(6.0, &mut lights);
        assert_eq!(lights[a].colour(), Colour::Yellow);
        ctrl.step(40.0, &mut lights);
        assert!(!ctrl.is_cycling());
        assert_eq!(lights[a].colour(), Colour::Green);
        assert!(ctrl.press_button(41.0, &mut lights));
    }

    #[test]
    fn unsubscribed_controller_ignores_buttons() {
        let (mut ctrl, mut lights, a, _) = setup(ControlMode::Manual);
        ctrl.unsubscribe();
        assert!(!ctrl.press_button(1.0, &mut lights));
        assert!(!lights[a].button_pressed());
    }
}
