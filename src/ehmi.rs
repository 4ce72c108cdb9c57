//! Maps vehicle and signal state onto the lamps and displays that the
//! pedestrian sees. Nothing here feeds back into the simulation.

use crate::light::{Colour, PedestrianSignal, TrafficLight};
use crate::vehicle::Vehicle;
use crate::waypoint::TurnMarkers;
use anyhow::bail;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The bumper offset shown by a stationary vehicle.
const BUMPER_STOPPED_OFFSET: f64 = -0.55;

/// Below this speed metric the bumper shows the stationary offset.
const BUMPER_MOVING_SPEED: f64 = 0.1;

/// Above this speed metric the board shows STOP.
const BOARD_MOVING_SPEED: f64 = 1.0;

/// How long a turn indicator stays lit, and then dark, in s.
const INDICATOR_HALF_PERIOD: f64 = 0.5;

/// Which external display autonomous vehicles carry in a scenario.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EhmiMode {
    /// Light bars on the bumper that fill up as the vehicle slows.
    Intention,
    /// A board telling the pedestrian to stop or cross.
    Instruction,
    #[default]
    Disabled,
}

impl EhmiMode {
    /// The name used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            Self::Intention => "Intention",
            Self::Instruction => "Instruction",
            Self::Disabled => "No_EHMI",
        }
    }
}

impl FromStr for EhmiMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "Intention" => Self::Intention,
            "Instruction" => Self::Instruction,
            "No_EHMI" => Self::Disabled,
            other => bail!("unknown eHMI mode {other:?}"),
        })
    }
}

/// The sign shown by the instruction board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoardSign {
    Stop,
    GreenMan,
}

/// Which lamps of a traffic light are lit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LampState {
    pub red: bool,
    pub yellow: bool,
    pub green: bool,
    pub red_man: bool,
    pub green_man: bool,
}

impl LampState {
    /// The lamps lit by a traffic light.
    pub fn of(light: &TrafficLight) -> Self {
        let colour = light.colour();
        let (red_man, green_man) = match light.pedestrian() {
            PedestrianSignal::RedMan | PedestrianSignal::Waiting => (true, false),
            PedestrianSignal::SteadyGreenMan => (false, true),
            PedestrianSignal::FlashingGreenMan { lit } => (false, lit),
        };
        Self {
            red: colour == Colour::Red,
            yellow: colour == Colour::Yellow,
            green: colour == Colour::Green,
            red_man,
            green_man,
        }
    }
}

/// The turn indicators of a vehicle. Each side stores when it was
/// switched on so the flash phase is a function of time.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TurnIndicators {
    left: Option<f64>,
    right: Option<f64>,
}

impl TurnIndicators {
    /// Applies the markers of a waypoint that was just reached.
    pub fn apply(&mut self, markers: TurnMarkers, now: f64) {
        if markers.left_turn_start && self.left.is_none() {
            self.left = Some(now);
        }
        if markers.right_turn_start && self.right.is_none() {
            self.right = Some(now);
        }
        if markers.turn_end {
            self.clear();
        }
    }

    /// Switches both sides off.
    pub fn clear(&mut self) {
        self.left = None;
        self.right = None;
    }

    pub fn left_on(&self) -> bool {
        self.left.is_some()
    }

    pub fn right_on(&self) -> bool {
        self.right.is_some()
    }

    /// Whether the left lamp is lit at `now`.
    pub fn left_lit(&self, now: f64) -> bool {
        self.left.map_or(false, |since| flash_phase(since, now))
    }

    /// Whether the right lamp is lit at `now`.
    pub fn right_lit(&self, now: f64) -> bool {
        self.right.map_or(false, |since| flash_phase(since, now))
    }
}

fn flash_phase(since: f64, now: f64) -> bool {
    let elapsed = (now - since).max(0.0);
    elapsed % (2.0 * INDICATOR_HALF_PERIOD) < INDICATOR_HALF_PERIOD
}

/// The texture offset of the intention bumper for a speed metric.
pub fn bumper_offset(speed: f64, max_speed: f64) -> f64 {
    if speed <= BUMPER_MOVING_SPEED {
        BUMPER_STOPPED_OFFSET
    } else if speed >= max_speed {
        0.0
    } else {
        BUMPER_STOPPED_OFFSET - (speed / max_speed) * BUMPER_STOPPED_OFFSET
    }
}

/// The sign on the instruction board for a speed metric.
pub fn board_sign(speed: f64) -> BoardSign {
    if speed > BOARD_MOVING_SPEED {
        BoardSign::Stop
    } else {
        BoardSign::GreenMan
    }
}

/// Everything the vehicle-mounted displays show for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VehiclePresentation {
    /// The intention bumper's texture offset, if that display is active.
    pub bumper_offset: Option<f64>,
    /// The instruction board's sign, if that display is active.
    pub board: Option<BoardSign>,
    pub left_indicator: bool,
    pub right_indicator: bool,
    pub brake_lights: bool,
}

impl VehiclePresentation {
    /// The displays of a vehicle under an eHMI mode.
    pub fn of(vehicle: &Vehicle, mode: EhmiMode, now: f64) -> Self {
        let speed = vehicle.kinematics().speed();
        let indicators = vehicle.indicators();
        let board = if vehicle.is_fresh() {
            BoardSign::Stop
        } else {
            board_sign(speed)
        };
        Self {
            bumper_offset: (mode == EhmiMode::Intention)
                .then(|| bumper_offset(speed, vehicle.profile().max_speed)),
            board: (mode == EhmiMode::Instruction).then_some(board),
            left_indicator: indicators.left_lit(now),
            right_indicator: indicators.right_lit(now),
            brake_lights: vehicle.braking_state().is_braking(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn bumper_fills_as_vehicle_slows() {
        assert_approx_eq!(bumper_offset(0.0, 50.0), -0.55);
        assert_approx_eq!(bumper_offset(0.1, 50.0), -0.55);
        assert_approx_eq!(bumper_offset(25.0, 50.0), -0.275);
        assert_approx_eq!(bumper_offset(50.0, 50.0), 0.0);
        assert_approx_eq!(bumper_offset(80.0, 50.0), 0.0);
    }

    #[test]
    fn board_switches_above_one() {
        assert_eq!(board_sign(1.0), BoardSign::GreenMan);
        assert_eq!(board_sign(1.01), BoardSign::Stop);
    }

    #[test]
    fn indicators_flash_until_turn_end() {
        let mut ind = TurnIndicators::default();
        ind.apply(TurnMarkers::LEFT, 10.0);
        assert!(ind.left_lit(10.2));
        assert!(!ind.left_lit(10.7));
        assert!(ind.left_lit(11.1));
        assert!(!ind.right_on());

        ind.apply(TurnMarkers::END, 12.0);
        assert!(!ind.left_on());
        assert!(!ind.left_lit(12.2));
    }

    #[test]
    fn mode_names() {
        for mode in [EhmiMode::Intention, EhmiMode::Instruction, EhmiMode::Disabled] {
            assert_eq!(mode.name().parse::<EhmiMode>().unwrap(), mode);
        }
        assert!("Hologram".parse::<EhmiMode>().is_err());
    }
}
