use crate::debug::debug_line;
use crate::math::{Point3d, Vector3d, UP};
use crate::perception::stop_line_distance;
use log::debug;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The colour shown by a traffic light.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Colour {
    Green,
    Yellow,
    Red,
}

/// The phase group of a light. Lights of opposite groups controlled by the
/// same controller are always in complementary phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SignalGroup {
    /// Starts green.
    #[default]
    Group1,
    /// Starts red.
    Group2,
}

impl SignalGroup {
    /// The colour shown by lights of this group before the first cycle.
    pub fn initial_colour(self) -> Colour {
        match self {
            Self::Group1 => Colour::Green,
            Self::Group2 => Colour::Red,
        }
    }
}

/// The state of a light's pedestrian head.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PedestrianSignal {
    #[default]
    RedMan,
    /// Counting down to the green man after a button request.
    Waiting,
    SteadyGreenMan,
    FlashingGreenMan {
        lit: bool,
    },
}

/// The attributes of a traffic light.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrafficLightAttributes {
    /// The world space position of the light post.
    pub position: Point3d,
    /// The light's lateral axis. Distances to the stop line are measured
    /// along this axis.
    pub axis: Vector3d,
    /// Distance from the light post to the stop line along the axis.
    pub stop_line_offset: f64,
    /// The phase group.
    pub group: SignalGroup,
    /// Whether the light has a pedestrian request button.
    pub has_button: bool,
}

/// A traffic light with an optional pedestrian head.
#[derive(Clone, Debug)]
pub struct TrafficLight {
    position: Point3d,
    axis: Vector3d,
    stop_line_offset: f64,
    group: SignalGroup,
    colour: Colour,
    pedestrian: PedestrianSignal,
    has_button: bool,
    /// Latched by a button press, cleared when the green man ends.
    button_pressed: bool,
}

impl TrafficLight {
    /// Creates a light showing its group's initial colour and a red man.
    pub fn new(attrs: &TrafficLightAttributes) -> Self {
        Self {
            position: attrs.position,
            axis: attrs.axis,
            stop_line_offset: attrs.stop_line_offset,
            group: attrs.group,
            colour: attrs.group.initial_colour(),
            pedestrian: PedestrianSignal::RedMan,
            has_button: attrs.has_button,
            button_pressed: false,
        }
    }

    /// The world space position.
    pub fn position(&self) -> Point3d {
        self.position
    }

    /// The phase group.
    pub fn group(&self) -> SignalGroup {
        self.group
    }

    /// The colour currently shown.
    pub fn colour(&self) -> Colour {
        self.colour
    }

    /// The pedestrian head state.
    pub fn pedestrian(&self) -> PedestrianSignal {
        self.pedestrian
    }

    /// Whether a pedestrian crossing cycle is in progress.
    pub fn green_man(&self) -> bool {
        self.pedestrian != PedestrianSignal::RedMan
    }

    /// Whether a pedestrian request is latched.
    pub fn button_pressed(&self) -> bool {
        self.button_pressed
    }

    /// Latches a pedestrian request. Returns `false` if the light has no
    /// button or a request is already latched.
    pub fn press_button(&mut self) -> bool {
        if !self.has_button || self.button_pressed {
            return false;
        }
        self.button_pressed = true;
        true
    }

    /// Signed distance from the front of a vehicle at `position` to the
    /// stop line.
    pub fn stop_line_distance(&self, position: Point3d) -> f64 {
        stop_line_distance(self.position, self.axis, self.stop_line_offset, position)
    }

    /// Records the stop line as a debug gizmo.
    pub(crate) fn debug_stop_line(&self) {
        let mut origin = self.position - self.axis * self.stop_line_offset;
        origin.y = 0.5;
        let across = UP.cross(self.axis) * 2.0;
        debug_line("stop line", origin, origin + across);
    }

    pub(crate) fn set_colour(&mut self, colour: Colour) -> bool {
        if self.colour == colour {
            return false;
        }
        debug!("Light {:?} -> {:?}", self.colour, colour);
        self.colour = colour;
        true
    }

    pub(crate) fn set_pedestrian(&mut self, signal: PedestrianSignal) -> bool {
        if self.pedestrian == signal {
            return false;
        }
        if !matches!(signal, PedestrianSignal::FlashingGreenMan { .. }) {
            debug!("Pedestrian head {:?} -> {:?}", self.pedestrian, signal);
        }
        if signal == PedestrianSignal::RedMan {
            self.button_pressed = false;
        }
        self.pedestrian = signal;
        true
    }
}
