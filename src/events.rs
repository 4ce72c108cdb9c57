use crate::light::{Colour, PedestrianSignal};
use crate::vehicle::{BrakingState, HornCue, VehicleKind};
use crate::{ControllerId, SpawnPointId, TrafficLightId, VehicleId};

/// A notification emitted by the simulation for presentation, audio and
/// logging collaborators.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SimEvent {
    /// A pooled vehicle was activated at a spawn point.
    Spawned {
        vehicle: VehicleId,
        kind: VehicleKind,
        spawn_point: SpawnPointId,
    },
    /// A vehicle was returned to its pool.
    Retired {
        vehicle: VehicleId,
        reason: RetireReason,
    },
    /// A vehicle's braking state changed.
    BrakingChanged {
        vehicle: VehicleId,
        state: BrakingState,
    },
    /// A vehicle sounded its horn or screeched its tyres.
    Horn { vehicle: VehicleId, cue: HornCue },
    /// A light managed by a controller changed.
    Signal {
        controller: ControllerId,
        event: SignalEvent,
    },
}

/// Why a vehicle was retired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetireReason {
    /// It reached the end of its path.
    PathComplete,
    /// It left the playable area.
    OutOfBounds,
    /// Every vehicle was disabled at once.
    Disabled,
}

/// A change made by a traffic light controller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SignalEvent {
    /// A switching cycle started.
    CycleStarted { at: f64 },
    /// A light changed colour.
    Colour {
        light: TrafficLightId,
        colour: Colour,
        at: f64,
    },
    /// A light's pedestrian head changed.
    Pedestrian {
        light: TrafficLightId,
        signal: PedestrianSignal,
        at: f64,
    },
    /// Every light is back in its pre-cycle colour.
    CycleFinished { at: f64 },
}

impl SignalEvent {
    /// The simulation time the change took effect.
    pub fn at(&self) -> f64 {
        match *self {
            Self::CycleStarted { at }
            | Self::Colour { at, .. }
            | Self::Pedestrian { at, .. }
            | Self::CycleFinished { at } => at,
        }
    }
}
