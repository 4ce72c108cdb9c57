//! Vehicle decision and signal coordination core for a pedestrian crossing
//! simulation. Vehicles follow waypoint routes, react to traffic lights,
//! pedestrians, other vehicles and give-way zones, while their state drives
//! the external human-machine interface (eHMI) shown to the pedestrian.
//!
//! The crate does not simulate physics. Each tick, a [WorldQuery] supplies
//! vehicle poses and sensor readings, and the simulation answers with torque,
//! brake and steering commands plus a stream of [SimEvent]s.

pub use cgmath;
pub use config::{
    EhmiCatalog, LookupStatus, ParticipantTable, ScenarioCatalog, SessionEntry, SessionPlan,
};
pub use controller::{ControlMode, SignalTiming, TrafficLightController};
pub use ehmi::{BoardSign, EhmiMode, LampState, TurnIndicators, VehiclePresentation};
pub use events::{RetireReason, SignalEvent, SimEvent};
pub use light::{Colour, PedestrianSignal, SignalGroup, TrafficLight, TrafficLightAttributes};
pub use perception::{
    braking_distance, stop_line_distance, Kinematics, LightObservation, ObjectTag,
    PerceptionSnapshot, RayHit, SensorZone, WorldQuery, ZoneContact,
};
pub use record::{DecelerationTimer, ExperimentLog, LogValue, ReactionTimer, Stopwatch};
pub use scheduler::{Scheduler, TimerToken};
pub use simulation::Simulation;
pub use slotmap::{Key, KeyData};
pub use spawn::{SpawnPoint, SpawnPointAttributes, SpawnRoll, SpawnSettings};
pub use trigger::{Contact, TriggerEvent, TriggerPhase, Volume};
pub use util::Interval;
pub use vehicle::{
    BehaviourProfile, BrakeFlags, BrakingState, ControlOutput, HornCue, Vehicle, VehicleKind,
};
pub use waypoint::{Path, PathNode, TurnMarkers, Waypoint, WaypointNetwork};
pub use zone::{GiveWayZone, SlowZone, ZebraCrossing};

mod config;
mod controller;
mod debug;
mod ehmi;
mod events;
mod light;
pub mod math;
mod perception;
mod record;
pub mod sandbox;
mod scheduler;
mod simulation;
mod spawn;
mod trigger;
mod util;
mod vehicle;
mod waypoint;
mod zone;

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Unique ID of a pooled [Vehicle].
    pub struct VehicleId;
    /// Unique ID of a [TrafficLight].
    pub struct TrafficLightId;
    /// Unique ID of a [TrafficLightController].
    pub struct ControllerId;
    /// Unique ID of a [Waypoint].
    pub struct WaypointId;
    /// Unique ID of a route, the container owning a chain of waypoints.
    pub struct RouteId;
    /// Unique ID of a [GiveWayZone].
    pub struct GiveWayId;
    /// Unique ID of a [ZebraCrossing].
    pub struct ZebraCrossingId;
    /// Unique ID of a [SlowZone].
    pub struct SlowZoneId;
    /// Unique ID of a [SpawnPoint].
    pub struct SpawnPointId;
}

type VehicleSet = SlotMap<VehicleId, Vehicle>;
type LightSet = SlotMap<TrafficLightId, TrafficLight>;
type GiveWaySet = SlotMap<GiveWayId, GiveWayZone>;
type ZebraSet = SlotMap<ZebraCrossingId, ZebraCrossing>;
