use crate::perception::ObjectTag;
use crate::{GiveWayId, SlowZoneId, SpawnPointId, VehicleId, ZebraCrossingId};

/// A trigger volume known to the simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Volume {
    GiveWay(GiveWayId),
    ZebraCrossing(ZebraCrossingId),
    SlowZone(SlowZoneId),
    /// Vehicles inside are waiting to turn and check their give-way zones.
    TurningZone,
    /// The footprint of a spawn point. A vehicle inside blocks the point.
    SpawnPoint(SpawnPointId),
    /// A pedestrian request button.
    Button,
}

/// The overlap phase reported by the host's physics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TriggerPhase {
    Enter,
    Stay,
    Exit,
}

/// The object overlapping a volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Contact {
    Vehicle(VehicleId),
    Pedestrian,
    Hand,
    Other,
}

impl Contact {
    /// Classifies an object by its tag. Vehicle tags need the pooled vehicle
    /// they belong to.
    pub fn from_tag(tag: ObjectTag, vehicle: Option<VehicleId>) -> Self {
        match (tag, vehicle) {
            (ObjectTag::AutoCar | ObjectTag::NormalCar, Some(id)) => Self::Vehicle(id),
            (ObjectTag::Player, _) => Self::Pedestrian,
            (ObjectTag::Hand, _) => Self::Hand,
            _ => Self::Other,
        }
    }
}

/// A trigger volume overlap notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TriggerEvent {
    pub volume: Volume,
    pub phase: TriggerPhase,
    pub contact: Contact,
}

impl TriggerEvent {
    pub fn new(volume: Volume, phase: TriggerPhase, contact: Contact) -> Self {
        Self {
            volume,
            phase,
            contact,
        }
    }

    /// Whether the contact is inside the volume after this event.
    pub fn is_inside(&self) -> bool {
        self.phase != TriggerPhase::Exit
    }
}
