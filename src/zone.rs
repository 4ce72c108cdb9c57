use crate::VehicleId;
use log::trace;
use smallvec::SmallVec;

/// A region a turning vehicle must keep clear of other traffic before it
/// proceeds.
#[derive(Clone, Debug, Default)]
pub struct GiveWayZone {
    /// The vehicles currently inside, in order of entry.
    occupants: SmallVec<[VehicleId; 4]>,
}

impl GiveWayZone {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any vehicle is inside.
    pub fn is_occupied(&self) -> bool {
        !self.occupants.is_empty()
    }

    /// The vehicles inside.
    pub fn occupants(&self) -> &[VehicleId] {
        &self.occupants
    }

    /// Whether the zone holds a vehicle other than `vehicle`.
    pub fn blocks(&self, vehicle: VehicleId) -> bool {
        self.occupants.iter().any(|id| *id != vehicle)
    }

    pub(crate) fn enter(&mut self, vehicle: VehicleId) {
        if !self.occupants.contains(&vehicle) {
            trace!("{vehicle:?} entered give-way zone");
            self.occupants.push(vehicle);
        }
    }

    pub(crate) fn exit(&mut self, vehicle: VehicleId) {
        self.occupants.retain(|id| *id != vehicle);
    }
}

/// A pedestrian crossing. Vehicles only give priority to it while a
/// pedestrian is on it.
#[derive(Clone, Debug, Default)]
pub struct ZebraCrossing {
    occupied: bool,
}

impl ZebraCrossing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a pedestrian is on the crossing.
    pub fn is_occupied(&self) -> bool {
        self.occupied
    }

    pub(crate) fn set_occupied(&mut self, occupied: bool) {
        self.occupied = occupied;
    }
}

/// A region where turning vehicles are held to a reduced speed.
#[derive(Clone, Copy, Debug)]
pub struct SlowZone {
    /// Scales the slow speed of vehicles inside.
    pub modifier: f64,
}

impl Default for SlowZone {
    fn default() -> Self {
        Self { modifier: 1.0 }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn self_occupancy_does_not_block() {
        let mut ids = SlotMap::<VehicleId, ()>::with_key();
        let a = ids.insert(());
        let b = ids.insert(());

        let mut zone = GiveWayZone::new();
        zone.enter(a);
        zone.enter(a);
        assert_eq!(zone.occupants(), &[a]);
        assert!(!zone.blocks(a));
        assert!(zone.blocks(b));

        zone.enter(b);
        assert!(zone.blocks(a));
        zone.exit(b);
        zone.exit(a);
        assert!(!zone.is_occupied());
    }
}
