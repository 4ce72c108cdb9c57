use crate::math::{Point3d, Vector3d};
use crate::vehicle::VehicleKind;
use crate::{GiveWayId, RouteId, SpawnPointId, TrafficLightId, VehicleId, VehicleSet, ZebraCrossingId};
use rand::seq::SliceRandom;
use rand::Rng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Delay before a spawn at a blocked point is attempted again.
pub const RETRY_DELAY: f64 = 1.0; // s

/// The configuration of a spawn point, copied onto every vehicle that
/// starts a run there.
#[derive(Clone, Debug)]
pub struct SpawnPointAttributes {
    /// The position vehicles are placed at.
    pub position: Point3d,
    /// The heading vehicles are placed with.
    pub heading: Vector3d,
    /// The route driven from here.
    pub route: Option<RouteId>,
    /// The traffic light along the route.
    pub light: Option<TrafficLightId>,
    /// The zebra crossing along the route.
    pub zebra_crossing: Option<ZebraCrossingId>,
    /// The give-way zones checked while waiting to turn.
    pub give_way: Vec<GiveWayId>,
    /// Whether vehicles turn on this route.
    pub will_turn: bool,
    /// Whether random batches may use this point.
    pub auto_spawn: bool,
}

impl SpawnPointAttributes {
    /// A spawn point with no route or references, eligible for batches.
    pub fn at(position: Point3d, heading: Vector3d) -> Self {
        Self {
            position,
            heading,
            route: None,
            light: None,
            zebra_crossing: None,
            give_way: vec![],
            will_turn: false,
            auto_spawn: true,
        }
    }
}

/// A place where pooled vehicles enter the scene.
#[derive(Clone, Debug)]
pub struct SpawnPoint {
    attrs: SpawnPointAttributes,
    /// A vehicle is inside the point's footprint.
    blocked: bool,
    /// The pedestrian-triggered spawn has fired.
    pedestrian_spawned: bool,
}

impl SpawnPoint {
    pub fn new(attrs: SpawnPointAttributes) -> Self {
        Self {
            attrs,
            blocked: false,
            pedestrian_spawned: false,
        }
    }

    pub fn attributes(&self) -> &SpawnPointAttributes {
        &self.attrs
    }

    /// Whether a vehicle occupies the point.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Whether a random batch may spawn here now.
    pub fn is_eligible(&self) -> bool {
        !self.blocked && self.attrs.auto_spawn
    }

    pub(crate) fn set_blocked(&mut self, blocked: bool) {
        self.blocked = blocked;
    }

    pub(crate) fn pedestrian_spawned(&self) -> bool {
        self.pedestrian_spawned
    }

    pub(crate) fn mark_pedestrian_spawned(&mut self) {
        self.pedestrian_spawned = true;
    }
}

/// Parameters of the random spawn cadence.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpawnSettings {
    /// Wait after a failed roll, and extra wait after a batch, in s.
    pub spawn_delay: f64,
    /// Time between two vehicles of a batch in s.
    pub spawn_time: f64,
    /// Vehicles per batch.
    pub spawn_count: usize,
    /// Chance that a roll starts a batch.
    pub spawn_rate: f64,
    /// The kind of vehicle spawned.
    pub kind: VehicleKind,
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            spawn_delay: 5.0,
            spawn_time: 2.0,
            spawn_count: 1,
            spawn_rate: 0.5,
            kind: VehicleKind::Autonomous,
        }
    }
}

impl SpawnSettings {
    /// How long the cadence stays busy after starting a batch.
    pub fn total_spawn_time(&self) -> f64 {
        self.spawn_time * self.spawn_count as f64 + self.spawn_delay
    }

    /// Rolls the spawn chance.
    pub fn roll<R: Rng>(&self, rng: &mut R) -> SpawnRoll {
        if rng.gen_bool(self.spawn_rate.clamp(0.0, 1.0)) {
            SpawnRoll::Batch {
                count: self.spawn_count,
                next_roll_in: self.total_spawn_time(),
            }
        } else {
            SpawnRoll::Wait {
                next_roll_in: self.spawn_delay,
            }
        }
    }
}

/// The outcome of a spawn roll.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpawnRoll {
    Batch { count: usize, next_roll_in: f64 },
    Wait { next_roll_in: f64 },
}

/// Deferred spawn work.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum SpawnTask {
    /// Roll the cadence.
    Roll,
    /// Spawn the next vehicle of a batch.
    Batch { kind: VehicleKind, remaining: usize },
    /// Spawn at a point that was blocked earlier.
    Retry {
        point: SpawnPointId,
        kind: VehicleKind,
    },
}

/// The fixed vehicle pools, in allocation order.
#[derive(Clone, Debug, Default)]
pub(crate) struct CarPool {
    autonomous: Vec<VehicleId>,
    normal: Vec<VehicleId>,
}

impl CarPool {
    pub fn push(&mut self, kind: VehicleKind, id: VehicleId) {
        self.slots_mut(kind).push(id);
    }

    pub fn slots(&self, kind: VehicleKind) -> &[VehicleId] {
        match kind {
            VehicleKind::Autonomous => &self.autonomous,
            VehicleKind::Normal => &self.normal,
        }
    }

    fn slots_mut(&mut self, kind: VehicleKind) -> &mut Vec<VehicleId> {
        match kind {
            VehicleKind::Autonomous => &mut self.autonomous,
            VehicleKind::Normal => &mut self.normal,
        }
    }

    /// The first inactive slot of a pool.
    pub fn first_free(&self, kind: VehicleKind, vehicles: &VehicleSet) -> Option<VehicleId> {
        self.slots(kind)
            .iter()
            .copied()
            .find(|id| vehicles.get(*id).map_or(false, |v| !v.is_active()))
    }
}

/// Picks a random point among those eligible for batches.
pub(crate) fn pick_eligible<'a, R: Rng>(
    points: impl Iterator<Item = (SpawnPointId, &'a SpawnPoint)>,
    rng: &mut R,
) -> Option<SpawnPointId> {
    let eligible: Vec<SpawnPointId> = points
        .filter(|(_, point)| point.is_eligible())
        .map(|(id, _)| id)
        .collect();
    eligible.choose(rng).copied()
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use slotmap::SlotMap;

    #[test]
    fn total_spawn_time() {
        let settings = SpawnSettings {
            spawn_delay: 3.0,
            spawn_time: 2.5,
            spawn_count: 4,
            ..Default::default()
        };
        assert_approx_eq!(settings.total_spawn_time(), 13.0);
    }

    #[test]
    fn roll_extremes() {
        let mut rng = StdRng::seed_from_u64(1);
        let always = SpawnSettings {
            spawn_rate: 1.0,
            ..Default::default()
        };
        assert!(matches!(always.roll(&mut rng), SpawnRoll::Batch { count: 1, .. }));
        let never = SpawnSettings {
            spawn_rate: 0.0,
            ..Default::default()
        };
        assert_eq!(never.roll(&mut rng), SpawnRoll::Wait { next_roll_in: 5.0 });
    }

    #[test]
    fn only_eligible_points_are_picked() {
        let mut points = SlotMap::<SpawnPointId, SpawnPoint>::with_key();
        let origin = Point3d::new(0.0, 0.0, 0.0);
        let open = points.insert(SpawnPoint::new(SpawnPointAttributes::at(origin, Vector3d::unit_z())));
        let blocked = points.insert(SpawnPoint::new(SpawnPointAttributes::at(origin, Vector3d::unit_z())));
        points[blocked].set_blocked(true);
        let manual = points.insert(SpawnPoint::new(SpawnPointAttributes {
            auto_spawn: false,
            ..SpawnPointAttributes::at(origin, Vector3d::unit_z())
        }));

        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            assert_eq!(pick_eligible(points.iter(), &mut rng), Some(open));
        }
        points[open].set_blocked(true);
        assert_eq!(pick_eligible(points.iter(), &mut rng), None);
        assert!(!points[manual].is_eligible());
    }
}
