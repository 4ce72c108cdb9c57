use crate::perception::ObjectTag;
use crate::util::Interval;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The two vehicle populations of a scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VehicleKind {
    Autonomous,
    Normal,
}

impl VehicleKind {
    /// The tag reported by casts that hit a vehicle of this kind.
    pub fn tag(self) -> ObjectTag {
        match self {
            Self::Autonomous => ObjectTag::AutoCar,
            Self::Normal => ObjectTag::NormalCar,
        }
    }
}

/// The tunables of a vehicle. Both kinds run the same control loop and
/// differ only in their profile.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BehaviourProfile {
    /// The speed cap outside slow zones, in units of the speed metric.
    pub max_speed: f64,
    /// The steering limit in degrees.
    pub max_steer_angle: f64,
    /// Motor torque applied while driving.
    pub drive_torque: f64,
    /// Brake torque applied while slowing down.
    pub brake_torque: f64,
    /// Brake torque applied during an emergency stop.
    pub max_brake_torque: f64,
    /// The slow zone speed as a fraction of `max_speed`.
    pub slow_factor: f64,
    /// Stopping distance ahead of a red light's stop line.
    pub traffic_dist: f64,
    /// Range of the factor applied to `traffic_dist` at each spawn.
    pub traffic_dist_jitter: Option<Interval<f64>>,
    /// Minimum time between two horn honks in s.
    pub horn_interval: f64,
    /// The vehicle is retired if its height exceeds this.
    pub max_height: Option<f64>,
}

impl BehaviourProfile {
    /// The default profile for a kind of vehicle.
    pub fn for_kind(kind: VehicleKind) -> Self {
        let base = Self {
            max_speed: 50.0,
            max_steer_angle: 60.0,
            drive_torque: 200.0,
            brake_torque: 900.0,
            max_brake_torque: 6800.0,
            slow_factor: 0.4,
            traffic_dist: 1.5,
            traffic_dist_jitter: None,
            horn_interval: 3.0,
            max_height: None,
        };
        match kind {
            VehicleKind::Autonomous => Self {
                max_height: Some(2.0),
                ..base
            },
            VehicleKind::Normal => Self {
                traffic_dist_jitter: Some(Interval::new(-0.4, 1.0)),
                ..base
            },
        }
    }

    /// The speed cap inside a slow zone with no modifier.
    pub fn slow_speed(&self) -> f64 {
        self.max_speed * self.slow_factor
    }

    /// Draws the stopping distance for one run.
    pub fn sample_traffic_dist<R: Rng>(&self, rng: &mut R) -> f64 {
        match self.traffic_dist_jitter {
            Some(range) if range.length() > 0.0 => {
                let factor = Uniform::new_inclusive(range.min, range.max).sample(rng);
                self.traffic_dist * (1.0 + factor)
            }
            _ => self.traffic_dist,
        }
    }
}
