use super::BehaviourProfile;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The braking requests raised by the perception rules during one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BrakeFlags {
    pub slow_down: bool,
    pub emergency_brake: bool,
}

/// The mutually exclusive braking states of a vehicle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BrakingState {
    #[default]
    Drive,
    SlowDown,
    EmergencyBrake,
}

impl BrakingState {
    /// Picks the state for a set of flags. An emergency brake request beats
    /// everything else.
    pub fn arbitrate(flags: BrakeFlags) -> Self {
        if flags.emergency_brake {
            Self::EmergencyBrake
        } else if flags.slow_down {
            Self::SlowDown
        } else {
            Self::Drive
        }
    }

    /// Whether brake torque is being applied.
    pub fn is_braking(self) -> bool {
        self != Self::Drive
    }
}

/// The actuator commands of a vehicle for one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ControlOutput {
    /// Forward torque applied to every wheel.
    pub motor_torque: f64,
    /// Brake torque applied to every wheel.
    pub brake_torque: f64,
    /// Front wheel steering angle in degrees, positive to the right.
    pub steer_angle: f64,
}

impl ControlOutput {
    /// The commands for a braking state.
    ///
    /// While driving, the motor is cut once `speed` reaches `speed_cap`.
    pub fn for_state(
        state: BrakingState,
        profile: &BehaviourProfile,
        speed: f64,
        speed_cap: f64,
        steer_angle: f64,
    ) -> Self {
        let (motor_torque, brake_torque) = match state {
            BrakingState::EmergencyBrake => (0.0, profile.max_brake_torque),
            BrakingState::SlowDown => (0.0, profile.brake_torque),
            BrakingState::Drive if speed >= speed_cap => (0.0, 0.0),
            BrakingState::Drive => (profile.drive_torque, 0.0),
        };
        Self {
            motor_torque,
            brake_torque,
            steer_angle,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vehicle::VehicleKind;

    #[test]
    fn emergency_wins() {
        let flags = BrakeFlags {
            slow_down: true,
            emergency_brake: true,
        };
        assert_eq!(BrakingState::arbitrate(flags), BrakingState::EmergencyBrake);
        assert_eq!(
            BrakingState::arbitrate(BrakeFlags {
                slow_down: true,
                emergency_brake: false
            }),
            BrakingState::SlowDown
        );
        assert_eq!(BrakingState::arbitrate(BrakeFlags::default()), BrakingState::Drive);
    }

    #[test]
    fn motor_is_cut_at_speed_cap() {
        let profile = BehaviourProfile::for_kind(VehicleKind::Autonomous);
        for speed in [50.0, 50.5, 120.0] {
            let out = ControlOutput::for_state(BrakingState::Drive, &profile, speed, 50.0, 0.0);
            assert_eq!(out.motor_torque, 0.0);
            assert_eq!(out.brake_torque, 0.0);
        }
        let out = ControlOutput::for_state(BrakingState::Drive, &profile, 49.0, 50.0, 3.0);
        assert_eq!(out.motor_torque, 200.0);
        assert_eq!(out.steer_angle, 3.0);
    }

    #[test]
    fn braking_torques() {
        let profile = BehaviourProfile::for_kind(VehicleKind::Normal);
        let slow = ControlOutput::for_state(BrakingState::SlowDown, &profile, 0.0, 50.0, 0.0);
        assert_eq!((slow.motor_torque, slow.brake_torque), (0.0, 900.0));
        let stop = ControlOutput::for_state(BrakingState::EmergencyBrake, &profile, 0.0, 50.0, 0.0);
        assert_eq!((stop.motor_torque, stop.brake_torque), (0.0, 6800.0));
    }
}
