// Common capability set for closed-loop motors
//
// Client code talks to either controller family through `MotorMotion`:
// open-loop output, closed-loop setpoints in physical units, limit switches,
// configuration, and the per-tick homing/finding/manual state machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::backend::DriverError;
use super::sequencer::{HomingPolicy, MotionState};

/// Which physical quantity a setpoint (and its PID gains/tolerance) refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetpointKind {
    /// Distance in meters
    Position,
    /// Wheel surface speed in m/s
    LinearVelocity,
    /// Output shaft speed in rad/s
    AngularVelocity,
}

impl SetpointKind {
    pub const ALL: [SetpointKind; 3] = [
        SetpointKind::Position,
        SetpointKind::LinearVelocity,
        SetpointKind::AngularVelocity,
    ];

    /// PID slot used on the controller for this kind
    pub fn slot(self) -> u8 {
        match self {
            SetpointKind::Position => 0,
            SetpointKind::LinearVelocity => 1,
            SetpointKind::AngularVelocity => 2,
        }
    }
}

/// One value per setpoint kind
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KindMap<T> {
    pub position: T,
    pub linear_velocity: T,
    pub angular_velocity: T,
}

impl<T: Copy> KindMap<T> {
    pub const fn new(position: T, linear_velocity: T, angular_velocity: T) -> Self {
        Self {
            position,
            linear_velocity,
            angular_velocity,
        }
    }

    pub fn get(&self, kind: SetpointKind) -> T {
        match kind {
            SetpointKind::Position => self.position,
            SetpointKind::LinearVelocity => self.linear_velocity,
            SetpointKind::AngularVelocity => self.angular_velocity,
        }
    }

    pub fn set(&mut self, kind: SetpointKind, value: T) {
        match kind {
            SetpointKind::Position => self.position = value,
            SetpointKind::LinearVelocity => self.linear_velocity = value,
            SetpointKind::AngularVelocity => self.angular_velocity = value,
        }
    }
}

/// PIDF gains for one closed-loop slot
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub f: f64,
}

impl PidGains {
    pub const fn new(p: f64, i: f64, d: f64, f: f64) -> Self {
        Self { p, i, d, f }
    }
}

/// Software travel bounds; `(0, 0)` leaves the setpoint unconstrained
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SoftLimits {
    pub lower: f64,
    pub upper: f64,
}

impl SoftLimits {
    pub const UNCONSTRAINED: SoftLimits = SoftLimits::new(0.0, 0.0);

    pub const fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.lower == 0.0 && self.upper == 0.0
    }

    /// Clamp `value` into `[lower, upper]` unless unconstrained
    pub fn clamp(&self, value: f64) -> f64 {
        if self.is_unconstrained() {
            value
        } else {
            value.clamp(self.lower, self.upper)
        }
    }
}

/// Seconds from neutral to full output
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RampRates {
    pub open_loop: f64,
    pub closed_loop: f64,
}

/// Behavior of the motor at neutral output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeutralMode {
    Coast,
    #[default]
    Brake,
}

/// What the controller was last told to do
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMode {
    Neutral,
    PercentOutput,
    Voltage,
    Closed(SetpointKind),
}

/// Error types for motion configuration and driver access
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MotionError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

pub type Result<T> = std::result::Result<T, MotionError>;

/// Capability set shared by every motor controller family
///
/// Reads never fail: a driver error is recorded as `last_error()` and a
/// neutral value (0.0 / not pressed) is returned. Configuration calls return
/// the error as well.
pub trait MotorMotion {
    fn device_id(&self) -> i32;

    // === Open loop ===

    /// Command raw output in [-1, 1], bypassing the closed loop
    fn set_output(&mut self, percent: f64);

    /// Command a motor voltage (compensated open loop)
    fn set_voltage(&mut self, volts: f64);

    /// Neutral output and return the state machine to `Idle`
    fn stop(&mut self);

    fn control_mode(&self) -> ControlMode;

    // === Closed loop ===

    /// Clamp to soft limits, convert and issue a closed-loop setpoint, then seek it
    fn set_setpoint(&mut self, value: f64, kind: SetpointKind);

    /// Hold a position in closed loop without entering `Finding`
    fn hold_position(&mut self, position: f64);

    fn setpoint(&self) -> f64;

    fn setpoint_kind(&self) -> Option<SetpointKind>;

    fn actual(&mut self, kind: SetpointKind) -> f64;

    fn tolerance(&self, kind: SetpointKind) -> f64;

    /// Within tolerance of the active setpoint and no longer pushing (< 1 V)
    fn is_at_setpoint(&mut self) -> bool;

    // === Sensors ===

    fn is_fwd_limit_pressed(&mut self) -> bool;

    fn is_rev_limit_pressed(&mut self) -> bool;

    fn motor_voltage(&mut self) -> f64;

    fn bus_voltage(&mut self) -> f64;

    fn motor_current(&mut self) -> f64;

    fn raw_encoder_counts(&mut self) -> f64;

    fn last_error(&self) -> Option<&DriverError>;

    // === Configuration ===

    /// `true` = normally open for the respective switch
    fn configure_limit_switches(&mut self, fwd_normally_open: bool, rev_normally_open: bool) -> Result<()>;

    fn set_soft_limits(&mut self, kind: SetpointKind, lower: f64, upper: f64) -> Result<()>;

    fn soft_limits(&self, kind: SetpointKind) -> SoftLimits;

    fn set_tolerance(&mut self, kind: SetpointKind, tolerance: f64) -> Result<()>;

    fn set_pid_gains(&mut self, kind: SetpointKind, gains: PidGains) -> Result<()>;

    fn pid_gains(&self, kind: SetpointKind) -> PidGains;

    fn set_integral_zone(&mut self, izone: f64) -> Result<()>;

    fn set_ramp_rates(&mut self, rates: RampRates) -> Result<()>;

    fn set_peak_output(&mut self, forward: f64, reverse: f64) -> Result<()>;

    /// Floor on the driven output; forward in [0, 1], reverse in [-1, 0]
    fn set_nominal_output(&mut self, forward: f64, reverse: f64) -> Result<()>;

    fn set_gearing(&mut self, ratio: f64) -> Result<()>;

    fn gearing(&self) -> f64;

    fn set_wheel_diameter(&mut self, diameter: f64) -> Result<()>;

    fn wheel_diameter(&self) -> f64;

    fn invert_motor(&mut self, inverted: bool) -> Result<()>;

    fn invert_sensor(&mut self, inverted: bool) -> Result<()>;

    fn set_neutral_mode(&mut self, mode: NeutralMode) -> Result<()>;

    /// Cruise velocity (m/s) and acceleration (m/s^2) for profiled moves
    fn configure_motion_profile(&mut self, cruise: f64, acceleration: f64) -> Result<()>;

    /// Use the controller's profiled closed loop for position setpoints
    fn use_motion_profile(&mut self, enabled: bool);

    fn configure_current_limit(&mut self, amps: f64) -> Result<()>;

    fn clear_sticky_faults(&mut self) -> Result<()>;

    fn reset_encoder_position(&mut self) -> Result<()>;

    /// Stop the motor and zero the encoder
    fn reset(&mut self) -> Result<()> {
        self.stop();
        self.reset_encoder_position()
    }

    // === State machine ===

    /// Advance the state machine one step; call once per control period
    fn tick(&mut self);

    fn state(&self) -> MotionState;

    fn set_state(&mut self, state: MotionState);

    /// Begin homing toward the reverse limit switch
    fn start_homing(&mut self);

    fn is_ready(&self) -> bool;

    fn is_homing_complete(&self) -> bool;

    /// Open-loop fractions in [-1, 1]; anything else is rejected
    fn set_home_speeds(&mut self, forward: f64, reverse: f64) -> Result<()>;

    fn set_manual_speeds(&mut self, forward: f64, reverse: f64) -> Result<()>;

    /// Zero disables the timeout
    fn set_homing_timeout(&mut self, timeout: Duration);

    /// Zero disables the timeout
    fn set_finding_timeout(&mut self, timeout: Duration);

    fn set_back_off_home(&mut self, enabled: bool);

    fn set_homing_policy(&mut self, policy: HomingPolicy);

    fn homing_policy(&self) -> HomingPolicy;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_limit_clamp() {
        let limits = SoftLimits::new(-1.0, 2.0);
        assert_eq!(limits.clamp(5.0), 2.0);
        assert_eq!(limits.clamp(-7.5), -1.0);
        assert_eq!(limits.clamp(0.3), 0.3);
    }

    #[test]
    fn test_zero_pair_is_unconstrained() {
        let limits = SoftLimits::UNCONSTRAINED;
        assert!(limits.is_unconstrained());
        assert_eq!(limits.clamp(1e6), 1e6);
        assert_eq!(limits.clamp(-1e6), -1e6);
        // Only the exact (0, 0) pair disables clamping
        assert_eq!(SoftLimits::new(0.0, 1.0).clamp(3.0), 1.0);
    }

    #[test]
    fn test_kind_map_slots_are_distinct() {
        let mut map = KindMap::new(1, 2, 3);
        map.set(SetpointKind::AngularVelocity, 9);
        assert_eq!(map.get(SetpointKind::Position), 1);
        assert_eq!(map.get(SetpointKind::AngularVelocity), 9);
        let slots: Vec<u8> = SetpointKind::ALL.iter().map(|k| k.slot()).collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }
}
