// Loop timing, watchdog, and per-family motor defaults
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::motor::motion::{KindMap, MotionError, NeutralMode, PidGains, RampRates, SoftLimits};
use crate::motor::sequencer::{HomingPolicy, SequencerSpeeds};
use crate::motor::units::EncoderScale;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Watchdog: a command still running after this long is cancelled
pub const CMD_TIMEOUT: Duration = Duration::from_secs(15);

// Output voltage below which a motor counts as settled
pub const SETTLED_VOLTAGE: f64 = 1.0;

// Default command approach speed (fraction of full output)
pub const DEFAULT_COMMAND_SPEED: f64 = 0.5;

// TalonFX defaults (drive motors)
// Integrated sensor: 2048 ticks/rev, velocity in ticks/100ms
pub const TALON_FX_ENCODER: EncoderScale = EncoderScale::new(2048.0, 10.0);
pub const TALON_FX_GEARING: f64 = 5.56; // 11386 ticks per wheel revolution
pub const TALON_FX_WHEEL_DIAMETER: f64 = 0.1016; // 4 in
pub const TALON_FX_POSITION_GAINS: PidGains = PidGains::new(0.020, 0.0, 0.0, 0.0);
pub const TALON_FX_VELOCITY_GAINS: PidGains = PidGains::new(0.0006, 0.0, 0.0, 0.350);
pub const TALON_FX_RAMP_RATE: f64 = 0.250; // seconds from neutral to full output
pub const TALON_FX_POSITION_TOLERANCE: f64 = 0.250;
pub const TALON_FX_VELOCITY_TOLERANCE: f64 = 1.000;
pub const TALON_FX_POSITION_LIMITS: SoftLimits = SoftLimits::new(-250.0, 250.0);
pub const TALON_FX_VELOCITY_LIMITS: SoftLimits = SoftLimits::new(-182.0, 182.0);
pub const TALON_FX_IZONE: f64 = 5.0;
pub const TALON_FX_MANUAL_SPEED: f64 = 0.5;
pub const TALON_FX_HOME_SPEED: f64 = 0.0; // drive motors don't home

// SPARK MAX defaults (mechanisms)
// Encoder reports rotations and RPM
pub const SPARK_MAX_ENCODER: EncoderScale = EncoderScale::new(1.0, 1.0 / 60.0);
pub const SPARK_MAX_GEARING: f64 = 10.5; // 84:8
pub const SPARK_MAX_WHEEL_DIAMETER: f64 = 0.0508;
pub const SPARK_MAX_POSITION_GAINS: PidGains = PidGains::new(0.10, 0.0, 0.0, 0.0);
pub const SPARK_MAX_VELOCITY_GAINS: PidGains = PidGains::new(0.0001, 0.0, 0.0, 0.000175);
pub const SPARK_MAX_RAMP_RATE: f64 = 0.250;
pub const SPARK_MAX_POSITION_TOLERANCE: f64 = 0.010;
pub const SPARK_MAX_VELOCITY_TOLERANCE: f64 = 0.100;
pub const SPARK_MAX_POSITION_LIMITS: SoftLimits = SoftLimits::new(0.0, 1.0);
pub const SPARK_MAX_VELOCITY_LIMITS: SoftLimits = SoftLimits::new(-2.0, 2.0);
pub const SPARK_MAX_IZONE: f64 = 0.05;
pub const SPARK_MAX_MANUAL_SPEED: f64 = 0.3;
pub const SPARK_MAX_FWD_HOME_SPEED: f64 = 0.1;
pub const SPARK_MAX_REV_HOME_SPEED: f64 = -0.25;
pub const SPARK_MAX_CURRENT_LIMIT: f64 = 40.0;

/// Peak open/closed-loop output in each direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakOutput {
    pub forward: f64,
    pub reverse: f64,
}

impl Default for PeakOutput {
    fn default() -> Self {
        Self {
            forward: 1.0,
            reverse: -1.0,
        }
    }
}

/// Minimum output the controller applies while driving, per direction
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NominalOutput {
    pub forward: f64,
    pub reverse: f64,
}

/// Motion-profile limits in physical units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionProfile {
    /// m/s
    pub cruise: f64,
    /// m/s^2
    pub acceleration: f64,
}

/// State machine settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomingConfig {
    pub speeds: SequencerSpeeds,
    pub policy: HomingPolicy,
    /// Seconds; zero disables
    pub homing_timeout_s: f64,
    /// Seconds; zero disables
    pub finding_timeout_s: f64,
}

impl Default for HomingConfig {
    fn default() -> Self {
        Self {
            speeds: SequencerSpeeds::default(),
            policy: HomingPolicy::ENCODER_REZERO,
            homing_timeout_s: 0.0,
            finding_timeout_s: 0.0,
        }
    }
}

impl HomingConfig {
    pub fn homing_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.homing_timeout_s).unwrap_or(Duration::ZERO)
    }

    pub fn finding_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.finding_timeout_s).unwrap_or(Duration::ZERO)
    }
}

/// Everything a motor needs at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub gearing: f64,
    pub wheel_diameter: f64,
    pub encoder: EncoderScale,
    pub gains: KindMap<PidGains>,
    pub tolerance: KindMap<f64>,
    pub soft_limits: KindMap<SoftLimits>,
    pub integral_zone: f64,
    pub ramp: RampRates,
    pub peak_output: PeakOutput,
    pub nominal_output: NominalOutput,
    pub neutral_mode: NeutralMode,
    pub fwd_limit_normally_open: bool,
    pub rev_limit_normally_open: bool,
    pub motor_inverted: bool,
    pub sensor_inverted: bool,
    pub current_limit: Option<f64>,
    pub motion_profile: Option<MotionProfile>,
    pub use_motion_profile: bool,
    pub homing: HomingConfig,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self::talon_fx()
    }
}

impl MotionConfig {
    /// Defaults for a TalonFX drive motor
    pub fn talon_fx() -> Self {
        Self {
            gearing: TALON_FX_GEARING,
            wheel_diameter: TALON_FX_WHEEL_DIAMETER,
            encoder: TALON_FX_ENCODER,
            gains: KindMap::new(
                TALON_FX_POSITION_GAINS,
                TALON_FX_VELOCITY_GAINS,
                TALON_FX_VELOCITY_GAINS,
            ),
            tolerance: KindMap::new(
                TALON_FX_POSITION_TOLERANCE,
                TALON_FX_VELOCITY_TOLERANCE,
                TALON_FX_VELOCITY_TOLERANCE,
            ),
            soft_limits: KindMap::new(
                TALON_FX_POSITION_LIMITS,
                TALON_FX_VELOCITY_LIMITS,
                SoftLimits::UNCONSTRAINED,
            ),
            integral_zone: TALON_FX_IZONE,
            ramp: RampRates {
                open_loop: TALON_FX_RAMP_RATE,
                closed_loop: TALON_FX_RAMP_RATE,
            },
            peak_output: PeakOutput::default(),
            nominal_output: NominalOutput::default(),
            neutral_mode: NeutralMode::Brake,
            fwd_limit_normally_open: true,
            rev_limit_normally_open: true,
            motor_inverted: false,
            sensor_inverted: false,
            current_limit: None,
            motion_profile: None,
            use_motion_profile: false,
            homing: HomingConfig {
                speeds: SequencerSpeeds {
                    fwd_home: TALON_FX_HOME_SPEED,
                    rev_home: TALON_FX_HOME_SPEED,
                    fwd_manual: TALON_FX_MANUAL_SPEED,
                    rev_manual: -TALON_FX_MANUAL_SPEED,
                },
                ..HomingConfig::default()
            },
        }
    }

    /// Defaults for a SPARK MAX driven mechanism
    pub fn spark_max() -> Self {
        Self {
            gearing: SPARK_MAX_GEARING,
            wheel_diameter: SPARK_MAX_WHEEL_DIAMETER,
            encoder: SPARK_MAX_ENCODER,
            gains: KindMap::new(
                SPARK_MAX_POSITION_GAINS,
                SPARK_MAX_VELOCITY_GAINS,
                SPARK_MAX_VELOCITY_GAINS,
            ),
            tolerance: KindMap::new(
                SPARK_MAX_POSITION_TOLERANCE,
                SPARK_MAX_VELOCITY_TOLERANCE,
                SPARK_MAX_VELOCITY_TOLERANCE,
            ),
            soft_limits: KindMap::new(
                SPARK_MAX_POSITION_LIMITS,
                SPARK_MAX_VELOCITY_LIMITS,
                SoftLimits::UNCONSTRAINED,
            ),
            integral_zone: SPARK_MAX_IZONE,
            ramp: RampRates {
                open_loop: SPARK_MAX_RAMP_RATE,
                closed_loop: SPARK_MAX_RAMP_RATE,
            },
            peak_output: PeakOutput::default(),
            nominal_output: NominalOutput::default(),
            neutral_mode: NeutralMode::Brake,
            fwd_limit_normally_open: true,
            rev_limit_normally_open: true,
            motor_inverted: false,
            sensor_inverted: false,
            current_limit: Some(SPARK_MAX_CURRENT_LIMIT),
            motion_profile: None,
            use_motion_profile: false,
            homing: HomingConfig {
                speeds: SequencerSpeeds {
                    fwd_home: SPARK_MAX_FWD_HOME_SPEED,
                    rev_home: SPARK_MAX_REV_HOME_SPEED,
                    fwd_manual: SPARK_MAX_MANUAL_SPEED,
                    rev_manual: -SPARK_MAX_MANUAL_SPEED,
                },
                ..HomingConfig::default()
            },
        }
    }

    /// Reject values the conversions and clamps cannot work with
    pub fn validate(&self) -> Result<(), MotionError> {
        check_positive("gearing", self.gearing)?;
        check_positive("wheel diameter", self.wheel_diameter)?;
        check_positive("encoder counts per rev", self.encoder.counts_per_rev)?;
        check_positive("encoder intervals per second", self.encoder.intervals_per_second)?;
        for kind in crate::motor::motion::SetpointKind::ALL {
            check_soft_limits(self.soft_limits.get(kind))?;
            check_non_negative("tolerance", self.tolerance.get(kind))?;
        }
        check_non_negative("integral zone", self.integral_zone)?;
        check_non_negative("open-loop ramp rate", self.ramp.open_loop)?;
        check_non_negative("closed-loop ramp rate", self.ramp.closed_loop)?;
        check_output_range("peak output", self.peak_output.forward, self.peak_output.reverse)?;
        check_output_range("nominal output", self.nominal_output.forward, self.nominal_output.reverse)?;
        let speeds = self.homing.speeds;
        check_speed("forward home speed", speeds.fwd_home)?;
        check_speed("reverse home speed", speeds.rev_home)?;
        check_speed("forward manual speed", speeds.fwd_manual)?;
        check_speed("reverse manual speed", speeds.rev_manual)?;
        check_non_negative("homing timeout", self.homing.homing_timeout_s)?;
        check_non_negative("finding timeout", self.homing.finding_timeout_s)?;
        if let Some(amps) = self.current_limit {
            check_positive("current limit", amps)?;
        }
        Ok(())
    }
}

pub(crate) fn check_positive(what: &str, value: f64) -> Result<(), MotionError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(MotionError::InvalidConfig(format!("{} must be positive, got {}", what, value)))
    }
}

pub(crate) fn check_non_negative(what: &str, value: f64) -> Result<(), MotionError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(MotionError::InvalidConfig(format!("{} must not be negative, got {}", what, value)))
    }
}

/// Open-loop output fraction in [-1, 1]
pub(crate) fn check_speed(what: &str, value: f64) -> Result<(), MotionError> {
    if value.is_finite() && (-1.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(MotionError::InvalidConfig(format!("{} must be within [-1, 1], got {}", what, value)))
    }
}

/// Forward in [0, 1], reverse in [-1, 0]
pub(crate) fn check_output_range(what: &str, forward: f64, reverse: f64) -> Result<(), MotionError> {
    if (0.0..=1.0).contains(&forward) && (-1.0..=0.0).contains(&reverse) {
        Ok(())
    } else {
        Err(MotionError::InvalidConfig(format!(
            "{} must be within [0, 1] / [-1, 0], got {} / {}",
            what, forward, reverse
        )))
    }
}

pub(crate) fn check_soft_limits(limits: SoftLimits) -> Result<(), MotionError> {
    if limits.lower.is_finite() && limits.upper.is_finite() && limits.lower <= limits.upper {
        Ok(())
    } else {
        Err(MotionError::InvalidConfig(format!(
            "soft limits out of order: lower {} > upper {}",
            limits.lower, limits.upper
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_defaults_are_valid() {
        assert!(MotionConfig::talon_fx().validate().is_ok());
        assert!(MotionConfig::spark_max().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_geometry_and_limits() {
        let mut config = MotionConfig::talon_fx();
        config.gearing = 0.0;
        assert!(matches!(config.validate(), Err(MotionError::InvalidConfig(_))));

        let mut config = MotionConfig::spark_max();
        config.wheel_diameter = -0.1;
        assert!(config.validate().is_err());

        let mut config = MotionConfig::talon_fx();
        config.soft_limits.position = SoftLimits::new(5.0, -5.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_speeds_outside_full_output() {
        let mut config = MotionConfig::spark_max();
        config.homing.speeds.rev_home = -7.5;
        assert!(matches!(config.validate(), Err(MotionError::InvalidConfig(_))));

        let mut config = MotionConfig::talon_fx();
        config.homing.speeds.fwd_manual = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = MotionConfig::talon_fx();
        config.homing.speeds.fwd_manual = 1.0;
        config.homing.speeds.rev_manual = -1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_nominal_output_outside_range() {
        let mut config = MotionConfig::talon_fx();
        config.nominal_output = NominalOutput {
            forward: 0.05,
            reverse: -0.05,
        };
        assert!(config.validate().is_ok());

        config.nominal_output.reverse = 0.05;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: MotionConfig = serde_json::from_str(r#"{"gearing": 12.0}"#).unwrap();
        assert_eq!(config.gearing, 12.0);
        assert_eq!(config.wheel_diameter, TALON_FX_WHEEL_DIAMETER);
        assert_eq!(config.homing.policy, HomingPolicy::ENCODER_REZERO);
    }
}
