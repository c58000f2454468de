// SPARK MAX family: duty-cycle controller with position and velocity modes
//
// The encoder reports rotations and RPM. Every closed-loop reference carries
// its PID slot; idle output is a zero-volt reference.

use tracing::debug;

use super::backend::{Backend, DriverError, Result};
use super::motion::{NeutralMode, PidGains, RampRates, SetpointKind};

/// Reference types understood by the controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SparkControlType {
    DutyCycle,
    Voltage,
    Position,
    Velocity,
    SmartMotion,
    SmartVelocity,
}

/// Limit switch contact type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SparkLimitPolarity {
    NormallyOpen,
    NormallyClosed,
}

impl SparkLimitPolarity {
    pub fn from_normally_open(normally_open: bool) -> Self {
        if normally_open {
            SparkLimitPolarity::NormallyOpen
        } else {
            SparkLimitPolarity::NormallyClosed
        }
    }
}

/// Driver API of a SPARK MAX controller
pub trait SparkMaxDriver {
    fn device_id(&self) -> i32;

    fn set_reference(&mut self, value: f64, control: SparkControlType, slot: u8) -> Result<()>;

    /// Rotations
    fn encoder_position(&mut self) -> Result<f64>;

    /// RPM
    fn encoder_velocity(&mut self) -> Result<f64>;

    fn set_encoder_position(&mut self, rotations: f64) -> Result<()>;

    fn forward_limit_closed(&mut self) -> Result<bool>;

    fn reverse_limit_closed(&mut self) -> Result<bool>;

    fn enable_forward_limit(&mut self, polarity: SparkLimitPolarity, enabled: bool) -> Result<()>;

    fn enable_reverse_limit(&mut self, polarity: SparkLimitPolarity, enabled: bool) -> Result<()>;

    /// Duty cycle currently applied, in [-1, 1]
    fn applied_output(&mut self) -> Result<f64>;

    fn bus_voltage(&mut self) -> Result<f64>;

    fn output_current(&mut self) -> Result<f64>;

    fn set_pidf(&mut self, slot: u8, gains: PidGains) -> Result<()>;

    fn set_i_zone(&mut self, slot: u8, value: f64) -> Result<()>;

    fn set_allowed_closed_loop_error(&mut self, slot: u8, value: f64) -> Result<()>;

    fn set_smart_motion_max_velocity(&mut self, slot: u8, rpm: f64) -> Result<()>;

    fn set_smart_motion_max_accel(&mut self, slot: u8, rpm_per_s: f64) -> Result<()>;

    fn set_output_range(&mut self, slot: u8, min: f64, max: f64) -> Result<()>;

    fn set_open_loop_ramp_rate(&mut self, seconds: f64) -> Result<()>;

    fn set_closed_loop_ramp_rate(&mut self, seconds: f64) -> Result<()>;

    fn set_idle_mode(&mut self, mode: NeutralMode) -> Result<()>;

    fn set_inverted(&mut self, inverted: bool) -> Result<()>;

    fn set_encoder_inverted(&mut self, inverted: bool) -> Result<()>;

    fn set_smart_current_limit(&mut self, amps: u32) -> Result<()>;

    fn clear_faults(&mut self) -> Result<()>;
}

/// `Backend` over a SPARK MAX driver handle
pub struct SparkMax<D: SparkMaxDriver> {
    driver: D,
}

impl<D: SparkMaxDriver> SparkMax<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: SparkMaxDriver> Backend for SparkMax<D> {
    fn family(&self) -> &'static str {
        "SPARK MAX"
    }

    fn device_id(&self) -> i32 {
        self.driver.device_id()
    }

    fn percent_output(&mut self, percent: f64) -> Result<()> {
        self.driver.set_reference(percent, SparkControlType::DutyCycle, 0)
    }

    fn neutral_output(&mut self) -> Result<()> {
        self.driver.set_reference(0.0, SparkControlType::Voltage, 0)
    }

    fn voltage_output(&mut self, volts: f64) -> Result<()> {
        self.driver.set_reference(volts, SparkControlType::Voltage, 0)
    }

    fn closed_loop(&mut self, kind: SetpointKind, native: f64, profiled: bool) -> Result<()> {
        let control = match (kind, profiled) {
            (SetpointKind::Position, true) => SparkControlType::SmartMotion,
            (SetpointKind::Position, false) => SparkControlType::Position,
            (_, true) => SparkControlType::SmartVelocity,
            (_, false) => SparkControlType::Velocity,
        };
        debug!(
            "SPARK MAX {}: {:?} -> {:.3} (slot {})",
            self.driver.device_id(),
            control,
            native,
            kind.slot()
        );
        self.driver.set_reference(native, control, kind.slot())
    }

    fn position(&mut self) -> Result<f64> {
        self.driver.encoder_position()
    }

    fn velocity(&mut self) -> Result<f64> {
        self.driver.encoder_velocity()
    }

    fn set_position(&mut self, native: f64) -> Result<()> {
        self.driver.set_encoder_position(native)
    }

    fn fwd_limit_closed(&mut self) -> Result<bool> {
        self.driver.forward_limit_closed()
    }

    fn rev_limit_closed(&mut self) -> Result<bool> {
        self.driver.reverse_limit_closed()
    }

    fn output_voltage(&mut self) -> Result<f64> {
        // Applied duty cycle scaled by what the bus can deliver
        Ok(self.driver.applied_output()? * self.driver.bus_voltage()?)
    }

    fn bus_voltage(&mut self) -> Result<f64> {
        self.driver.bus_voltage()
    }

    fn output_current(&mut self) -> Result<f64> {
        self.driver.output_current()
    }

    fn configure_gains(&mut self, slot: u8, gains: PidGains) -> Result<()> {
        self.driver.set_pidf(slot, gains)
    }

    fn configure_integral_zone(&mut self, slot: u8, native: f64) -> Result<()> {
        self.driver.set_i_zone(slot, native)
    }

    fn configure_tolerance(&mut self, slot: u8, native: f64) -> Result<()> {
        self.driver.set_allowed_closed_loop_error(slot, native)
    }

    fn configure_ramp_rates(&mut self, rates: RampRates) -> Result<()> {
        self.driver.set_open_loop_ramp_rate(rates.open_loop)?;
        self.driver.set_closed_loop_ramp_rate(rates.closed_loop)
    }

    fn configure_limit_switches(&mut self, fwd_normally_open: bool, rev_normally_open: bool) -> Result<()> {
        self.driver
            .enable_forward_limit(SparkLimitPolarity::from_normally_open(fwd_normally_open), true)?;
        self.driver
            .enable_reverse_limit(SparkLimitPolarity::from_normally_open(rev_normally_open), true)
    }

    fn configure_peak_output(&mut self, forward: f64, reverse: f64) -> Result<()> {
        for kind in SetpointKind::ALL {
            self.driver.set_output_range(kind.slot(), reverse, forward)?;
        }
        Ok(())
    }

    // The SPARK MAX has no nominal output setting; only the zero floor is accepted
    fn configure_nominal_output(&mut self, forward: f64, reverse: f64) -> Result<()> {
        if forward == 0.0 && reverse == 0.0 {
            Ok(())
        } else {
            Err(DriverError::Unsupported {
                id: self.driver.device_id(),
                what: "nominal output",
            })
        }
    }

    fn configure_motion_profile(&mut self, cruise_native: f64, acceleration_native: f64) -> Result<()> {
        for kind in SetpointKind::ALL {
            self.driver
                .set_smart_motion_max_velocity(kind.slot(), cruise_native)?;
            self.driver
                .set_smart_motion_max_accel(kind.slot(), acceleration_native)?;
        }
        Ok(())
    }

    fn set_neutral_mode(&mut self, mode: NeutralMode) -> Result<()> {
        self.driver.set_idle_mode(mode)
    }

    fn set_inverted(&mut self, inverted: bool) -> Result<()> {
        self.driver.set_inverted(inverted)
    }

    fn set_sensor_inverted(&mut self, inverted: bool) -> Result<()> {
        self.driver.set_encoder_inverted(inverted)
    }

    fn configure_current_limit(&mut self, amps: f64) -> Result<()> {
        self.driver.set_smart_current_limit(amps.round() as u32)
    }

    fn clear_sticky_faults(&mut self) -> Result<()> {
        self.driver.clear_faults()
    }
}
