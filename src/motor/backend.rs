// Vendor backend seam
//
// Each controller family maps its own driver API onto `Backend`, which speaks
// native units only. `Motion` (driver.rs) layers unit conversion, soft limits
// and the state machine on top.

use super::motion::{NeutralMode, PidGains, RampRates, SetpointKind};

/// Error reported by a vendor driver call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    #[error("Device {id} returned error status: {code}")]
    Status { id: i32, code: i32 },

    #[error("Timeout waiting for response from device {id}")]
    Timeout { id: i32 },

    #[error("Device {id} does not support {what}")]
    Unsupported { id: i32, what: &'static str },

    #[error("Invalid parameter for device {id}: {reason}")]
    InvalidParameter { id: i32, reason: String },
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// Native-unit operations every controller family provides
pub trait Backend {
    /// Human readable family name for logs
    fn family(&self) -> &'static str;

    fn device_id(&self) -> i32;

    /// Open-loop output fraction in [-1, 1]
    fn percent_output(&mut self, percent: f64) -> Result<()>;

    /// The output the family uses when idle
    fn neutral_output(&mut self) -> Result<()>;

    fn voltage_output(&mut self, volts: f64) -> Result<()>;

    /// Closed-loop directive using the PID slot of `kind`
    fn closed_loop(&mut self, kind: SetpointKind, native: f64, profiled: bool) -> Result<()>;

    fn position(&mut self) -> Result<f64>;

    fn velocity(&mut self) -> Result<f64>;

    fn set_position(&mut self, native: f64) -> Result<()>;

    /// Raw electrical state of the switch contacts
    fn fwd_limit_closed(&mut self) -> Result<bool>;

    fn rev_limit_closed(&mut self) -> Result<bool>;

    /// Voltage applied to the motor
    fn output_voltage(&mut self) -> Result<f64>;

    fn bus_voltage(&mut self) -> Result<f64>;

    fn output_current(&mut self) -> Result<f64>;

    fn configure_gains(&mut self, slot: u8, gains: PidGains) -> Result<()>;

    fn configure_integral_zone(&mut self, slot: u8, native: f64) -> Result<()>;

    fn configure_tolerance(&mut self, slot: u8, native: f64) -> Result<()>;

    fn configure_ramp_rates(&mut self, rates: RampRates) -> Result<()>;

    fn configure_limit_switches(&mut self, fwd_normally_open: bool, rev_normally_open: bool) -> Result<()>;

    fn configure_peak_output(&mut self, forward: f64, reverse: f64) -> Result<()>;

    /// Smallest output applied while the motor is driven
    fn configure_nominal_output(&mut self, forward: f64, reverse: f64) -> Result<()>;

    fn configure_motion_profile(&mut self, cruise_native: f64, acceleration_native: f64) -> Result<()>;

    fn set_neutral_mode(&mut self, mode: NeutralMode) -> Result<()>;

    fn set_inverted(&mut self, inverted: bool) -> Result<()>;

    fn set_sensor_inverted(&mut self, inverted: bool) -> Result<()>;

    fn configure_current_limit(&mut self, amps: f64) -> Result<()>;

    fn clear_sticky_faults(&mut self) -> Result<()>;
}
