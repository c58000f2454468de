// TalonFX family: ticks-based controller with an integrated sensor
//
// Position is in sensor ticks, velocity in ticks per 100ms. Open loop is
// percent output; there is no native voltage mode, so voltage requests are
// scaled by the measured bus voltage.

use tracing::debug;

use super::backend::{Backend, DriverError, Result};
use super::motion::{NeutralMode, PidGains, RampRates, SetpointKind};

/// Control modes understood by the controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TalonControlMode {
    PercentOutput,
    Position,
    Velocity,
    MotionMagic,
}

/// Limit switch wiring as configured on the controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitSwitchNormal {
    NormallyOpen,
    NormallyClosed,
    Disabled,
}

impl LimitSwitchNormal {
    pub fn from_normally_open(normally_open: bool) -> Self {
        if normally_open {
            LimitSwitchNormal::NormallyOpen
        } else {
            LimitSwitchNormal::NormallyClosed
        }
    }
}

/// Driver API of a TalonFX controller
pub trait TalonFxDriver {
    fn device_id(&self) -> i32;

    fn set(&mut self, mode: TalonControlMode, value: f64) -> Result<()>;

    fn select_profile_slot(&mut self, slot: u8) -> Result<()>;

    fn selected_sensor_position(&mut self) -> Result<f64>;

    fn selected_sensor_velocity(&mut self) -> Result<f64>;

    fn set_selected_sensor_position(&mut self, ticks: f64) -> Result<()>;

    fn is_fwd_limit_switch_closed(&mut self) -> Result<bool>;

    fn is_rev_limit_switch_closed(&mut self) -> Result<bool>;

    fn motor_output_voltage(&mut self) -> Result<f64>;

    fn bus_voltage(&mut self) -> Result<f64>;

    fn supply_current(&mut self) -> Result<f64>;

    fn config_pidf(&mut self, slot: u8, gains: PidGains) -> Result<()>;

    fn config_integral_zone(&mut self, slot: u8, ticks: f64) -> Result<()>;

    fn config_allowable_closedloop_error(&mut self, slot: u8, ticks: f64) -> Result<()>;

    fn config_openloop_ramp(&mut self, seconds: f64) -> Result<()>;

    fn config_closedloop_ramp(&mut self, seconds: f64) -> Result<()>;

    fn config_forward_limit_switch(&mut self, normal: LimitSwitchNormal) -> Result<()>;

    fn config_reverse_limit_switch(&mut self, normal: LimitSwitchNormal) -> Result<()>;

    fn config_peak_output(&mut self, forward: f64, reverse: f64) -> Result<()>;

    fn config_nominal_output(&mut self, forward: f64, reverse: f64) -> Result<()>;

    fn config_motion_cruise_velocity(&mut self, ticks_per_100ms: f64) -> Result<()>;

    fn config_motion_acceleration(&mut self, ticks_per_100ms_per_s: f64) -> Result<()>;

    fn set_neutral_mode(&mut self, mode: NeutralMode) -> Result<()>;

    fn set_inverted(&mut self, inverted: bool) -> Result<()>;

    fn set_sensor_phase(&mut self, inverted: bool) -> Result<()>;

    fn config_supply_current_limit(&mut self, amps: f64) -> Result<()>;

    fn clear_sticky_faults(&mut self) -> Result<()>;
}

/// `Backend` over a TalonFX driver handle
pub struct TalonFx<D: TalonFxDriver> {
    driver: D,
}

impl<D: TalonFxDriver> TalonFx<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: TalonFxDriver> Backend for TalonFx<D> {
    fn family(&self) -> &'static str {
        "TalonFX"
    }

    fn device_id(&self) -> i32 {
        self.driver.device_id()
    }

    fn percent_output(&mut self, percent: f64) -> Result<()> {
        self.driver.set(TalonControlMode::PercentOutput, percent)
    }

    fn neutral_output(&mut self) -> Result<()> {
        self.driver.set(TalonControlMode::PercentOutput, 0.0)
    }

    fn voltage_output(&mut self, volts: f64) -> Result<()> {
        let bus = self.driver.bus_voltage()?;
        if bus <= 0.0 {
            return Err(DriverError::InvalidParameter {
                id: self.driver.device_id(),
                reason: format!("bus voltage {:.2} V", bus),
            });
        }
        self.driver
            .set(TalonControlMode::PercentOutput, (volts / bus).clamp(-1.0, 1.0))
    }

    fn closed_loop(&mut self, kind: SetpointKind, native: f64, profiled: bool) -> Result<()> {
        let mode = match kind {
            SetpointKind::Position if profiled => TalonControlMode::MotionMagic,
            SetpointKind::Position => TalonControlMode::Position,
            SetpointKind::LinearVelocity | SetpointKind::AngularVelocity => TalonControlMode::Velocity,
        };
        debug!(
            "TalonFX {}: {:?} -> {:.1} (slot {})",
            self.driver.device_id(),
            mode,
            native,
            kind.slot()
        );
        self.driver.select_profile_slot(kind.slot())?;
        self.driver.set(mode, native)
    }

    fn position(&mut self) -> Result<f64> {
        self.driver.selected_sensor_position()
    }

    fn velocity(&mut self) -> Result<f64> {
        self.driver.selected_sensor_velocity()
    }

    fn set_position(&mut self, native: f64) -> Result<()> {
        self.driver.set_selected_sensor_position(native)
    }

    fn fwd_limit_closed(&mut self) -> Result<bool> {
        self.driver.is_fwd_limit_switch_closed()
    }

    fn rev_limit_closed(&mut self) -> Result<bool> {
        self.driver.is_rev_limit_switch_closed()
    }

    fn output_voltage(&mut self) -> Result<f64> {
        self.driver.motor_output_voltage()
    }

    fn bus_voltage(&mut self) -> Result<f64> {
        self.driver.bus_voltage()
    }

    fn output_current(&mut self) -> Result<f64> {
        self.driver.supply_current()
    }

    fn configure_gains(&mut self, slot: u8, gains: PidGains) -> Result<()> {
        self.driver.config_pidf(slot, gains)
    }

    fn configure_integral_zone(&mut self, slot: u8, native: f64) -> Result<()> {
        self.driver.config_integral_zone(slot, native)
    }

    fn configure_tolerance(&mut self, slot: u8, native: f64) -> Result<()> {
        self.driver.config_allowable_closedloop_error(slot, native)
    }

    fn configure_ramp_rates(&mut self, rates: RampRates) -> Result<()> {
        self.driver.config_openloop_ramp(rates.open_loop)?;
        self.driver.config_closedloop_ramp(rates.closed_loop)
    }

    fn configure_limit_switches(&mut self, fwd_normally_open: bool, rev_normally_open: bool) -> Result<()> {
        self.driver
            .config_forward_limit_switch(LimitSwitchNormal::from_normally_open(fwd_normally_open))?;
        self.driver
            .config_reverse_limit_switch(LimitSwitchNormal::from_normally_open(rev_normally_open))
    }

    fn configure_peak_output(&mut self, forward: f64, reverse: f64) -> Result<()> {
        self.driver.config_peak_output(forward, reverse)
    }

    fn configure_nominal_output(&mut self, forward: f64, reverse: f64) -> Result<()> {
        self.driver.config_nominal_output(forward, reverse)
    }

    fn configure_motion_profile(&mut self, cruise_native: f64, acceleration_native: f64) -> Result<()> {
        self.driver.config_motion_cruise_velocity(cruise_native)?;
        self.driver.config_motion_acceleration(acceleration_native)
    }

    fn set_neutral_mode(&mut self, mode: NeutralMode) -> Result<()> {
        self.driver.set_neutral_mode(mode)
    }

    fn set_inverted(&mut self, inverted: bool) -> Result<()> {
        self.driver.set_inverted(inverted)
    }

    fn set_sensor_inverted(&mut self, inverted: bool) -> Result<()> {
        self.driver.set_sensor_phase(inverted)
    }

    fn configure_current_limit(&mut self, amps: f64) -> Result<()> {
        self.driver.config_supply_current_limit(amps)
    }

    fn clear_sticky_faults(&mut self) -> Result<()> {
        self.driver.clear_sticky_faults()
    }
}
