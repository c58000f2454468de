// Simulated controllers for both families
//
// A `SimPlant` is a single-axis mechanism with optional switches at the ends of
// travel. `SimTalonFx` and `SimSparkMax` expose it through the vendor driver
// traits and keep the most recent output commands so tests can check what was
// sent.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use super::backend::{DriverError, Result};
use super::motion::{NeutralMode, PidGains, RampRates};
use super::spark::{SparkControlType, SparkLimitPolarity, SparkMaxDriver};
use super::talon::{LimitSwitchNormal, TalonControlMode, TalonFxDriver};

pub type SimHandle = Rc<RefCell<SimPlant>>;

/// Output commands kept in `SimPlant::history`
pub const HISTORY_LEN: usize = 64;

/// Output command as the plant sees it (native units)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimCommand {
    Percent(f64),
    Voltage(f64),
    Position(f64),
    Velocity(f64),
}

impl SimCommand {
    /// True for any command that leaves the motor unpowered
    pub fn is_zero_output(&self) -> bool {
        matches!(self, SimCommand::Percent(v) | SimCommand::Voltage(v) if *v == 0.0)
    }
}

/// A limit switch on the mechanism
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimSwitch {
    /// Wiring: open at rest (true) or closed at rest (false)
    pub normally_open: bool,
    pub pressed: bool,
    /// Physical travel at which the switch trips (and the hard stop sits)
    pub trip_at: Option<f64>,
}

impl SimSwitch {
    fn new() -> Self {
        Self {
            normally_open: true,
            pressed: false,
            trip_at: None,
        }
    }

    /// Electrical reading of the contacts
    pub fn closed(&self) -> bool {
        self.pressed == self.normally_open
    }
}

#[derive(Debug, Clone)]
pub struct SimPlant {
    /// Physical travel in native position units
    pub travel: f64,
    /// Travel at which the encoder reads zero
    pub encoder_offset: f64,
    /// Native velocity units
    pub velocity: f64,
    pub intervals_per_second: f64,
    /// Native velocity at full output
    pub free_speed: f64,
    /// Travel over which the position loop goes from full output to zero
    pub position_band: f64,
    pub bus_voltage: f64,
    pub applied_output: f64,
    /// Forces the reported output voltage when set
    pub output_voltage_override: Option<f64>,
    pub current: f64,
    pub fwd_switch: SimSwitch,
    pub rev_switch: SimSwitch,
    pub command: Option<SimCommand>,
    /// Most recent commands, oldest first
    pub history: VecDeque<SimCommand>,
    /// Output commands received since construction
    pub sent: usize,
    pub slot: u8,
    pub gains: [PidGains; 3],
    pub izone: [f64; 3],
    pub tolerance: [f64; 3],
    pub ramp: RampRates,
    pub peak_output: (f64, f64),
    pub nominal_output: (f64, f64),
    pub cruise: f64,
    pub acceleration: f64,
    pub neutral_mode: NeutralMode,
    pub inverted: bool,
    pub sensor_inverted: bool,
    pub current_limit: Option<f64>,
    pub fwd_limit_normally_open: Option<bool>,
    pub rev_limit_normally_open: Option<bool>,
    pub sticky_faults: u32,
    /// Status code returned by the next driver call
    pub fail_next: Option<i32>,
}

impl SimPlant {
    fn new(intervals_per_second: f64, free_speed: f64) -> Self {
        Self {
            travel: 0.0,
            encoder_offset: 0.0,
            velocity: 0.0,
            intervals_per_second,
            free_speed,
            position_band: free_speed * intervals_per_second * 0.25,
            bus_voltage: 12.0,
            applied_output: 0.0,
            output_voltage_override: None,
            current: 0.0,
            fwd_switch: SimSwitch::new(),
            rev_switch: SimSwitch::new(),
            command: None,
            history: VecDeque::with_capacity(HISTORY_LEN),
            sent: 0,
            slot: 0,
            gains: [PidGains::default(); 3],
            izone: [0.0; 3],
            tolerance: [0.0; 3],
            ramp: RampRates::default(),
            peak_output: (1.0, -1.0),
            nominal_output: (0.0, 0.0),
            cruise: 0.0,
            acceleration: 0.0,
            neutral_mode: NeutralMode::Brake,
            inverted: false,
            sensor_inverted: false,
            current_limit: None,
            fwd_limit_normally_open: None,
            rev_limit_normally_open: None,
            sticky_faults: 0,
            fail_next: None,
        }
    }

    /// Falcon-like plant: 6380 RPM free speed, ticks per 100ms
    pub fn talon_fx() -> Self {
        Self::new(10.0, 6380.0 / 60.0 * 2048.0 / 10.0)
    }

    /// NEO-like plant: 5676 RPM free speed, RPM
    pub fn spark_max() -> Self {
        Self::new(1.0 / 60.0, 5676.0)
    }

    /// Place switches (and hard stops) at the given travel
    pub fn with_travel(mut self, rev_at: f64, fwd_at: f64) -> Self {
        self.rev_switch.trip_at = Some(rev_at);
        self.fwd_switch.trip_at = Some(fwd_at);
        self
    }

    pub fn shared(self) -> SimHandle {
        Rc::new(RefCell::new(self))
    }

    pub fn encoder_position(&self) -> f64 {
        self.travel - self.encoder_offset
    }

    pub fn last_command(&self) -> Option<SimCommand> {
        self.history.back().copied()
    }

    pub fn output_voltage(&self) -> f64 {
        self.output_voltage_override
            .unwrap_or(self.applied_output * self.bus_voltage)
    }

    fn record(&mut self, command: SimCommand) {
        self.command = Some(command);
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(command);
        self.sent += 1;
    }

    /// Advance the mechanism by `dt`
    pub fn step(&mut self, dt: Duration) {
        let fraction = match self.command {
            Some(SimCommand::Percent(p)) => p,
            Some(SimCommand::Voltage(v)) => v / self.bus_voltage,
            Some(SimCommand::Position(target)) => (target - self.encoder_position()) / self.position_band,
            Some(SimCommand::Velocity(v)) => v / self.free_speed,
            None => 0.0,
        };
        let (peak_fwd, peak_rev) = self.peak_output;
        let (nominal_fwd, nominal_rev) = self.nominal_output;
        let fraction = if fraction > 0.0 {
            fraction.max(nominal_fwd)
        } else if fraction < 0.0 {
            fraction.min(nominal_rev)
        } else {
            fraction
        };
        self.applied_output = fraction.clamp(peak_rev, peak_fwd);
        self.velocity = self.applied_output * self.free_speed;
        self.current = self.applied_output.abs() * 40.0;
        self.travel += self.velocity * self.intervals_per_second * dt.as_secs_f64();

        if let Some(at) = self.fwd_switch.trip_at {
            self.fwd_switch.pressed = self.travel >= at;
            if self.fwd_switch.pressed {
                self.travel = at;
                self.velocity = self.velocity.min(0.0);
            }
        }
        if let Some(at) = self.rev_switch.trip_at {
            self.rev_switch.pressed = self.travel <= at;
            if self.rev_switch.pressed {
                self.travel = at;
                self.velocity = self.velocity.max(0.0);
            }
        }
    }

    fn call<R>(&mut self, id: i32, f: impl FnOnce(&mut SimPlant) -> R) -> Result<R> {
        match self.fail_next.take() {
            Some(code) => Err(DriverError::Status { id, code }),
            None => Ok(f(self)),
        }
    }
}

/// TalonFX driver backed by a simulated plant
pub struct SimTalonFx {
    id: i32,
    plant: SimHandle,
}

impl SimTalonFx {
    pub fn new(id: i32, plant: SimHandle) -> Self {
        Self { id, plant }
    }

    fn call<R>(&self, f: impl FnOnce(&mut SimPlant) -> R) -> Result<R> {
        self.plant.borrow_mut().call(self.id, f)
    }
}

impl TalonFxDriver for SimTalonFx {
    fn device_id(&self) -> i32 {
        self.id
    }

    fn set(&mut self, mode: TalonControlMode, value: f64) -> Result<()> {
        self.call(|p| {
            p.record(match mode {
                TalonControlMode::PercentOutput => SimCommand::Percent(value),
                TalonControlMode::Position | TalonControlMode::MotionMagic => SimCommand::Position(value),
                TalonControlMode::Velocity => SimCommand::Velocity(value),
            })
        })
    }

    fn select_profile_slot(&mut self, slot: u8) -> Result<()> {
        self.call(|p| p.slot = slot)
    }

    fn selected_sensor_position(&mut self) -> Result<f64> {
        self.call(|p| p.encoder_position())
    }

    fn selected_sensor_velocity(&mut self) -> Result<f64> {
        self.call(|p| p.velocity)
    }

    fn set_selected_sensor_position(&mut self, ticks: f64) -> Result<()> {
        self.call(|p| p.encoder_offset = p.travel - ticks)
    }

    fn is_fwd_limit_switch_closed(&mut self) -> Result<bool> {
        self.call(|p| p.fwd_switch.closed())
    }

    fn is_rev_limit_switch_closed(&mut self) -> Result<bool> {
        self.call(|p| p.rev_switch.closed())
    }

    fn motor_output_voltage(&mut self) -> Result<f64> {
        self.call(|p| p.output_voltage())
    }

    fn bus_voltage(&mut self) -> Result<f64> {
        self.call(|p| p.bus_voltage)
    }

    fn supply_current(&mut self) -> Result<f64> {
        self.call(|p| p.current)
    }

    fn config_pidf(&mut self, slot: u8, gains: PidGains) -> Result<()> {
        self.call(|p| p.gains[slot as usize % 3] = gains)
    }

    fn config_integral_zone(&mut self, slot: u8, ticks: f64) -> Result<()> {
        self.call(|p| p.izone[slot as usize % 3] = ticks)
    }

    fn config_allowable_closedloop_error(&mut self, slot: u8, ticks: f64) -> Result<()> {
        self.call(|p| p.tolerance[slot as usize % 3] = ticks)
    }

    fn config_openloop_ramp(&mut self, seconds: f64) -> Result<()> {
        self.call(|p| p.ramp.open_loop = seconds)
    }

    fn config_closedloop_ramp(&mut self, seconds: f64) -> Result<()> {
        self.call(|p| p.ramp.closed_loop = seconds)
    }

    fn config_forward_limit_switch(&mut self, normal: LimitSwitchNormal) -> Result<()> {
        self.call(|p| {
            p.fwd_limit_normally_open = match normal {
                LimitSwitchNormal::NormallyOpen => Some(true),
                LimitSwitchNormal::NormallyClosed => Some(false),
                LimitSwitchNormal::Disabled => None,
            }
        })
    }

    fn config_reverse_limit_switch(&mut self, normal: LimitSwitchNormal) -> Result<()> {
        self.call(|p| {
            p.rev_limit_normally_open = match normal {
                LimitSwitchNormal::NormallyOpen => Some(true),
                LimitSwitchNormal::NormallyClosed => Some(false),
                LimitSwitchNormal::Disabled => None,
            }
        })
    }

    fn config_peak_output(&mut self, forward: f64, reverse: f64) -> Result<()> {
        self.call(|p| p.peak_output = (forward, reverse))
    }

    fn config_nominal_output(&mut self, forward: f64, reverse: f64) -> Result<()> {
        self.call(|p| p.nominal_output = (forward, reverse))
    }

    fn config_motion_cruise_velocity(&mut self, ticks_per_100ms: f64) -> Result<()> {
        self.call(|p| p.cruise = ticks_per_100ms)
    }

    fn config_motion_acceleration(&mut self, ticks_per_100ms_per_s: f64) -> Result<()> {
        self.call(|p| p.acceleration = ticks_per_100ms_per_s)
    }

    fn set_neutral_mode(&mut self, mode: NeutralMode) -> Result<()> {
        self.call(|p| p.neutral_mode = mode)
    }

    fn set_inverted(&mut self, inverted: bool) -> Result<()> {
        self.call(|p| p.inverted = inverted)
    }

    fn set_sensor_phase(&mut self, inverted: bool) -> Result<()> {
        self.call(|p| p.sensor_inverted = inverted)
    }

    fn config_supply_current_limit(&mut self, amps: f64) -> Result<()> {
        self.call(|p| p.current_limit = Some(amps))
    }

    fn clear_sticky_faults(&mut self) -> Result<()> {
        self.call(|p| p.sticky_faults = 0)
    }
}

/// SPARK MAX driver backed by a simulated plant
pub struct SimSparkMax {
    id: i32,
    plant: SimHandle,
}

impl SimSparkMax {
    pub fn new(id: i32, plant: SimHandle) -> Self {
        Self { id, plant }
    }

    fn call<R>(&self, f: impl FnOnce(&mut SimPlant) -> R) -> Result<R> {
        self.plant.borrow_mut().call(self.id, f)
    }
}

impl SparkMaxDriver for SimSparkMax {
    fn device_id(&self) -> i32 {
        self.id
    }

    fn set_reference(&mut self, value: f64, control: SparkControlType, slot: u8) -> Result<()> {
        self.call(|p| {
            p.slot = slot;
            p.record(match control {
                SparkControlType::DutyCycle => SimCommand::Percent(value),
                SparkControlType::Voltage => SimCommand::Voltage(value),
                SparkControlType::Position | SparkControlType::SmartMotion => SimCommand::Position(value),
                SparkControlType::Velocity | SparkControlType::SmartVelocity => SimCommand::Velocity(value),
            })
        })
    }

    fn encoder_position(&mut self) -> Result<f64> {
        self.call(|p| p.encoder_position())
    }

    fn encoder_velocity(&mut self) -> Result<f64> {
        self.call(|p| p.velocity)
    }

    fn set_encoder_position(&mut self, rotations: f64) -> Result<()> {
        self.call(|p| p.encoder_offset = p.travel - rotations)
    }

    fn forward_limit_closed(&mut self) -> Result<bool> {
        self.call(|p| p.fwd_switch.closed())
    }

    fn reverse_limit_closed(&mut self) -> Result<bool> {
        self.call(|p| p.rev_switch.closed())
    }

    fn enable_forward_limit(&mut self, polarity: SparkLimitPolarity, enabled: bool) -> Result<()> {
        self.call(|p| {
            p.fwd_limit_normally_open = enabled.then_some(polarity == SparkLimitPolarity::NormallyOpen)
        })
    }

    fn enable_reverse_limit(&mut self, polarity: SparkLimitPolarity, enabled: bool) -> Result<()> {
        self.call(|p| {
            p.rev_limit_normally_open = enabled.then_some(polarity == SparkLimitPolarity::NormallyOpen)
        })
    }

    fn applied_output(&mut self) -> Result<f64> {
        self.call(|p| match p.output_voltage_override {
            Some(volts) => volts / p.bus_voltage,
            None => p.applied_output,
        })
    }

    fn bus_voltage(&mut self) -> Result<f64> {
        self.call(|p| p.bus_voltage)
    }

    fn output_current(&mut self) -> Result<f64> {
        self.call(|p| p.current)
    }

    fn set_pidf(&mut self, slot: u8, gains: PidGains) -> Result<()> {
        self.call(|p| p.gains[slot as usize % 3] = gains)
    }

    fn set_i_zone(&mut self, slot: u8, value: f64) -> Result<()> {
        self.call(|p| p.izone[slot as usize % 3] = value)
    }

    fn set_allowed_closed_loop_error(&mut self, slot: u8, value: f64) -> Result<()> {
        self.call(|p| p.tolerance[slot as usize % 3] = value)
    }

    fn set_smart_motion_max_velocity(&mut self, _slot: u8, rpm: f64) -> Result<()> {
        self.call(|p| p.cruise = rpm)
    }

    fn set_smart_motion_max_accel(&mut self, _slot: u8, rpm_per_s: f64) -> Result<()> {
        self.call(|p| p.acceleration = rpm_per_s)
    }

    fn set_output_range(&mut self, _slot: u8, min: f64, max: f64) -> Result<()> {
        self.call(|p| p.peak_output = (max, min))
    }

    fn set_open_loop_ramp_rate(&mut self, seconds: f64) -> Result<()> {
        self.call(|p| p.ramp.open_loop = seconds)
    }

    fn set_closed_loop_ramp_rate(&mut self, seconds: f64) -> Result<()> {
        self.call(|p| p.ramp.closed_loop = seconds)
    }

    fn set_idle_mode(&mut self, mode: NeutralMode) -> Result<()> {
        self.call(|p| p.neutral_mode = mode)
    }

    fn set_inverted(&mut self, inverted: bool) -> Result<()> {
        self.call(|p| p.inverted = inverted)
    }

    fn set_encoder_inverted(&mut self, inverted: bool) -> Result<()> {
        self.call(|p| p.sensor_inverted = inverted)
    }

    fn set_smart_current_limit(&mut self, amps: u32) -> Result<()> {
        self.call(|p| p.current_limit = Some(amps as f64))
    }

    fn clear_faults(&mut self) -> Result<()> {
        self.call(|p| p.sticky_faults = 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_wiring() {
        let mut nc = SimSwitch::new();
        nc.normally_open = false;
        assert!(nc.closed(), "NC switch at rest reads closed");
        nc.pressed = true;
        assert!(!nc.closed());

        let mut no = SimSwitch::new();
        assert!(!no.closed());
        no.pressed = true;
        assert!(no.closed());
    }

    #[test]
    fn test_plant_runs_into_reverse_stop() {
        let mut plant = SimPlant::talon_fx().with_travel(-5000.0, 50000.0);
        plant.record(SimCommand::Percent(-0.5));
        for _ in 0..100 {
            plant.step(Duration::from_millis(20));
        }
        assert!(plant.rev_switch.pressed);
        assert_eq!(plant.travel, -5000.0);
        assert!(!plant.fwd_switch.pressed);
    }

    #[test]
    fn test_position_loop_settles_below_one_volt() {
        let mut plant = SimPlant::spark_max();
        plant.record(SimCommand::Position(12.0));
        for _ in 0..200 {
            plant.step(Duration::from_millis(20));
        }
        assert!((plant.encoder_position() - 12.0).abs() < 0.01);
        assert!(plant.output_voltage().abs() < 1.0);
    }

    #[test]
    fn test_history_keeps_only_recent_commands() {
        let mut plant = SimPlant::spark_max();
        for i in 0..(HISTORY_LEN + 10) {
            plant.record(SimCommand::Percent(i as f64 / 100.0));
        }
        assert_eq!(plant.history.len(), HISTORY_LEN);
        assert_eq!(plant.sent, HISTORY_LEN + 10);
        assert_eq!(plant.history.front(), Some(&SimCommand::Percent(0.1)));
        assert_eq!(
            plant.last_command(),
            Some(SimCommand::Percent((HISTORY_LEN + 9) as f64 / 100.0))
        );
    }

    #[test]
    fn test_nominal_output_floors_small_commands() {
        let mut plant = SimPlant::talon_fx();
        plant.nominal_output = (0.1, -0.1);
        plant.record(SimCommand::Percent(0.02));
        plant.step(Duration::from_millis(20));
        assert_eq!(plant.applied_output, 0.1);

        plant.record(SimCommand::Percent(0.0));
        plant.step(Duration::from_millis(20));
        assert_eq!(plant.applied_output, 0.0);
    }

    #[test]
    fn test_injected_failure_hits_one_call() {
        let plant = SimPlant::talon_fx().shared();
        let mut talon = SimTalonFx::new(3, plant.clone());
        plant.borrow_mut().fail_next = Some(-3);
        assert_eq!(
            talon.bus_voltage(),
            Err(DriverError::Status { id: 3, code: -3 })
        );
        assert_eq!(talon.bus_voltage(), Ok(12.0));
    }
}
