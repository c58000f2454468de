// Motor motion device for either controller family
//
// Wraps a `Backend` with unit conversion, soft limits, setpoint tracking and
// the per-tick state machine, and exposes it all through `MotorMotion`.

use std::cmp::Ordering;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::backend::{self, Backend, DriverError};
use super::motion::{
    ControlMode, MotionError, MotorMotion, NeutralMode, PidGains, RampRates, Result, SetpointKind, SoftLimits,
};
use super::sequencer::{Directive, HomingPolicy, MotionState, Sensors, Sequencer};
use super::spark::SparkMax;
use super::talon::TalonFx;
use super::units::Conversion;
use crate::config::{self, MotionConfig, MotionProfile, NominalOutput, PeakOutput, SETTLED_VOLTAGE};
use crate::timer::{StdTimer, Timer};

/// TalonFX driven motion device
pub type TalonFxMotion<D, T = StdTimer> = Motion<TalonFx<D>, T>;

/// SPARK MAX driven motion device
pub type SparkMaxMotion<D, T = StdTimer> = Motion<SparkMax<D>, T>;

/// Controller handle plus everything the state machine samples
struct Core<B: Backend> {
    backend: B,
    config: MotionConfig,
    setpoint: f64,
    kind: Option<SetpointKind>,
    mode: ControlMode,
    last_error: Option<DriverError>,
}

impl<B: Backend> Core<B> {
    fn conversion(&self) -> Conversion {
        Conversion::new(self.config.gearing, self.config.wheel_diameter, self.config.encoder)
    }

    fn note(&mut self, error: DriverError) {
        warn!("{} {}: {}", self.backend.family(), self.backend.device_id(), error);
        self.last_error = Some(error);
    }

    fn record<R>(&mut self, result: backend::Result<R>) -> Option<R> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.note(e);
                None
            }
        }
    }

    /// Read through the driver; errors read as the neutral value
    fn read<R: Default>(&mut self, f: impl FnOnce(&mut B) -> backend::Result<R>) -> R {
        let result = f(&mut self.backend);
        self.record(result).unwrap_or_default()
    }

    fn configure(&mut self, f: impl FnOnce(&mut B) -> backend::Result<()>) -> Result<()> {
        let result = f(&mut self.backend);
        result.map_err(|e| {
            self.note(e.clone());
            MotionError::Driver(e)
        })
    }

    /// Push every configured value to the controller
    fn initialize(&mut self) {
        let c = self.config.clone();
        let conv = self.conversion();
        let mut results = Vec::new();
        let b = &mut self.backend;

        results.push(b.set_position(0.0));
        results.push(b.set_inverted(c.motor_inverted));
        results.push(b.set_sensor_inverted(c.sensor_inverted));
        results.push(b.configure_peak_output(c.peak_output.forward, c.peak_output.reverse));
        results.push(b.configure_nominal_output(c.nominal_output.forward, c.nominal_output.reverse));
        for kind in SetpointKind::ALL {
            results.push(b.configure_tolerance(kind.slot(), conv.to_native(c.tolerance.get(kind), kind).abs()));
            results.push(b.configure_gains(kind.slot(), c.gains.get(kind)));
            results.push(b.configure_integral_zone(kind.slot(), conv.to_native(c.integral_zone, kind).abs()));
        }
        results.push(b.neutral_output());
        results.push(b.set_neutral_mode(c.neutral_mode));
        results.push(b.configure_limit_switches(c.fwd_limit_normally_open, c.rev_limit_normally_open));
        results.push(b.configure_ramp_rates(c.ramp));
        results.push(b.clear_sticky_faults());
        if let Some(amps) = c.current_limit {
            results.push(b.configure_current_limit(amps));
        }
        if let Some(profile) = c.motion_profile {
            results.push(b.configure_motion_profile(
                conv.to_native(profile.cruise, SetpointKind::LinearVelocity),
                conv.to_native(profile.acceleration, SetpointKind::LinearVelocity),
            ));
        }

        for result in results {
            self.record(result);
        }
    }

    /// Apply a geometry change and re-send values stored in physical units.
    /// On a driver error the previous geometry is restored and re-sent.
    fn rescale(&mut self, change: impl FnOnce(&mut MotionConfig)) -> Result<()> {
        let previous = self.config.clone();
        change(&mut self.config);
        let result = self.push_scaled();
        if result.is_err() {
            self.config = previous;
            // Failures here are recorded as `last_error`
            let _ = self.push_scaled();
        }
        result
    }

    fn push_scaled(&mut self) -> Result<()> {
        let conv = self.conversion();
        for kind in SetpointKind::ALL {
            let tolerance = conv.to_native(self.config.tolerance.get(kind), kind).abs();
            let izone = conv.to_native(self.config.integral_zone, kind).abs();
            self.configure(|b| b.configure_tolerance(kind.slot(), tolerance))?;
            self.configure(|b| b.configure_integral_zone(kind.slot(), izone))?;
        }
        if let Some(profile) = self.config.motion_profile {
            let cruise = conv.to_native(profile.cruise, SetpointKind::LinearVelocity);
            let accel = conv.to_native(profile.acceleration, SetpointKind::LinearVelocity);
            self.configure(|b| b.configure_motion_profile(cruise, accel))?;
        }
        Ok(())
    }

    fn neutral(&mut self) {
        let result = self.backend.neutral_output();
        self.record(result);
        self.mode = ControlMode::Neutral;
    }

    /// Open-loop output, clamped to full scale
    fn output(&mut self, percent: f64) {
        let result = self.backend.percent_output(percent.clamp(-1.0, 1.0));
        self.record(result);
        self.mode = ControlMode::PercentOutput;
    }

    fn closed(&mut self, kind: SetpointKind, value: f64) {
        let native = self.conversion().to_native(value, kind);
        let result = self.backend.closed_loop(kind, native, self.config.use_motion_profile);
        self.record(result);
        self.setpoint = value;
        self.kind = Some(kind);
        self.mode = ControlMode::Closed(kind);
    }

    fn apply(&mut self, directive: Directive) {
        match directive {
            Directive::None => {}
            Directive::Neutral => self.neutral(),
            Directive::Stop => self.output(0.0),
            Directive::Drive(percent) => self.output(percent),
            Directive::Rezero => {
                let result = self.backend.set_position(0.0);
                self.record(result);
                self.closed(SetpointKind::Position, 0.0);
            }
        }
    }

    fn actual(&mut self, kind: SetpointKind) -> f64 {
        let native = match kind {
            SetpointKind::Position => self.read(|b| b.position()),
            SetpointKind::LinearVelocity | SetpointKind::AngularVelocity => self.read(|b| b.velocity()),
        };
        self.conversion().from_native(native, kind)
    }

    fn fwd_pressed(&mut self) -> bool {
        let result = self.backend.fwd_limit_closed();
        let normally_open = self.config.fwd_limit_normally_open;
        self.record(result)
            .map(|closed| closed == normally_open)
            .unwrap_or(false)
    }

    fn rev_pressed(&mut self) -> bool {
        let result = self.backend.rev_limit_closed();
        let normally_open = self.config.rev_limit_normally_open;
        self.record(result)
            .map(|closed| closed == normally_open)
            .unwrap_or(false)
    }

    fn within_tolerance(&mut self) -> bool {
        let Some(kind) = self.kind else {
            return false;
        };
        let error = (self.actual(kind) - self.setpoint).abs();
        error < self.config.tolerance.get(kind) && self.read(|b| b.output_voltage()).abs() < SETTLED_VOLTAGE
    }
}

impl<B: Backend> Sensors for Core<B> {
    fn fwd_limit_pressed(&mut self) -> bool {
        self.fwd_pressed()
    }

    fn rev_limit_pressed(&mut self) -> bool {
        self.rev_pressed()
    }

    fn at_setpoint(&mut self) -> bool {
        self.within_tolerance()
    }

    fn travel(&mut self) -> Option<Ordering> {
        let kind = self.kind?;
        let actual = self.actual(kind);
        self.setpoint.partial_cmp(&actual)
    }
}

/// Closed-loop motor with homing, finding and manual jog
pub struct Motion<B: Backend, T: Timer = StdTimer> {
    core: Core<B>,
    sequencer: Sequencer,
    timer: T,
}

impl<B: Backend, T: Timer> Motion<B, T> {
    /// Validate `config`, push it to the controller and start the timer
    ///
    /// Driver errors during setup are recorded (see `last_error`), not
    /// returned; only an invalid configuration fails construction.
    pub fn new(backend: B, mut timer: T, config: &MotionConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Initializing {} {} (gearing {:.2}, wheel {:.4} m)",
            backend.family(),
            backend.device_id(),
            config.gearing,
            config.wheel_diameter
        );

        let mut core = Core {
            backend,
            config: config.clone(),
            setpoint: 0.0,
            kind: None,
            mode: ControlMode::Neutral,
            last_error: None,
        };
        core.initialize();

        let mut sequencer = Sequencer::new(config.homing.speeds, config.homing.policy);
        sequencer.set_homing_timeout(config.homing.homing_timeout());
        sequencer.set_finding_timeout(config.homing.finding_timeout());
        timer.start();

        Ok(Self { core, sequencer, timer })
    }

    pub fn backend(&self) -> &B {
        &self.core.backend
    }

    pub fn config(&self) -> &MotionConfig {
        &self.core.config
    }

    fn now(&self) -> Duration {
        self.timer.elapsed()
    }
}

impl<B: Backend, T: Timer> MotorMotion for Motion<B, T> {
    fn device_id(&self) -> i32 {
        self.core.backend.device_id()
    }

    fn set_output(&mut self, percent: f64) {
        self.core.output(percent);
    }

    fn set_voltage(&mut self, volts: f64) {
        let result = self.core.backend.voltage_output(volts);
        self.core.record(result);
        self.core.mode = ControlMode::Voltage;
    }

    fn stop(&mut self) {
        self.core.neutral();
        self.sequencer.set_state(MotionState::Idle);
    }

    fn control_mode(&self) -> ControlMode {
        self.core.mode
    }

    fn set_setpoint(&mut self, value: f64, kind: SetpointKind) {
        let clamped = self.core.config.soft_limits.get(kind).clamp(value);
        if clamped != value {
            debug!("{:?} setpoint {:.3} clamped to {:.3}", kind, value, clamped);
        }
        self.core.closed(kind, clamped);
        let now = self.now();
        self.sequencer.start_finding(now);
    }

    /// Not clamped to the soft limits
    fn hold_position(&mut self, position: f64) {
        self.core.closed(SetpointKind::Position, position);
    }

    fn setpoint(&self) -> f64 {
        self.core.setpoint
    }

    fn setpoint_kind(&self) -> Option<SetpointKind> {
        self.core.kind
    }

    fn actual(&mut self, kind: SetpointKind) -> f64 {
        self.core.actual(kind)
    }

    fn tolerance(&self, kind: SetpointKind) -> f64 {
        self.core.config.tolerance.get(kind)
    }

    fn is_at_setpoint(&mut self) -> bool {
        self.core.within_tolerance()
    }

    fn is_fwd_limit_pressed(&mut self) -> bool {
        self.core.fwd_pressed()
    }

    fn is_rev_limit_pressed(&mut self) -> bool {
        self.core.rev_pressed()
    }

    fn motor_voltage(&mut self) -> f64 {
        self.core.read(|b| b.output_voltage())
    }

    fn bus_voltage(&mut self) -> f64 {
        self.core.read(|b| b.bus_voltage())
    }

    fn motor_current(&mut self) -> f64 {
        self.core.read(|b| b.output_current())
    }

    fn raw_encoder_counts(&mut self) -> f64 {
        self.core.read(|b| b.position())
    }

    fn last_error(&self) -> Option<&DriverError> {
        self.core.last_error.as_ref()
    }

    fn configure_limit_switches(&mut self, fwd_normally_open: bool, rev_normally_open: bool) -> Result<()> {
        self.core.config.fwd_limit_normally_open = fwd_normally_open;
        self.core.config.rev_limit_normally_open = rev_normally_open;
        self.core
            .configure(|b| b.configure_limit_switches(fwd_normally_open, rev_normally_open))
    }

    fn set_soft_limits(&mut self, kind: SetpointKind, lower: f64, upper: f64) -> Result<()> {
        let limits = SoftLimits::new(lower, upper);
        config::check_soft_limits(limits)?;
        self.core.config.soft_limits.set(kind, limits);
        Ok(())
    }

    fn soft_limits(&self, kind: SetpointKind) -> SoftLimits {
        self.core.config.soft_limits.get(kind)
    }

    fn set_tolerance(&mut self, kind: SetpointKind, tolerance: f64) -> Result<()> {
        config::check_non_negative("tolerance", tolerance)?;
        self.core.config.tolerance.set(kind, tolerance);
        let native = self.core.conversion().to_native(tolerance, kind).abs();
        self.core.configure(|b| b.configure_tolerance(kind.slot(), native))
    }

    fn set_pid_gains(&mut self, kind: SetpointKind, gains: PidGains) -> Result<()> {
        if ![gains.p, gains.i, gains.d, gains.f].iter().all(|g| g.is_finite()) {
            return Err(MotionError::InvalidConfig(format!("non-finite gains {:?}", gains)));
        }
        self.core.config.gains.set(kind, gains);
        self.core.configure(|b| b.configure_gains(kind.slot(), gains))
    }

    fn pid_gains(&self, kind: SetpointKind) -> PidGains {
        self.core.config.gains.get(kind)
    }

    fn set_integral_zone(&mut self, izone: f64) -> Result<()> {
        config::check_non_negative("integral zone", izone)?;
        self.core.config.integral_zone = izone;
        let conv = self.core.conversion();
        for kind in SetpointKind::ALL {
            let native = conv.to_native(izone, kind).abs();
            self.core.configure(|b| b.configure_integral_zone(kind.slot(), native))?;
        }
        Ok(())
    }

    fn set_ramp_rates(&mut self, rates: RampRates) -> Result<()> {
        config::check_non_negative("open-loop ramp rate", rates.open_loop)?;
        config::check_non_negative("closed-loop ramp rate", rates.closed_loop)?;
        self.core.config.ramp = rates;
        self.core.configure(|b| b.configure_ramp_rates(rates))
    }

    fn set_peak_output(&mut self, forward: f64, reverse: f64) -> Result<()> {
        config::check_output_range("peak output", forward, reverse)?;
        self.core.config.peak_output = PeakOutput { forward, reverse };
        self.core.configure(|b| b.configure_peak_output(forward, reverse))
    }

    fn set_nominal_output(&mut self, forward: f64, reverse: f64) -> Result<()> {
        config::check_output_range("nominal output", forward, reverse)?;
        self.core.configure(|b| b.configure_nominal_output(forward, reverse))?;
        self.core.config.nominal_output = NominalOutput { forward, reverse };
        Ok(())
    }

    fn set_gearing(&mut self, ratio: f64) -> Result<()> {
        config::check_positive("gearing", ratio)?;
        self.core.rescale(|c| c.gearing = ratio)
    }

    fn gearing(&self) -> f64 {
        self.core.config.gearing
    }

    fn set_wheel_diameter(&mut self, diameter: f64) -> Result<()> {
        config::check_positive("wheel diameter", diameter)?;
        self.core.rescale(|c| c.wheel_diameter = diameter)
    }

    fn wheel_diameter(&self) -> f64 {
        self.core.config.wheel_diameter
    }

    fn invert_motor(&mut self, inverted: bool) -> Result<()> {
        self.core.config.motor_inverted = inverted;
        self.core.configure(|b| b.set_inverted(inverted))
    }

    fn invert_sensor(&mut self, inverted: bool) -> Result<()> {
        self.core.config.sensor_inverted = inverted;
        self.core.configure(|b| b.set_sensor_inverted(inverted))
    }

    fn set_neutral_mode(&mut self, mode: NeutralMode) -> Result<()> {
        self.core.config.neutral_mode = mode;
        self.core.configure(|b| b.set_neutral_mode(mode))
    }

    fn configure_motion_profile(&mut self, cruise: f64, acceleration: f64) -> Result<()> {
        config::check_positive("cruise velocity", cruise)?;
        config::check_positive("acceleration", acceleration)?;
        self.core.config.motion_profile = Some(MotionProfile { cruise, acceleration });
        let conv = self.core.conversion();
        let cruise = conv.to_native(cruise, SetpointKind::LinearVelocity);
        let accel = conv.to_native(acceleration, SetpointKind::LinearVelocity);
        self.core.configure(|b| b.configure_motion_profile(cruise, accel))
    }

    fn use_motion_profile(&mut self, enabled: bool) {
        self.core.config.use_motion_profile = enabled;
    }

    fn configure_current_limit(&mut self, amps: f64) -> Result<()> {
        config::check_positive("current limit", amps)?;
        self.core.config.current_limit = Some(amps);
        self.core.configure(|b| b.configure_current_limit(amps))
    }

    fn clear_sticky_faults(&mut self) -> Result<()> {
        self.core.configure(|b| b.clear_sticky_faults())
    }

    fn reset_encoder_position(&mut self) -> Result<()> {
        self.core.configure(|b| b.set_position(0.0))
    }

    fn tick(&mut self) {
        let now = self.now();
        let directive = self.sequencer.step(&mut self.core, now);
        self.core.apply(directive);
    }

    fn state(&self) -> MotionState {
        self.sequencer.state()
    }

    fn set_state(&mut self, state: MotionState) {
        let now = self.now();
        self.sequencer.begin(state, now);
    }

    fn start_homing(&mut self) {
        let now = self.now();
        self.sequencer.start_homing(now);
    }

    fn is_ready(&self) -> bool {
        self.sequencer.is_ready()
    }

    fn is_homing_complete(&self) -> bool {
        self.sequencer.is_homing_complete()
    }

    fn set_home_speeds(&mut self, forward: f64, reverse: f64) -> Result<()> {
        config::check_speed("forward home speed", forward)?;
        config::check_speed("reverse home speed", reverse)?;
        self.core.config.homing.speeds.fwd_home = forward;
        self.core.config.homing.speeds.rev_home = reverse;
        self.sequencer.set_home_speeds(forward, reverse);
        Ok(())
    }

    fn set_manual_speeds(&mut self, forward: f64, reverse: f64) -> Result<()> {
        config::check_speed("forward manual speed", forward)?;
        config::check_speed("reverse manual speed", reverse)?;
        self.core.config.homing.speeds.fwd_manual = forward;
        self.core.config.homing.speeds.rev_manual = reverse;
        self.sequencer.set_manual_speeds(forward, reverse);
        Ok(())
    }

    fn set_homing_timeout(&mut self, timeout: Duration) {
        self.sequencer.set_homing_timeout(timeout);
    }

    fn set_finding_timeout(&mut self, timeout: Duration) {
        self.sequencer.set_finding_timeout(timeout);
    }

    fn set_back_off_home(&mut self, enabled: bool) {
        self.sequencer.set_back_off_home(enabled);
    }

    fn set_homing_policy(&mut self, policy: HomingPolicy) {
        self.sequencer.set_policy(policy);
    }

    fn homing_policy(&self) -> HomingPolicy {
        self.sequencer.policy()
    }
}

impl<B: Backend, T: Timer> Drop for Motion<B, T> {
    fn drop(&mut self) {
        // Leave the motor unpowered
        if let Err(e) = self.core.backend.neutral_output() {
            warn!("Failed to stop motor {} on drop: {}", self.core.backend.device_id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::sim::{SimCommand, SimHandle, SimPlant, SimSparkMax, SimTalonFx};
    use crate::timer::{ManualTimer, SimClock};

    const DT: Duration = Duration::from_millis(20);

    fn talon(config: MotionConfig) -> (TalonFxMotion<SimTalonFx, ManualTimer>, SimHandle, SimClock) {
        let plant = SimPlant::talon_fx().shared();
        let clock = SimClock::new();
        let motor = Motion::new(
            TalonFx::new(SimTalonFx::new(1, plant.clone())),
            clock.timer(),
            &config,
        )
        .unwrap();
        (motor, plant, clock)
    }

    fn spark(plant: SimPlant, config: MotionConfig) -> (SparkMaxMotion<SimSparkMax, ManualTimer>, SimHandle, SimClock) {
        let plant = plant.shared();
        let clock = SimClock::new();
        let motor = Motion::new(
            SparkMax::new(SimSparkMax::new(2, plant.clone())),
            clock.timer(),
            &config,
        )
        .unwrap();
        (motor, plant, clock)
    }

    #[test]
    fn test_at_setpoint_needs_tolerance_and_low_voltage() {
        let (mut motor, plant, _clock) = talon(MotionConfig::talon_fx());
        assert!(!motor.is_at_setpoint(), "no setpoint yet");

        motor.set_setpoint(10.0, SetpointKind::Position);
        let conv = Conversion::new(motor.gearing(), motor.wheel_diameter(), motor.config().encoder);
        plant.borrow_mut().travel = conv.to_native(10.2, SetpointKind::Position);

        plant.borrow_mut().output_voltage_override = Some(0.5);
        assert!(motor.is_at_setpoint());
        plant.borrow_mut().output_voltage_override = Some(2.0);
        assert!(!motor.is_at_setpoint());
    }

    #[test]
    fn test_spark_voltage_is_applied_output_times_bus() {
        let (mut motor, plant, _clock) = spark(SimPlant::spark_max(), MotionConfig::spark_max());
        {
            let mut p = plant.borrow_mut();
            p.applied_output = 0.25;
            p.bus_voltage = 12.0;
        }
        assert!((motor.motor_voltage() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_normally_closed_switch_polarity() {
        let mut config = MotionConfig::talon_fx();
        config.fwd_limit_normally_open = false;
        let (mut motor, plant, _clock) = talon(config);
        plant.borrow_mut().fwd_switch.normally_open = false;

        // Contacts closed at rest means not pressed
        assert!(!motor.is_fwd_limit_pressed());
        plant.borrow_mut().fwd_switch.pressed = true;
        assert!(motor.is_fwd_limit_pressed());
        assert!(!motor.is_rev_limit_pressed());
    }

    #[test]
    fn test_soft_limits_clamp_and_zero_pair_escape() {
        let (mut motor, plant, _clock) = spark(SimPlant::spark_max(), MotionConfig::spark_max());
        motor.set_setpoint(5.0, SetpointKind::Position);
        assert_eq!(motor.setpoint(), 1.0);
        assert_eq!(motor.state(), MotionState::Finding);
        assert!(matches!(plant.borrow().last_command(), Some(SimCommand::Position(_))));

        motor.set_soft_limits(SetpointKind::Position, 0.0, 0.0).unwrap();
        motor.set_setpoint(5.0, SetpointKind::Position);
        assert_eq!(motor.setpoint(), 5.0);
    }

    #[test]
    fn test_invalid_configuration_keeps_previous_value() {
        let (mut motor, _plant, _clock) = spark(SimPlant::spark_max(), MotionConfig::spark_max());
        let before = motor.soft_limits(SetpointKind::Position);
        assert!(matches!(
            motor.set_soft_limits(SetpointKind::Position, 2.0, 1.0),
            Err(MotionError::InvalidConfig(_))
        ));
        assert_eq!(motor.soft_limits(SetpointKind::Position), before);

        assert!(motor.set_gearing(0.0).is_err());
        assert_eq!(motor.gearing(), config::SPARK_MAX_GEARING);
        assert!(motor.set_tolerance(SetpointKind::Position, -1.0).is_err());
        assert!(motor.set_peak_output(1.5, -1.0).is_err());

        let mut bad = MotionConfig::spark_max();
        bad.wheel_diameter = 0.0;
        let plant = SimPlant::spark_max().shared();
        let result = Motion::new(SparkMax::new(SimSparkMax::new(9, plant)), StdTimer::new(), &bad);
        assert!(result.is_err());
    }

    #[test]
    fn test_idle_ticks_hold_zero_output() {
        let (mut motor, plant, clock) = talon(MotionConfig::talon_fx());
        for _ in 0..50 {
            motor.tick();
            clock.advance(DT);
            assert!(motor.is_ready());
            assert_eq!(motor.state(), MotionState::Idle);
            let last = plant.borrow().last_command();
            assert!(last.is_some_and(|c| c.is_zero_output()), "got {:?}", last);
        }
    }

    #[test]
    fn test_homing_backs_off_and_rezeroes() {
        let (mut motor, plant, clock) = spark(SimPlant::spark_max().with_travel(-3.0, 100.0), MotionConfig::spark_max());
        motor.start_homing();
        assert!(!motor.is_homing_complete());

        for _ in 0..500 {
            motor.tick();
            if motor.is_homing_complete() {
                break;
            }
            plant.borrow_mut().step(DT);
            clock.advance(DT);
        }

        assert!(motor.is_homing_complete());
        assert_eq!(motor.state(), MotionState::Idle);
        assert!(motor.raw_encoder_counts().abs() < 1e-9);
        assert_eq!(plant.borrow().last_command(), Some(SimCommand::Position(0.0)));
        assert!(!plant.borrow().rev_switch.pressed);

        motor.tick();
        assert!(motor.is_ready());
        assert!(plant.borrow().last_command().is_some_and(|c| c.is_zero_output()));
    }

    #[test]
    fn test_homing_timeout_without_switch() {
        let mut config = MotionConfig::spark_max();
        config.homing.homing_timeout_s = 0.5;
        let (mut motor, plant, clock) = spark(SimPlant::spark_max(), config);
        motor.start_homing();
        let mut ticks = 0;
        while !motor.is_homing_complete() && ticks < 200 {
            motor.tick();
            plant.borrow_mut().step(DT);
            clock.advance(DT);
            ticks += 1;
        }
        assert!(motor.is_homing_complete());
        assert!(ticks <= 27, "took {} ticks", ticks);
    }

    #[test]
    fn test_finding_settles_then_stops() {
        let (mut motor, plant, clock) = talon(MotionConfig::talon_fx());
        motor.set_setpoint(0.5, SetpointKind::Position);
        assert_eq!(motor.state(), MotionState::Finding);

        for _ in 0..200 {
            motor.tick();
            if motor.state() == MotionState::Idle {
                break;
            }
            plant.borrow_mut().step(DT);
            clock.advance(DT);
        }
        assert_eq!(motor.state(), MotionState::Idle);
        assert_eq!(plant.borrow().last_command(), Some(SimCommand::Percent(0.0)));
        assert!((motor.actual(SetpointKind::Position) - 0.5).abs() < motor.tolerance(SetpointKind::Position));
    }

    #[test]
    fn test_manual_jog_stops_on_forward_switch() {
        let (mut motor, plant, _clock) = talon(MotionConfig::talon_fx());
        motor.set_state(MotionState::ManualForward);
        motor.tick();
        assert_eq!(plant.borrow().last_command(), Some(SimCommand::Percent(0.5)));
        assert!(!motor.is_ready());

        plant.borrow_mut().fwd_switch.pressed = true;
        motor.tick();
        assert_eq!(plant.borrow().last_command(), Some(SimCommand::Percent(0.0)));
        assert!(motor.is_ready());
        assert_eq!(motor.state(), MotionState::Idle);
    }

    #[test]
    fn test_driver_errors_are_recorded_not_raised() {
        let (mut motor, plant, _clock) = talon(MotionConfig::talon_fx());
        assert!(motor.last_error().is_none());

        plant.borrow_mut().fail_next = Some(-2);
        assert!(!motor.is_fwd_limit_pressed());
        assert_eq!(motor.last_error(), Some(&DriverError::Status { id: 1, code: -2 }));

        plant.borrow_mut().fail_next = Some(-7);
        let result = motor.set_pid_gains(SetpointKind::Position, PidGains::new(0.1, 0.0, 0.0, 0.0));
        assert!(matches!(result, Err(MotionError::Driver(DriverError::Status { code: -7, .. }))));
    }

    #[test]
    fn test_talon_voltage_scales_by_bus() {
        let (mut motor, plant, _clock) = talon(MotionConfig::talon_fx());
        motor.set_voltage(6.0);
        assert_eq!(plant.borrow().last_command(), Some(SimCommand::Percent(0.5)));
        assert_eq!(motor.control_mode(), ControlMode::Voltage);

        motor.set_output(3.0);
        assert_eq!(plant.borrow().last_command(), Some(SimCommand::Percent(1.0)));
    }

    #[test]
    fn test_configuration_reaches_controller() {
        let (mut motor, plant, _clock) = spark(SimPlant::spark_max(), MotionConfig::spark_max());
        assert_eq!(plant.borrow().current_limit, Some(40.0));
        assert_eq!(plant.borrow().fwd_limit_normally_open, Some(true));

        let before = plant.borrow().tolerance[0];
        motor.set_gearing(config::SPARK_MAX_GEARING * 2.0).unwrap();
        assert!((plant.borrow().tolerance[0] - before * 2.0).abs() < 1e-9);

        motor.set_neutral_mode(NeutralMode::Coast).unwrap();
        assert_eq!(plant.borrow().neutral_mode, NeutralMode::Coast);

        motor.reset().unwrap();
        assert_eq!(motor.state(), MotionState::Idle);
        assert!(motor.raw_encoder_counts().abs() < 1e-9);
    }

    #[test]
    fn test_spark_normally_closed_switch_polarity() {
        let mut config = MotionConfig::spark_max();
        config.rev_limit_normally_open = false;
        let (mut motor, plant, _clock) = spark(SimPlant::spark_max(), config);
        assert_eq!(plant.borrow().rev_limit_normally_open, Some(false));
        plant.borrow_mut().rev_switch.normally_open = false;

        assert!(!motor.is_rev_limit_pressed());
        plant.borrow_mut().rev_switch.pressed = true;
        assert!(motor.is_rev_limit_pressed());
        assert!(!motor.is_fwd_limit_pressed());

        motor.configure_limit_switches(true, true).unwrap();
        plant.borrow_mut().rev_switch.normally_open = true;
        assert!(motor.is_rev_limit_pressed());
    }

    #[test]
    fn test_speeds_outside_full_output_are_rejected() {
        let (mut motor, plant, _clock) = talon(MotionConfig::talon_fx());
        assert!(matches!(
            motor.set_manual_speeds(3.0, -3.0),
            Err(MotionError::InvalidConfig(_))
        ));
        assert!(motor.set_home_speeds(0.2, -1.5).is_err());

        motor.set_state(MotionState::ManualForward);
        motor.tick();
        assert_eq!(
            plant.borrow().last_command(),
            Some(SimCommand::Percent(config::TALON_FX_MANUAL_SPEED))
        );

        motor.set_manual_speeds(1.0, -0.25).unwrap();
        motor.set_state(MotionState::ManualReverse);
        motor.tick();
        assert_eq!(plant.borrow().last_command(), Some(SimCommand::Percent(-0.25)));
        assert_eq!(motor.config().homing.speeds.rev_manual, -0.25);
    }

    #[test]
    fn test_state_machine_drive_is_clamped() {
        let (mut motor, plant, _clock) = talon(MotionConfig::talon_fx());
        motor.core.apply(Directive::Drive(3.0));
        assert_eq!(plant.borrow().last_command(), Some(SimCommand::Percent(1.0)));
        motor.core.apply(Directive::Drive(-2.0));
        assert_eq!(plant.borrow().last_command(), Some(SimCommand::Percent(-1.0)));
    }

    #[test]
    fn test_failed_gearing_change_restores_previous_scale() {
        let (mut motor, plant, _clock) = talon(MotionConfig::talon_fx());
        let tolerance = plant.borrow().tolerance;
        let izone = plant.borrow().izone;

        plant.borrow_mut().fail_next = Some(-5);
        assert!(matches!(motor.set_gearing(11.0), Err(MotionError::Driver(_))));
        assert_eq!(motor.gearing(), config::TALON_FX_GEARING);
        assert_eq!(plant.borrow().tolerance, tolerance);
        assert_eq!(plant.borrow().izone, izone);
        assert!(matches!(motor.last_error(), Some(DriverError::Status { code: -5, .. })));

        plant.borrow_mut().fail_next = Some(-5);
        assert!(motor.set_wheel_diameter(0.3).is_err());
        assert_eq!(motor.wheel_diameter(), config::TALON_FX_WHEEL_DIAMETER);
    }

    #[test]
    fn test_nominal_output_per_family() {
        let (mut motor, plant, _clock) = talon(MotionConfig::talon_fx());
        assert_eq!(plant.borrow().nominal_output, (0.0, 0.0));
        motor.set_nominal_output(0.05, -0.05).unwrap();
        assert_eq!(plant.borrow().nominal_output, (0.05, -0.05));
        assert_eq!(motor.config().nominal_output.forward, 0.05);
        assert!(motor.set_nominal_output(-0.1, 0.0).is_err());

        let (mut motor, _plant, _clock) = spark(SimPlant::spark_max(), MotionConfig::spark_max());
        assert!(motor.set_nominal_output(0.0, 0.0).is_ok());
        assert!(matches!(
            motor.set_nominal_output(0.05, -0.05),
            Err(MotionError::Driver(DriverError::Unsupported { .. }))
        ));
        assert_eq!(motor.config().nominal_output.forward, 0.0);
    }

    #[test]
    fn test_drop_leaves_motor_neutral() {
        let (mut motor, plant, _clock) = talon(MotionConfig::talon_fx());
        motor.set_output(0.8);
        drop(motor);
        assert!(plant.borrow().last_command().is_some_and(|c| c.is_zero_output()));
    }
}
