// Homing / finding / manual-jog state machine
//
// One `Sequencer` runs inside every motor (see `Motion::tick`) and inside every
// `MotionCommand`. It samples sensors through `Sensors` and returns the output
// directive for this tick; the host applies it.

use std::cmp::Ordering;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// States of the per-tick state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    #[default]
    Idle,
    HomingReverse,
    HomingForward,
    Finding,
    ManualForward,
    ManualReverse,
}

impl MotionState {
    /// Decode a raw state number; anything unknown becomes `Idle`
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => MotionState::Idle,
            1 => MotionState::HomingReverse,
            2 => MotionState::HomingForward,
            3 => MotionState::Finding,
            4 => MotionState::ManualForward,
            5 => MotionState::ManualReverse,
            other => {
                debug!("Unknown motion state {}, forcing Idle", other);
                MotionState::Idle
            }
        }
    }

    pub fn as_raw(self) -> u8 {
        self as u8
    }
}

/// How the back-off phase of homing decides it is done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackOffExit {
    /// Move forward until the reverse (home) switch lets go
    ReverseReleased,
    /// Move forward until the forward switch is reached
    ForwardPressed,
}

/// What homing does once it has found its reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomingPolicy {
    /// After the reverse switch, run the forward phase
    pub back_off_home: bool,
    pub back_off_exit: BackOffExit,
    /// Zero the encoder and hold position 0 when homing completes
    pub rezero_on_complete: bool,
}

impl HomingPolicy {
    /// Find the reverse switch, creep off it, zero the encoder there
    pub const ENCODER_REZERO: HomingPolicy = HomingPolicy {
        back_off_home: true,
        back_off_exit: BackOffExit::ReverseReleased,
        rezero_on_complete: true,
    };

    /// Run to one switch or the other and stop; encoder untouched
    pub const TWO_SWITCH: HomingPolicy = HomingPolicy {
        back_off_home: false,
        back_off_exit: BackOffExit::ForwardPressed,
        rezero_on_complete: false,
    };
}

impl Default for HomingPolicy {
    fn default() -> Self {
        HomingPolicy::ENCODER_REZERO
    }
}

/// Open-loop speeds (fractions of full output) used by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SequencerSpeeds {
    pub fwd_home: f64,
    pub rev_home: f64,
    pub fwd_manual: f64,
    pub rev_manual: f64,
}

/// What the host must do with the motor this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Directive {
    /// Leave the controller alone
    None,
    /// Idle output
    Neutral,
    /// Zero open-loop output
    Stop,
    /// Open-loop output
    Drive(f64),
    /// Zero the encoder and hold position 0 in closed loop
    Rezero,
}

/// Sensor view the state machine samples from
pub trait Sensors {
    fn fwd_limit_pressed(&mut self) -> bool;

    fn rev_limit_pressed(&mut self) -> bool;

    fn at_setpoint(&mut self) -> bool;

    /// Ordering of the setpoint relative to the actual value
    fn travel(&mut self) -> Option<Ordering>;
}

#[derive(Debug, Clone)]
pub struct Sequencer {
    state: MotionState,
    ready: bool,
    homing_complete: bool,
    speeds: SequencerSpeeds,
    policy: HomingPolicy,
    homing_timeout: Duration,
    finding_timeout: Duration,
    homing_started: Duration,
    finding_started: Duration,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(SequencerSpeeds::default(), HomingPolicy::default())
    }
}

impl Sequencer {
    pub fn new(speeds: SequencerSpeeds, policy: HomingPolicy) -> Self {
        Self {
            state: MotionState::Idle,
            ready: true,
            homing_complete: false,
            speeds,
            policy,
            homing_timeout: Duration::ZERO,
            finding_timeout: Duration::ZERO,
            homing_started: Duration::ZERO,
            finding_started: Duration::ZERO,
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn set_state(&mut self, state: MotionState) {
        if state != self.state {
            debug!("State {:?} -> {:?}", self.state, state);
        }
        self.state = state;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_homing_complete(&self) -> bool {
        self.homing_complete
    }

    pub fn set_home_speeds(&mut self, forward: f64, reverse: f64) {
        self.speeds.fwd_home = forward;
        self.speeds.rev_home = reverse;
    }

    pub fn set_manual_speeds(&mut self, forward: f64, reverse: f64) {
        self.speeds.fwd_manual = forward;
        self.speeds.rev_manual = reverse;
    }

    pub fn policy(&self) -> HomingPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: HomingPolicy) {
        self.policy = policy;
    }

    pub fn set_back_off_home(&mut self, enabled: bool) {
        self.policy.back_off_home = enabled;
    }

    pub fn set_homing_timeout(&mut self, timeout: Duration) {
        self.homing_timeout = timeout;
    }

    pub fn set_finding_timeout(&mut self, timeout: Duration) {
        self.finding_timeout = timeout;
    }

    /// Enter `state` with both timers referenced to `now`
    pub fn begin(&mut self, state: MotionState, now: Duration) {
        self.homing_started = now;
        self.finding_started = now;
        if matches!(state, MotionState::HomingReverse | MotionState::HomingForward) {
            self.homing_complete = false;
        }
        self.set_state(state);
    }

    pub fn start_homing(&mut self, now: Duration) {
        info!("Homing started");
        self.homing_started = now;
        self.homing_complete = false;
        self.set_state(MotionState::HomingReverse);
    }

    pub fn start_finding(&mut self, now: Duration) {
        self.finding_started = now;
        self.set_state(MotionState::Finding);
    }

    fn expired(started: Duration, timeout: Duration, now: Duration) -> bool {
        // Zero means no timeout at all
        !timeout.is_zero() && now.saturating_sub(started) >= timeout
    }

    fn complete_homing(&mut self) -> Directive {
        info!("Homing complete");
        self.homing_complete = true;
        self.set_state(MotionState::Idle);
        if self.policy.rezero_on_complete {
            Directive::Rezero
        } else {
            Directive::Stop
        }
    }

    /// Run one iteration and return what to command
    pub fn step<S: Sensors + ?Sized>(&mut self, sensors: &mut S, now: Duration) -> Directive {
        match self.state {
            MotionState::Idle => {
                self.ready = true;
                Directive::Neutral
            }

            MotionState::HomingReverse => {
                self.ready = false;
                if sensors.rev_limit_pressed()
                    || Self::expired(self.homing_started, self.homing_timeout, now)
                {
                    if self.policy.back_off_home {
                        self.set_state(MotionState::HomingForward);
                        Directive::Stop
                    } else {
                        self.complete_homing()
                    }
                } else {
                    Directive::Drive(self.speeds.rev_home)
                }
            }

            MotionState::HomingForward => {
                self.ready = false;
                let done = match self.policy.back_off_exit {
                    BackOffExit::ReverseReleased => !sensors.rev_limit_pressed(),
                    BackOffExit::ForwardPressed => sensors.fwd_limit_pressed(),
                };
                if done || Self::expired(self.homing_started, self.homing_timeout, now) {
                    self.complete_homing()
                } else {
                    Directive::Drive(self.speeds.fwd_home)
                }
            }

            MotionState::Finding => {
                self.ready = false;
                let arrived = sensors.at_setpoint()
                    || match sensors.travel() {
                        Some(Ordering::Greater) => sensors.fwd_limit_pressed(),
                        Some(Ordering::Less) => sensors.rev_limit_pressed(),
                        _ => false,
                    }
                    || Self::expired(self.finding_started, self.finding_timeout, now);
                if arrived {
                    self.set_state(MotionState::Idle);
                    Directive::Stop
                } else {
                    Directive::None
                }
            }

            MotionState::ManualForward => {
                if !sensors.fwd_limit_pressed() {
                    self.ready = false;
                    Directive::Drive(self.speeds.fwd_manual)
                } else {
                    self.ready = true;
                    self.set_state(MotionState::Idle);
                    Directive::Stop
                }
            }

            MotionState::ManualReverse => {
                if !sensors.rev_limit_pressed() {
                    self.ready = false;
                    Directive::Drive(self.speeds.rev_manual)
                } else {
                    self.ready = true;
                    self.set_state(MotionState::Idle);
                    Directive::Stop
                }
            }
        }
    }
}
