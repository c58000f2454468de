// Scheduler-driven command that homes or jogs a motor
//
// A `MotionCommand` borrows a device through `Rc<RefCell<_>>`, runs its own
// sequencer and timer, and drives the device through `MotorMotion` only.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::DEFAULT_COMMAND_SPEED;
use crate::motor::motion::MotorMotion;
use crate::motor::sequencer::{Directive, HomingPolicy, MotionState, Sensors, Sequencer, SequencerSpeeds};
use crate::timer::{StdTimer, Timer};

/// Four-phase contract between a cooperative scheduler and a command
pub trait Command {
    /// Called once before the first `execute`
    fn initialize(&mut self);

    /// Called once per scheduler period while the command runs
    fn execute(&mut self);

    fn is_finished(&self) -> bool;

    /// `interrupted` is true when the scheduler cancelled the command
    fn end(&mut self, interrupted: bool);
}

/// What a `MotionCommand` does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Idle,
    HomeReverse,
    HomeForward,
    ManualForward,
    ManualReverse,
}

impl CommandAction {
    fn state(self) -> MotionState {
        match self {
            CommandAction::Idle => MotionState::Idle,
            CommandAction::HomeReverse => MotionState::HomingReverse,
            CommandAction::HomeForward => MotionState::HomingForward,
            CommandAction::ManualForward => MotionState::ManualForward,
            CommandAction::ManualReverse => MotionState::ManualReverse,
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandAction::Idle => "idle",
            CommandAction::HomeReverse => "home-reverse",
            CommandAction::HomeForward => "home-forward",
            CommandAction::ManualForward => "manual-forward",
            CommandAction::ManualReverse => "manual-reverse",
        };
        f.write_str(name)
    }
}

/// Sensor view over a borrowed device
struct DeviceSensors<'a, M: MotorMotion + ?Sized>(&'a mut M);

impl<M: MotorMotion + ?Sized> Sensors for DeviceSensors<'_, M> {
    fn fwd_limit_pressed(&mut self) -> bool {
        self.0.is_fwd_limit_pressed()
    }

    fn rev_limit_pressed(&mut self) -> bool {
        self.0.is_rev_limit_pressed()
    }

    fn at_setpoint(&mut self) -> bool {
        self.0.is_at_setpoint()
    }

    fn travel(&mut self) -> Option<Ordering> {
        let kind = self.0.setpoint_kind()?;
        let actual = self.0.actual(kind);
        self.0.setpoint().partial_cmp(&actual)
    }
}

pub struct MotionCommand<M: MotorMotion + ?Sized, T: Timer = StdTimer> {
    device: Rc<RefCell<M>>,
    action: CommandAction,
    sequencer: Sequencer,
    timer: T,
    finished: bool,
}

impl<M: MotorMotion + ?Sized> MotionCommand<M, StdTimer> {
    /// `speed` is the approach speed; the off-switch speed is its negation.
    /// A zero `timeout` never expires.
    pub fn new(device: Rc<RefCell<M>>, action: CommandAction, timeout: Duration, speed: f64) -> Self {
        Self::with_timer(device, action, timeout, speed, StdTimer::new())
    }

    /// Home toward the reverse switch at the default speed, no timeout
    pub fn homing(device: Rc<RefCell<M>>) -> Self {
        Self::new(device, CommandAction::HomeReverse, Duration::ZERO, DEFAULT_COMMAND_SPEED)
    }
}

impl<M: MotorMotion + ?Sized, T: Timer> MotionCommand<M, T> {
    pub fn with_timer(device: Rc<RefCell<M>>, action: CommandAction, timeout: Duration, speed: f64, timer: T) -> Self {
        let approach = speed;
        let off_switch = -speed;
        let speeds = SequencerSpeeds {
            fwd_home: off_switch,
            rev_home: approach,
            fwd_manual: off_switch,
            rev_manual: approach,
        };
        let mut sequencer = Sequencer::new(speeds, HomingPolicy::TWO_SWITCH);
        sequencer.set_homing_timeout(timeout);
        Self {
            device,
            action,
            sequencer,
            timer,
            finished: false,
        }
    }

    /// Replace the default two-switch homing policy
    pub fn with_policy(mut self, policy: HomingPolicy) -> Self {
        self.sequencer.set_policy(policy);
        self
    }

    pub fn action(&self) -> CommandAction {
        self.action
    }

    pub fn state(&self) -> MotionState {
        self.sequencer.state()
    }

    pub fn elapsed(&self) -> Duration {
        self.timer.elapsed()
    }

    fn apply(device: &mut M, directive: Directive) {
        match directive {
            Directive::None => {}
            Directive::Neutral => device.stop(),
            Directive::Stop => device.set_output(0.0),
            Directive::Drive(percent) => device.set_output(percent),
            Directive::Rezero => {
                // Recorded on the device as `last_error`
                let _ = device.reset_encoder_position();
                device.hold_position(0.0);
            }
        }
    }
}

impl<M: MotorMotion + ?Sized, T: Timer> Command for MotionCommand<M, T> {
    fn initialize(&mut self) {
        self.timer.start();
        self.finished = false;
        self.sequencer.begin(self.action.state(), self.timer.elapsed());
        info!(
            "Command {} started on device {}",
            self.action,
            self.device.borrow().device_id()
        );
    }

    fn execute(&mut self) {
        let now = self.timer.elapsed();
        let mut device = self.device.borrow_mut();
        let directive = self.sequencer.step(&mut DeviceSensors(&mut *device), now);
        Self::apply(&mut *device, directive);
        if self.sequencer.state() == MotionState::Idle {
            if !self.finished {
                debug!("Command {} reached idle after {:?}", self.action, now);
            }
            self.finished = true;
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn end(&mut self, interrupted: bool) {
        if interrupted {
            self.device.borrow_mut().set_output(0.0);
        }
        info!(
            "Command {} ended{}",
            self.action,
            if interrupted { " (interrupted)" } else { "" }
        );
    }
}
