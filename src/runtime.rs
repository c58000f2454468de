// Fixed-period host loop with command watchdog
//
// Plays a script of motion requests against a simulated motor. Each period the
// active command is executed (or, with no command, the device is ticked); a
// command that outlives CMD_TIMEOUT is cancelled.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandAction, MotionCommand};
use crate::config::{CMD_TIMEOUT, LOOP_HZ, MotionConfig};
use crate::messages::{self, Direction, MotionRequest, MotionStatus, RuntimeHealth, ScheduledRequest};
use crate::motor::motion::{self, MotorMotion, SetpointKind};
use crate::motor::sequencer::{HomingPolicy, MotionState};
use crate::motor::sim::{SimHandle, SimPlant, SimSparkMax, SimTalonFx};
use crate::motor::{Motion, SparkMax, TalonFx};
use crate::timer::SimClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Family {
    Talon,
    Spark,
}

/// Simulated motor runtime
#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Controller family to simulate
    #[arg(long, value_enum, default_value_t = Family::Spark)]
    pub family: Family,

    /// JSON script of scheduled requests (built-in demo when omitted)
    #[arg(long)]
    pub script: Option<PathBuf>,

    #[arg(long, default_value_t = 1)]
    pub device_id: i32,

    /// Loop frequency
    #[arg(long, default_value_t = LOOP_HZ, value_parser = clap::value_parser!(u64).range(1..))]
    pub hz: u64,

    /// Pace the loop in real time instead of running as fast as possible
    #[arg(long)]
    pub realtime: bool,

    /// Stop after this much simulated time
    #[arg(long, default_value_t = 60.0)]
    pub max_seconds: f64,
}

type Device = Rc<RefCell<dyn MotorMotion>>;

struct ActiveCommand {
    command: Box<dyn Command>,
    label: String,
    started_at: Duration,
}

pub struct Runtime {
    device: Device,
    plant: SimHandle,
    clock: SimClock,
    script: VecDeque<ScheduledRequest>,
    active: Option<ActiveCommand>,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new(family: Family, device_id: i32, script: Vec<ScheduledRequest>) -> motion::Result<Self> {
        let clock = SimClock::new();
        let (device, plant): (Device, SimHandle) = match family {
            Family::Talon => {
                let plant = SimPlant::talon_fx().with_travel(-20_000.0, 200_000.0).shared();
                let motor = Motion::new(
                    TalonFx::new(SimTalonFx::new(device_id, plant.clone())),
                    clock.timer(),
                    &MotionConfig::talon_fx(),
                )?;
                let device: Device = Rc::new(RefCell::new(motor));
                (device, plant)
            }
            Family::Spark => {
                let plant = SimPlant::spark_max().with_travel(-2.0, 80.0).shared();
                let motor = Motion::new(
                    SparkMax::new(SimSparkMax::new(device_id, plant.clone())),
                    clock.timer(),
                    &MotionConfig::spark_max(),
                )?;
                let device: Device = Rc::new(RefCell::new(motor));
                (device, plant)
            }
        };

        Ok(Self {
            device,
            plant,
            clock,
            script: script.into(),
            active: None,
            health: RuntimeHealth::Ok,
        })
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn plant(&self) -> &SimHandle {
        &self.plant
    }

    /// Script drained, no command running, device at rest
    pub fn is_done(&self) -> bool {
        self.script.is_empty() && self.active.is_none() && self.device.borrow().state() == MotionState::Idle
    }

    fn cancel_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            info!("Cancelling {}", active.label);
            active.command.end(true);
        }
    }

    fn start(&mut self, action: CommandAction, timeout: Duration, speed: f64, policy: HomingPolicy) {
        // The command owns the motor from here; park the device's own sequencer
        self.device.borrow_mut().set_state(MotionState::Idle);
        let mut command = MotionCommand::with_timer(self.device.clone(), action, timeout, speed, self.clock.timer())
            .with_policy(policy);
        command.initialize();
        self.active = Some(ActiveCommand {
            command: Box::new(command),
            label: action.to_string(),
            started_at: self.clock.now(),
        });
    }

    /// Process incoming request; anything running is cancelled first
    fn on_request(&mut self, request: MotionRequest) {
        info!("Received request: {:?}", &request);
        self.cancel_active();

        match request {
            MotionRequest::Home {
                direction,
                speed,
                timeout_s,
                rezero,
            } => {
                let action = match direction {
                    Direction::Reverse => CommandAction::HomeReverse,
                    Direction::Forward => CommandAction::HomeForward,
                };
                let policy = if rezero {
                    HomingPolicy::ENCODER_REZERO
                } else {
                    HomingPolicy::TWO_SWITCH
                };
                self.start(action, seconds(timeout_s), speed, policy);
            }
            MotionRequest::Jog { direction, speed } => {
                let action = match direction {
                    Direction::Reverse => CommandAction::ManualReverse,
                    Direction::Forward => CommandAction::ManualForward,
                };
                self.start(action, Duration::ZERO, speed, HomingPolicy::TWO_SWITCH);
            }
            MotionRequest::Seek {
                value,
                kind,
                timeout_s,
            } => {
                let mut device = self.device.borrow_mut();
                device.set_finding_timeout(seconds(timeout_s));
                device.set_setpoint(value, kind);
            }
            MotionRequest::Stop => self.device.borrow_mut().stop(),
            MotionRequest::Idle => {
                self.start(CommandAction::Idle, Duration::ZERO, 0.0, HomingPolicy::TWO_SWITCH);
            }
        }
    }

    /// Run one loop period of length `dt`
    pub fn step(&mut self, dt: Duration) {
        self.clock.advance(dt);
        self.plant.borrow_mut().step(dt);
        let now = self.clock.now();

        // 1. Dispatch every request that is due
        while self
            .script
            .front()
            .is_some_and(|entry| entry.at_s <= now.as_secs_f64())
        {
            if let Some(entry) = self.script.pop_front() {
                self.on_request(entry.request);
            }
        }

        // 2. Run the active command, or let the device run its own state machine
        match self.active.as_mut() {
            Some(active) => {
                active.command.execute();
                let age = now.saturating_sub(active.started_at);
                if active.command.is_finished() {
                    active.command.end(false);
                    self.active = None;
                    self.health = RuntimeHealth::Ok;
                } else if age >= CMD_TIMEOUT {
                    // Watchdog triggered - stop the motor
                    warn!("Command {} still running after {:?}, cancelling", active.label, age);
                    active.command.end(true);
                    self.active = None;
                    self.health = RuntimeHealth::CmdStale;
                }
            }
            None => self.device.borrow_mut().tick(),
        }

        if self.health == RuntimeHealth::Ok && self.device.borrow().last_error().is_some() {
            self.health = RuntimeHealth::DriverFault;
        }
    }

    pub fn status(&self) -> MotionStatus {
        let mut device = self.device.borrow_mut();
        MotionStatus {
            t_s: self.clock.now().as_secs_f64(),
            state: device.state(),
            ready: device.is_ready(),
            homing_complete: device.is_homing_complete(),
            position: device.actual(SetpointKind::Position),
            setpoint: device.setpoint(),
            setpoint_kind: device.setpoint_kind(),
            fwd_limit: device.is_fwd_limit_pressed(),
            rev_limit: device.is_rev_limit_pressed(),
            motor_voltage: device.motor_voltage(),
            command: self.active.as_ref().map(|a| a.label.clone()),
            health: self.health,
        }
    }
}

fn seconds(s: f64) -> Duration {
    Duration::try_from_secs_f64(s).unwrap_or(Duration::ZERO)
}

/// Home, seek half a meter, jog back to the reverse switch
pub fn demo_script() -> Vec<ScheduledRequest> {
    vec![
        ScheduledRequest::new(
            0.0,
            MotionRequest::Home {
                direction: Direction::Reverse,
                speed: -0.3,
                timeout_s: 5.0,
                rezero: true,
            },
        ),
        ScheduledRequest::new(
            4.0,
            MotionRequest::Seek {
                value: 0.5,
                kind: SetpointKind::Position,
                timeout_s: 3.0,
            },
        ),
        ScheduledRequest::new(
            8.0,
            MotionRequest::Jog {
                direction: Direction::Reverse,
                speed: -0.3,
            },
        ),
    ]
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let script = match &args.script {
        Some(path) => {
            info!("Loading script from {}", path.display());
            messages::load_script(path)?
        }
        None => demo_script(),
    };

    let mut runtime = Runtime::new(args.family, args.device_id, script)?;
    let period = Duration::from_secs_f64(1.0 / args.hz as f64);
    let max = Duration::try_from_secs_f64(args.max_seconds).unwrap_or(Duration::ZERO);
    let mut tick = interval(period);
    let status_every = args.hz;

    info!(
        "Runtime started: {:?} device {}, {}Hz loop, {}ms watchdog timeout",
        args.family,
        args.device_id,
        args.hz,
        CMD_TIMEOUT.as_millis()
    );

    let mut periods: u64 = 0;
    loop {
        if args.realtime {
            tick.tick().await;
        }

        runtime.step(period);
        periods += 1;

        let status = runtime.status();
        if periods % status_every == 0 {
            info!("{}", serde_json::to_string(&status)?);
        } else {
            debug!("{}", serde_json::to_string(&status)?);
        }

        if runtime.is_done() {
            info!("Script complete after {:.2}s", runtime.now().as_secs_f64());
            break;
        }
        if runtime.now() >= max {
            warn!("Stopping at {:.2}s with work remaining", runtime.now().as_secs_f64());
            break;
        }
    }

    info!("Final status: {}", serde_json::to_string(&runtime.status())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::sim::SimCommand;

    const DT: Duration = Duration::from_millis(20);

    fn run_until_done(runtime: &mut Runtime, max_s: u64) {
        let max = Duration::from_secs(max_s);
        while !runtime.is_done() && runtime.now() < max {
            runtime.step(DT);
        }
    }

    #[test]
    fn test_demo_script_completes_on_spark() {
        let mut runtime = Runtime::new(Family::Spark, 3, demo_script()).unwrap();
        run_until_done(&mut runtime, 60);

        assert!(runtime.is_done());
        let status = runtime.status();
        assert!(status.rev_limit, "jog should end on the reverse switch");
        assert_eq!(status.state, MotionState::Idle);
        assert_eq!(status.health, RuntimeHealth::Ok);
    }

    #[test]
    fn test_home_then_seek_reaches_setpoint() {
        let script = vec![
            ScheduledRequest::new(
                0.0,
                MotionRequest::Home {
                    direction: Direction::Reverse,
                    speed: -0.3,
                    timeout_s: 0.0,
                    rezero: true,
                },
            ),
            ScheduledRequest::new(
                3.0,
                MotionRequest::Seek {
                    value: 0.5,
                    kind: SetpointKind::Position,
                    timeout_s: 0.0,
                },
            ),
        ];
        let mut runtime = Runtime::new(Family::Spark, 3, script).unwrap();
        run_until_done(&mut runtime, 30);

        assert!(runtime.is_done());
        let mut device = runtime.device().borrow_mut();
        assert_eq!(device.setpoint(), 0.5);
        assert!((device.actual(SetpointKind::Position) - 0.5).abs() < device.tolerance(SetpointKind::Position));
    }

    #[test]
    fn test_new_request_cancels_running_command() {
        let script = vec![
            ScheduledRequest::new(
                0.0,
                MotionRequest::Jog {
                    direction: Direction::Forward,
                    speed: -0.2,
                },
            ),
            ScheduledRequest::new(1.0, MotionRequest::Stop),
        ];
        let mut runtime = Runtime::new(Family::Talon, 5, script).unwrap();
        for _ in 0..25 {
            runtime.step(DT);
        }
        assert_eq!(runtime.status().command.as_deref(), Some("manual-forward"));
        assert_eq!(runtime.plant().borrow().last_command(), Some(SimCommand::Percent(0.2)));

        for _ in 0..30 {
            runtime.step(DT);
        }
        assert!(runtime.status().command.is_none());
        assert!(runtime.plant().borrow().last_command().is_some_and(|c| c.is_zero_output()));
    }

    #[test]
    fn test_watchdog_cancels_long_command() {
        let script = vec![ScheduledRequest::new(
            0.0,
            MotionRequest::Jog {
                direction: Direction::Forward,
                speed: -0.01,
            },
        )];
        let mut runtime = Runtime::new(Family::Talon, 6, script).unwrap();
        // No switches on this plant, so the jog never ends on its own
        runtime.plant().borrow_mut().fwd_switch.trip_at = None;

        let mut steps = 0;
        while runtime.health() != RuntimeHealth::CmdStale {
            runtime.step(DT);
            steps += 1;
            assert!(steps < 2000, "watchdog never fired");
        }
        assert!(runtime.now() >= CMD_TIMEOUT);
        assert!(runtime.status().command.is_none());
        assert_eq!(runtime.plant().borrow().last_command(), Some(SimCommand::Percent(0.0)));
    }
}
