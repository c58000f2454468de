// Motor control module
//
// Provides:
// - The `MotorMotion` capability set shared by both controller families
// - TalonFX and SPARK MAX backends over their vendor driver APIs
// - Unit conversion between physical and native controller units
// - The homing / finding / manual-jog state machine
// - Simulated controllers for the runtime and tests

pub mod backend;
mod driver;
pub mod motion;
pub mod sequencer;
pub mod sim;
pub mod spark;
pub mod talon;
pub mod units;

pub use backend::{Backend, DriverError};
pub use driver::{Motion, SparkMaxMotion, TalonFxMotion};
pub use motion::{ControlMode, MotionError, MotorMotion, NeutralMode, PidGains, SetpointKind, SoftLimits};
pub use sequencer::{HomingPolicy, MotionState};
pub use spark::{SparkMax, SparkMaxDriver};
pub use talon::{TalonFx, TalonFxDriver};
