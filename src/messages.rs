// Message types for the runtime
//
// Requests arrive as a JSON script of timed entries; status snapshots are
// serialized back out to the log.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_COMMAND_SPEED;
use crate::motor::motion::SetpointKind;
use crate::motor::sequencer::MotionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Reverse,
}

fn default_direction() -> Direction {
    Direction::Reverse
}

// Reverse actions run at `speed`, forward actions at its negation
fn default_speed() -> f64 {
    -DEFAULT_COMMAND_SPEED
}

/// Request from a script -> runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MotionRequest {
    /// Run a homing command toward one switch
    Home {
        #[serde(default = "default_direction")]
        direction: Direction,
        #[serde(default = "default_speed")]
        speed: f64,
        /// Seconds; zero waits for the switch forever
        #[serde(default)]
        timeout_s: f64,
        /// Back off the reverse switch and zero the encoder there
        #[serde(default)]
        rezero: bool,
    },
    /// Jog until the switch in the direction of travel presses
    Jog {
        direction: Direction,
        #[serde(default = "default_speed")]
        speed: f64,
    },
    /// Closed-loop setpoint in physical units
    Seek {
        value: f64,
        kind: SetpointKind,
        /// Seconds; zero waits for arrival forever
        #[serde(default)]
        timeout_s: f64,
    },
    /// Cancel whatever is running and stop the motor
    Stop,
    /// Run the idle command (stops the motor and finishes)
    Idle,
}

impl MotionRequest {
    pub fn timeout_s(&self) -> Option<f64> {
        match self {
            MotionRequest::Home { timeout_s, .. } | MotionRequest::Seek { timeout_s, .. } => Some(*timeout_s),
            _ => None,
        }
    }
}

/// A request due at `at_s` seconds after start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledRequest {
    pub at_s: f64,
    pub request: MotionRequest,
}

impl ScheduledRequest {
    pub fn new(at_s: f64, request: MotionRequest) -> Self {
        Self { at_s, request }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    /// The watchdog cancelled a command that ran too long
    CmdStale,
    /// The device recorded a driver error
    DriverFault,
}

/// Snapshot of the device, logged by the runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MotionStatus {
    pub t_s: f64,
    pub state: MotionState,
    pub ready: bool,
    pub homing_complete: bool,
    pub position: f64,
    pub setpoint: f64,
    pub setpoint_kind: Option<SetpointKind>,
    pub fwd_limit: bool,
    pub rev_limit: bool,
    pub motor_voltage: f64,
    pub command: Option<String>,
    pub health: RuntimeHealth,
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Failed to read script: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse script: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Entry {index} is scheduled at {at_s}s, before the previous entry")]
    OutOfOrder { index: usize, at_s: f64 },

    #[error("Entry {index} has invalid time {at_s}s")]
    InvalidTime { index: usize, at_s: f64 },

    #[error("Entry {index} has invalid timeout {timeout_s}s")]
    InvalidTimeout { index: usize, timeout_s: f64 },
}

/// Parse a JSON array of `ScheduledRequest`s, checking times are in order and
/// timeouts are not negative
pub fn parse_script(json: &str) -> Result<Vec<ScheduledRequest>, ScriptError> {
    let script: Vec<ScheduledRequest> = serde_json::from_str(json)?;
    let mut last = 0.0;
    for (index, entry) in script.iter().enumerate() {
        if !entry.at_s.is_finite() || entry.at_s < 0.0 {
            return Err(ScriptError::InvalidTime { index, at_s: entry.at_s });
        }
        if entry.at_s < last {
            return Err(ScriptError::OutOfOrder { index, at_s: entry.at_s });
        }
        if let Some(timeout_s) = entry.request.timeout_s() {
            if !timeout_s.is_finite() || timeout_s < 0.0 {
                return Err(ScriptError::InvalidTimeout { index, timeout_s });
            }
        }
        last = entry.at_s;
    }
    Ok(script)
}

pub fn load_script(path: &Path) -> Result<Vec<ScheduledRequest>, ScriptError> {
    let json = std::fs::read_to_string(path)?;
    parse_script(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_requests_with_defaults() {
        let script = parse_script(
            r#"[
                {"at_s": 0.0, "request": {"type": "home"}},
                {"at_s": 2.5, "request": {"type": "seek", "value": 0.4, "kind": "position"}},
                {"at_s": 4.0, "request": {"type": "jog", "direction": "forward", "speed": -0.2}},
                {"at_s": 6.0, "request": {"type": "stop"}}
            ]"#,
        )
        .unwrap();

        assert_eq!(script.len(), 4);
        assert_eq!(
            script[0].request,
            MotionRequest::Home {
                direction: Direction::Reverse,
                speed: -0.5,
                timeout_s: 0.0,
                rezero: false,
            }
        );
        assert_eq!(
            script[1].request,
            MotionRequest::Seek {
                value: 0.4,
                kind: SetpointKind::Position,
                timeout_s: 0.0,
            }
        );
        assert_eq!(script[3].request, MotionRequest::Stop);
    }

    #[test]
    fn test_rejects_out_of_order_and_negative_times() {
        let err = parse_script(
            r#"[{"at_s": 2.0, "request": {"type": "stop"}},
                {"at_s": 1.0, "request": {"type": "idle"}}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::OutOfOrder { index: 1, .. }));

        let err = parse_script(r#"[{"at_s": -1.0, "request": {"type": "stop"}}]"#).unwrap_err();
        assert!(matches!(err, ScriptError::InvalidTime { index: 0, .. }));

        assert!(matches!(
            parse_script(r#"[{"at_s": 0.0, "request": {"type": "spin"}}]"#),
            Err(ScriptError::Parse(_))
        ));
    }

    #[test]
    fn test_rejects_negative_timeout() {
        let err = parse_script(
            r#"[{"at_s": 0.0, "request": {"type": "home"}},
                {"at_s": 1.0, "request": {"type": "seek", "value": 0.2, "kind": "position", "timeout_s": -2.0}}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::InvalidTimeout { index: 1, .. }));

        let err = parse_script(r#"[{"at_s": 0.0, "request": {"type": "home", "timeout_s": -0.5}}]"#).unwrap_err();
        assert!(matches!(err, ScriptError::InvalidTimeout { index: 0, .. }));

        assert!(parse_script(r#"[{"at_s": 0.0, "request": {"type": "home", "timeout_s": 3.0}}]"#).is_ok());
    }

    #[test]
    fn test_health_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&RuntimeHealth::CmdStale).unwrap(), "\"cmd_stale\"");
        assert_eq!(serde_json::to_string(&RuntimeHealth::DriverFault).unwrap(), "\"driver_fault\"");
    }
}
