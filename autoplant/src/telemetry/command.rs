//! Remote command payloads received on the commands topic.

use std::time::Duration;

use cron_table::MAX_ACTUATION_PERIOD;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// A validated actuation request coming from the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    PumpOn { duration: Duration },
    LampOn { duration: Duration },
}

impl RemoteCommand {
    pub fn duration(&self) -> Duration {
        match self {
            Self::PumpOn { duration } | Self::LampOn { duration } => *duration,
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("malformed command payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("command {0} requires a duration")]
    MissingDuration(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    command: String,
    #[serde(default)]
    duration: Option<Value>,
}

/// Decode a JSON payload such as `{"command": "pump_on", "duration": 5}`.
///
/// The duration is in seconds and may be sent as an integer or a numeric string.
/// Anything above [`MAX_ACTUATION_PERIOD`] is rejected.
pub fn decode_command(payload: &[u8]) -> Result<RemoteCommand, CommandError> {
    let raw: RawCommand = serde_json::from_slice(payload)?;

    match raw.command.as_str() {
        "pump_on" => Ok(RemoteCommand::PumpOn {
            duration: required_duration(&raw)?,
        }),
        "lamp_on" => Ok(RemoteCommand::LampOn {
            duration: required_duration(&raw)?,
        }),
        _ => Err(CommandError::Unknown(raw.command)),
    }
}

fn required_duration(raw: &RawCommand) -> Result<Duration, CommandError> {
    match &raw.duration {
        None | Some(Value::Null) => Err(CommandError::MissingDuration(raw.command.clone())),
        Some(value) => parse_seconds(value),
    }
}

fn parse_seconds(value: &Value) -> Result<Duration, CommandError> {
    let seconds = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    seconds
        .map(Duration::from_secs)
        .filter(|period| *period <= MAX_ACTUATION_PERIOD)
        .ok_or_else(|| CommandError::InvalidDuration(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r#"{"command": "pump_on", "duration": 5}"#, RemoteCommand::PumpOn { duration: Duration::from_secs(5) })]
    #[case(r#"{"command": "lamp_on", "duration": 3600}"#, RemoteCommand::LampOn { duration: Duration::from_secs(3600) })]
    #[case(r#"{"command": "pump_on", "duration": "12"}"#, RemoteCommand::PumpOn { duration: Duration::from_secs(12) })]
    #[case(r#"{"duration": 0, "command": "lamp_on", "extra": true}"#, RemoteCommand::LampOn { duration: Duration::ZERO })]
    #[case(r#"{"command": "lamp_on", "duration": 86400}"#, RemoteCommand::LampOn { duration: MAX_ACTUATION_PERIOD })]
    fn test_decode_valid(#[case] payload: &str, #[case] expected: RemoteCommand) {
        assert_eq!(decode_command(payload.as_bytes()).unwrap(), expected);
    }

    #[test]
    fn test_unknown_command() {
        let err = decode_command(br#"{"command": "fan_on", "duration": 5}"#).unwrap_err();
        assert!(matches!(err, CommandError::Unknown(name) if name == "fan_on"));
    }

    #[rstest]
    #[case(br#"{"command": "pump_on"}"#.as_slice())]
    #[case(br#"{"command": "pump_on", "duration": null}"#.as_slice())]
    fn test_missing_duration(#[case] payload: &[u8]) {
        assert!(matches!(
            decode_command(payload),
            Err(CommandError::MissingDuration(_))
        ));
    }

    #[rstest]
    #[case(br#"{"command": "pump_on", "duration": -3}"#.as_slice())]
    #[case(br#"{"command": "pump_on", "duration": 2.5}"#.as_slice())]
    #[case(br#"{"command": "lamp_on", "duration": "soon"}"#.as_slice())]
    #[case(br#"{"command": "lamp_on", "duration": [1]}"#.as_slice())]
    #[case(br#"{"command": "lamp_on", "duration": 86401}"#.as_slice())]
    #[case(br#"{"command": "pump_on", "duration": 18446744073709551615}"#.as_slice())]
    #[case(br#"{"command": "pump_on", "duration": "18446744073709551615"}"#.as_slice())]
    fn test_invalid_duration(#[case] payload: &[u8]) {
        assert!(matches!(
            decode_command(payload),
            Err(CommandError::InvalidDuration(_))
        ));
    }

    #[rstest]
    #[case(b"".as_slice())]
    #[case(b"pump_on 5".as_slice())]
    #[case(br#"{"duration": 5}"#.as_slice())]
    fn test_malformed(#[case] payload: &[u8]) {
        assert!(matches!(decode_command(payload), Err(CommandError::Malformed(_))));
    }
}
