//! Job table entries.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::error::ParseError;

/// Longest actuation period a single job may request.
pub const MAX_ACTUATION_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// The actuator routine a job asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobAction {
    /// Run the water pump.
    Pump,
    /// Switch the grow lamp on.
    Lamp,
}

impl JobAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pump => "pump",
            Self::Lamp => "lamp",
        }
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobAction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pump" => Ok(Self::Pump),
            "lamp" => Ok(Self::Lamp),
            _ => Err(ParseError::UnknownCommand(s.to_string())),
        }
    }
}

/// One parsed schedule line, resolved to its next fire time.
///
/// Entries are immutable once parsed; the table is re-parsed against a new
/// reference instant on every scheduling tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEntry {
    pub fire_time: DateTime<Local>,
    pub action: JobAction,
    pub args: Vec<String>,
}

impl JobEntry {
    pub fn new(fire_time: DateTime<Local>, action: JobAction, args: Vec<String>) -> Self {
        Self {
            fire_time,
            action,
            args,
        }
    }

    /// Actuation period requested by the first argument, in whole seconds.
    ///
    /// Falls back to `default` when the entry has no arguments. Periods longer
    /// than [`MAX_ACTUATION_PERIOD`] are rejected.
    pub fn duration(&self, default: Duration) -> Result<Duration, ParseError> {
        let Some(arg) = self.args.first() else {
            return Ok(default);
        };
        arg.parse::<u64>()
            .ok()
            .map(Duration::from_secs)
            .filter(|period| *period <= MAX_ACTUATION_PERIOD)
            .ok_or_else(|| ParseError::InvalidDuration(arg.clone()))
    }
}

impl fmt::Display for JobEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}][{}]",
            self.fire_time.format("%Y-%m-%d %H:%M"),
            self.action
        )?;
        if !self.args.is_empty() {
            write!(f, " {}", self.args.join(" "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(args: &[&str]) -> JobEntry {
        let fire_time = Local.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        JobEntry::new(
            fire_time,
            JobAction::Pump,
            args.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_action_from_str_is_case_insensitive() {
        assert_eq!("pump".parse::<JobAction>().unwrap(), JobAction::Pump);
        assert_eq!("LAMP".parse::<JobAction>().unwrap(), JobAction::Lamp);
        assert!(matches!(
            "fan".parse::<JobAction>(),
            Err(ParseError::UnknownCommand(cmd)) if cmd == "fan"
        ));
    }

    #[test]
    fn test_duration_defaults_without_args() {
        let default = Duration::from_secs(10);
        assert_eq!(entry(&[]).duration(default).unwrap(), default);
    }

    #[test]
    fn test_duration_uses_first_arg() {
        let default = Duration::from_secs(10);
        assert_eq!(
            entry(&["45", "ignored"]).duration(default).unwrap(),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn test_duration_rejects_non_integer() {
        let err = entry(&["soon"]).duration(Duration::from_secs(10)).unwrap_err();
        assert_eq!(err, ParseError::InvalidDuration("soon".to_string()));
    }

    #[test]
    fn test_duration_rejects_periods_beyond_a_day() {
        let default = Duration::from_secs(10);
        assert_eq!(
            entry(&["86400"]).duration(default).unwrap(),
            MAX_ACTUATION_PERIOD
        );
        assert_eq!(
            entry(&["86401"]).duration(default).unwrap_err(),
            ParseError::InvalidDuration("86401".to_string())
        );
        assert_eq!(
            entry(&["18446744073709551615"]).duration(default).unwrap_err(),
            ParseError::InvalidDuration("18446744073709551615".to_string())
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(entry(&["20"]).to_string(), "[2024-01-15 12:00][pump] 20");
    }
}
