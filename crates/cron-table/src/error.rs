//! Error types for job table parsing and batch resolution.

use thiserror::Error;

/// Reasons a single schedule line is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid length of cron entry: expected at least 6 fields, found {found}")]
    TooFewFields { found: usize },

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("unknown job command '{0}'")]
    UnknownCommand(String),

    #[error("cron expression '{0}' never fires again")]
    NoUpcomingFire(String),

    #[error("invalid duration argument '{0}': expected whole seconds up to one day")]
    InvalidDuration(String),
}

impl ParseError {
    pub fn invalid_expression(expression: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidExpression {
            expression: expression.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors from resolving the next batch of jobs.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("job table has no valid entries")]
    EmptyTable,
}
