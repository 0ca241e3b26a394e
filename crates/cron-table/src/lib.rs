//! Cron-style job tables for the autoplant daemon.
//!
//! A job table is plain text, one job per line:
//!
//! ```text
//! # min hour dom month dow command [args...]
//! 30 6 * * *  pump 20
//! 0  7 * * 1-5 lamp 3600
//! ```
//!
//! [`parse_table`] turns the text into [`JobEntry`] values whose fire time is
//! the next occurrence strictly after a reference instant, and [`next_batch`]
//! picks every entry that shares the earliest fire time.

pub mod batch;
pub mod entry;
pub mod error;
pub mod parser;

pub use batch::{JobBatch, next_batch};
pub use entry::{JobAction, JobEntry, MAX_ACTUATION_PERIOD};
pub use error::{ParseError, ScheduleError};
pub use parser::{ParsedTable, RejectedLine, parse_line, parse_table};
