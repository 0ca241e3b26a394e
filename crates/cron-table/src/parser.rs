//! Schedule file parsing.
//!
//! Only five-field expressions (no seconds) are accepted, followed by a
//! command and its arguments. Malformed lines are reported and skipped so a
//! single typo never disables the rest of the table.

use std::str::FromStr;

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::entry::{JobAction, JobEntry};
use crate::error::ParseError;

/// Number of leading fields that form the cron expression.
const CRON_FIELDS: usize = 5;

/// A line that failed to parse, kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// 1-based line number in the source text.
    pub line_number: usize,
    pub line: String,
    pub reason: ParseError,
}

/// Result of parsing a whole table.
#[derive(Debug, Clone, Default)]
pub struct ParsedTable {
    pub entries: Vec<JobEntry>,
    pub rejected: Vec<RejectedLine>,
}

impl ParsedTable {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse every line of `content`, resolving fire times strictly after `reference`.
///
/// Output order follows the source text; ordering by fire time is left to
/// [`crate::next_batch`].
pub fn parse_table(content: &str, reference: DateTime<Local>) -> ParsedTable {
    let mut table = ParsedTable::default();

    for (idx, raw) in content.lines().enumerate() {
        match parse_line(raw, reference) {
            Ok(Some(entry)) => {
                debug!(line = idx + 1, entry = %entry, "have valid cron entry");
                table.entries.push(entry);
            }
            Ok(None) => {}
            Err(reason) => {
                warn!(line = idx + 1, content = %raw.trim_end(), error = %reason, "invalid schedule entry");
                table.rejected.push(RejectedLine {
                    line_number: idx + 1,
                    line: raw.trim_end().to_string(),
                    reason,
                });
            }
        }
    }

    table
}

/// Parse a single line.
///
/// Returns `Ok(None)` for blank lines and `#` comments.
pub fn parse_line(line: &str, reference: DateTime<Local>) -> Result<Option<JobEntry>, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() <= CRON_FIELDS {
        return Err(ParseError::TooFewFields {
            found: fields.len(),
        });
    }

    let expression = fields[..CRON_FIELDS].join(" ");
    let schedules = compile_expression(&fields[..CRON_FIELDS])?;

    let action = JobAction::from_str(fields[CRON_FIELDS])?;
    let args = fields[CRON_FIELDS + 1..]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let fire_time = schedules
        .iter()
        .filter_map(|schedule| schedule.after(&reference).next())
        .min()
        .ok_or(ParseError::NoUpcomingFire(expression))?;

    Ok(Some(JobEntry::new(fire_time, action, args)))
}

/// Build the `cron::Schedule`s for the five standard fields.
///
/// The `cron` crate expects a leading seconds field and numbers weekdays
/// 1-7 from Sunday, so both are adapted here. It also requires day-of-month
/// and day-of-week to match together, while cron fires when either does if
/// both are restricted. That case compiles to one schedule per day field and
/// the caller takes the earliest occurrence.
fn compile_expression(fields: &[&str]) -> Result<Vec<cron::Schedule>, ParseError> {
    let original = fields.join(" ");
    let day_of_week = normalize_day_of_week(fields[4])
        .map_err(|reason| ParseError::invalid_expression(&original, reason))?;

    let day_pairs: Vec<(&str, &str)> = if fields[2] != "*" && day_of_week != "*" {
        vec![(fields[2], "*"), ("*", day_of_week.as_str())]
    } else {
        vec![(fields[2], day_of_week.as_str())]
    };

    day_pairs
        .into_iter()
        .map(|(day_of_month, day_of_week)| {
            let expression = format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], day_of_month, fields[3], day_of_week
            );
            cron::Schedule::from_str(&expression)
                .map_err(|e| ParseError::invalid_expression(&original, e))
        })
        .collect()
}

/// Rewrite a standard day-of-week field (0-7, Sunday = 0 or 7) into the
/// `cron` crate numbering (1-7, Sunday = 1). Names pass through unchanged.
fn normalize_day_of_week(field: &str) -> Result<String, String> {
    let mut parts = Vec::new();

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };
        let step_suffix = step.map(|s| format!("/{s}")).unwrap_or_default();

        match range.split_once('-') {
            Some((start, end)) => {
                let (Some(start_n), Some(end_n)) = (weekday_number(start)?, weekday_number(end)?)
                else {
                    // Named range, leave it to the cron crate.
                    parts.push(part.to_string());
                    continue;
                };

                if end_n == 7 && start_n > 0 {
                    // Ranges ending on the second Sunday would wrap past Saturday.
                    parts.push(format!("{}-7{step_suffix}", start_n + 1));
                    let step_n: u8 = match step {
                        Some(s) => s.parse().map_err(|_| format!("invalid step '{s}'"))?,
                        None => 1,
                    };
                    if step_n > 0 && (7 - start_n) % step_n == 0 {
                        parts.push("1".to_string());
                    }
                } else {
                    let end_shifted = if end_n == 7 { 7 } else { end_n + 1 };
                    parts.push(format!("{}-{}{step_suffix}", start_n + 1, end_shifted));
                }
            }
            None => match weekday_number(range)? {
                Some(n) => {
                    let shifted = if n == 7 { 1 } else { n + 1 };
                    parts.push(format!("{shifted}{step_suffix}"));
                }
                None => parts.push(part.to_string()),
            },
        }
    }

    Ok(parts.join(","))
}

/// Numeric weekday in standard cron numbering, `None` for `*` and names.
fn weekday_number(token: &str) -> Result<Option<u8>, String> {
    if !token.chars().all(|c| c.is_ascii_digit()) || token.is_empty() {
        return Ok(None);
    }
    match token.parse::<u8>() {
        Ok(n) if n <= 7 => Ok(Some(n)),
        _ => Err(format!("day of week '{token}' out of range 0-7")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};
    use rstest::rstest;

    /// Monday 2024-01-15 12:00 local time.
    fn reference() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_valid_line_yields_one_entry_after_reference() {
        let entry = parse_line("30 6 * * * pump 20", reference())
            .unwrap()
            .unwrap();
        assert!(entry.fire_time > reference());
        assert_eq!(entry.fire_time.hour(), 6);
        assert_eq!(entry.fire_time.minute(), 30);
        assert_eq!(entry.fire_time.day(), 16);
        assert_eq!(entry.action, JobAction::Pump);
        assert_eq!(entry.args, vec!["20".to_string()]);
    }

    #[test]
    fn test_fire_time_is_strictly_after_reference() {
        // Matches the reference minute exactly, so the next fire is a day later.
        let entry = parse_line("0 12 * * * lamp", reference()).unwrap().unwrap();
        assert_eq!(entry.fire_time, reference() + chrono::Duration::days(1));
    }

    #[test]
    fn test_every_minute() {
        let entry = parse_line("* * * * * pump", reference()).unwrap().unwrap();
        assert_eq!(entry.fire_time, reference() + chrono::Duration::minutes(1));
        assert!(entry.args.is_empty());
    }

    #[test]
    fn test_comments_and_blank_lines_are_skipped() {
        assert_eq!(parse_line("# 0 6 * * * pump", reference()).unwrap(), None);
        assert_eq!(parse_line("   ", reference()).unwrap(), None);
        assert_eq!(parse_line("", reference()).unwrap(), None);
    }

    #[test]
    fn test_tabs_separate_fields() {
        let entry = parse_line("0\t7\t*\t*\t*\tlamp\t60", reference())
            .unwrap()
            .unwrap();
        assert_eq!(entry.action, JobAction::Lamp);
        assert_eq!(entry.args, vec!["60".to_string()]);
    }

    #[rstest]
    #[case("0 6 * * *", 5)]
    #[case("0 6 * *", 4)]
    #[case("pump", 1)]
    fn test_too_few_fields(#[case] line: &str, #[case] found: usize) {
        assert_eq!(
            parse_line(line, reference()).unwrap_err(),
            ParseError::TooFewFields { found }
        );
    }

    #[rstest]
    #[case("61 6 * * * pump")]
    #[case("0 25 * * * pump")]
    #[case("0 6 32 * * pump")]
    #[case("0 6 * 13 * pump")]
    #[case("0 6 * * 9 pump")]
    #[case("a b c d e pump")]
    fn test_invalid_expression(#[case] line: &str) {
        assert!(matches!(
            parse_line(line, reference()),
            Err(ParseError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse_line("0 6 * * * sprinkler 5", reference()).unwrap_err(),
            ParseError::UnknownCommand("sprinkler".to_string())
        );
    }

    #[rstest]
    #[case("0", Weekday::Sun)]
    #[case("7", Weekday::Sun)]
    #[case("1", Weekday::Mon)]
    #[case("3", Weekday::Wed)]
    #[case("6", Weekday::Sat)]
    #[case("SAT", Weekday::Sat)]
    fn test_day_of_week_uses_standard_numbering(#[case] dow: &str, #[case] expected: Weekday) {
        let line = format!("0 8 * * {dow} pump");
        let entry = parse_line(&line, reference()).unwrap().unwrap();
        assert_eq!(entry.fire_time.weekday(), expected);
    }

    #[rstest]
    #[case("1-5", "2-6")]
    #[case("0-6", "1-7")]
    #[case("0-7", "1-7")]
    #[case("5-7", "6-7,1")]
    #[case("1-7/2", "2-7/2,1")]
    #[case("2-7/2", "3-7/2")]
    #[case("*", "*")]
    #[case("*/2", "*/2")]
    #[case("0,3", "1,4")]
    #[case("MON-FRI", "MON-FRI")]
    fn test_normalize_day_of_week(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_day_of_week(input).unwrap(), expected);
    }

    #[test]
    fn test_weekend_range_includes_sunday() {
        // Reference is a Monday; 6-7 means Saturday and Sunday.
        let entry = parse_line("0 8 * * 6-7 lamp", reference()).unwrap().unwrap();
        assert_eq!(entry.fire_time.weekday(), Weekday::Sat);
    }

    #[rstest]
    // Friday the 19th comes before the 1st of February.
    #[case("0 8 1 * 5 pump", 1, 19, Weekday::Fri)]
    // The 16th (a Tuesday) comes before the next Friday.
    #[case("0 8 16 * 5 pump", 1, 16, Weekday::Tue)]
    // Neither field restricted by the other when one is `*`.
    #[case("0 8 1 * * pump", 2, 1, Weekday::Thu)]
    #[case("0 8 * * 5 pump", 1, 19, Weekday::Fri)]
    // Month still applies to both alternatives.
    #[case("0 8 1 3 1 pump", 3, 1, Weekday::Fri)]
    fn test_day_of_month_or_day_of_week(
        #[case] line: &str,
        #[case] month: u32,
        #[case] day: u32,
        #[case] weekday: Weekday,
    ) {
        let entry = parse_line(line, reference()).unwrap().unwrap();
        assert_eq!(entry.fire_time.month(), month);
        assert_eq!(entry.fire_time.day(), day);
        assert_eq!(entry.fire_time.weekday(), weekday);
        assert_eq!(entry.fire_time.hour(), 8);
    }

    #[test]
    fn test_table_skips_malformed_lines_and_keeps_going() {
        let content = "\
# watering plan
30 6 * * * pump 20
0 6 * *
61 6 * * * pump
0 7 * * * fan 10

0 20 * * * lamp 600
";
        let table = parse_table(content, reference());

        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.entries[0].action, JobAction::Pump);
        assert_eq!(table.entries[1].action, JobAction::Lamp);

        let rejected: Vec<usize> = table.rejected.iter().map(|r| r.line_number).collect();
        assert_eq!(rejected, vec![3, 4, 5]);
        assert_eq!(table.rejected[0].reason, ParseError::TooFewFields { found: 4 });
    }

    #[test]
    fn test_empty_table() {
        let table = parse_table("# nothing here\n", reference());
        assert!(table.is_empty());
        assert!(table.rejected.is_empty());
    }
}
