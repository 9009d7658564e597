//! Trigger Engine: computes the next UTC occurrence for a task's schedule.
//!
//! `condition` is deliberately not a schedule kind here — see `DESIGN.md`
//! for that decision. Expressions and timezones are plain strings; nothing
//! is cached across calls, since resolving a schedule string is cheap and
//! callers (the Scheduler) already cache at the task level.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::TriggerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Cron,
    Rrule,
    Once,
    Event,
}

/// Result of `validate`: empty `warnings` means no advisory findings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Cron => "cron",
            ScheduleKind::Rrule => "rrule",
            ScheduleKind::Once => "once",
            ScheduleKind::Event => "event",
        }
    }
}

impl FromStr for ScheduleKind {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cron" => Ok(ScheduleKind::Cron),
            "rrule" => Ok(ScheduleKind::Rrule),
            "once" => Ok(ScheduleKind::Once),
            "event" => Ok(ScheduleKind::Event),
            other => Err(TriggerError::InvalidExpression(format!(
                "unknown schedule kind: {other}"
            ))),
        }
    }
}

fn parse_tz(tz: &str) -> Result<Tz, TriggerError> {
    Tz::from_str(tz).map_err(|_| TriggerError::UnknownTimezone(tz.to_string()))
}

/// Returns the next UTC instant at or after `after` matching `(kind, expr,
/// tz)`, or `None` for terminal one-shots / event-driven kinds.
///
/// `dtstart` is only consulted for `rrule` (defaults to the task's
/// `created_at` per spec §4.1) and is ignored for other kinds.
pub fn next_occurrence(
    kind: ScheduleKind,
    expr: &str,
    tz: &str,
    after: DateTime<Utc>,
    dtstart: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, TriggerError> {
    let tz = parse_tz(tz)?;
    match kind {
        ScheduleKind::Cron => cron_next(expr, tz, after),
        ScheduleKind::Rrule => rrule_next(expr, tz, dtstart, after),
        ScheduleKind::Once => once_next(expr, after),
        ScheduleKind::Event => Ok(None),
    }
}

fn cron_next(expr: &str, tz: Tz, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, TriggerError> {
    // The `cron` crate parses a 6-field expression (seconds leading); the
    // spec's surface is the standard 5-field form, so a literal `0` seconds
    // field is prepended.
    let full_expr = format!("0 {expr}");
    let schedule = cron::Schedule::from_str(&full_expr)
        .map_err(|e| TriggerError::InvalidExpression(format!("{expr}: {e}")))?;

    let after_local = after.with_timezone(&tz) - chrono::Duration::seconds(1);
    let next = schedule.after(&after_local).next();
    Ok(next.map(|dt| dt.with_timezone(&Utc)))
}

fn rrule_next(
    expr: &str,
    tz: Tz,
    dtstart: DateTime<Utc>,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, TriggerError> {
    let rtz = rrule::Tz::Tz(tz);
    let dtstart_local = dtstart.with_timezone(&rtz);
    let dtstart_str = dtstart_local.format("%Y%m%dT%H%M%S").to_string();
    let full = format!("DTSTART;TZID={}:{}\nRRULE:{}", tz.name(), dtstart_str, expr);

    let rrule_set: rrule::RRuleSet = full
        .parse()
        .map_err(|e| TriggerError::InvalidExpression(format!("{expr}: {e}")))?;

    let after_local = after.with_timezone(&rtz);
    let result = rrule_set.after(after_local).all(1);
    Ok(result
        .dates
        .into_iter()
        .next()
        .map(|dt| dt.with_timezone(&Utc)))
}

fn once_next(expr: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, TriggerError> {
    let instant = DateTime::parse_from_rfc3339(expr)
        .map_err(|e| TriggerError::InvalidExpression(format!("{expr}: {e}")))?
        .with_timezone(&Utc);
    Ok(if instant > after { Some(instant) } else { None })
}

/// Syntactic + semantic validation. Unlike `next_occurrence`, a syntax
/// error is still surfaced as `Err`; semantic oddities are advisory
/// warnings that do not block creation of the task.
pub fn validate(kind: ScheduleKind, expr: &str, tz: &str) -> Result<ValidationReport, TriggerError> {
    parse_tz(tz)?;
    let mut report = ValidationReport::default();
    match kind {
        ScheduleKind::Cron => {
            let full_expr = format!("0 {expr}");
            cron::Schedule::from_str(&full_expr)
                .map_err(|e| TriggerError::InvalidExpression(format!("{expr}: {e}")))?;
        }
        ScheduleKind::Rrule => {
            let full = format!("DTSTART:{}\nRRULE:{}", "19700101T000000Z", expr);
            let _: rrule::RRuleSet = full
                .parse()
                .map_err(|e| TriggerError::InvalidExpression(format!("{expr}: {e}")))?;
            if leap_year_only(expr) {
                report
                    .warnings
                    .push("BYMONTH=2 combined with BYMONTHDAY=29 only recurs in leap years".into());
            }
        }
        ScheduleKind::Once => {
            DateTime::parse_from_rfc3339(expr)
                .map_err(|e| TriggerError::InvalidExpression(format!("{expr}: {e}")))?;
        }
        ScheduleKind::Event => {
            if expr.is_empty() {
                return Err(TriggerError::InvalidExpression(
                    "event topic pattern must not be empty".into(),
                ));
            }
        }
    }
    Ok(report)
}

fn leap_year_only(expr: &str) -> bool {
    let has_feb = expr
        .split(';')
        .any(|part| part.eq_ignore_ascii_case("BYMONTH=2"));
    let has_day_29 = expr.split(';').any(|part| {
        part.to_ascii_uppercase()
            .strip_prefix("BYMONTHDAY=")
            .map(|v| v == "29")
            .unwrap_or(false)
    });
    has_feb && has_day_29
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unknown_timezone_is_rejected() {
        let err = next_occurrence(
            ScheduleKind::Once,
            "2025-01-01T00:00:00Z",
            "Mars/Olympus",
            Utc::now(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, TriggerError::UnknownTimezone(_)));
    }

    #[test]
    fn once_in_the_past_returns_none() {
        let after = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let next = next_occurrence(
            ScheduleKind::Once,
            "2000-01-01T00:00:00Z",
            "UTC",
            after,
            after,
        )
        .unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn once_in_the_future_returns_that_instant() {
        let after = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let next = next_occurrence(
            ScheduleKind::Once,
            "2030-06-01T00:00:00Z",
            "UTC",
            after,
            after,
        )
        .unwrap();
        assert_eq!(next, Some(Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn event_kind_has_no_temporal_occurrence() {
        let after = Utc::now();
        let next = next_occurrence(ScheduleKind::Event, "alerts.*", "UTC", after, after).unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn cron_weekdays_nine_am() {
        // Day before Europe/Chisinau's DST spring-forward to +03:00.
        let after = Utc.with_ymd_and_hms(2025, 3, 29, 10, 0, 0).unwrap(); // 12:00 +02:00
        let next = next_occurrence(
            ScheduleKind::Cron,
            "0 9 * * 1-5",
            "Europe/Chisinau",
            after,
            after,
        )
        .unwrap()
        .unwrap();
        // 2025-03-31T09:00:00+03:00 == 2025-03-31T06:00:00Z
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 31, 6, 0, 0).unwrap());
    }

    #[test]
    fn rrule_last_friday_of_month() {
        let dtstart = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let after = dtstart;
        let next = next_occurrence(
            ScheduleKind::Rrule,
            "FREQ=MONTHLY;BYDAY=FR;BYSETPOS=-1;BYHOUR=17;BYMINUTE=0",
            "UTC",
            after,
            dtstart,
        )
        .unwrap()
        .unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 31, 17, 0, 0).unwrap());
    }

    #[test]
    fn validate_flags_leap_year_only_rrule() {
        let report =
            validate(ScheduleKind::Rrule, "FREQ=YEARLY;BYMONTH=2;BYMONTHDAY=29", "UTC").unwrap();
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn validate_rejects_malformed_cron() {
        assert!(validate(ScheduleKind::Cron, "not a cron", "UTC").is_err());
    }

    #[test]
    fn next_occurrence_is_deterministic() {
        let after = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let a = next_occurrence(ScheduleKind::Cron, "0 9 * * 1-5", "UTC", after, after).unwrap();
        let b = next_occurrence(ScheduleKind::Cron, "0 9 * * 1-5", "UTC", after, after).unwrap();
        assert_eq!(a, b);
    }
}
