//! Recurrence rules and next-occurrence arithmetic.

use chrono::{DateTime, Duration, DurationRound, Months, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The only cron expression the calculator understands: top of every minute.
pub const EVERY_MINUTE_CRON: &str = "* * * * *";

/// How a task repeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceKind {
    /// One-shot.
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    /// Cron-driven; see [`EVERY_MINUTE_CRON`].
    Custom,
}

/// Declarative repeat pattern attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub kind: RecurrenceKind,
    /// Number of units between occurrences. Must be at least 1.
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Only read for [`RecurrenceKind::Custom`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
}

fn default_interval() -> u32 {
    1
}

impl RecurrenceRule {
    /// A rule that never repeats.
    pub fn none() -> Self {
        Self {
            kind: RecurrenceKind::None,
            interval: 1,
            cron_expression: None,
        }
    }

    pub fn daily(interval: u32) -> Self {
        Self::every(RecurrenceKind::Daily, interval)
    }

    pub fn weekly(interval: u32) -> Self {
        Self::every(RecurrenceKind::Weekly, interval)
    }

    pub fn monthly(interval: u32) -> Self {
        Self::every(RecurrenceKind::Monthly, interval)
    }

    pub fn yearly(interval: u32) -> Self {
        Self::every(RecurrenceKind::Yearly, interval)
    }

    /// A cron-driven rule.
    pub fn cron(expression: impl Into<String>) -> Self {
        Self {
            kind: RecurrenceKind::Custom,
            interval: 1,
            cron_expression: Some(expression.into()),
        }
    }

    fn every(kind: RecurrenceKind, interval: u32) -> Self {
        Self {
            kind,
            interval,
            cron_expression: None,
        }
    }
}

/// Compute when a task should run next.
///
/// Calendar rules advance `now` (not `last_scheduled`) by `interval` units
/// and then take hour, minute and second from `last_scheduled`, so missed
/// occurrences collapse into a single upcoming one. Sub-second precision is
/// dropped. Monthly and yearly steps clamp to the last day of shorter months.
///
/// Returns `None` for one-shot rules, for a zero interval, and for any
/// custom cron expression other than [`EVERY_MINUTE_CRON`]. The latter two
/// are logged.
pub fn next_occurrence(
    last_scheduled: DateTime<Utc>,
    rule: &RecurrenceRule,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if rule.kind == RecurrenceKind::None {
        return None;
    }

    if rule.interval == 0 {
        warn!(kind = ?rule.kind, "recurrence interval must be at least 1, treating as one-shot");
        return None;
    }

    let advanced = match rule.kind {
        RecurrenceKind::None => return None,
        RecurrenceKind::Daily => now.checked_add_signed(Duration::days(i64::from(rule.interval))),
        RecurrenceKind::Weekly => {
            now.checked_add_signed(Duration::weeks(i64::from(rule.interval)))
        }
        RecurrenceKind::Monthly => now.checked_add_months(Months::new(rule.interval)),
        RecurrenceKind::Yearly => rule
            .interval
            .checked_mul(12)
            .and_then(|months| now.checked_add_months(Months::new(months))),
        RecurrenceKind::Custom => return next_cron_occurrence(rule.cron_expression.as_deref(), now),
    };

    let Some(advanced) = advanced else {
        warn!(kind = ?rule.kind, interval = rule.interval, "recurrence overflowed the calendar");
        return None;
    };

    let time_of_day = NaiveTime::from_hms_opt(
        last_scheduled.hour(),
        last_scheduled.minute(),
        last_scheduled.second(),
    )?;
    Some(advanced.date_naive().and_time(time_of_day).and_utc())
}

fn next_cron_occurrence(expression: Option<&str>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match expression.map(str::trim) {
        Some(EVERY_MINUTE_CRON) => {
            let minute = now.duration_trunc(Duration::minutes(1)).ok()?;
            Some(minute + Duration::minutes(1))
        }
        Some(other) => {
            warn!(cron = other, "unsupported recurrence: only \"* * * * *\" is evaluated");
            None
        }
        None => {
            warn!("unsupported recurrence: custom rule without a cron expression");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    // === Unit Tests ===

    #[test]
    fn test_daily_anchors_time_of_day() {
        let last = at(2025, 1, 1, 9, 0, 0);
        let now = at(2025, 1, 3, 10, 0, 0);
        assert_eq!(
            next_occurrence(last, &RecurrenceRule::daily(1), now),
            Some(at(2025, 1, 4, 9, 0, 0))
        );
    }

    #[test]
    fn test_daily_interval_three() {
        let last = at(2025, 1, 1, 7, 30, 15);
        let now = at(2025, 1, 1, 7, 30, 16);
        assert_eq!(
            next_occurrence(last, &RecurrenceRule::daily(3), now),
            Some(at(2025, 1, 4, 7, 30, 15))
        );
    }

    #[test]
    fn test_weekly() {
        let last = at(2025, 3, 3, 18, 45, 0);
        let now = at(2025, 3, 3, 18, 45, 1);
        assert_eq!(
            next_occurrence(last, &RecurrenceRule::weekly(2), now),
            Some(at(2025, 3, 17, 18, 45, 0))
        );
    }

    #[test]
    fn test_monthly_clamps_to_month_end() {
        let last = at(2025, 1, 31, 8, 0, 0);
        let now = at(2025, 1, 31, 8, 0, 0);
        assert_eq!(
            next_occurrence(last, &RecurrenceRule::monthly(1), now),
            Some(at(2025, 2, 28, 8, 0, 0))
        );
    }

    #[test]
    fn test_yearly_from_leap_day() {
        let last = at(2024, 2, 29, 12, 0, 0);
        let now = at(2024, 2, 29, 12, 0, 0);
        assert_eq!(
            next_occurrence(last, &RecurrenceRule::yearly(1), now),
            Some(at(2025, 2, 28, 12, 0, 0))
        );
    }

    #[test]
    fn test_missed_occurrences_collapse() {
        // A daily reminder last scheduled a month ago fires once, tomorrow.
        let last = at(2025, 5, 1, 6, 0, 0);
        let now = at(2025, 6, 1, 20, 0, 0);
        assert_eq!(
            next_occurrence(last, &RecurrenceRule::daily(1), now),
            Some(at(2025, 6, 2, 6, 0, 0))
        );
    }

    #[test]
    fn test_sub_second_dropped() {
        let last = at(2025, 1, 1, 9, 0, 0) + Duration::milliseconds(750);
        let now = at(2025, 1, 1, 9, 0, 1);
        let next = next_occurrence(last, &RecurrenceRule::daily(1), now).unwrap();
        assert_eq!(next, at(2025, 1, 2, 9, 0, 0));
        assert_eq!(next.timestamp_subsec_millis(), 0);
    }

    #[test]
    fn test_none_returns_none() {
        let t = at(2025, 1, 1, 0, 0, 0);
        assert_eq!(next_occurrence(t, &RecurrenceRule::none(), t), None);
    }

    #[test]
    fn test_zero_interval_returns_none() {
        let t = at(2025, 1, 1, 0, 0, 0);
        assert_eq!(next_occurrence(t, &RecurrenceRule::daily(0), t), None);
        assert_eq!(next_occurrence(t, &RecurrenceRule::monthly(0), t), None);
    }

    #[test]
    fn test_every_minute_cron() {
        let last = at(2025, 1, 1, 0, 0, 0);
        let now = at(2025, 1, 1, 10, 15, 42) + Duration::milliseconds(300);
        assert_eq!(
            next_occurrence(last, &RecurrenceRule::cron("* * * * *"), now),
            Some(at(2025, 1, 1, 10, 16, 0))
        );
    }

    #[test]
    fn test_every_minute_cron_on_boundary_moves_forward() {
        let now = at(2025, 1, 1, 10, 15, 0);
        assert_eq!(
            next_occurrence(now, &RecurrenceRule::cron("* * * * *"), now),
            Some(at(2025, 1, 1, 10, 16, 0))
        );
    }

    #[test]
    fn test_unsupported_cron_returns_none() {
        let t = at(2025, 1, 1, 0, 0, 0);
        assert_eq!(next_occurrence(t, &RecurrenceRule::cron("0 9 * * 1"), t), None);
    }

    #[test]
    fn test_custom_without_expression_returns_none() {
        let t = at(2025, 1, 1, 0, 0, 0);
        let rule = RecurrenceRule {
            kind: RecurrenceKind::Custom,
            interval: 1,
            cron_expression: None,
        };
        assert_eq!(next_occurrence(t, &rule, t), None);
    }

    #[test]
    fn test_rule_deserializes_with_default_interval() {
        let rule: RecurrenceRule = serde_json::from_str(r#"{"kind":"WEEKLY"}"#).unwrap();
        assert_eq!(rule, RecurrenceRule::weekly(1));

        let rule: RecurrenceRule =
            serde_json::from_str(r#"{"kind":"CUSTOM","cronExpression":"* * * * *"}"#).unwrap();
        assert_eq!(rule.cron_expression.as_deref(), Some(EVERY_MINUTE_CRON));
    }

    // === Property-Based Tests ===

    fn calendar_kind() -> impl Strategy<Value = RecurrenceKind> {
        prop_oneof![
            Just(RecurrenceKind::Daily),
            Just(RecurrenceKind::Weekly),
            Just(RecurrenceKind::Monthly),
            Just(RecurrenceKind::Yearly),
        ]
    }

    proptest! {
        // Calendar rules keep the original hour/minute/second
        #[test]
        fn calendar_rules_preserve_time_of_day(
            kind in calendar_kind(),
            interval in 1u32..24,
            last_secs in 946_684_800i64..1_893_456_000,
            now_offset in 0i64..(86_400 * 400),
        ) {
            let last = DateTime::from_timestamp(last_secs, 0).unwrap();
            let now = last + Duration::seconds(now_offset);
            let rule = RecurrenceRule { kind, interval, cron_expression: None };

            let next = next_occurrence(last, &rule, now).unwrap();
            prop_assert_eq!(next.hour(), last.hour());
            prop_assert_eq!(next.minute(), last.minute());
            prop_assert_eq!(next.second(), last.second());
            prop_assert!(next > now, "next {} should be after now {}", next, now);
        }

        // One-shot rules never produce another occurrence
        #[test]
        fn none_never_recurs(last_secs in 0i64..4_000_000_000, now_secs in 0i64..4_000_000_000) {
            let last = DateTime::from_timestamp(last_secs, 0).unwrap();
            let now = DateTime::from_timestamp(now_secs, 0).unwrap();
            prop_assert!(next_occurrence(last, &RecurrenceRule::none(), now).is_none());
        }

        // Every-minute cron lands on a minute boundary within the next minute
        #[test]
        fn every_minute_is_next_boundary(now_ms in 0i64..4_000_000_000_000) {
            let now = DateTime::from_timestamp_millis(now_ms).unwrap();
            let next = next_occurrence(now, &RecurrenceRule::cron(EVERY_MINUTE_CRON), now).unwrap();
            prop_assert_eq!(next.second(), 0);
            prop_assert_eq!(next.timestamp_subsec_millis(), 0);
            prop_assert!(next > now);
            prop_assert!(next - now <= Duration::minutes(1));
        }
    }
}
