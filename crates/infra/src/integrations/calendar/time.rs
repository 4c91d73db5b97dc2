//! Timestamp normalisation shared by the fetchers
//!
//! Every instant leaves this module as UTC. All-day dates become UTC
//! midnights of the calendar date; the merge layer maps them onto household
//! midnights later.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Parse a `YYYY-MM-DD` all-day date.
pub(crate) fn parse_all_day_date(value: &str) -> Result<DateTime<Utc>, String> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid all-day date '{value}': {e}"))?;
    Ok(date_midnight(date))
}

/// Parse an RFC 3339 timestamp. Values without an offset are local times in
/// `tz`.
pub(crate) fn parse_event_timestamp(value: &str, tz: Tz) -> Result<DateTime<Utc>, String> {
    let trimmed = value.trim();
    let has_explicit_timezone = trimmed.ends_with('Z')
        || trimmed
            .rfind('T')
            .is_some_and(|idx| trimmed[idx + 1..].chars().any(|c| matches!(c, '+' | '-')));

    if has_explicit_timezone {
        return DateTime::parse_from_rfc3339(trimmed)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| format!("invalid timestamp '{value}': {e}"));
    }

    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M"))
        .map_err(|e| format!("invalid timestamp '{value}': {e}"))?;
    localize(naive, tz).ok_or_else(|| format!("timestamp '{value}' does not exist in {tz}"))
}

/// UTC midnight of a calendar date
pub(crate) fn date_midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Resolve a local wall-clock time in `tz`.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times skipped by
/// a DST jump resolve to `None`.
pub(crate) fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

/// Trim a provider-supplied identity and drop empty values
pub(crate) fn clean_identity(value: &str, event_id: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        tracing::warn!(event_id, "empty participant identity");
        return None;
    }
    if trimmed.contains(' ') && trimmed.contains('@') {
        tracing::warn!(event_id, identity = trimmed, "participant email contains whitespace");
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;

    use super::*;

    #[test]
    fn offsets_are_honoured() {
        let parsed = parse_event_timestamp("2024-03-04T09:00:00+01:00", Tz::UTC).unwrap();
        assert_eq!(parsed.hour(), 8);
    }

    #[test]
    fn floating_times_use_the_household_zone() {
        let parsed =
            parse_event_timestamp("2024-07-01T09:00:00", chrono_tz::Europe::Berlin).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 7, 1, 7, 0, 0).unwrap());
    }

    #[test]
    fn skipped_local_time_is_rejected() {
        let err =
            parse_event_timestamp("2024-03-31T02:30:00", chrono_tz::Europe::Berlin).unwrap_err();
        assert!(err.contains("does not exist"));
    }

    #[test]
    fn all_day_dates_are_utc_midnights() {
        let parsed = parse_all_day_date("2024-12-24").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 12, 24, 0, 0, 0).unwrap());
        assert!(parse_all_day_date("24/12/2024").is_err());
    }
}
