//! Sync windows: which slice of a repository's history an ingestion run covers.
//!
//! A window optionally restricts commits to a date range and optionally resumes
//! from a checkpoint commit. The date range is both-or-neither; a window with
//! only one bound cannot be constructed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::Sha;

/// Date format accepted for window bounds.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors produced when validating a date window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("both start_date and end_date must be provided together")]
    MismatchedBounds,

    #[error("invalid {which} date format {value:?}: expected YYYY-MM-DD")]
    InvalidDate { which: &'static str, value: String },

    #[error("start date {start} must not be after end date {end}")]
    StartAfterEnd { start: NaiveDate, end: NaiveDate },
}

/// An inclusive date range with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

/// Unchecked wire form of [`DateRange`].
#[derive(Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = WindowError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError::StartAfterEnd { start, end });
        }
        Ok(DateRange { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// The `since` query value: midnight UTC at the start date.
    pub fn since_param(&self) -> String {
        format!("{}T00:00:00Z", self.start.format(DATE_FORMAT))
    }

    /// The `until` query value: the last second of the end date, UTC.
    pub fn until_param(&self) -> String {
        format!("{}T23:59:59Z", self.end.format(DATE_FORMAT))
    }
}

/// Validates a pair of `YYYY-MM-DD` strings.
///
/// Returns `Ok(None)` when both are empty, `Ok(Some(range))` when both parse and
/// `start <= end`, and an error otherwise.
pub fn validate_dates(start: &str, end: &str) -> Result<Option<DateRange>, WindowError> {
    let start = start.trim();
    let end = end.trim();

    match (start.is_empty(), end.is_empty()) {
        (true, true) => return Ok(None),
        (true, false) | (false, true) => return Err(WindowError::MismatchedBounds),
        (false, false) => {}
    }

    let start = parse_date("start", start)?;
    let end = parse_date("end", end)?;
    DateRange::new(start, end).map(Some)
}

fn parse_date(which: &'static str, value: &str) -> Result<NaiveDate, WindowError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| WindowError::InvalidDate {
        which,
        value: value.to_string(),
    })
}

/// The parameters of one ingestion run for one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    /// Optional date restriction.
    pub range: Option<DateRange>,

    /// The last previously ingested commit, or empty for a full sync.
    pub resume_cursor: Sha,
}

impl SyncWindow {
    /// A full sync over all history.
    pub fn full() -> Self {
        SyncWindow::default()
    }

    pub fn new(range: Option<DateRange>, resume_cursor: Sha) -> Self {
        SyncWindow {
            range,
            resume_cursor,
        }
    }

    /// Returns the same window resuming from `cursor`.
    pub fn resuming_from(&self, cursor: Sha) -> Self {
        SyncWindow {
            range: self.range,
            resume_cursor: cursor,
        }
    }

    /// True when this window continues from a previously ingested commit.
    pub fn is_resume(&self) -> bool {
        !self.resume_cursor.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn mismatched_pair_fails() {
        assert_eq!(
            validate_dates("", "2024-01-01"),
            Err(WindowError::MismatchedBounds)
        );
        assert_eq!(
            validate_dates("2024-01-01", ""),
            Err(WindowError::MismatchedBounds)
        );
    }

    #[test]
    fn inverted_range_does_not_deserialize() {
        let ok: DateRange =
            serde_json::from_str(r#"{"start":"2024-01-01","end":"2024-01-31"}"#).unwrap();
        assert_eq!(ok.end(), date("2024-01-31"));

        let err = serde_json::from_str::<DateRange>(r#"{"start":"2024-02-01","end":"2024-01-01"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("must not be after"), "{err}");
    }

    #[test]
    fn start_after_end_fails() {
        assert_eq!(
            validate_dates("2024-02-01", "2024-01-01"),
            Err(WindowError::StartAfterEnd {
                start: date("2024-02-01"),
                end: date("2024-01-01"),
            })
        );
    }

    #[test]
    fn ordered_pair_succeeds() {
        let range = validate_dates("2024-01-01", "2024-02-01").unwrap().unwrap();
        assert_eq!(range.start(), date("2024-01-01"));
        assert_eq!(range.end(), date("2024-02-01"));
    }

    #[test]
    fn same_day_is_a_valid_range() {
        assert!(validate_dates("2024-01-01", "2024-01-01").unwrap().is_some());
    }

    #[test]
    fn both_empty_means_no_range() {
        assert_eq!(validate_dates("", ""), Ok(None));
        assert_eq!(validate_dates("  ", " "), Ok(None));
    }

    #[test]
    fn malformed_date_fails() {
        assert!(matches!(
            validate_dates("2024/01/01", "2024-02-01"),
            Err(WindowError::InvalidDate { which: "start", .. })
        ));
        assert!(matches!(
            validate_dates("2024-01-01", "February"),
            Err(WindowError::InvalidDate { which: "end", .. })
        ));
    }

    #[test]
    fn range_params_cover_whole_days() {
        let range = validate_dates("2024-01-01", "2024-02-01").unwrap().unwrap();
        assert_eq!(range.since_param(), "2024-01-01T00:00:00Z");
        assert_eq!(range.until_param(), "2024-02-01T23:59:59Z");
    }

    #[test]
    fn resuming_keeps_range() {
        let range = validate_dates("2024-01-01", "2024-02-01").unwrap();
        let window = SyncWindow::new(range, Sha::empty());
        assert!(!window.is_resume());

        let resumed = window.resuming_from(Sha::new("abc123"));
        assert!(resumed.is_resume());
        assert_eq!(resumed.range, range);
        assert_eq!(resumed.resume_cursor, Sha::new("abc123"));
    }

    proptest! {
        #[test]
        fn validation_agrees_with_date_order(
            a in 0i64..20_000,
            b in 0i64..20_000,
        ) {
            let epoch = date("1990-01-01");
            let start = epoch + chrono::Duration::days(a);
            let end = epoch + chrono::Duration::days(b);
            let result = validate_dates(
                &start.format(DATE_FORMAT).to_string(),
                &end.format(DATE_FORMAT).to_string(),
            );
            prop_assert_eq!(result.is_ok(), start <= end);
        }
    }
}
