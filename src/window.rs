use std::fmt;

use chrono::{Duration, NaiveDate};

use crate::error::Error;

/// A closed, inclusive date interval small enough for a single API request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Splits `[start, end]` into ordered, contiguous, non-overlapping windows
/// that together cover the full range. Each window spans at most
/// `max_span_days + 1` inclusive days.
///
/// # Returns
/// A Result containing either the windows or an [`Error`] when the start
/// date lies after the end date.
pub fn plan_windows(
    start: &NaiveDate,
    end: &NaiveDate,
    max_span_days: u32,
) -> Result<Vec<DateWindow>, Error> {
    if start > end {
        return Err(Error::StartDateAfterEndDate {
            start_date: start.to_string(),
            end_date: end.to_string(),
        });
    }

    let span = Duration::days(i64::from(max_span_days));
    let mut windows = Vec::new();
    let mut cursor = *start;

    while cursor <= *end {
        let window_end = (cursor + span).min(*end);
        windows.push(DateWindow {
            start: cursor,
            end: window_end,
        });
        cursor = window_end + Duration::days(1);
    }

    Ok(windows)
}
