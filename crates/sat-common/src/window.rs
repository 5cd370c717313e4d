//! Date window handling for imagery requests.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// An inclusive calendar-date range for an imagery request.
///
/// Satellite composites are addressed by whole days; the provider client
/// expands the window to full-day UTC instants on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, WindowParseError> {
        if end < start {
            return Err(WindowParseError::EndBeforeStart { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse from a pair of ISO dates ("2024-06-01", "2024-06-10").
    pub fn from_iso(start: &str, end: &str) -> Result<Self, WindowParseError> {
        let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")
            .map_err(|_| WindowParseError::InvalidDate(start.to_string()))?;
        let end = NaiveDate::parse_from_str(end, "%Y-%m-%d")
            .map_err(|_| WindowParseError::InvalidDate(end.to_string()))?;
        Self::new(start, end)
    }

    /// Number of calendar days covered (inclusive).
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Widen symmetrically by `pad_days` on both ends.
    pub fn widen(&self, pad_days: i64) -> Self {
        Self {
            start: self.start - Duration::days(pad_days),
            end: self.end + Duration::days(pad_days),
        }
    }

    /// Shift the same month/day interval into another year.
    ///
    /// Days past the end of the target month clamp to the month's last
    /// day, so Feb 29 maps to Feb 28 in non-leap years.
    pub fn shift_to_year(&self, year: i32) -> Self {
        Self {
            start: shift_date(self.start, year),
            end: shift_date(self.end, year),
        }
    }

    pub fn start_iso(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_iso(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start_iso(), self.end_iso())
    }
}

fn shift_date(date: NaiveDate, year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, date.month(), date.day())
        .unwrap_or_else(|| last_day_of_month(year, date.month()))
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_y, next_m) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    // First of next month minus one day; both dates are always valid.
    NaiveDate::from_ymd_opt(next_y, next_m, 1).expect("valid first of month") - Duration::days(1)
}

#[derive(Debug, thiserror::Error)]
pub enum WindowParseError {
    #[error("Invalid ISO date: {0}")]
    InvalidDate(String),

    #[error("Window end {end} is before start {start}")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },
}

impl From<WindowParseError> for crate::error::SatError {
    fn from(err: WindowParseError) -> Self {
        crate::error::SatError::InvalidDateRange(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(s: &str, e: &str) -> DateWindow {
        DateWindow::from_iso(s, e).unwrap()
    }

    #[test]
    fn test_parse_and_span() {
        let w = window("2024-06-01", "2024-06-10");
        assert_eq!(w.days(), 10);
        assert_eq!(w.start_iso(), "2024-06-01");
        assert_eq!(w.end_iso(), "2024-06-10");
    }

    #[test]
    fn test_end_before_start_rejected() {
        assert!(DateWindow::from_iso("2024-06-10", "2024-06-01").is_err());
    }

    #[test]
    fn test_widen_symmetric() {
        let w = window("2024-06-10", "2024-06-12").widen(7);
        assert_eq!(w.start_iso(), "2024-06-03");
        assert_eq!(w.end_iso(), "2024-06-19");
    }

    #[test]
    fn test_widen_crosses_month_boundary() {
        let w = window("2024-06-01", "2024-06-02").widen(7);
        assert_eq!(w.start_iso(), "2024-05-25");
    }

    #[test]
    fn test_shift_to_year() {
        let w = window("2024-06-01", "2024-06-10").shift_to_year(2022);
        assert_eq!(w.start_iso(), "2022-06-01");
        assert_eq!(w.end_iso(), "2022-06-10");
    }

    #[test]
    fn test_shift_clamps_leap_day() {
        let w = window("2024-02-29", "2024-02-29").shift_to_year(2023);
        assert_eq!(w.start_iso(), "2023-02-28");
        assert_eq!(w.end_iso(), "2023-02-28");
    }
}
