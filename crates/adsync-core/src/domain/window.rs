use std::fmt::{Display, Formatter};

use time::{Date, Duration, Month};

use crate::ConfigError;

/// Inclusive range of calendar days requested from a time-series node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: Date,
    pub end: Date,
}

impl DateWindow {
    pub fn new(start: Date, end: Date) -> Result<Self, ConfigError> {
        if end < start {
            return Err(ConfigError::InvalidWindow {
                start: format_ymd(start),
                end: format_ymd(end),
            });
        }
        Ok(Self { start, end })
    }

    /// A window whose end defaults to its start.
    pub fn starting(start: Date, end: Option<Date>) -> Result<Self, ConfigError> {
        Self::new(start, end.unwrap_or(start))
    }

    pub const fn single(day: Date) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    pub fn day_count(&self) -> i64 {
        (self.end - self.start).whole_days() + 1
    }

    pub fn days(&self) -> impl Iterator<Item = Date> {
        let end = self.end;
        std::iter::successors(Some(self.start), |day| day.next_day())
            .take_while(move |day| *day <= end)
    }
}

impl Display for DateWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", format_ymd(self.start), format_ymd(self.end))
    }
}

/// Computes the next window to import for a time-series node.
///
/// Re-imports `lookback_days` before the last requested date (never earlier than
/// `start_date`) and caps the window at `max_fetch_days` and `today`. Returns
/// `None` when nothing is left to fetch.
pub fn plan_window(
    start_date: Date,
    last_requested: Option<Date>,
    today: Date,
    lookback_days: u32,
    max_fetch_days: u32,
) -> Option<DateWindow> {
    if max_fetch_days == 0 {
        return None;
    }

    let start = match last_requested {
        Some(last) => last
            .checked_sub(Duration::days(i64::from(lookback_days)))
            .map_or(start_date, |rewound| rewound.max(start_date)),
        None => start_date,
    };

    let capped = start
        .checked_add(Duration::days(i64::from(max_fetch_days) - 1))
        .unwrap_or(today);
    let end = capped.min(today);

    (end >= start).then_some(DateWindow { start, end })
}

pub fn format_ymd(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Parses `YYYY-MM-DD`, ignoring anything after the tenth character.
pub fn parse_ymd(input: &str) -> Option<Date> {
    let input = input.trim();
    let head = input.get(..10)?;
    let mut parts = head.split('-');
    let year = parts.next()?.parse::<i32>().ok()?;
    let month = parts.next()?.parse::<u8>().ok()?;
    let day = parts.next()?.parse::<u8>().ok()?;
    if parts.next().is_some() || head.len() != 10 {
        return None;
    }
    Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(value: &str) -> Date {
        parse_ymd(value).expect("valid date")
    }

    #[test]
    fn parses_and_formats_calendar_dates() {
        assert_eq!(format_ymd(day("2024-02-29")), "2024-02-29");
        assert_eq!(parse_ymd("2024-01-15T10:00:00Z"), Some(day("2024-01-15")));
        assert_eq!(parse_ymd("2024-13-01"), None);
        assert_eq!(parse_ymd("24-1-1"), None);
    }

    #[test]
    fn first_run_starts_at_configured_date() {
        let window = plan_window(day("2024-01-01"), None, day("2024-03-01"), 2, 30)
            .expect("window");

        assert_eq!(window.start, day("2024-01-01"));
        assert_eq!(window.end, day("2024-01-30"));
        assert_eq!(window.day_count(), 30);
    }

    #[test]
    fn incremental_run_rewinds_by_lookback_window() {
        let window = plan_window(
            day("2024-01-01"),
            Some(day("2024-02-10")),
            day("2024-02-11"),
            2,
            30,
        )
        .expect("window");

        assert_eq!(window.start, day("2024-02-08"));
        assert_eq!(window.end, day("2024-02-11"));
        assert_eq!(window.days().count(), 4);
    }

    #[test]
    fn lookback_never_precedes_start_date() {
        let window = plan_window(
            day("2024-02-09"),
            Some(day("2024-02-10")),
            day("2024-02-10"),
            5,
            30,
        )
        .expect("window");

        assert_eq!(window.start, day("2024-02-09"));
    }

    #[test]
    fn future_start_yields_nothing_to_fetch() {
        assert_eq!(
            plan_window(day("2024-05-01"), None, day("2024-04-01"), 2, 30),
            None
        );
        assert_eq!(
            plan_window(day("2024-01-01"), None, day("2024-04-01"), 2, 0),
            None
        );
    }

    #[test]
    fn end_defaults_to_start() {
        let window = DateWindow::starting(day("2024-01-01"), None).expect("window");
        assert_eq!(window, DateWindow::single(day("2024-01-01")));
        assert!(DateWindow::new(day("2024-01-02"), day("2024-01-01")).is_err());
    }
}
