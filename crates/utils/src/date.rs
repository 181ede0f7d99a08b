//! Calendar-day helpers. Days are UTC calendar days throughout the API.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};

/// The calendar day an instant falls on.
pub fn day_of(instant: DateTime<Utc>) -> NaiveDate {
    instant.date_naive()
}

/// Midnight at the start of `day`.
pub fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

/// First day of an inclusive window of `days` days ending on `end`.
pub fn window_start(end: NaiveDate, days: i64) -> NaiveDate {
    end - Duration::days(days.max(1) - 1)
}

/// Parses a `YYYY-MM` month into its first and last day.
pub fn month_bounds(month: &str) -> Option<(NaiveDate, NaiveDate)> {
    let (year, month) = month.trim().split_once('-')?;
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next.pred_opt()?))
}

pub fn weekday_name(day: NaiveDate) -> &'static str {
    match day.weekday() {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_bounds_handles_december_and_leap_years() {
        let (first, last) = month_bounds("2024-02").unwrap();
        assert_eq!(first, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(last, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let (_, last) = month_bounds("2023-12").unwrap();
        assert_eq!(last, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    }

    #[test]
    fn month_bounds_rejects_garbage() {
        assert!(month_bounds("2024").is_none());
        assert!(month_bounds("2024-13").is_none());
        assert!(month_bounds("abcd-01").is_none());
    }

    #[test]
    fn window_start_is_inclusive() {
        let end = NaiveDate::from_ymd_opt(2024, 3, 30).unwrap();
        assert_eq!(window_start(end, 30), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(window_start(end, 1), end);
    }
}
