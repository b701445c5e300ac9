use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::filter::Granularity;

/// Half-open date interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Consecutive one-day windows tiling `[from, to)`, the last one truncated at
/// `to`. Empty when `from >= to`.
pub fn day_windows(from: NaiveDate, to: NaiveDate) -> Vec<Window> {
    let mut windows = Vec::new();
    let mut start = from;
    while start < to {
        let end = start.succ_opt().map_or(to, |next| next.min(to));
        windows.push(Window { start, end });
        start = end;
    }
    windows
}

/// `YYYY-MM-DD HH:MM` for hourly data, `YYYY-MM-DD` otherwise.
pub fn format_timestamp(ts: NaiveDateTime, granularity: Granularity) -> String {
    match granularity {
        Granularity::Hour => ts.format("%Y-%m-%d %H:%M").to_string(),
        _ => ts.format("%Y-%m-%d").to_string(),
    }
}

pub fn format_date(date: NaiveDate, granularity: Granularity) -> String {
    format_timestamp(date.and_time(NaiveTime::MIN), granularity)
}
