//! Time normalization for the heterogeneous inputs the system receives:
//! spreadsheet day fractions, loosely formatted `H:mm` strings and
//! `YYYY-MM-DD` calendar dates.

use chrono::{Datelike, NaiveDate};

use crate::model::{CellValue, Minute, Weekday, MINUTES_PER_DAY};

/// Normalize a raw time cell to zero-padded 24-hour `HH:mm`.
///
/// Text accepts `H`, `H:m`, `H:mm`, `HH:mm` and `HH:mm:ss` (seconds dropped).
/// Numbers are spreadsheet day fractions in `[0, 1)`, rounded to the nearest
/// minute. Anything else, including out-of-range values, yields `None`.
pub fn normalize_time(raw: &CellValue) -> Option<String> {
    parse_cell(raw).map(minutes_to_time)
}

/// Text-only shorthand for [`normalize_time`].
pub fn normalize_time_str(raw: &str) -> Option<String> {
    parse_text(raw).map(minutes_to_time)
}

/// Minute-of-day for a time string, always through normalization.
pub fn to_minutes(raw: &str) -> Option<Minute> {
    parse_text(raw)
}

/// Minute-of-day for a raw cell.
pub fn cell_to_minutes(raw: &CellValue) -> Option<Minute> {
    parse_cell(raw)
}

pub fn minutes_to_time(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

fn parse_cell(raw: &CellValue) -> Option<Minute> {
    match raw {
        CellValue::Text(s) => parse_text(s),
        CellValue::Number(f) => parse_day_fraction(*f),
        CellValue::Empty => None,
    }
}

fn parse_day_fraction(fraction: f64) -> Option<Minute> {
    if !fraction.is_finite() || fraction < 0.0 {
        return None;
    }
    let total = (fraction * MINUTES_PER_DAY as f64).round();
    if total >= MINUTES_PER_DAY as f64 {
        return None;
    }
    Some(total as Minute)
}

fn parse_text(raw: &str) -> Option<Minute> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut parts = trimmed.split(':');
    let hour = parse_component(parts.next()?)?;
    let minute = match parts.next() {
        Some(m) => parse_component(m)?,
        None => 0,
    };
    // Optional seconds, as spreadsheets export "09:00:00".
    if let Some(s) = parts.next() {
        parse_component(s)?;
    }
    if parts.next().is_some() || hour >= 24 || minute >= 60 {
        return None;
    }
    Some(hour * 60 + minute)
}

fn parse_component(part: &str) -> Option<Minute> {
    let part = part.trim();
    if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

/// Parse a strict `YYYY-MM-DD` calendar date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Weekday of a `YYYY-MM-DD` date. Pure calendar arithmetic, so the result
/// never depends on the host timezone.
pub fn weekday_of(raw: &str) -> Option<Weekday> {
    parse_date(raw).map(|d| Weekday::from_chrono(d.weekday()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.into())
    }

    #[test]
    fn day_fraction_to_hhmm() {
        assert_eq!(normalize_time(&CellValue::Number(0.375)).as_deref(), Some("09:00"));
        assert_eq!(normalize_time(&CellValue::Number(0.0)).as_deref(), Some("00:00"));
        assert_eq!(normalize_time(&CellValue::Number(0.5625)).as_deref(), Some("13:30"));
    }

    #[test]
    fn day_fraction_rounds_to_nearest_minute() {
        // 10:29:40 → 10:30
        let f = (10.0 * 3600.0 + 29.0 * 60.0 + 40.0) / 86_400.0;
        assert_eq!(normalize_time(&CellValue::Number(f)).as_deref(), Some("10:30"));
    }

    #[test]
    fn day_fraction_out_of_range() {
        assert_eq!(normalize_time(&CellValue::Number(1.0)), None);
        assert_eq!(normalize_time(&CellValue::Number(-0.1)), None);
        assert_eq!(normalize_time(&CellValue::Number(f64::NAN)), None);
    }

    #[test]
    fn text_padding() {
        assert_eq!(normalize_time(&text("9:5")).as_deref(), Some("09:05"));
        assert_eq!(normalize_time(&text("9:30")).as_deref(), Some("09:30"));
        assert_eq!(normalize_time(&text("14:00")).as_deref(), Some("14:00"));
        assert_eq!(normalize_time(&text("9")).as_deref(), Some("09:00"));
        assert_eq!(normalize_time(&text(" 08:15:00 ")).as_deref(), Some("08:15"));
    }

    #[test]
    fn unrecognized_input() {
        assert_eq!(normalize_time(&CellValue::Empty), None);
        assert_eq!(normalize_time(&text("")), None);
        assert_eq!(normalize_time(&text("noon")), None);
        assert_eq!(normalize_time(&text("25:00")), None);
        assert_eq!(normalize_time(&text("10:60")), None);
        assert_eq!(normalize_time(&text("1:2:3:4")), None);
        assert_eq!(normalize_time(&text("100:00")), None);
    }

    #[test]
    fn minutes_round_trip() {
        assert_eq!(to_minutes("09:00"), Some(540));
        assert_eq!(to_minutes("9:5"), Some(545));
        assert_eq!(minutes_to_time(545), "09:05");
        assert_eq!(minutes_to_time(0), "00:00");
        assert_eq!(minutes_to_time(1439), "23:59");
    }

    #[test]
    fn weekday_is_date_only() {
        assert_eq!(weekday_of("2024-01-01"), Some(Weekday::Monday));
        assert_eq!(weekday_of("2024-02-29"), Some(Weekday::Thursday));
        assert_eq!(weekday_of("2026-10-18"), Some(Weekday::Sunday));
        assert_eq!(weekday_of("2024-13-01"), None);
        assert_eq!(weekday_of("01/02/2024"), None);
    }
}
