use chrono::{Datelike, NaiveDate};

use crate::model::*;
use crate::time::{parse_date, to_minutes};

use super::EngineError;

/// A requested slot after date and time normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RequestedSlot {
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub span: Span,
}

pub(crate) fn parse_slot(date: &str, start: &str, end: &str) -> Result<RequestedSlot, EngineError> {
    let date = parse_date(date)
        .ok_or_else(|| EngineError::Validation(format!("Invalid date: {date:?}")))?;
    let start = to_minutes(start)
        .ok_or_else(|| EngineError::Validation(format!("Invalid start time: {start:?}")))?;
    let end = to_minutes(end)
        .ok_or_else(|| EngineError::Validation(format!("Invalid end time: {end:?}")))?;
    let span = Span::try_new(start, end)
        .ok_or_else(|| EngineError::Validation("Start time must be before end time".into()))?;
    Ok(RequestedSlot {
        date,
        weekday: Weekday::from_chrono(date.weekday()),
        span,
    })
}

pub(crate) fn validate_text(
    value: &str,
    field: &'static str,
    max_len: usize,
) -> Result<String, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    if trimmed.len() > max_len {
        return Err(EngineError::LimitExceeded(field));
    }
    Ok(trimmed.to_string())
}

/// First lecture on the slot's weekday that overlaps it.
pub(crate) fn check_timetable(rs: &RoomState, slot: &RequestedSlot) -> Result<(), EngineError> {
    match rs
        .lectures_on(slot.weekday)
        .iter()
        .find(|l| l.span.overlaps(&slot.span))
    {
        Some(lecture) => Err(EngineError::TimetableClash {
            course: lecture.course.clone(),
            span: lecture.span,
        }),
        None => Ok(()),
    }
}

/// First active booking on the same date that overlaps the slot.
pub(crate) fn check_bookings(rs: &RoomState, slot: &RequestedSlot) -> Result<(), EngineError> {
    match rs.active_on(slot.date).find(|b| b.span.overlaps(&slot.span)) {
        Some(existing) => Err(EngineError::BookingClash(existing.span)),
        None => Ok(()),
    }
}

/// Timetable first, then other active bookings.
pub(crate) fn check_no_conflict(rs: &RoomState, slot: &RequestedSlot) -> Result<(), EngineError> {
    check_timetable(rs, slot)?;
    check_bookings(rs, slot)
}

pub(crate) fn conflict_reason(err: &EngineError) -> &'static str {
    match err {
        EngineError::TimetableClash { .. } => "timetable",
        EngineError::BookingClash(_) => "booking",
        _ => "other",
    }
}
