use ulid::Ulid;

use crate::model::{RowError, Span};

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    NotFound(&'static str, Ulid),
    TimetableClash { course: String, span: Span },
    BookingClash(Span),
    DuplicateRoom(String),
    InvalidTransition { from: String, to: String },
    InvalidUpload(Vec<RowError>),
    HasActiveBookings { room_id: Ulid, active: usize },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// HTTP-equivalent status for a transport layer to use.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_)
            | EngineError::TimetableClash { .. }
            | EngineError::BookingClash(_)
            | EngineError::InvalidTransition { .. }
            | EngineError::InvalidUpload(_)
            | EngineError::LimitExceeded(_) => 400,
            EngineError::NotFound(..) => 404,
            EngineError::DuplicateRoom(_) | EngineError::HasActiveBookings { .. } => 409,
            EngineError::WalError(_) => 500,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => f.write_str(msg),
            EngineError::NotFound(kind, id) => write!(f, "{kind} not found: {id}"),
            EngineError::TimetableClash { course, span } => write!(
                f,
                "Clashes with timetable: {course} ({} - {})",
                span.start_time(),
                span.end_time()
            ),
            EngineError::BookingClash(span) => write!(f, "Room already booked from {span}"),
            EngineError::DuplicateRoom(name) => write!(f, "room already exists: {name}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot change status from {from} to {to}")
            }
            EngineError::InvalidUpload(errors) => {
                write!(f, "timetable upload rejected: ")?;
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    f.write_str(&e.message)?;
                }
                Ok(())
            }
            EngineError::HasActiveBookings { room_id, active } => {
                write!(f, "room {room_id} has {active} active bookings")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
