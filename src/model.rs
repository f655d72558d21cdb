use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use ulid::Ulid;

use crate::time::minutes_to_time;

/// Minute of day in `[0, 1440)`.
pub type Minute = u16;

pub const MINUTES_PER_DAY: Minute = 1440;

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for untrusted input.
    pub fn try_new(start: Minute, end: Minute) -> Option<Self> {
        (start < end && end <= MINUTES_PER_DAY).then_some(Self { start, end })
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn start_time(&self) -> String {
        minutes_to_time(self.start)
    }

    pub fn end_time(&self) -> String {
        minutes_to_time(self.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_time(), self.end_time())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    pub fn from_chrono(weekday: chrono::Weekday) -> Self {
        match weekday {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Weekday::Monday => "Monday",
            Weekday::Tuesday => "Tuesday",
            Weekday::Wednesday => "Wednesday",
            Weekday::Thursday => "Thursday",
            Weekday::Friday => "Friday",
            Weekday::Saturday => "Saturday",
            Weekday::Sunday => "Sunday",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Weekday {
    type Err = String;

    /// Full day names or three-letter abbreviations, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Weekday::ALL
            .into_iter()
            .find(|d| {
                let name = d.name().to_ascii_lowercase();
                lower == name || (lower.len() == 3 && name.starts_with(&lower))
            })
            .ok_or_else(|| format!("unknown weekday: {s}"))
    }
}

/// One cell of an uploaded spreadsheet row.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Empty,
}

impl CellValue {
    /// Trimmed text content; numbers are rendered without a trailing `.0`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Text(s) => {
                let t = s.trim();
                (!t.is_empty()).then(|| t.to_string())
            }
            CellValue::Number(n) if n.fract() == 0.0 => Some(format!("{}", *n as i64)),
            CellValue::Number(n) => Some(n.to_string()),
            CellValue::Empty => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

// ── Statuses ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Available,
    Unavailable,
    Maintenance,
    /// Reserved legacy value. No code path produces it.
    Booked,
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RoomStatus::Available => "available",
            RoomStatus::Unavailable => "unavailable",
            RoomStatus::Maintenance => "maintenance",
            RoomStatus::Booked => "booked",
        })
    }
}

impl FromStr for RoomStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(RoomStatus::Available),
            "unavailable" => Ok(RoomStatus::Unavailable),
            "maintenance" => Ok(RoomStatus::Maintenance),
            "booked" => Ok(RoomStatus::Booked),
            _ => Err(format!("unknown room status: {s}")),
        }
    }
}

/// Outcome of looking up a (current, requested) pair in a transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Allowed,
    Unchanged,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Declined,
    Completed,
}

impl BookingStatus {
    /// Pending and Approved bookings count toward conflicts and occupancy.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn transition(self, to: BookingStatus) -> Transition {
        use BookingStatus::*;
        match (self, to) {
            (from, to) if from == to => Transition::Unchanged,
            (Pending, Approved) | (Pending, Declined) => Transition::Allowed,
            (Pending, Completed) | (Approved, Completed) => Transition::Allowed,
            _ => Transition::Denied,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Approved => "Approved",
            BookingStatus::Declined => "Declined",
            BookingStatus::Completed => "Completed",
        })
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Pending" => Ok(BookingStatus::Pending),
            "Approved" => Ok(BookingStatus::Approved),
            "Declined" => Ok(BookingStatus::Declined),
            "Completed" => Ok(BookingStatus::Completed),
            _ => Err(format!("unknown booking status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaintenanceStatus {
    Pending,
    InProgress,
    Resolved,
}

impl MaintenanceStatus {
    pub fn transition(self, to: MaintenanceStatus) -> Transition {
        use MaintenanceStatus::*;
        match (self, to) {
            (from, to) if from == to => Transition::Unchanged,
            (Pending, InProgress) | (Pending, Resolved) | (InProgress, Resolved) => {
                Transition::Allowed
            }
            _ => Transition::Denied,
        }
    }
}

impl fmt::Display for MaintenanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MaintenanceStatus::Pending => "pending",
            MaintenanceStatus::InProgress => "in-progress",
            MaintenanceStatus::Resolved => "resolved",
        })
    }
}

// ── Records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub building: String,
    pub department: String,
    pub capacity: u32,
    pub status: RoomStatus,
    pub kind: Option<String>,
    pub location: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Room {
    pub fn key(&self) -> RoomKey {
        RoomKey::new(&self.name, &self.building, &self.department)
    }
}

/// Normalized (trimmed, lowercase) room identity. Jointly unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub name: String,
    pub building: String,
    pub department: String,
}

impl RoomKey {
    pub fn new(name: &str, building: &str, department: &str) -> Self {
        let normalize = |v: &str| v.trim().to_lowercase();
        Self {
            name: normalize(name),
            building: normalize(building),
            department: normalize(department),
        }
    }
}

/// JSON carries `startTime`/`endTime` as `HH:MM`; compact formats (the WAL)
/// keep the minute span.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Lecture {
    pub span: Span,
    pub course: String,
    pub faculty: Option<String>,
}

impl Serialize for Lecture {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let human = serializer.is_human_readable();
        let mut st = serializer.serialize_struct("Lecture", if human { 4 } else { 3 })?;
        if human {
            st.serialize_field("startTime", &self.span.start_time())?;
            st.serialize_field("endTime", &self.span.end_time())?;
        } else {
            st.serialize_field("span", &self.span)?;
        }
        st.serialize_field("course", &self.course)?;
        st.serialize_field("faculty", &self.faculty)?;
        st.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableEntry {
    pub weekday: Weekday,
    pub lectures: Vec<Lecture>,
}

/// Name and email as they were when a booking was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requester {
    pub id: Ulid,
    pub name: String,
    pub email: String,
}

/// Serialized like [`Lecture`]: clock times in JSON, the span in the WAL.
/// Field order is shared by both forms.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub user_name: String,
    pub user_email: String,
    pub date: NaiveDate,
    pub span: Span,
    pub purpose: String,
    pub status: BookingStatus,
    pub created_at: NaiveDateTime,
}

impl Serialize for Booking {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let human = serializer.is_human_readable();
        let mut st = serializer.serialize_struct("Booking", if human { 11 } else { 10 })?;
        st.serialize_field("id", &self.id)?;
        st.serialize_field("roomId", &self.room_id)?;
        st.serialize_field("userId", &self.user_id)?;
        st.serialize_field("userName", &self.user_name)?;
        st.serialize_field("userEmail", &self.user_email)?;
        st.serialize_field("date", &self.date)?;
        if human {
            st.serialize_field("startTime", &self.start_time())?;
            st.serialize_field("endTime", &self.end_time())?;
        } else {
            st.serialize_field("span", &self.span)?;
        }
        st.serialize_field("purpose", &self.purpose)?;
        st.serialize_field("status", &self.status)?;
        st.serialize_field("createdAt", &self.created_at)?;
        st.end()
    }
}

impl Booking {
    pub fn start_time(&self) -> String {
        self.span.start_time()
    }

    pub fn end_time(&self) -> String {
        self.span.end_time()
    }

    /// The unique-index key claimed while this booking is active.
    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            room_id: self.room_id,
            date: self.date,
            span: self.span,
        }
    }

    /// Elapsed: the date is past, or it is today and the end time has passed.
    pub fn has_elapsed(&self, now: NaiveDateTime) -> bool {
        let today = now.date();
        let minute = crate::clock::minute_of(now);
        self.date < today || (self.date == today && self.span.end <= minute)
    }
}

/// Storage-level uniqueness key for active bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub room_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceRequest {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub description: String,
    pub image: Option<String>,
    pub status: MaintenanceStatus,
    pub created_at: NaiveDateTime,
}

// ── Per-room state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// One entry per weekday; lectures sorted by start.
    pub timetable: BTreeMap<Weekday, Vec<Lecture>>,
    /// All bookings for this room in creation order.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            timetable: BTreeMap::new(),
            bookings: Vec::new(),
        }
    }

    pub fn lectures_on(&self, weekday: Weekday) -> &[Lecture] {
        self.timetable.get(&weekday).map_or(&[], Vec::as_slice)
    }

    /// Active bookings on `date`.
    pub fn active_on(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        self.bookings
            .iter()
            .filter(move |b| b.date == date && b.status.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.bookings.iter().filter(|b| b.status.is_active()).count()
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn replace_timetable(&mut self, entries: &[TimetableEntry]) {
        self.timetable.clear();
        for entry in entries {
            let mut lectures = entry.lectures.clone();
            lectures.sort_by_key(|l| l.span.start);
            self.timetable.insert(entry.weekday, lectures);
        }
    }

    pub fn timetable_entries(&self) -> Vec<TimetableEntry> {
        self.timetable
            .iter()
            .map(|(weekday, lectures)| TimetableEntry {
                weekday: *weekday,
                lectures: lectures.clone(),
            })
            .collect()
    }
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomStatusChanged {
        id: Ulid,
        status: RoomStatus,
    },
    RoomDeleted {
        id: Ulid,
    },
    TimetableReplaced {
        room_id: Ulid,
        entries: Vec<TimetableEntry>,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: BookingStatus,
    },
    MaintenanceSubmitted {
        request: MaintenanceRequest,
    },
    MaintenanceStatusChanged {
        id: Ulid,
        status: MaintenanceStatus,
    },
}

// ── Inputs ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct NewRoom {
    pub name: String,
    pub building: String,
    pub department: String,
    pub capacity: u32,
    pub kind: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RoomFilter {
    pub building: Option<String>,
    pub department: Option<String>,
    pub min_capacity: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub room_id: Ulid,
    pub requester: Requester,
    /// `YYYY-MM-DD`
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub purpose: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BookingFilter {
    #[default]
    Upcoming,
    History,
    All,
}

impl BookingFilter {
    pub fn matches(&self, status: BookingStatus) -> bool {
        match self {
            BookingFilter::Upcoming => status.is_active(),
            BookingFilter::History => status.is_terminal(),
            BookingFilter::All => true,
        }
    }
}

impl FromStr for BookingFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upcoming" => Ok(BookingFilter::Upcoming),
            "history" => Ok(BookingFilter::History),
            "all" => Ok(BookingFilter::All),
            _ => Err(format!("unknown booking filter: {s}")),
        }
    }
}

/// A parsed spreadsheet row: column header → cell.
pub type TimetableRow = std::collections::HashMap<String, CellValue>;

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub start: String,
    pub end: String,
}

impl From<Span> for Slot {
    fn from(span: Span) -> Self {
        Self {
            start: span.start_time(),
            end: span.end_time(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub room: String,
    pub date: NaiveDate,
    pub available_slots: Vec<Slot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomTimetable {
    pub room_name: String,
    pub building: String,
    pub department: String,
    pub timetable: Vec<TimetableEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub day: Weekday,
    pub lectures: Vec<Lecture>,
    pub bookings: Vec<Booking>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCalendar {
    pub room: String,
    pub building: String,
    pub department: String,
    pub calendar: Vec<CalendarDay>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    /// 1-based row number in the upload.
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub rows_processed: usize,
    pub rooms_affected: Vec<Ulid>,
    pub rooms_created: usize,
}

/// Approved-booking count for one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomBookingCount {
    pub room_id: Ulid,
    pub name: String,
    pub building: String,
    pub department: String,
    pub total_bookings: usize,
}

/// Maintenance requests filed in one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyMaintenance {
    pub year: i32,
    pub month: u32,
    pub total_requests: usize,
}
