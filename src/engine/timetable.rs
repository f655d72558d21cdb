use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_UPLOAD_ROWS;
use crate::model::*;
use crate::notify::ChangeEvent;
use crate::observability::{OPERATION_DURATION_SECONDS, TIMETABLE_UPLOADS_TOTAL};
use crate::time::cell_to_minutes;

use super::{Engine, EngineError};

// Header aliases, compared after `normalize_header`. Earlier aliases win.
const DAY: &[&str] = &["day", "weekday"];
const START: &[&str] = &["starttime", "start"];
const END: &[&str] = &["endtime", "end"];
const COURSE: &[&str] = &["subject", "course"];
const FACULTY: &[&str] = &["faculty"];
const ROOM: &[&str] = &["room", "roomname", "name"];
const BUILDING: &[&str] = &["building"];
const DEPARTMENT: &[&str] = &["department"];
const CAPACITY: &[&str] = &["capacity"];

const UNASSIGNED: &str = "Unassigned";

/// Case, spaces, underscores and dashes are not significant in headers.
fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|&c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

fn field<'a>(row: &'a TimetableRow, aliases: &[&str]) -> Option<&'a CellValue> {
    aliases.iter().find_map(|alias| {
        row.iter()
            .find(|(header, cell)| {
                normalize_header(header) == *alias && cell.as_text().is_some()
            })
            .map(|(_, cell)| cell)
    })
}

fn text_field(row: &TimetableRow, aliases: &[&str]) -> Option<String> {
    field(row, aliases).and_then(CellValue::as_text)
}

/// Which room a bulk-upload row belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomIdentity {
    pub name: String,
    pub building: String,
    pub department: String,
    pub capacity: Option<u32>,
}

impl RoomIdentity {
    fn key(&self) -> RoomKey {
        RoomKey::new(&self.name, &self.building, &self.department)
    }
}

/// A validated timetable row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    /// 1-based position in the upload.
    pub row: usize,
    pub weekday: Weekday,
    pub lecture: Lecture,
    pub room: Option<RoomIdentity>,
}

fn parse_row(row_no: usize, row: &TimetableRow) -> Result<ParsedRow, RowError> {
    let err = |message: String| RowError {
        row: row_no,
        message: format!("Row {row_no}: {message}"),
    };

    let (Some(day), Some(start), Some(end), Some(course)) = (
        text_field(row, DAY),
        field(row, START),
        field(row, END),
        text_field(row, COURSE),
    ) else {
        return Err(err("Missing required fields".into()));
    };

    let weekday: Weekday = day
        .parse()
        .map_err(|_| err(format!("Invalid day '{day}'")))?;
    let (Some(start), Some(end)) = (cell_to_minutes(start), cell_to_minutes(end)) else {
        return Err(err("Invalid time".into()));
    };
    let span = Span::try_new(start, end)
        .ok_or_else(|| err("Start time must be before end time".into()))?;

    let room = text_field(row, ROOM).map(|name| RoomIdentity {
        name,
        building: text_field(row, BUILDING).unwrap_or_else(|| UNASSIGNED.into()),
        department: text_field(row, DEPARTMENT).unwrap_or_else(|| UNASSIGNED.into()),
        capacity: text_field(row, CAPACITY).and_then(|c| c.parse().ok()),
    });

    Ok(ParsedRow {
        row: row_no,
        weekday,
        lecture: Lecture {
            span,
            course,
            faculty: text_field(row, FACULTY),
        },
        room,
    })
}

/// Parse and validate every row, collecting all row errors.
pub fn parse_rows(rows: &[TimetableRow]) -> Result<Vec<ParsedRow>, Vec<RowError>> {
    let mut parsed = Vec::with_capacity(rows.len());
    let mut errors = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        match parse_row(i + 1, row) {
            Ok(p) => parsed.push(p),
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() { Ok(parsed) } else { Err(errors) }
}

/// Group one room's rows by weekday, rejecting lectures that overlap an
/// earlier lecture of the same day.
fn group_lectures(rows: &[&ParsedRow]) -> Result<Vec<TimetableEntry>, Vec<RowError>> {
    let mut days: BTreeMap<Weekday, Vec<Lecture>> = BTreeMap::new();
    let mut errors = Vec::new();
    for row in rows {
        let lectures = days.entry(row.weekday).or_default();
        if lectures.iter().any(|l| l.span.overlaps(&row.lecture.span)) {
            errors.push(RowError {
                row: row.row,
                message: format!(
                    "Row {}: Overlaps with another lecture on {}",
                    row.row, row.weekday
                ),
            });
            continue;
        }
        lectures.push(row.lecture.clone());
    }
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(days
        .into_iter()
        .map(|(weekday, mut lectures)| {
            lectures.sort_by_key(|l| l.span.start);
            TimetableEntry { weekday, lectures }
        })
        .collect())
}

fn check_size(rows: &[TimetableRow]) -> Result<(), EngineError> {
    if rows.is_empty() {
        return Err(EngineError::Validation("No timetable rows provided".into()));
    }
    if rows.len() > MAX_UPLOAD_ROWS {
        return Err(EngineError::LimitExceeded("too many timetable rows"));
    }
    Ok(())
}

fn source_stem(source_name: &str) -> String {
    Path::new(source_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Uploaded Timetable")
        .to_string()
}

impl Engine {
    /// Replace every timetable entry of one room with the uploaded rows.
    pub async fn replace_timetable(
        &self,
        room_id: Ulid,
        rows: &[TimetableRow],
    ) -> Result<UploadSummary, EngineError> {
        let started = Instant::now();
        check_size(rows)?;
        let parsed = parse_rows(rows).map_err(EngineError::InvalidUpload)?;
        let refs: Vec<&ParsedRow> = parsed.iter().collect();
        let entries = group_lectures(&refs).map_err(EngineError::InvalidUpload)?;

        self.write_timetable(room_id, entries).await?;

        metrics::counter!(TIMETABLE_UPLOADS_TOTAL).increment(1);
        metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => "replace_timetable")
            .record(started.elapsed().as_secs_f64());
        self.publish(ChangeEvent::TimetableUpdated { rooms_processed: 1 });
        Ok(UploadSummary {
            rows_processed: rows.len(),
            rooms_affected: vec![room_id],
            rooms_created: 0,
        })
    }

    /// Bulk upload: rows name their room, or fall back to a room named after
    /// the upload source. All groups validate before any room is touched.
    pub async fn upload_timetables(
        &self,
        source_name: &str,
        rows: &[TimetableRow],
    ) -> Result<UploadSummary, EngineError> {
        let started = Instant::now();
        check_size(rows)?;
        let parsed = parse_rows(rows).map_err(EngineError::InvalidUpload)?;

        let fallback = RoomIdentity {
            name: source_stem(source_name),
            building: UNASSIGNED.into(),
            department: UNASSIGNED.into(),
            capacity: None,
        };
        // Groups keep first-seen order.
        let mut groups: Vec<(RoomIdentity, Vec<&ParsedRow>)> = Vec::new();
        for row in &parsed {
            let identity = row.room.as_ref().unwrap_or(&fallback);
            let key = identity.key();
            match groups.iter_mut().find(|(id, _)| id.key() == key) {
                Some((_, members)) => members.push(row),
                None => groups.push((identity.clone(), vec![row])),
            }
        }

        let mut errors = Vec::new();
        let mut plans = Vec::with_capacity(groups.len());
        for (identity, members) in groups {
            match group_lectures(&members) {
                Ok(entries) => plans.push((identity, entries)),
                Err(mut e) => errors.append(&mut e),
            }
        }
        if !errors.is_empty() {
            errors.sort_by_key(|e| e.row);
            return Err(EngineError::InvalidUpload(errors));
        }

        let mut rooms_affected = Vec::with_capacity(plans.len());
        let mut rooms_created = 0;
        for (identity, entries) in plans {
            let (room_id, created) = self.resolve_room(&identity).await?;
            if created {
                rooms_created += 1;
            }
            self.write_timetable(room_id, entries).await?;
            rooms_affected.push(room_id);
        }

        metrics::counter!(TIMETABLE_UPLOADS_TOTAL).increment(1);
        metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => "upload_timetables")
            .record(started.elapsed().as_secs_f64());
        info!(
            source = source_name,
            rooms = rooms_affected.len(),
            rooms_created,
            "timetable upload applied"
        );
        self.publish(ChangeEvent::TimetableUpdated {
            rooms_processed: rooms_affected.len(),
        });
        Ok(UploadSummary {
            rows_processed: rows.len(),
            rooms_affected,
            rooms_created,
        })
    }

    /// Existing room with this identity, or a newly created one.
    async fn resolve_room(&self, identity: &RoomIdentity) -> Result<(Ulid, bool), EngineError> {
        if let Some(id) = self.store.room_by_key(&identity.key()) {
            return Ok((id, false));
        }
        let new = NewRoom {
            name: identity.name.clone(),
            building: identity.building.clone(),
            department: identity.department.clone(),
            capacity: identity.capacity.unwrap_or(0),
            kind: None,
            location: None,
        };
        match self.create_room(new).await {
            Ok(room) => Ok((room.id, true)),
            // Lost a race with a concurrent create.
            Err(EngineError::DuplicateRoom(_)) => self
                .store
                .room_by_key(&identity.key())
                .map(|id| (id, false))
                .ok_or_else(|| EngineError::DuplicateRoom(identity.name.clone())),
            Err(e) => Err(e),
        }
    }

    async fn write_timetable(
        &self,
        room_id: Ulid,
        entries: Vec<TimetableEntry>,
    ) -> Result<(), EngineError> {
        let rs = self.room_state(&room_id)?;
        let mut guard = rs.write().await;
        if !self.store.contains_room(&room_id) {
            return Err(EngineError::NotFound("room", room_id));
        }
        let days = entries.len();
        let event = Event::TimetableReplaced { room_id, entries };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%room_id, days, "timetable replaced");
        Ok(())
    }
}
