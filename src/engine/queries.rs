use std::collections::HashMap;
use std::time::Instant;

use chrono::{Datelike, Duration};
use ulid::Ulid;

use crate::model::*;
use crate::observability::OPERATION_DURATION_SECONDS;
use crate::time::parse_date;

use super::availability::free_slots;
use super::conflict::{check_no_conflict, parse_slot};
use super::{Engine, EngineError};

/// Read-time dedup key for `list_all`.
#[derive(PartialEq, Eq, Hash)]
struct DedupKey {
    room_id: Ulid,
    date: chrono::NaiveDate,
    span: Span,
    purpose: String,
    email: String,
}

impl DedupKey {
    fn of(b: &Booking) -> Self {
        Self {
            room_id: b.room_id,
            date: b.date,
            span: b.span,
            purpose: b.purpose.trim().to_lowercase(),
            email: b.user_email.trim().to_lowercase(),
        }
    }
}

fn matches_ci(value: &str, wanted: &Option<String>) -> bool {
    match wanted.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(w) => value.trim().eq_ignore_ascii_case(w),
    }
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    pub async fn get_room(&self, id: Ulid) -> Result<Room, EngineError> {
        let rs = self.room_state(&id)?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    /// Rooms matching every given filter, ordered by building then name.
    pub async fn list_rooms(&self, filter: &RoomFilter) -> Vec<Room> {
        let mut rooms = Vec::new();
        for id in self.store.room_ids() {
            let Some(rs) = self.store.get_room(&id) else {
                continue;
            };
            let room = rs.read().await.room.clone();
            if matches_ci(&room.building, &filter.building)
                && matches_ci(&room.department, &filter.department)
                && filter.min_capacity.is_none_or(|min| room.capacity >= min)
            {
                rooms.push(room);
            }
        }
        rooms.sort_by(|a, b| {
            (a.building.to_lowercase(), a.name.to_lowercase())
                .cmp(&(b.building.to_lowercase(), b.name.to_lowercase()))
        });
        rooms
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let room_id = self
            .store
            .room_for_booking(&id)
            .ok_or(EngineError::NotFound("booking", id))?;
        let found = match self.store.get_room(&room_id) {
            Some(rs) => rs.read().await.booking(id).cloned(),
            None => self.store.retired_booking(&room_id, &id),
        };
        found.ok_or(EngineError::NotFound("booking", id))
    }

    /// One user's bookings in creation order.
    pub async fn list_mine(&self, user_id: Ulid, filter: BookingFilter) -> Vec<Booking> {
        self.sweep_expired().await;
        let mut mine = Vec::new();
        for id in self.store.bookings_of_user(&user_id) {
            if let Ok(b) = self.get_booking(id).await
                && filter.matches(b.status)
            {
                mine.push(b);
            }
        }
        mine
    }

    /// Every booking, de-duplicated on (room, date, window, purpose, email)
    /// keeping the latest created, ordered by date then start time.
    pub async fn list_all(&self) -> Vec<Booking> {
        let started = Instant::now();
        self.sweep_expired().await;

        let mut all: Vec<Booking> = self
            .store
            .retired_rooms()
            .into_iter()
            .flat_map(|r| r.bookings)
            .collect();
        for id in self.store.room_ids() {
            if let Some(rs) = self.store.get_room(&id) {
                all.extend(rs.read().await.bookings.iter().cloned());
            }
        }

        // Per-room order is creation order, so a later entry wins ties on created_at.
        let mut latest: HashMap<DedupKey, Booking> = HashMap::new();
        for b in all {
            let key = DedupKey::of(&b);
            match latest.get(&key) {
                Some(existing) if existing.created_at > b.created_at => {}
                _ => {
                    latest.insert(key, b);
                }
            }
        }

        let mut result: Vec<Booking> = latest.into_values().collect();
        result.sort_by(|a, b| {
            (a.date, a.span.start, a.created_at, a.id).cmp(&(b.date, b.span.start, b.created_at, b.id))
        });
        metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => "list_all")
            .record(started.elapsed().as_secs_f64());
        result
    }

    // ── Availability ─────────────────────────────────────────

    /// Free windows of a room on a date.
    pub async fn availability(&self, room_id: Ulid, date: &str) -> Result<Availability, EngineError> {
        self.sweep_expired().await;
        let day = parse_date(date)
            .ok_or_else(|| EngineError::Validation(format!("Invalid date: {date:?}")))?;
        let weekday = Weekday::from_chrono(day.weekday());

        let rs = self.room_state(&room_id)?;
        let guard = rs.read().await;
        let free = free_slots(
            self.settings.working_day,
            guard.lectures_on(weekday),
            guard.active_on(day),
        );
        Ok(Availability {
            room: guard.room.name.clone(),
            date: day,
            available_slots: free.into_iter().map(Slot::from).collect(),
        })
    }

    /// Validate a prospective booking without persisting anything.
    pub async fn check_availability(
        &self,
        room_id: Ulid,
        date: &str,
        start_time: &str,
        end_time: &str,
    ) -> Result<(), EngineError> {
        self.sweep_expired().await;
        let slot = parse_slot(date, start_time, end_time)?;
        let rs = self.room_state(&room_id)?;
        let guard = rs.read().await;
        check_no_conflict(&guard, &slot)
    }

    /// Seven consecutive days from `week_start` with lectures and bookings.
    pub async fn room_calendar(
        &self,
        room_id: Ulid,
        week_start: &str,
    ) -> Result<RoomCalendar, EngineError> {
        let start = parse_date(week_start)
            .ok_or_else(|| EngineError::Validation("Invalid weekStart date".into()))?;
        let rs = self.room_state(&room_id)?;
        let guard = rs.read().await;

        let calendar = (0..7)
            .map(|offset| {
                let date = start + Duration::days(offset);
                let day = Weekday::from_chrono(date.weekday());
                CalendarDay {
                    date,
                    day,
                    lectures: guard.lectures_on(day).to_vec(),
                    bookings: guard
                        .bookings
                        .iter()
                        .filter(|b| b.date == date)
                        .cloned()
                        .collect(),
                }
            })
            .collect();

        Ok(RoomCalendar {
            room: guard.room.name.clone(),
            building: guard.room.building.clone(),
            department: guard.room.department.clone(),
            calendar,
        })
    }

    // ── Timetable ────────────────────────────────────────────

    pub async fn timetable_for_day(
        &self,
        room_id: Ulid,
        weekday: Weekday,
    ) -> Result<Vec<Lecture>, EngineError> {
        let rs = self.room_state(&room_id)?;
        let guard = rs.read().await;
        Ok(guard.lectures_on(weekday).to_vec())
    }

    pub async fn room_timetable(&self, room_id: Ulid) -> Result<RoomTimetable, EngineError> {
        let rs = self.room_state(&room_id)?;
        let guard = rs.read().await;
        Ok(RoomTimetable {
            room_name: guard.room.name.clone(),
            building: guard.room.building.clone(),
            department: guard.room.department.clone(),
            timetable: guard.timetable_entries(),
        })
    }

    // ── Analytics ────────────────────────────────────────────

    /// Live rooms ranked by approved bookings, busiest first. Rooms with
    /// none are left out.
    pub async fn most_booked_rooms(&self, limit: usize) -> Vec<RoomBookingCount> {
        let mut counts = Vec::new();
        for id in self.store.room_ids() {
            let Some(rs) = self.store.get_room(&id) else {
                continue;
            };
            let guard = rs.read().await;
            let total_bookings = guard
                .bookings
                .iter()
                .filter(|b| b.status == BookingStatus::Approved)
                .count();
            if total_bookings > 0 {
                counts.push(RoomBookingCount {
                    room_id: id,
                    name: guard.room.name.clone(),
                    building: guard.room.building.clone(),
                    department: guard.room.department.clone(),
                    total_bookings,
                });
            }
        }
        counts.sort_by(|a, b| {
            b.total_bookings
                .cmp(&a.total_bookings)
                .then_with(|| a.name.cmp(&b.name))
        });
        counts.truncate(limit);
        counts
    }

    /// Request counts per month of filing, newest month first.
    pub async fn maintenance_by_month(&self) -> Vec<MonthlyMaintenance> {
        let mut months: HashMap<(i32, u32), usize> = HashMap::new();
        for r in self.store.maintenance().read().await.iter() {
            *months
                .entry((r.created_at.year(), r.created_at.month()))
                .or_default() += 1;
        }
        let mut stats: Vec<MonthlyMaintenance> = months
            .into_iter()
            .map(|((year, month), total_requests)| MonthlyMaintenance {
                year,
                month,
                total_requests,
            })
            .collect();
        stats.sort_by(|a, b| (b.year, b.month).cmp(&(a.year, a.month)));
        stats
    }
}
