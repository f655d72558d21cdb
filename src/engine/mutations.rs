use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::mailer::{new_booking_mail, status_mail};
use crate::model::*;
use crate::notify::ChangeEvent;
use crate::observability::*;

use super::conflict::{check_no_conflict, conflict_reason, parse_slot, validate_text};
use super::{Engine, EngineError};

fn optional_text(value: Option<String>, field: &'static str) -> Result<Option<String>, EngineError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.len() > MAX_NAME_LEN => Err(EngineError::LimitExceeded(field)),
        Some(v) => Ok(Some(v.to_string())),
    }
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(&self, new: NewRoom) -> Result<Room, EngineError> {
        let name = validate_text(&new.name, "name", MAX_NAME_LEN)?;
        let building = validate_text(&new.building, "building", MAX_NAME_LEN)?;
        let department = validate_text(&new.department, "department", MAX_NAME_LEN)?;
        let kind = optional_text(new.kind, "type")?;
        let location = optional_text(new.location, "location")?;

        let _registry = self.registry.lock().await;
        if self.store.room_count() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let room = Room {
            id: Ulid::new(),
            name,
            building,
            department,
            capacity: new.capacity,
            status: RoomStatus::Available,
            kind,
            location,
            created_at: self.clock.now(),
        };
        let key = room.key();
        if !self.store.reserve_key(key.clone(), room.id) {
            return Err(EngineError::DuplicateRoom(room.name));
        }

        let event = Event::RoomCreated { room: room.clone() };
        if let Err(e) = self.wal_append(&event).await {
            self.store.release_key(&key, room.id);
            return Err(e);
        }
        self.store.insert_room(room.clone());
        info!(room_id = %room.id, name = %room.name, building = %room.building, "room created");
        Ok(room)
    }

    /// Admin override. After any non-maintenance status the derived
    /// occupancy is re-applied, so only maintenance sticks.
    pub async fn set_room_status(&self, id: Ulid, status: RoomStatus) -> Result<Room, EngineError> {
        if status == RoomStatus::Booked {
            return Err(EngineError::Validation("Room status 'booked' cannot be set".into()));
        }
        let rs = self.room_state(&id)?;
        let mut guard = rs.write().await;
        if !self.store.contains_room(&id) {
            return Err(EngineError::NotFound("room", id));
        }

        if guard.room.status != status {
            let event = Event::RoomStatusChanged { id, status };
            self.persist_and_apply(&mut guard, &event).await?;
            info!(room_id = %id, %status, "room status set");
            self.publish(ChangeEvent::RoomStatus { room_id: id, status });
        }
        if status != RoomStatus::Maintenance {
            self.sync_locked(&mut guard).await;
        }
        Ok(guard.room.clone())
    }

    /// Remove a room and its timetable. Terminal bookings are kept as history.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;
        let rs = self.room_state(&id)?;
        let guard = rs.write().await;

        let active = guard.active_count();
        if active > 0 {
            return Err(EngineError::HasActiveBookings { room_id: id, active });
        }

        self.wal_append(&Event::RoomDeleted { id }).await?;
        self.store
            .retire_room(guard.room.clone(), guard.bookings.clone());
        info!(room_id = %id, name = %guard.room.name, "room deleted");
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn create_booking(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        let started = Instant::now();
        self.sweep_expired().await;

        // Unknown rooms are reported before any field errors.
        let rs = self.room_state(&req.room_id)?;
        let purpose = validate_text(&req.purpose, "purpose", MAX_PURPOSE_LEN)?;
        let user_name = validate_text(&req.requester.name, "user name", MAX_NAME_LEN)?;
        let user_email = validate_text(&req.requester.email, "user email", MAX_NAME_LEN)?;
        let slot = parse_slot(&req.date, &req.start_time, &req.end_time)?;

        let mut guard = rs.write().await;
        if !self.store.contains_room(&req.room_id) {
            return Err(EngineError::NotFound("room", req.room_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings for room"));
        }

        if let Err(e) = check_no_conflict(&guard, &slot) {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL, "reason" => conflict_reason(&e)).increment(1);
            debug!(room_id = %req.room_id, date = %slot.date, span = %slot.span, "booking rejected: {e}");
            return Err(e);
        }

        let booking = Booking {
            id: Ulid::new(),
            room_id: req.room_id,
            user_id: req.requester.id,
            user_name,
            user_email,
            date: slot.date,
            span: slot.span,
            purpose,
            status: BookingStatus::Pending,
            created_at: self.clock.now(),
        };

        // Storage backstop behind the overlap check.
        if self.store.claim_slot(booking.slot_key(), booking.id).is_err() {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL, "reason" => "slot_index").increment(1);
            return Err(EngineError::BookingClash(booking.span));
        }
        let event = Event::BookingCreated { booking: booking.clone() };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.store.release_slot(&booking.slot_key(), booking.id);
            return Err(e);
        }

        self.sync_locked(&mut guard).await;
        let room_name = guard.room.name.clone();
        drop(guard);

        info!(
            booking_id = %booking.id,
            room_id = %booking.room_id,
            date = %booking.date,
            span = %booking.span,
            "booking created"
        );
        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => "create_booking")
            .record(started.elapsed().as_secs_f64());
        self.publish(ChangeEvent::BookingCreated { booking_id: booking.id });

        match &self.settings.admin_email {
            Some(admin) => self.send_mail(new_booking_mail(admin, &room_name, &booking)),
            None => debug!(booking_id = %booking.id, "no admin email configured, skipping notification"),
        }
        Ok(booking)
    }

    /// Admin decision on a booking. Only Approved and Declined are accepted.
    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        if !matches!(status, BookingStatus::Approved | BookingStatus::Declined) {
            return Err(EngineError::Validation(format!("Invalid status: {status}")));
        }
        self.sweep_expired().await;

        let room_id = self
            .store
            .room_for_booking(&id)
            .ok_or(EngineError::NotFound("booking", id))?;

        let Some(rs) = self.store.get_room(&room_id) else {
            // Room deleted; its bookings are all terminal.
            let booking = self
                .store
                .retired_booking(&room_id, &id)
                .ok_or(EngineError::NotFound("booking", id))?;
            return match booking.status.transition(status) {
                Transition::Unchanged => Ok(booking),
                _ => Err(EngineError::InvalidTransition {
                    from: booking.status.to_string(),
                    to: status.to_string(),
                }),
            };
        };

        let mut guard = rs.write().await;
        let current = guard
            .booking(id)
            .ok_or(EngineError::NotFound("booking", id))?
            .status;

        match current.transition(status) {
            Transition::Unchanged => {
                debug!(booking_id = %id, %status, "status unchanged");
                return guard
                    .booking(id)
                    .cloned()
                    .ok_or(EngineError::NotFound("booking", id));
            }
            Transition::Denied => {
                return Err(EngineError::InvalidTransition {
                    from: current.to_string(),
                    to: status.to_string(),
                });
            }
            Transition::Allowed => {}
        }

        let event = Event::BookingStatusChanged { id, room_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        self.sync_locked(&mut guard).await;

        let booking = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))?;
        let room_name = guard.room.name.clone();
        drop(guard);

        info!(booking_id = %id, from = %current, to = %status, "booking status changed");
        metrics::counter!(BOOKING_TRANSITIONS_TOTAL, "to" => status.to_string()).increment(1);
        self.publish(ChangeEvent::BookingStatus { booking_id: id, status });
        self.send_mail(status_mail(&room_name, &booking));
        Ok(booking)
    }
}
