use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedRoomState;

/// A deleted room kept only for the history of its terminal bookings.
#[derive(Debug, Clone)]
pub struct RetiredRoom {
    pub room: Room,
    pub bookings: Vec<Booking>,
}

/// In-memory state plus the secondary indexes the engine keeps consistent
/// with it. Per-room data lives behind each room's own lock; indexes are
/// lock-free maps.
pub struct Store {
    rooms: DashMap<Ulid, SharedRoomState>,
    room_keys: DashMap<RoomKey, Ulid>,
    booking_to_room: DashMap<Ulid, Ulid>,
    user_bookings: DashMap<Ulid, Vec<Ulid>>,
    /// Unique index over active bookings.
    active_slots: DashMap<SlotKey, Ulid>,
    retired: DashMap<Ulid, RetiredRoom>,
    maintenance: RwLock<Vec<MaintenanceRequest>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            room_keys: DashMap::new(),
            booking_to_room: DashMap::new(),
            user_bookings: DashMap::new(),
            active_slots: DashMap::new(),
            retired: DashMap::new(),
            maintenance: RwLock::new(Vec::new()),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains_room(&self, id: &Ulid) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_ids(&self) -> Vec<Ulid> {
        self.rooms.iter().map(|e| *e.key()).collect()
    }

    pub fn room_by_key(&self, key: &RoomKey) -> Option<Ulid> {
        self.room_keys.get(key).map(|e| *e.value())
    }

    /// Reserve a room identity. Returns false if another room holds it.
    pub fn reserve_key(&self, key: RoomKey, id: Ulid) -> bool {
        match self.room_keys.entry(key) {
            Entry::Occupied(e) => *e.get() == id,
            Entry::Vacant(e) => {
                e.insert(id);
                true
            }
        }
    }

    pub fn release_key(&self, key: &RoomKey, id: Ulid) {
        self.room_keys.remove_if(key, |_, owner| *owner == id);
    }

    pub fn insert_room(&self, room: Room) {
        let id = room.id;
        self.room_keys.insert(room.key(), id);
        self.rooms
            .insert(id, Arc::new(RwLock::new(RoomState::new(room))));
    }

    /// Drop a room from the live set, keeping its bookings as history.
    pub fn retire_room(&self, room: Room, bookings: Vec<Booking>) {
        let id = room.id;
        self.release_key(&room.key(), id);
        self.rooms.remove(&id);
        for b in bookings.iter().filter(|b| b.status.is_active()) {
            self.release_slot(&b.slot_key(), b.id);
        }
        self.retired.insert(id, RetiredRoom { room, bookings });
    }

    pub fn retired_rooms(&self) -> Vec<RetiredRoom> {
        self.retired.iter().map(|e| e.value().clone()).collect()
    }

    // ── Booking indexes ──────────────────────────────────────

    pub fn index_booking(&self, booking: &Booking) {
        self.booking_to_room.insert(booking.id, booking.room_id);
        let mut ids = self.user_bookings.entry(booking.user_id).or_default();
        if !ids.contains(&booking.id) {
            ids.push(booking.id);
        }
    }

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// Booking ids of one user in creation order.
    pub fn bookings_of_user(&self, user_id: &Ulid) -> Vec<Ulid> {
        self.user_bookings
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn retired_booking(&self, room_id: &Ulid, booking_id: &Ulid) -> Option<Booking> {
        self.retired.get(room_id).and_then(|r| {
            r.bookings.iter().find(|b| b.id == *booking_id).cloned()
        })
    }

    /// Claim an active slot. Succeeds when the key is free or already ours.
    pub fn claim_slot(&self, key: SlotKey, booking_id: Ulid) -> Result<(), Ulid> {
        match self.active_slots.entry(key) {
            Entry::Occupied(e) if *e.get() != booking_id => Err(*e.get()),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(e) => {
                e.insert(booking_id);
                Ok(())
            }
        }
    }

    pub fn release_slot(&self, key: &SlotKey, booking_id: Ulid) {
        self.active_slots.remove_if(key, |_, owner| *owner == booking_id);
    }

    pub fn active_slot_count(&self) -> usize {
        self.active_slots.len()
    }

    // ── Maintenance ──────────────────────────────────────────

    pub fn maintenance(&self) -> &RwLock<Vec<MaintenanceRequest>> {
        &self.maintenance
    }
}
