use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::notify::ChangeEvent;
use crate::observability::ROOM_SYNCS_TOTAL;

use super::Engine;

/// Status a room should have given its bookings, or `None` when the
/// current status must be left alone.
pub(crate) fn derived_status(rs: &RoomState) -> Option<RoomStatus> {
    if rs.room.status == RoomStatus::Maintenance {
        return None;
    }
    let desired = if rs.active_count() > 0 {
        RoomStatus::Unavailable
    } else {
        RoomStatus::Available
    };
    (desired != rs.room.status).then_some(desired)
}

impl Engine {
    /// Re-derive room status from its active bookings. Failures are logged
    /// and swallowed; the caller's operation has already succeeded.
    pub async fn sync_room(&self, room_id: Ulid) {
        let Some(rs) = self.store.get_room(&room_id) else {
            debug!(%room_id, "occupancy sync skipped: room no longer exists");
            return;
        };
        let mut guard = rs.write().await;
        self.sync_locked(&mut guard).await;
    }

    /// Same as `sync_room` for a room whose write lock is already held.
    pub(super) async fn sync_locked(&self, rs: &mut RoomState) {
        let Some(status) = derived_status(rs) else {
            return;
        };
        let room_id = rs.room.id;
        let event = Event::RoomStatusChanged { id: room_id, status };
        match self.persist_and_apply(rs, &event).await {
            Ok(()) => {
                metrics::counter!(ROOM_SYNCS_TOTAL, "status" => status.to_string()).increment(1);
                info!(%room_id, %status, "room status synced");
                self.publish(ChangeEvent::RoomStatus { room_id, status });
            }
            Err(e) => warn!(%room_id, "room status sync failed: {e}"),
        }
    }
}
