use serde_json::{json, Value};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{BookingStatus, RoomStatus};

const CHANNEL_CAPACITY: usize = 256;

pub const BOOKING_CHANNEL: &str = "booking:update";
pub const ROOM_CHANNEL: &str = "room:update";
pub const TIMETABLE_CHANNEL: &str = "timetable:update";

/// Domain change emitted after a state change has been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    BookingCreated { booking_id: Ulid },
    BookingStatus { booking_id: Ulid, status: BookingStatus },
    RoomStatus { room_id: Ulid, status: RoomStatus },
    TimetableUpdated { rooms_processed: usize },
}

impl ChangeEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            ChangeEvent::BookingCreated { .. } | ChangeEvent::BookingStatus { .. } => {
                BOOKING_CHANNEL
            }
            ChangeEvent::RoomStatus { .. } => ROOM_CHANNEL,
            ChangeEvent::TimetableUpdated { .. } => TIMETABLE_CHANNEL,
        }
    }

    /// JSON body as delivered to clients.
    pub fn payload(&self) -> Value {
        match self {
            ChangeEvent::BookingCreated { booking_id } => json!({
                "type": "created",
                "bookingId": booking_id.to_string(),
            }),
            ChangeEvent::BookingStatus { booking_id, status } => json!({
                "type": "status",
                "bookingId": booking_id.to_string(),
                "status": status.to_string(),
            }),
            ChangeEvent::RoomStatus { room_id, status } => json!({
                "roomId": room_id.to_string(),
                "status": status.to_string(),
            }),
            ChangeEvent::TimetableUpdated { rooms_processed } => json!({
                "roomsProcessed": rooms_processed,
            }),
        }
    }
}

/// Sink for change events. Must not block and cannot fail.
pub trait Publisher: Send + Sync {
    fn publish(&self, event: ChangeEvent);
}

/// Broadcast hub fanning change events out to in-process subscribers.
pub struct NotifyHub {
    sender: broadcast::Sender<ChangeEvent>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for NotifyHub {
    /// No-op if nobody is listening.
    fn publish(&self, event: ChangeEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe();

        let event = ChangeEvent::BookingCreated {
            booking_id: Ulid::new(),
        };
        hub.publish(event.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.publish(ChangeEvent::TimetableUpdated { rooms_processed: 1 });
    }

    #[test]
    fn payload_shapes() {
        let id = Ulid::new();
        let created = ChangeEvent::BookingCreated { booking_id: id };
        assert_eq!(created.channel(), "booking:update");
        assert_eq!(created.payload()["type"], "created");
        assert_eq!(created.payload()["bookingId"], id.to_string());
        assert!(created.payload().get("status").is_none());

        let status = ChangeEvent::BookingStatus {
            booking_id: id,
            status: BookingStatus::Approved,
        };
        assert_eq!(status.payload()["status"], "Approved");

        let room = ChangeEvent::RoomStatus {
            room_id: id,
            status: RoomStatus::Unavailable,
        };
        assert_eq!(room.channel(), "room:update");
        assert_eq!(room.payload()["status"], "unavailable");

        let tt = ChangeEvent::TimetableUpdated { rooms_processed: 3 };
        assert_eq!(tt.channel(), "timetable:update");
        assert_eq!(tt.payload()["roomsProcessed"], 3);
    }
}
