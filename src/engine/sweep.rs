use tracing::{info, warn};

use crate::model::*;
use crate::notify::ChangeEvent;
use crate::observability::SWEEP_COMPLETED_TOTAL;

use super::Engine;

impl Engine {
    /// Move every elapsed active booking to Completed. Idempotent; returns
    /// the number of bookings completed by this call.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut completed = 0;

        for room_id in self.store.room_ids() {
            let Some(rs) = self.store.get_room(&room_id) else {
                continue;
            };
            // Cheap check under the read lock before contending for the write lock.
            if !rs
                .read()
                .await
                .bookings
                .iter()
                .any(|b| b.status.is_active() && b.has_elapsed(now))
            {
                continue;
            }

            let mut guard = rs.write().await;
            let elapsed: Vec<_> = guard
                .bookings
                .iter()
                .filter(|b| b.status.is_active() && b.has_elapsed(now))
                .map(|b| b.id)
                .collect();

            let mut touched = false;
            for id in elapsed {
                let event = Event::BookingStatusChanged {
                    id,
                    room_id,
                    status: BookingStatus::Completed,
                };
                match self.persist_and_apply(&mut guard, &event).await {
                    Ok(()) => {
                        completed += 1;
                        touched = true;
                        self.publish(ChangeEvent::BookingStatus {
                            booking_id: id,
                            status: BookingStatus::Completed,
                        });
                    }
                    Err(e) => warn!(booking_id = %id, "sweep could not complete booking: {e}"),
                }
            }
            if touched {
                self.sync_locked(&mut guard).await;
            }
        }

        if completed > 0 {
            metrics::counter!(SWEEP_COMPLETED_TOTAL).increment(completed as u64);
            info!(completed, "swept elapsed bookings");
        }
        completed
    }
}
