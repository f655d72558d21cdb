use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::observability::WAL_COMPACTIONS_TOTAL;

/// Periodically complete elapsed bookings, independent of request traffic.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let completed = engine.sweep_expired().await;
        debug!(completed, "background sweep");
    }
}

/// Compact the WAL whenever enough appends have piled up since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_due(
    engine: &Engine,
    threshold: u64,
) -> Result<bool, crate::engine::EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
    info!(appends, "compacted WAL");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::{Collaborators, EngineSettings};
    use crate::model::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn engine(path: PathBuf, clock: Arc<ManualClock>) -> Arc<Engine> {
        let collaborators = Collaborators {
            clock,
            ..Collaborators::default()
        };
        Arc::new(Engine::new(path, EngineSettings::default(), collaborators).unwrap())
    }

    async fn lab(engine: &Engine) -> Room {
        engine
            .create_room(NewRoom {
                name: "Lab 101".into(),
                building: "Science".into(),
                department: "CS".into(),
                capacity: 30,
                ..NewRoom::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sweeper_completes_elapsed_bookings() {
        let clock = Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2026, 10, 19).unwrap().and_hms_opt(8, 0, 0).unwrap(),
        ));
        let engine = engine(test_wal_path("sweeper.wal"), clock.clone());
        let room = lab(&engine).await;
        let booking = engine
            .create_booking(BookingRequest {
                room_id: room.id,
                requester: Requester {
                    id: Ulid::new(),
                    name: "Ada".into(),
                    email: "ada@uni.edu".into(),
                },
                date: "2026-10-19".into(),
                start_time: "10:00".into(),
                end_time: "11:00".into(),
                purpose: "study group".into(),
            })
            .await
            .unwrap();

        clock.set(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap().and_hms_opt(11, 0, 0).unwrap());
        let handle = tokio::spawn(run_sweeper(engine.clone(), Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        let stored = engine.get_booking(booking.id).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Completed);
        assert_eq!(engine.get_room(room.id).await.unwrap().status, RoomStatus::Available);
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let clock = Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2026, 10, 19).unwrap().and_hms_opt(8, 0, 0).unwrap(),
        ));
        let engine = engine(test_wal_path("compactor.wal"), clock);
        lab(&engine).await;

        assert!(!compact_if_due(&engine, 5).await.unwrap());
        assert!(compact_if_due(&engine, 1).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
