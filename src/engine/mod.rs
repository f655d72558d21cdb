mod availability;
mod conflict;
mod error;
mod maintenance;
mod mutations;
mod occupancy;
mod queries;
mod store;
mod sweep;
mod timetable;

pub use availability::{free_slots, subtract};
pub use error::EngineError;
pub use store::{RetiredRoom, Store};
pub use timetable::{parse_rows, ParsedRow, RoomIdentity};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::mailer::{LogMailer, Mail, Mailer};
use crate::model::*;
use crate::notify::{ChangeEvent, NotifyHub, Publisher};
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is queued, then does a
/// single flush+fsync for the whole batch before answering every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch = match cmd {
            WalCommand::Append { event, response } => vec![(event, response)],
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut deferred = None;

        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Commit what we have before compacting or reporting counts.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

// ── Engine ───────────────────────────────────────────────

/// Knobs the engine needs at runtime.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Envelope that availability queries start from.
    pub working_day: Span,
    /// Recipient of new-booking mail. No mail is sent when unset.
    pub admin_email: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            working_day: Span::new(8 * 60, 18 * 60),
            admin_email: None,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            working_day: config.working_day,
            admin_email: config.admin_email.clone(),
        }
    }
}

/// External collaborators the engine calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub publisher: Arc<dyn Publisher>,
    pub mailer: Arc<dyn Mailer>,
    pub clock: Arc<dyn Clock>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            publisher: Arc::new(NotifyHub::new()),
            mailer: Arc::new(LogMailer),
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct Engine {
    pub(super) store: Store,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) publisher: Arc<dyn Publisher>,
    pub(super) mailer: Arc<dyn Mailer>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) settings: EngineSettings,
    /// Serializes room creation and deletion against compaction.
    /// Always taken before any room lock.
    pub(super) registry: Mutex<()>,
}

/// Apply a room-scoped event to its state (caller holds the write lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, store: &Store) {
    match event {
        Event::RoomStatusChanged { status, .. } => rs.room.status = *status,
        Event::TimetableReplaced { entries, .. } => rs.replace_timetable(entries),
        Event::BookingCreated { booking } => {
            store.index_booking(booking);
            if booking.status.is_active() {
                // The live path claims before persisting; replay rebuilds the index here.
                let _ = store.claim_slot(booking.slot_key(), booking.id);
            }
            rs.bookings.push(booking.clone());
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(b) = rs.booking_mut(*id) {
                let was_active = b.status.is_active();
                b.status = *status;
                if was_active && !status.is_active() {
                    store.release_slot(&b.slot_key(), *id);
                }
            }
        }
        // Store-level events are handled by the callers.
        Event::RoomCreated { .. }
        | Event::RoomDeleted { .. }
        | Event::MaintenanceSubmitted { .. }
        | Event::MaintenanceStatusChanged { .. } => {}
    }
}

fn apply_to_maintenance(list: &mut Vec<MaintenanceRequest>, event: &Event) {
    match event {
        Event::MaintenanceSubmitted { request } => list.push(request.clone()),
        Event::MaintenanceStatusChanged { id, status } => {
            if let Some(r) = list.iter_mut().find(|r| r.id == *id) {
                r.status = *status;
            }
        }
        _ => {}
    }
}

/// The room an event belongs to, for room-scoped events.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomStatusChanged { id, .. } => Some(*id),
        Event::TimetableReplaced { room_id, .. } | Event::BookingStatusChanged { room_id, .. } => {
            Some(*room_id)
        }
        Event::BookingCreated { booking } => Some(booking.room_id),
        Event::RoomCreated { .. }
        | Event::RoomDeleted { .. }
        | Event::MaintenanceSubmitted { .. }
        | Event::MaintenanceStatusChanged { .. } => None,
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        settings: EngineSettings,
        collaborators: Collaborators,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Store::new(),
            wal_tx,
            publisher: collaborators.publisher,
            mailer: collaborators.mailer,
            clock: collaborators.clock,
            settings,
            registry: Mutex::new(()),
        };

        // Nothing else holds these locks yet, so try_read/try_write always succeed.
        // Never block here: this can run inside an async context.
        for event in &events {
            match event {
                Event::RoomCreated { room } => engine.store.insert_room(room.clone()),
                Event::RoomDeleted { id } => {
                    if let Some(rs) = engine.store.get_room(id) {
                        let guard = rs.try_read().expect("replay: uncontended read");
                        engine
                            .store
                            .retire_room(guard.room.clone(), guard.bookings.clone());
                    }
                }
                Event::MaintenanceSubmitted { .. } | Event::MaintenanceStatusChanged { .. } => {
                    let mut list = engine
                        .store
                        .maintenance()
                        .try_write()
                        .expect("replay: uncontended write");
                    apply_to_maintenance(&mut list, event);
                }
                other => {
                    if let Some(room_id) = event_room_id(other)
                        && let Some(rs) = engine.store.get_room(&room_id)
                    {
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        apply_to_room(&mut guard, other, &engine.store);
                    }
                }
            }
        }

        info!(
            events = events.len(),
            rooms = engine.store.room_count(),
            "engine state restored from {}",
            wal_path.display()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply to the locked room.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.store);
        Ok(())
    }

    /// WAL-append then apply to the maintenance list (caller holds the write lock).
    pub(super) async fn persist_maintenance(
        &self,
        list: &mut Vec<MaintenanceRequest>,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_maintenance(list, event);
        Ok(())
    }

    pub(super) fn room_state(&self, id: &Ulid) -> Result<SharedRoomState, EngineError> {
        self.store.get_room(id).ok_or(EngineError::NotFound("room", *id))
    }

    pub(super) fn publish(&self, event: ChangeEvent) {
        self.publisher.publish(event);
    }

    /// Deliver mail in the background. Failures are logged and dropped.
    pub(super) fn send_mail(&self, mail: Mail) {
        let mailer = self.mailer.clone();
        tokio::spawn(async move {
            let to = mail.to.clone();
            if let Err(e) = mailer.send(mail).await {
                metrics::counter!(crate::observability::MAIL_FAILURES_TOTAL).increment(1);
                warn!(%to, "{e}");
            }
        });
    }

    pub fn now(&self) -> chrono::NaiveDateTime {
        self.clock.now()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Rewrite the WAL with the minimal event set recreating current state.
    /// Room and maintenance writes wait until the swap is done.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;
        let mut events = Vec::new();
        let mut bookings = Vec::new();

        // Deleted rooms are created first so a live room may reuse their identity.
        let retired = self.store.retired_rooms();
        for r in &retired {
            events.push(Event::RoomCreated { room: r.room.clone() });
            bookings.extend(r.bookings.iter().cloned());
        }

        let mut guards = Vec::new();
        for id in self.store.room_ids() {
            let Some(rs) = self.store.get_room(&id) else {
                continue;
            };
            let guard = rs.read_owned().await;
            events.push(Event::RoomCreated { room: guard.room.clone() });
            if !guard.timetable.is_empty() {
                events.push(Event::TimetableReplaced {
                    room_id: id,
                    entries: guard.timetable_entries(),
                });
            }
            bookings.extend(guard.bookings.iter().cloned());
            guards.push(guard);
        }

        // Replay rebuilds per-user lists in event order, so bookings go out
        // in creation order across rooms.
        bookings.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        events.extend(bookings.into_iter().map(|booking| Event::BookingCreated { booking }));
        events.extend(retired.iter().map(|r| Event::RoomDeleted { id: r.room.id }));

        let maintenance = self.store.maintenance().read().await;
        for request in maintenance.iter() {
            events.push(Event::MaintenanceSubmitted { request: request.clone() });
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
