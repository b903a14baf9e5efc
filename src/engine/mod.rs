mod calendar;
mod error;
mod mutations;
mod queries;
mod surcharge;
mod validate;

pub use calendar::{
    apply_patches, check_days, day_failure, derive_status, effective_row, expand_weekly_rules,
    merge_patch, nightly_prices, resolve_price, restore_stock, take_stock,
};
pub use error::EngineError;
pub use surcharge::calculate_surcharges;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
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

/// Background task that owns the WAL. Appends that arrive while a batch is
/// being gathered share one fsync; every sender learns the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_err = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .err();
    // Flush even after an append error so half-written bytes don't leak into
    // the next batch; this batch is reported failed either way.
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

/// Calendar engine for one property.
pub struct Engine {
    pub state: DashMap<Ulid, SharedRoomState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Held shared while rooms are added or removed, exclusively while the
    /// WAL is compacted.
    pub(super) catalog: RwLock<()>,
}

/// Apply an event to a room. The caller holds the lock.
/// Room creation and deletion happen at the map level.
fn apply_to_room(rs: &mut RoomState, event: &Event) {
    match event {
        Event::RoomUpserted { room } => {
            rs.room = room.clone();
        }
        Event::SurchargesReplaced { rules, .. } => {
            rs.surcharges = rules.clone();
        }
        Event::DaySet { day, .. } => {
            rs.days.insert(day.date, day.clone());
        }
        Event::DaysMerged { patches, policy, .. } => {
            apply_patches(rs, patches, policy);
        }
        Event::StockTaken { stay, quantity, .. } => {
            for date in stay.dates() {
                take_stock(calendar::materialize(rs, date), *quantity);
            }
        }
        Event::StockReleased { stay, quantity, .. } => {
            for date in stay.dates() {
                restore_stock(calendar::materialize(rs, date), *quantity);
            }
        }
        Event::RoomDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            catalog: RwLock::new(()),
        };

        // Replay runs before the engine is shared, so try_write never contends.
        // Never use blocking_write here: this may run inside an async context
        // (lazy property creation).
        for event in &events {
            match event {
                Event::RoomDeleted { id } => {
                    engine.state.remove(id);
                }
                Event::RoomUpserted { room } if !engine.state.contains_key(&room.id) => {
                    let rs = RoomState::new(room.clone());
                    engine.state.insert(room.id, Arc::new(RwLock::new(rs)));
                }
                other => {
                    if let Some(entry) = engine.state.get(&other.room_id()) {
                        let rs = entry.value().clone();
                        drop(entry);
                        if let Ok(mut guard) = rs.try_write() {
                            apply_to_room(&mut guard, other);
                        }
                    }
                }
            }
        }

        tracing::debug!(
            "replayed {} events into {} rooms",
            events.len(),
            engine.state.len()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// Look up a room and take its write lock.
    pub(super) async fn write_room(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        Ok(rs.write_owned().await)
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event);
        self.notify.send(rs.room.id, event);
        Ok(())
    }
}
