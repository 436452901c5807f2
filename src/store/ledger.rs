use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::{Wal, WalStats};

use super::memory::reservation_created;
use super::{ConfigStore, InMemoryStore, OverrideStore, ReservationStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    /// Answered with whether the event changed state once applied.
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<bool>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<()>>,
    },
    Stats {
        response: oneshot::Sender<WalStats>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<bool>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then pays for a single fsync and answers every sender in the batch.
///
/// It is also the only writer of `memory`: a batch is applied, in log order,
/// after it is durable, so readers never see an event the log could lose.
async fn wal_writer_loop(mut wal: Wal, memory: Arc<InMemoryStore>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, &memory, other).await;
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Commit what we have before compaction or stats see the log
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &memory, batch).await;
        if let Some(other) = deferred {
            handle_non_append(&mut wal, &memory, other).await;
        }
    }
}

async fn commit_batch(wal: &mut Wal, memory: &InMemoryStore, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mark = wal.mark();
    let mut result = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    if result.is_ok() {
        result = wal.flush_sync();
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    if let Err(e) = result {
        // A failed batch leaves nothing behind, on disk or in memory
        if let Err(rollback) = wal.rollback(mark) {
            tracing::error!("WAL rollback failed, refusing further appends: {rollback}");
        }
        tracing::error!("WAL commit of {} events failed: {e}", batch.len());
        for (_, tx) in batch {
            let _ = tx.send(Err(io::Error::new(e.kind(), e.to_string())));
        }
        return;
    }

    let mut state = memory.write().await;
    for (event, tx) in batch {
        let changed = state.apply(&event);
        let _ = tx.send(Ok(changed));
    }
}

async fn handle_non_append(wal: &mut Wal, memory: &InMemoryStore, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            // Every answered append is applied, so memory matches the log exactly
            let events = memory.read().await.snapshot_events();
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::Stats { response } => {
            let _ = response.send(wal.stats());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

fn wal_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::WalError(e.to_string())
}

/// Durable store: in-memory state rebuilt from, and kept in step with, a WAL.
///
/// Mutations go through the writer task, which fixes their order in the log
/// and applies them once durable. Reads only wait while a committed batch is
/// being applied, never on an fsync.
pub struct Ledger {
    memory: Arc<InMemoryStore>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl Ledger {
    /// Replay the log at `path` and start its writer task. Needs a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, events) = Wal::open_replayed(path)?;
        tracing::info!("replayed {} events from {}", events.len(), path.display());
        let memory = Arc::new(InMemoryStore::from_events(&events));
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, memory.clone(), wal_rx));
        Ok(Self { memory, wal_tx })
    }

    /// Log `event`, wait until it is durable and applied.
    async fn commit(&self, event: Event) -> Result<bool, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event,
                response: tx,
            })
            .await
            .map_err(|_| wal_err("WAL writer shut down"))?;
        rx.await
            .map_err(|_| wal_err("WAL writer dropped response"))?
            .map_err(wal_err)
    }

    pub async fn wal_stats(&self) -> Result<WalStats, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Stats { response: tx })
            .await
            .map_err(|_| wal_err("WAL writer shut down"))?;
        rx.await.map_err(|_| wal_err("WAL writer dropped response"))
    }

    pub async fn appends_since_compact(&self) -> Result<u64, StoreError> {
        Ok(self.wal_stats().await?.appends_since_compact)
    }

    /// Rewrite the WAL as the minimal event list for the current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| wal_err("WAL writer shut down"))?;
        rx.await
            .map_err(|_| wal_err("WAL writer dropped response"))?
            .map_err(wal_err)
    }

    /// Reservation by id, including soft-deleted ones.
    pub async fn reservation(&self, id: Ulid) -> Option<Reservation> {
        self.memory.reservation(id).await
    }
}

#[async_trait]
impl ConfigStore for Ledger {
    async fn get(&self, key: ConfigKey) -> Result<Option<RestaurantConfig>, StoreError> {
        self.memory.get(key).await
    }

    async fn put(&self, key: ConfigKey, config: RestaurantConfig) -> Result<(), StoreError> {
        self.commit(Event::ConfigSaved { key, config }).await?;
        Ok(())
    }
}

#[async_trait]
impl OverrideStore for Ledger {
    async fn find_in_range(&self, span: Span) -> Result<Vec<CapacityOverride>, StoreError> {
        OverrideStore::find_in_range(self.memory.as_ref(), span).await
    }

    async fn put_many(&self, overrides: Vec<CapacityOverride>) -> Result<(), StoreError> {
        if overrides.is_empty() {
            return Ok(());
        }
        self.commit(Event::OverridesSet { entries: overrides }).await?;
        Ok(())
    }

    async fn remove(&self, slot: Ms) -> Result<bool, StoreError> {
        if !self.memory.read().await.has_override(slot) {
            return Ok(false);
        }
        self.commit(Event::OverrideCleared { slot }).await
    }
}

#[async_trait]
impl ReservationStore for Ledger {
    async fn find_in_range(&self, span: Span) -> Result<Vec<Reservation>, StoreError> {
        ReservationStore::find_in_range(self.memory.as_ref(), span).await
    }

    async fn create(&self, reservation: NewReservation) -> Result<Reservation, StoreError> {
        let (event, created) = reservation_created(reservation);
        self.commit(event).await?;
        Ok(created)
    }

    async fn soft_delete(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        let Some(existing) = self.memory.read().await.active_reservation(&id).cloned() else {
            return Ok(None);
        };
        let at = now_ms();
        // A concurrent cancel may have won since the check
        if !self.commit(Event::ReservationCancelled { id, at }).await? {
            return Ok(None);
        }
        Ok(Some(Reservation {
            deleted_at: Some(at),
            ..existing
        }))
    }
}
