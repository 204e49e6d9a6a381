mod advisor;
mod clashes;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use clashes::pairwise_clashes;
pub use conflict::{conflicts_in, resolve_status, validate_event, validate_venue};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedVenueState = Arc<RwLock<VenueState>>;

/// Attempts to chase an event that moves between venues while we wait for a lock.
const MAX_RELOCATE_RETRIES: usize = 8;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<Record>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Record, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Each wakeup drains every append already queued and commits
/// them with one fsync, then answers all senders with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (record, response) = match cmd {
            WalCommand::Append { record, response } => (record, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(record, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { record, response }) => batch.push((record, response)),
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
    let append_result = batch
        .iter()
        .try_for_each(|(record, _)| wal.append_buffered(record));
    // Flush even after a failed append so half-buffered bytes don't leak into
    // the next batch; every sender in this batch is told it failed.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The clash engine and its store handle.
///
/// Each venue's state sits behind its own `RwLock`; every check-then-write on
/// a venue runs under that venue's write lock, so two overlapping bookings at
/// the same venue are serialized and the second one sees the first. Catalog
/// changes (venue create/rename/delete) are serialized by `catalog`.
///
/// Lock order: `catalog`, then venue locks in ascending id order.
pub struct Engine {
    pub(super) venues: DashMap<Ulid, SharedVenueState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: event id → venue id
    pub(super) event_to_venue: DashMap<Ulid, Ulid>,
    /// Venue name → venue id
    pub(super) names: DashMap<String, Ulid>,
    pub(super) catalog: Mutex<()>,
}

/// Apply a venue-scoped record (no locking — caller holds the venue's lock).
fn apply_to_venue(vs: &mut VenueState, record: &Record, event_index: &DashMap<Ulid, Ulid>) {
    match record {
        Record::VenueUpdated {
            name,
            location,
            capacity,
            ..
        } => {
            vs.name = name.clone();
            vs.location = location.clone();
            vs.capacity = *capacity;
        }
        Record::EventBooked { event } | Record::EventUpdated { event } => {
            vs.remove_event(event.id);
            vs.insert_event(event.clone());
            event_index.insert(event.id, vs.id);
        }
        Record::EventDeleted { id, .. } => {
            vs.remove_event(*id);
            event_index.remove(id);
        }
        // Created/Deleted are handled at the DashMap level, not here
        Record::VenueCreated { .. } | Record::VenueDeleted { .. } => {}
    }
}

/// The venue a venue-scoped record lands in.
fn record_venue_id(record: &Record) -> Option<Ulid> {
    match record {
        Record::VenueUpdated { id, .. } => Some(*id),
        Record::EventBooked { event } | Record::EventUpdated { event } => Some(event.venue_id),
        Record::EventDeleted { venue_id, .. } => Some(*venue_id),
        Record::VenueCreated { .. } | Record::VenueDeleted { .. } => None,
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let records = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            venues: DashMap::new(),
            wal_tx,
            event_to_venue: DashMap::new(),
            names: DashMap::new(),
            catalog: Mutex::new(()),
        };

        for record in &records {
            engine.replay_record(record);
        }

        tracing::info!(
            "replayed {} records from {}: {} venues, {} events",
            records.len(),
            wal_path.display(),
            engine.venues.len(),
            engine.event_to_venue.len()
        );
        Ok(engine)
    }

    // Replay owns every Arc, so try_write never contends. Never use
    // blocking_write here: replay runs inside the async runtime.
    fn replay_record(&self, record: &Record) {
        match record {
            Record::VenueCreated {
                id,
                name,
                location,
                capacity,
                created_at,
            } => {
                let vs = VenueState::new(*id, name.clone(), location.clone(), *capacity, *created_at);
                self.venues.insert(*id, Arc::new(RwLock::new(vs)));
                self.names.insert(name.clone(), *id);
            }
            Record::VenueDeleted { id } => {
                if let Some((_, rs)) = self.venues.remove(id)
                    && let Ok(vs) = rs.try_read()
                {
                    self.names.remove(&vs.name);
                }
            }
            other => {
                if let Record::VenueUpdated { id, name, .. } = other {
                    self.names.retain(|_, v| *v != *id);
                    self.names.insert(name.clone(), *id);
                }
                if let Record::EventUpdated { event } = other
                    && let Some(prev) = self.get_venue_for_event(&event.id)
                    && prev != event.venue_id
                    && let Some(prev_rs) = self.get_venue(&prev)
                    && let Ok(mut prev_guard) = prev_rs.try_write()
                {
                    prev_guard.remove_event(event.id);
                }
                let Some(venue_id) = record_venue_id(other) else { return };
                let Some(rs) = self.get_venue(&venue_id) else {
                    tracing::warn!("replay: record for unknown venue {venue_id} skipped");
                    return;
                };
                if let Ok(mut guard) = rs.try_write() {
                    apply_to_venue(&mut guard, other, &self.event_to_venue);
                }
            }
        }
    }

    /// Write a record through the background group-commit writer.
    pub(super) async fn wal_append(&self, record: &Record) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                record: record.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_venue(&self, id: &Ulid) -> Option<SharedVenueState> {
        self.venues.get(id).map(|e| e.value().clone())
    }

    pub fn get_venue_for_event(&self, event_id: &Ulid) -> Option<Ulid> {
        self.event_to_venue.get(event_id).map(|e| *e.value())
    }

    /// WAL-append then apply, under the caller's venue write lock.
    pub(super) async fn persist_and_apply(
        &self,
        vs: &mut VenueState,
        record: &Record,
    ) -> Result<(), EngineError> {
        self.wal_append(record).await?;
        apply_to_venue(vs, record, &self.event_to_venue);
        Ok(())
    }

    /// Lookup event → venue, acquire the venue's write lock, and confirm the
    /// event is still there (it may have moved while we waited).
    pub(super) async fn resolve_event_write(
        &self,
        event_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<VenueState>, EngineError> {
        for _ in 0..MAX_RELOCATE_RETRIES {
            let venue_id = self
                .get_venue_for_event(event_id)
                .ok_or(EngineError::NotFound(*event_id))?;
            let Some(rs) = self.get_venue(&venue_id) else { continue };
            let guard = rs.write_owned().await;
            if !guard.deleted && guard.get_event(event_id).is_some() {
                return Ok(guard);
            }
        }
        Err(EngineError::NotFound(*event_id))
    }

    /// Write-lock two distinct venues in id order. Returns guards as `(a, b)`.
    pub(super) async fn write_pair(
        &self,
        a: Ulid,
        b: Ulid,
    ) -> Result<(OwnedRwLockWriteGuard<VenueState>, OwnedRwLockWriteGuard<VenueState>), EngineError>
    {
        debug_assert_ne!(a, b);
        let rs_a = self.get_venue(&a).ok_or(EngineError::NotFound(a))?;
        let rs_b = self.get_venue(&b).ok_or(EngineError::NotFound(b))?;
        if a < b {
            let ga = rs_a.write_owned().await;
            let gb = rs_b.write_owned().await;
            Ok((ga, gb))
        } else {
            let gb = rs_b.write_owned().await;
            let ga = rs_a.write_owned().await;
            Ok((ga, gb))
        }
    }

    /// Venue ids ordered by name, the advisor's iteration order.
    pub(super) fn venue_ids_by_name(&self) -> Vec<Ulid> {
        let mut named: Vec<(String, Ulid)> = self
            .names
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        named.sort();
        named.into_iter().map(|(_, id)| id).collect()
    }

    /// Venue ids in ascending order, the lock order.
    pub(super) fn venue_ids_sorted(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.venues.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }
}
