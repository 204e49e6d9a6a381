use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, OwnedRwLockReadGuard, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{admit, now_ms, validate_event, validate_venue};
use super::{apply_to_venue, Engine, EngineError, WalCommand, MAX_RELOCATE_RETRIES};

impl Engine {
    // ── Venues ───────────────────────────────────────────────

    pub async fn create_venue(&self, id: Ulid, input: VenueInput) -> Result<Venue, EngineError> {
        let input = validate_venue(&input)?;
        let _catalog = self.catalog.lock().await;
        self.insert_venue_locked(id, input).await
    }

    /// Caller holds the catalog lock.
    async fn insert_venue_locked(&self, id: Ulid, input: VenueInput) -> Result<Venue, EngineError> {
        if self.venues.len() >= MAX_VENUES {
            return Err(EngineError::LimitExceeded("too many venues"));
        }
        if self.venues.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.names.contains_key(&input.name) {
            return Err(EngineError::DuplicateName(input.name));
        }

        let created_at = now_ms();
        let record = Record::VenueCreated {
            id,
            name: input.name.clone(),
            location: input.location.clone(),
            capacity: input.capacity,
            created_at,
        };
        self.wal_append(&record).await?;
        let vs = VenueState::new(id, input.name.clone(), input.location, input.capacity, created_at);
        let venue = vs.info();
        self.venues.insert(id, Arc::new(RwLock::new(vs)));
        self.names.insert(input.name, id);
        info!("venue {id} created: {:?}", venue.name);
        Ok(venue)
    }

    /// Return the venue with this name, creating it if none exists.
    pub async fn find_or_create_venue(&self, name: &str) -> Result<Venue, EngineError> {
        let input = validate_venue(&VenueInput {
            name: name.to_string(),
            ..Default::default()
        })?;
        let _catalog = self.catalog.lock().await;
        if let Some(id) = self.names.get(&input.name).map(|e| *e.value())
            && let Some(rs) = self.get_venue(&id)
        {
            return Ok(rs.read().await.info());
        }
        self.insert_venue_locked(Ulid::new(), input).await
    }

    pub async fn update_venue(&self, id: Ulid, input: VenueInput) -> Result<Venue, EngineError> {
        let input = validate_venue(&input)?;
        let _catalog = self.catalog.lock().await;
        let rs = self.get_venue(&id).ok_or(EngineError::NotFound(id))?;
        if let Some(owner) = self.names.get(&input.name).map(|e| *e.value())
            && owner != id
        {
            return Err(EngineError::DuplicateName(input.name));
        }

        let mut guard = rs.write().await;
        let old_name = guard.name.clone();
        let record = Record::VenueUpdated {
            id,
            name: input.name.clone(),
            location: input.location,
            capacity: input.capacity,
        };
        self.persist_and_apply(&mut guard, &record).await?;
        if old_name != input.name {
            self.names.remove(&old_name);
            self.names.insert(input.name, id);
        }
        Ok(guard.info())
    }

    /// Refuses while any event (cancelled included) still references the venue.
    pub async fn delete_venue(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let rs = self.get_venue(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if !guard.events.is_empty() {
            return Err(EngineError::VenueInUse(id));
        }

        self.wal_append(&Record::VenueDeleted { id }).await?;
        guard.deleted = true;
        self.venues.remove(&id);
        self.names.remove(&guard.name);
        info!("venue {id} deleted");
        Ok(())
    }

    async fn resolve_venue_ref(&self, venue: &VenueRef) -> Result<Ulid, EngineError> {
        match venue {
            VenueRef::Id(id) if self.venues.contains_key(id) => Ok(*id),
            VenueRef::Id(id) => Err(EngineError::NotFound(*id)),
            VenueRef::Name(name) => Ok(self.find_or_create_venue(name).await?.id),
        }
    }

    // ── Events ───────────────────────────────────────────────

    /// Book a new event. Without `force`, any clash rejects the write with the
    /// full list of conflicting events; with `force` the event is stored as
    /// tentative. Check and write happen under the venue's write lock.
    pub async fn create_event(
        &self,
        id: Ulid,
        input: EventInput,
        force: bool,
    ) -> Result<Event, EngineError> {
        let valid = validate_event(&input)?;
        if self.event_to_venue.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let venue_id = self.resolve_venue_ref(&valid.venue).await?;
        let rs = self.get_venue(&venue_id).ok_or(EngineError::NotFound(venue_id))?;
        let mut guard = rs.write().await;
        if guard.deleted {
            return Err(EngineError::NotFound(venue_id));
        }
        if guard.events.len() >= MAX_EVENTS_PER_VENUE {
            return Err(EngineError::LimitExceeded("too many events at venue"));
        }

        let status = admit(&guard, &valid.span, None, force)?;

        // Reserve the id; a concurrent create with the same id at another venue loses here.
        match self.event_to_venue.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(venue_id);
            }
        }

        let now = now_ms();
        let event = Event {
            id,
            venue_id,
            title: valid.title,
            date: valid.date,
            span: valid.span,
            organizer: valid.organizer,
            description: valid.description,
            status,
            created_at: now,
            updated_at: now,
        };
        let record = Record::EventBooked { event: event.clone() };
        if let Err(e) = self.persist_and_apply(&mut guard, &record).await {
            self.event_to_venue.remove(&id);
            return Err(e);
        }
        log_write("booked", &event);
        Ok(event)
    }

    /// Replace an event's fields. The event is excluded from its own clash
    /// check; status is re-derived from the new interval.
    pub async fn update_event(
        &self,
        id: Ulid,
        input: EventInput,
        force: bool,
    ) -> Result<Event, EngineError> {
        let valid = validate_event(&input)?;
        // Checked before resolving, so a by-name move of a missing event creates no venue.
        if self.get_venue_for_event(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let target_id = self.resolve_venue_ref(&valid.venue).await?;

        for _ in 0..MAX_RELOCATE_RETRIES {
            let current_id = self
                .get_venue_for_event(&id)
                .ok_or(EngineError::NotFound(id))?;

            if current_id == target_id {
                let rs = self
                    .get_venue(&target_id)
                    .ok_or(EngineError::NotFound(target_id))?;
                let mut guard = rs.write().await;
                let Some(existing) = guard.get_event(&id).cloned() else { continue };
                if guard.deleted {
                    continue;
                }
                let status = admit(&guard, &valid.span, Some(id), force)?;
                let event = replaced(&existing, target_id, &valid, status);
                self.persist_and_apply(&mut guard, &Record::EventUpdated { event: event.clone() })
                    .await?;
                log_write("updated", &event);
                return Ok(event);
            }

            let (mut current, mut target) = self.write_pair(current_id, target_id).await?;
            let Some(existing) = current.get_event(&id).cloned() else { continue };
            if current.deleted {
                continue;
            }
            if target.deleted {
                return Err(EngineError::NotFound(target_id));
            }
            if target.events.len() >= MAX_EVENTS_PER_VENUE {
                return Err(EngineError::LimitExceeded("too many events at venue"));
            }
            let status = admit(&target, &valid.span, Some(id), force)?;
            let event = replaced(&existing, target_id, &valid, status);
            let record = Record::EventUpdated { event: event.clone() };
            self.wal_append(&record).await?;
            current.remove_event(id);
            apply_to_venue(&mut target, &record, &self.event_to_venue);
            log_write("moved", &event);
            return Ok(event);
        }
        Err(EngineError::NotFound(id))
    }

    /// Soft-end an event. Cancelled events drop out of every clash check.
    pub async fn cancel_event(&self, id: Ulid) -> Result<Event, EngineError> {
        let mut guard = self.resolve_event_write(&id).await?;
        let existing = guard
            .get_event(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if existing.status == EventStatus::Cancelled {
            return Ok(existing);
        }
        let event = Event {
            status: EventStatus::Cancelled,
            updated_at: now_ms(),
            ..existing
        };
        self.persist_and_apply(&mut guard, &Record::EventUpdated { event: event.clone() })
            .await?;
        info!("event {id} cancelled");
        Ok(event)
    }

    /// Remove an event. Returns the venue it was booked at.
    pub async fn delete_event(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let mut guard = self.resolve_event_write(&id).await?;
        let venue_id = guard.id;
        self.persist_and_apply(&mut guard, &Record::EventDeleted { id, venue_id })
            .await?;
        info!("event {id} deleted from venue {venue_id}");
        Ok(venue_id)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the records needed to recreate current state.
    ///
    /// Holds the catalog lock and every venue's read lock until the swap is
    /// done, so no write can land between the snapshot and the rename.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let mut guards: Vec<OwnedRwLockReadGuard<VenueState>> = Vec::new();
        for id in self.venue_ids_sorted() {
            if let Some(rs) = self.get_venue(&id) {
                guards.push(rs.read_owned().await);
            }
        }

        let mut records = Vec::new();
        for vs in &guards {
            records.push(Record::VenueCreated {
                id: vs.id,
                name: vs.name.clone(),
                location: vs.location.clone(),
                capacity: vs.capacity,
                created_at: vs.created_at,
            });
            records.extend(
                vs.events
                    .iter()
                    .map(|event| Record::EventBooked { event: event.clone() }),
            );
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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

fn replaced(existing: &Event, venue_id: Ulid, valid: &ValidEvent, status: EventStatus) -> Event {
    Event {
        id: existing.id,
        venue_id,
        title: valid.title.clone(),
        date: valid.date,
        span: valid.span,
        organizer: valid.organizer.clone(),
        description: valid.description.clone(),
        status,
        created_at: existing.created_at,
        updated_at: now_ms(),
    }
}

fn log_write(action: &str, event: &Event) {
    if event.status == EventStatus::Tentative {
        metrics::counter!(crate::observability::TENTATIVE_WRITES_TOTAL).increment(1);
        warn!(
            "event {} {action} as tentative at venue {} despite clash [{}, {})",
            event.id, event.venue_id, event.span.start, event.span.end
        );
    } else {
        info!(
            "event {} {action} at venue {} [{}, {})",
            event.id, event.venue_id, event.span.start, event.span.end
        );
    }
}
