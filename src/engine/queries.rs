use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{conflicts_in, validate_window};
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_venue_info(&self, id: Ulid) -> Result<Venue, EngineError> {
        let rs = self.get_venue(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.info())
    }

    /// All venues, name ascending.
    pub async fn list_venues(&self) -> Vec<Venue> {
        let mut out = Vec::with_capacity(self.venues.len());
        for id in self.venue_ids_by_name() {
            if let Some(rs) = self.get_venue(&id) {
                out.push(rs.read().await.info());
            }
        }
        out
    }

    pub async fn get_event(&self, id: Ulid) -> Result<Event, EngineError> {
        let venue_id = self
            .get_venue_for_event(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self.get_venue(&venue_id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        guard.get_event(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Events matching the filter (cancelled included), sorted by start time.
    pub async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, EngineError> {
        if filter.date.is_none()
            && let (Some(from), Some(to)) = (filter.from, filter.to)
        {
            if from > to {
                return Err(EngineError::validation("date range start is after its end"));
            }
            if (to - from).num_days() >= MAX_DATE_RANGE_DAYS {
                return Err(EngineError::LimitExceeded("date range too wide"));
            }
        }

        let venue_ids = match filter.venue_id {
            Some(id) => vec![id],
            None => self.venue_ids_sorted(),
        };

        let mut out = Vec::new();
        for id in venue_ids {
            let Some(rs) = self.get_venue(&id) else { continue };
            let guard = rs.read().await;
            out.extend(guard.events.iter().filter(|e| filter.matches(e)).cloned());
        }
        out.sort_by_key(|e| (e.span.start, e.span.end, e.id));
        Ok(out)
    }

    /// Active events at `venue_id` overlapping `[start, end)`, minus `exclude`.
    ///
    /// The venue is not required to exist; an unknown venue has no conflicts.
    pub async fn find_conflicts(
        &self,
        venue_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Event>, EngineError> {
        let span = validate_window(start, end)?;
        let Some(rs) = self.get_venue(&venue_id) else {
            return Ok(vec![]);
        };
        let guard = rs.read().await;
        Ok(conflicts_in(&guard, &span, exclude))
    }
}
