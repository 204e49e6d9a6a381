use ulid::Ulid;

use crate::model::*;

use super::conflict::{conflicts_in, validate_window};
use super::{Engine, EngineError};

impl Engine {
    /// Venues that can take `[start, end)` without a clash, name ascending.
    ///
    /// `exclude` names the event being rescheduled so its current booking does
    /// not count against its own venue. An empty result is a valid answer.
    pub async fn suggest_venues(
        &self,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Venue>, EngineError> {
        let span = validate_window(start, end)?;
        if let Some(event_id) = exclude
            && !self.event_to_venue.contains_key(&event_id)
        {
            return Err(EngineError::NotFound(event_id));
        }

        let mut available = Vec::new();
        for id in self.venue_ids_by_name() {
            let Some(rs) = self.get_venue(&id) else { continue };
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            if conflicts_in(&guard, &span, exclude).is_empty() {
                available.push(guard.info());
            }
        }
        Ok(available)
    }
}
