use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC) — the only instant type.
pub type Ms = i64;

/// The overlap predicate for half-open intervals `[a_start, a_end)` and `[b_start, b_end)`.
///
/// Every conflict decision in the crate goes through this function. A zero-length
/// interval strictly inside another still overlaps it, so callers reject `end <= start`
/// before any interval reaches a venue.
#[inline]
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_start < b_end && b_start < a_end
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }
}

/// Calendar date (UTC) of an instant.
pub fn utc_date(ms: Ms) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Scheduled,
    /// Force-written despite an existing clash.
    Tentative,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Scheduled => "scheduled",
            EventStatus::Tentative => "tentative",
            EventStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scheduled" => Ok(EventStatus::Scheduled),
            "tentative" => Ok(EventStatus::Tentative),
            "cancelled" | "canceled" => Ok(EventStatus::Cancelled),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// A booked event. Lives in exactly one venue's event list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub title: String,
    /// Filter key, always the UTC date of `span.start`.
    pub date: NaiveDate,
    pub span: Span,
    pub organizer: Option<String>,
    pub description: Option<String>,
    pub status: EventStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Event {
    /// Cancelled events never take part in clash detection.
    pub fn is_active(&self) -> bool {
        self.status != EventStatus::Cancelled
    }
}

/// How a write names its venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VenueRef {
    Id(Ulid),
    /// Resolved with find-or-create.
    Name(String),
}

/// Unvalidated create/update payload for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventInput {
    pub title: String,
    pub venue: VenueRef,
    pub date: Option<NaiveDate>,
    pub start: Ms,
    pub end: Ms,
    pub organizer: Option<String>,
    pub description: Option<String>,
}

/// An `EventInput` that passed validation: trimmed text, `start < end`, date derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidEvent {
    pub title: String,
    pub venue: VenueRef,
    pub date: NaiveDate,
    pub span: Span,
    pub organizer: Option<String>,
    pub description: Option<String>,
}

/// Unvalidated create/update payload for a venue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VenueInput {
    pub name: String,
    pub location: Option<String>,
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct VenueState {
    pub id: Ulid,
    pub name: String,
    pub location: Option<String>,
    pub capacity: Option<u32>,
    pub created_at: Ms,
    /// Set under the write lock when the venue is removed, so writers that
    /// raced the deletion see it after acquiring the lock.
    pub deleted: bool,
    /// All events (cancelled included), sorted by `span.start`.
    pub events: Vec<Event>,
}

impl VenueState {
    pub fn new(
        id: Ulid,
        name: String,
        location: Option<String>,
        capacity: Option<u32>,
        created_at: Ms,
    ) -> Self {
        Self {
            id,
            name,
            location,
            capacity,
            created_at,
            deleted: false,
            events: Vec::new(),
        }
    }

    /// Insert event maintaining sort order by span.start.
    pub fn insert_event(&mut self, event: Event) {
        let pos = self
            .events
            .partition_point(|e| e.span.start <= event.span.start);
        self.events.insert(pos, event);
    }

    pub fn remove_event(&mut self, id: Ulid) -> Option<Event> {
        let pos = self.events.iter().position(|e| e.id == id)?;
        Some(self.events.remove(pos))
    }

    pub fn get_event(&self, id: &Ulid) -> Option<&Event> {
        self.events.iter().find(|e| e.id == *id)
    }

    /// Events (cancelled included) whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Event> {
        let right_bound = self.events.partition_point(|e| e.span.start < query.end);
        self.events[..right_bound]
            .iter()
            .filter(move |e| e.span.overlaps(query))
    }

    pub fn info(&self) -> Venue {
        Venue {
            id: self.id,
            name: self.name.clone(),
            location: self.location.clone(),
            capacity: self.capacity,
            created_at: self.created_at,
        }
    }
}

/// The WAL record format — flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    VenueCreated {
        id: Ulid,
        name: String,
        location: Option<String>,
        capacity: Option<u32>,
        created_at: Ms,
    },
    VenueUpdated {
        id: Ulid,
        name: String,
        location: Option<String>,
        capacity: Option<u32>,
    },
    VenueDeleted {
        id: Ulid,
    },
    EventBooked {
        event: Event,
    },
    /// Full replacement; the venue may differ from the one currently holding the event.
    EventUpdated {
        event: Event,
    },
    EventDeleted {
        id: Ulid,
        venue_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Venue {
    pub id: Ulid,
    pub name: String,
    pub location: Option<String>,
    pub capacity: Option<u32>,
    pub created_at: Ms,
}

/// One overlapping pair at one venue; `first` precedes `second` in start order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clash {
    pub venue: Venue,
    pub first: Event,
    pub second: Event,
}

/// Event listing filter. Date bounds are inclusive; `date` wins over the range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub venue_id: Option<Ulid>,
    pub date: Option<NaiveDate>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        if self.venue_id.is_some_and(|v| v != event.venue_id) {
            return false;
        }
        if let Some(date) = self.date {
            return event.date == date;
        }
        self.from.is_none_or(|from| event.date >= from)
            && self.to.is_none_or(|to| event.date <= to)
    }
}

/// Partial venue update: `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VenueChanges {
    pub name: Option<String>,
    pub location: Option<Option<String>>,
    pub capacity: Option<Option<u32>>,
}

impl VenueChanges {
    pub fn apply(&self, current: &Venue) -> VenueInput {
        VenueInput {
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            location: self.location.clone().unwrap_or_else(|| current.location.clone()),
            capacity: self.capacity.unwrap_or(current.capacity),
        }
    }
}

/// Partial event update: `None` keeps the stored value. The date key is
/// re-derived from the start time unless given explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventChanges {
    pub title: Option<String>,
    pub venue: Option<VenueRef>,
    pub date: Option<NaiveDate>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub organizer: Option<Option<String>>,
    pub description: Option<Option<String>>,
}

impl EventChanges {
    pub fn apply(&self, current: &Event) -> EventInput {
        EventInput {
            title: self.title.clone().unwrap_or_else(|| current.title.clone()),
            venue: self.venue.clone().unwrap_or(VenueRef::Id(current.venue_id)),
            date: self.date,
            start: self.start.unwrap_or(current.span.start),
            end: self.end.unwrap_or(current.span.end),
            organizer: self.organizer.clone().unwrap_or_else(|| current.organizer.clone()),
            description: self.description.clone().unwrap_or_else(|| current.description.clone()),
        }
    }
}
