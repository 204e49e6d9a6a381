use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Query window for read-only lookups: ordered and in range, any length.
pub(crate) fn validate_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if end <= start {
        return Err(EngineError::validation("end_time must be after start_time"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::validation("timestamp out of range"));
    }
    Ok(Span::new(start, end))
}

/// An event's own interval: a valid window no longer than `MAX_EVENT_DURATION_MS`.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = validate_window(start, end)?;
    if span.duration_ms() > MAX_EVENT_DURATION_MS {
        return Err(EngineError::LimitExceeded("event too long"));
    }
    Ok(span)
}

fn required_text(value: &str, field: &str, max_len: usize) -> Result<String, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(format!("{field} is required")));
    }
    if trimmed.len() > max_len {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(trimmed.to_string())
}

/// Blank optional text collapses to `None`.
fn optional_text(value: Option<&str>, max_len: usize) -> Result<Option<String>, EngineError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(t) if t.len() > max_len => Err(EngineError::LimitExceeded("text field too long")),
        Some(t) => Ok(Some(t.to_string())),
    }
}

/// The date key is derived from `start`. A caller-supplied date must agree with it.
pub fn validate_event(input: &EventInput) -> Result<ValidEvent, EngineError> {
    let title = required_text(&input.title, "title", MAX_TITLE_LEN)?;
    let venue = match &input.venue {
        VenueRef::Id(id) => VenueRef::Id(*id),
        VenueRef::Name(name) => VenueRef::Name(required_text(name, "venue_name", MAX_NAME_LEN)?),
    };
    let span = validate_span(input.start, input.end)?;
    let date = utc_date(span.start).ok_or_else(|| EngineError::validation("timestamp out of range"))?;
    if let Some(given) = input.date
        && given != date
    {
        return Err(EngineError::validation(format!(
            "date {given} does not match start_time (UTC date {date})"
        )));
    }
    Ok(ValidEvent {
        title,
        venue,
        date,
        span,
        organizer: optional_text(input.organizer.as_deref(), MAX_ORGANIZER_LEN)?,
        description: optional_text(input.description.as_deref(), MAX_DESCRIPTION_LEN)?,
    })
}

pub fn validate_venue(input: &VenueInput) -> Result<VenueInput, EngineError> {
    Ok(VenueInput {
        name: required_text(&input.name, "name", MAX_NAME_LEN)?,
        location: optional_text(input.location.as_deref(), MAX_LOCATION_LEN)?,
        capacity: input.capacity,
    })
}

/// Active events at this venue overlapping `span`, minus `exclude`.
/// Sorted by `(start, end, id)`.
pub fn conflicts_in(venue: &VenueState, span: &Span, exclude: Option<Ulid>) -> Vec<Event> {
    let mut found: Vec<Event> = venue
        .overlapping(span)
        .filter(|e| e.is_active() && Some(e.id) != exclude)
        .cloned()
        .collect();
    found.sort_by_key(|e| (e.span.start, e.span.end, e.id));
    found
}

/// Status of a write that is allowed to proceed.
///
/// | conflicts | forced | status    |
/// |-----------|--------|-----------|
/// | no        | any    | scheduled |
/// | yes       | yes    | tentative |
///
/// Conflicts without force never reach this function; see [`admit`].
pub fn resolve_status(conflicts_found: bool, forced: bool) -> EventStatus {
    debug_assert!(!conflicts_found || forced, "unforced clash must be rejected by the caller");
    if conflicts_found {
        EventStatus::Tentative
    } else {
        EventStatus::Scheduled
    }
}

/// Write-path gate: reject an unforced clash, otherwise resolve the status.
/// Caller holds the venue's write lock.
pub(crate) fn admit(
    venue: &VenueState,
    span: &Span,
    exclude: Option<Ulid>,
    force: bool,
) -> Result<EventStatus, EngineError> {
    let clashes = conflicts_in(venue, span, exclude);
    if !clashes.is_empty() && !force {
        metrics::counter!(crate::observability::CLASHES_DETECTED_TOTAL).increment(1);
        return Err(EngineError::Conflict { clashes });
    }
    Ok(resolve_status(!clashes.is_empty(), force))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const H: Ms = 3_600_000;
    // 2025-06-02T00:00:00Z
    const DAY: Ms = 1_748_822_400_000;

    fn venue_with(spans: &[(Ms, Ms, EventStatus)]) -> (VenueState, Vec<Ulid>) {
        let mut vs = VenueState::new(Ulid::new(), "Hall".into(), None, None, 0);
        let mut ids = Vec::new();
        for &(start, end, status) in spans {
            let id = Ulid::new();
            ids.push(id);
            vs.insert_event(Event {
                id,
                venue_id: vs.id,
                title: "e".into(),
                date: utc_date(start).unwrap(),
                span: Span::new(start, end),
                organizer: None,
                description: None,
                status,
                created_at: 0,
                updated_at: 0,
            });
        }
        (vs, ids)
    }

    fn input(start: Ms, end: Ms) -> EventInput {
        EventInput {
            title: "  Standup ".into(),
            venue: VenueRef::Name(" Room A ".into()),
            date: None,
            start,
            end,
            organizer: Some("   ".into()),
            description: Some(" daily ".into()),
        }
    }

    #[test]
    fn back_to_back_does_not_conflict() {
        let (vs, _) = venue_with(&[(DAY + 9 * H, DAY + 10 * H, EventStatus::Scheduled)]);
        let found = conflicts_in(&vs, &Span::new(DAY + 10 * H, DAY + 11 * H), None);
        assert!(found.is_empty());
    }

    #[test]
    fn partial_overlap_conflicts() {
        let (vs, ids) = venue_with(&[(DAY + 9 * H, DAY + 10 * H, EventStatus::Scheduled)]);
        let found = conflicts_in(&vs, &Span::new(DAY + 9 * H + H / 2, DAY + 11 * H), None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, ids[0]);
    }

    #[test]
    fn self_is_excluded_even_with_identical_interval() {
        let (vs, ids) = venue_with(&[(DAY + 9 * H, DAY + 10 * H, EventStatus::Scheduled)]);
        let span = Span::new(DAY + 9 * H, DAY + 10 * H);
        assert_eq!(conflicts_in(&vs, &span, None).len(), 1);
        assert!(conflicts_in(&vs, &span, Some(ids[0])).is_empty());
    }

    #[test]
    fn cancelled_events_are_ignored() {
        let (vs, _) = venue_with(&[(DAY + 9 * H, DAY + 10 * H, EventStatus::Cancelled)]);
        assert!(conflicts_in(&vs, &Span::new(DAY + 9 * H, DAY + 10 * H), None).is_empty());
    }

    #[test]
    fn tentative_events_still_conflict() {
        let (vs, _) = venue_with(&[(DAY + 9 * H, DAY + 10 * H, EventStatus::Tentative)]);
        assert_eq!(conflicts_in(&vs, &Span::new(DAY + 9 * H, DAY + 10 * H), None).len(), 1);
    }

    #[test]
    fn conflicts_sorted_by_start() {
        let (vs, ids) = venue_with(&[
            (DAY + 11 * H, DAY + 12 * H, EventStatus::Scheduled),
            (DAY + 9 * H, DAY + 13 * H, EventStatus::Scheduled),
            (DAY + 10 * H, DAY + 11 * H, EventStatus::Scheduled),
        ]);
        let found = conflicts_in(&vs, &Span::new(DAY, DAY + 24 * H), None);
        let order: Vec<_> = found.iter().map(|e| e.id).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);
    }

    #[test]
    fn status_table() {
        assert_eq!(resolve_status(false, false), EventStatus::Scheduled);
        assert_eq!(resolve_status(false, true), EventStatus::Scheduled);
        assert_eq!(resolve_status(true, true), EventStatus::Tentative);
    }

    #[test]
    fn admit_rejects_unforced_clash_with_report() {
        let (vs, ids) = venue_with(&[(DAY + 9 * H, DAY + 10 * H, EventStatus::Scheduled)]);
        let span = Span::new(DAY + 9 * H, DAY + 10 * H);
        match admit(&vs, &span, None, false) {
            Err(EngineError::Conflict { clashes }) => {
                assert_eq!(clashes.len(), 1);
                assert_eq!(clashes[0].id, ids[0]);
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
        assert_eq!(admit(&vs, &span, None, true).unwrap(), EventStatus::Tentative);
    }

    #[test]
    fn admit_forced_without_clash_is_scheduled() {
        let (vs, _) = venue_with(&[]);
        let span = Span::new(DAY, DAY + H);
        assert_eq!(admit(&vs, &span, None, true).unwrap(), EventStatus::Scheduled);
    }

    #[test]
    fn validate_trims_and_derives_date() {
        let valid = validate_event(&input(DAY + 9 * H, DAY + 10 * H)).unwrap();
        assert_eq!(valid.title, "Standup");
        assert_eq!(valid.venue, VenueRef::Name("Room A".into()));
        assert_eq!(valid.date, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        assert_eq!(valid.organizer, None);
        assert_eq!(valid.description.as_deref(), Some("daily"));
    }

    #[test]
    fn validate_rejects_inverted_and_empty_intervals() {
        for (start, end) in [(DAY + H, DAY), (DAY, DAY)] {
            let err = validate_event(&input(start, end)).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "{err:?}");
        }
    }

    #[test]
    fn validate_rejects_mismatched_date() {
        let mut i = input(DAY + 9 * H, DAY + 10 * H);
        i.date = NaiveDate::from_ymd_opt(2025, 6, 3);
        assert!(matches!(validate_event(&i), Err(EngineError::Validation(_))));

        i.date = NaiveDate::from_ymd_opt(2025, 6, 2);
        assert!(validate_event(&i).is_ok());
    }

    #[test]
    fn validate_requires_title_and_venue_name() {
        let mut i = input(DAY, DAY + H);
        i.title = "   ".into();
        assert!(matches!(validate_event(&i), Err(EngineError::Validation(_))));

        let mut i = input(DAY, DAY + H);
        i.venue = VenueRef::Name(String::new());
        assert!(matches!(validate_event(&i), Err(EngineError::Validation(_))));
    }

    #[test]
    fn validate_rejects_overlong_event() {
        let i = input(DAY, DAY + MAX_EVENT_DURATION_MS + 1);
        assert!(matches!(validate_event(&i), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn lookup_window_has_no_duration_cap() {
        let long = DAY + MAX_EVENT_DURATION_MS + 1;
        assert_eq!(validate_window(DAY, long).unwrap(), Span::new(DAY, long));
        assert!(matches!(validate_span(DAY, long), Err(EngineError::LimitExceeded(_))));
        assert!(matches!(validate_window(DAY, DAY), Err(EngineError::Validation(_))));
    }

    #[test]
    fn validate_venue_requires_name() {
        let err = validate_venue(&VenueInput::default()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let v = validate_venue(&VenueInput {
            name: " Annex ".into(),
            location: Some(" ".into()),
            capacity: Some(40),
        })
        .unwrap();
        assert_eq!(v.name, "Annex");
        assert_eq!(v.location, None);
        assert_eq!(v.capacity, Some(40));
    }
}
