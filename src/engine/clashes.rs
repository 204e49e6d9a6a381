use chrono::NaiveDate;

use crate::model::*;

use super::Engine;

/// Every overlapping pair `(i, j)`, `i < j`, in a list sorted by start.
///
/// Pairs come out ordered by `i`, then `j`. Overlap is not transitive, so three
/// events where only neighbours overlap give two pairs, and three mutually
/// overlapping events give three.
pub fn pairwise_clashes(sorted: &[Event]) -> Vec<(usize, usize)> {
    debug_assert!(sorted.windows(2).all(|w| w[0].span.start <= w[1].span.start));
    let mut pairs = Vec::new();
    for (i, a) in sorted.iter().enumerate() {
        for (j, b) in sorted.iter().enumerate().skip(i + 1) {
            // Sorted by start: once b starts at or after a ends, so does every later b.
            if b.span.start >= a.span.end {
                break;
            }
            if a.span.overlaps(&b.span) {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

impl Engine {
    /// All clashing pairs among active events dated `date`.
    ///
    /// Ordered by venue id, then by the first event's position in
    /// `(start, end, id)` order, then by the second's.
    pub async fn find_clashes_for_date(&self, date: NaiveDate) -> Vec<Clash> {
        let mut clashes = Vec::new();
        for id in self.venue_ids_sorted() {
            let Some(rs) = self.get_venue(&id) else { continue };
            let guard = rs.read().await;

            let mut day: Vec<&Event> = guard
                .events
                .iter()
                .filter(|e| e.is_active() && e.date == date)
                .collect();
            if day.len() < 2 {
                continue;
            }
            day.sort_by_key(|e| (e.span.start, e.span.end, e.id));
            let day: Vec<Event> = day.into_iter().cloned().collect();

            let venue = guard.info();
            for (i, j) in pairwise_clashes(&day) {
                clashes.push(Clash {
                    venue: venue.clone(),
                    first: day[i].clone(),
                    second: day[j].clone(),
                });
            }
        }
        clashes
    }
}
