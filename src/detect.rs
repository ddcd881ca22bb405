//! Change detection between listing polls
//!
//! Two strategies live behind one interface, chosen per source by its
//! listing affordance:
//!
//! - **Snapshot diff** for non-chronological catalogs: the previous poll's
//!   id set is compared against the current one. Ids that vanished are
//!   "dead" (the item completed and earns one final detail fetch); every
//!   currently visible id is eligible for re-observation.
//! - **High-water-mark** for reverse-chronological feeds: only entries with
//!   an origin timestamp strictly newer than the stored mark are new, and
//!   there is no dead concept.
//!
//! Callers must not rely on the iteration order of the returned sets.

use crate::config::DetectionStrategy;
use crate::source::ListingSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Persisted crawl-progress state for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Cursor {
    /// The full id set seen at the previous poll
    Snapshot { ids: HashSet<i64> },

    /// The newest origin timestamp observed so far
    HighWaterMark {
        last_observed: Option<DateTime<Utc>>,
    },
}

impl Cursor {
    /// The cold-start cursor for a detection strategy
    pub fn initial(strategy: DetectionStrategy) -> Self {
        match strategy {
            DetectionStrategy::Snapshot => Cursor::Snapshot {
                ids: HashSet::new(),
            },
            DetectionStrategy::HighWaterMark => Cursor::HighWaterMark {
                last_observed: None,
            },
        }
    }
}

/// Outcome of comparing one listing poll against the stored cursor
#[derive(Debug, Clone)]
pub struct ChangeSet {
    /// Ids visible now that were not visible before
    pub new: HashSet<i64>,

    /// Ids visible before that are absent now
    pub dead: HashSet<i64>,

    /// Item ids worth a detail fetch this cycle, in selection order:
    /// new items first, then dead items (one final fetch each), then any
    /// remaining visible items for re-observation
    pub to_fetch: Vec<i64>,

    /// The cursor to persist once the cycle's fetches have been attempted
    pub next: Cursor,
}

/// Compares a fresh listing against the stored cursor
pub fn detect_changes(cursor: &Cursor, listing: &ListingSnapshot) -> ChangeSet {
    match cursor {
        Cursor::Snapshot { ids: previous } => diff_snapshot(previous, listing),
        Cursor::HighWaterMark { last_observed } => diff_high_water_mark(*last_observed, listing),
    }
}

fn diff_snapshot(previous: &HashSet<i64>, listing: &ListingSnapshot) -> ChangeSet {
    let current = listing.ids();

    let new: HashSet<i64> = current.difference(previous).copied().collect();
    let dead: HashSet<i64> = previous.difference(&current).copied().collect();

    // Selection order: new first, then a final fetch for dead items, then
    // the already-known visible items. Sorted within each group so cycles
    // behave deterministically even though the sets themselves are unordered.
    let mut to_fetch = sorted(new.iter());
    to_fetch.extend(sorted(dead.iter()));
    to_fetch.extend(sorted(current.difference(&new)));

    ChangeSet {
        new,
        dead,
        to_fetch,
        next: Cursor::Snapshot { ids: current },
    }
}

fn diff_high_water_mark(mark: Option<DateTime<Utc>>, listing: &ListingSnapshot) -> ChangeSet {
    let new: HashSet<i64> = listing
        .entries
        .iter()
        .filter(|e| match (e.created_at, mark) {
            (Some(created), Some(mark)) => created > mark,
            // No stored mark yet: everything is new
            (Some(_), None) => true,
            // Entry without a timestamp can never pass the mark
            (None, _) => false,
        })
        .map(|e| e.id)
        .collect();

    let next_mark = match (listing.max_created_at(), mark) {
        (Some(observed), Some(mark)) => Some(observed.max(mark)),
        (Some(observed), None) => Some(observed),
        (None, mark) => mark,
    };

    ChangeSet {
        to_fetch: sorted(new.iter()),
        new,
        dead: HashSet::new(),
        next: Cursor::HighWaterMark {
            last_observed: next_mark,
        },
    }
}

fn sorted<'a>(ids: impl Iterator<Item = &'a i64>) -> Vec<i64> {
    let mut out: Vec<i64> = ids.copied().collect();
    out.sort_unstable();
    out
}
