//! The ordered list of stops on one route, as the operator sees and edits it.
//!
//! Positions are kept dense: after a mutation is complete the `order` of the entry at
//! index `i` is `i + 1`. Renumbering the whole list is the unit of persistence, see
//! [`RouteSequence::renumber`] and [`RouteSequence::upsert_rows`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use serde::{Serialize, Serializer};

use super::db_model::{LinkId, RouteId, RouteStopDb, RouteStopUpsert, StopDb, StopId};

const PLACEHOLDER_PREFIX: &str = "temp-";

/// Locally generated identity of a link whose create call has not resolved yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaceholderId(pub u64);

impl fmt::Display for PlaceholderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PLACEHOLDER_PREFIX}{}", self.0)
    }
}

/// Identity of an entry in the sequence.
///
/// A pending link only ever has a placeholder, a confirmed one only ever has the store id.
/// The two spaces can't collide because they are different variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinkKey {
    Pending(PlaceholderId),
    Confirmed(LinkId),
}

#[cfg(test)]
impl LinkKey {
    pub fn is_pending(&self) -> bool {
        matches!(self, LinkKey::Pending(_))
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKey::Pending(placeholder) => placeholder.fmt(f),
            LinkKey::Confirmed(id) => id.fmt(f),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("invalid link key {0:?}")]
pub struct ParseLinkKeyError(String);

impl FromStr for LinkKey {
    type Err = ParseLinkKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s.strip_prefix(PLACEHOLDER_PREFIX) {
            Some(n) => n.parse().map(|n| LinkKey::Pending(PlaceholderId(n))),
            None => s.parse().map(LinkKey::Confirmed),
        };

        parsed.map_err(|_| ParseLinkKeyError(s.to_string()))
    }
}

impl Serialize for LinkKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SequenceEntry {
    pub link: LinkKey,
    pub order: i32,
    pub stop: StopDb,
}

impl SequenceEntry {
    pub fn confirmed(row: RouteStopDb) -> Self {
        SequenceEntry {
            link: LinkKey::Confirmed(row.id),
            order: row.stop_order,
            stop: row.stop(),
        }
    }
}

/// An entry taken out of the sequence, with the links that were on either side of it.
#[derive(Clone, Debug, PartialEq)]
pub struct RemovedEntry {
    pub entry: SequenceEntry,
    neighbours: Option<Neighbours>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Neighbours {
    after: Option<LinkKey>,
    before: Option<LinkKey>,
}

impl RemovedEntry {
    /// An entry that was never part of the sequence. It goes back by position alone.
    pub fn detached(entry: SequenceEntry) -> Self {
        RemovedEntry {
            entry,
            neighbours: None,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("index {index} is out of range for a sequence of {len} stops")]
pub struct IndexOutOfRange {
    pub index: usize,
    pub len: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteSequence {
    route_id: RouteId,
    entries: Vec<SequenceEntry>,
}

impl RouteSequence {
    /// Builds the sequence from store rows, sorted by their stored position.
    pub fn from_rows(route_id: RouteId, rows: Vec<RouteStopDb>) -> Self {
        let entries = rows
            .into_iter()
            .filter(|row| row.route_id == route_id)
            .sorted_by_key(|row| (row.stop_order, row.id))
            .map(SequenceEntry::confirmed)
            .collect_vec();

        RouteSequence { route_id, entries }
    }

    pub fn route_id(&self) -> RouteId {
        self.route_id
    }

    pub fn entries(&self) -> &[SequenceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains_stop(&self, stop_id: StopId) -> bool {
        self.entries.iter().any(|e| e.stop.id == stop_id)
    }

    pub fn stop_ids(&self) -> HashSet<StopId> {
        self.entries.iter().map(|e| e.stop.id).collect()
    }

    pub fn position(&self, link: LinkKey) -> Option<usize> {
        self.entries.iter().position(|e| e.link == link)
    }

    pub fn position_of_stop(&self, stop_id: StopId) -> Option<usize> {
        self.entries.iter().position(|e| e.stop.id == stop_id)
    }

    /// `currentMax + 1`, or 1 for an empty route.
    pub fn next_order(&self) -> i32 {
        self.entries.iter().map(|e| e.order).max().unwrap_or(0) + 1
    }

    /// Appends an optimistic entry and returns the position it was given.
    pub fn push_pending(&mut self, placeholder: PlaceholderId, stop: StopDb) -> i32 {
        let order = self.next_order();
        self.entries.push(SequenceEntry {
            link: LinkKey::Pending(placeholder),
            order,
            stop,
        });
        order
    }

    /// Swaps the placeholder entry for the store-confirmed one without moving it.
    ///
    /// Returns the index of the replaced entry, or `None` if the placeholder is gone.
    pub fn confirm(&mut self, placeholder: PlaceholderId, row: RouteStopDb) -> Option<usize> {
        let index = self.position(LinkKey::Pending(placeholder))?;
        self.entries[index] = SequenceEntry::confirmed(row);
        Some(index)
    }

    pub fn remove(&mut self, link: LinkKey) -> Option<RemovedEntry> {
        let index = self.position(link)?;
        let neighbours = Neighbours {
            after: index.checked_sub(1).map(|i| self.entries[i].link),
            before: self.entries.get(index + 1).map(|e| e.link),
        };
        Some(RemovedEntry {
            entry: self.entries.remove(index),
            neighbours: Some(neighbours),
        })
    }

    /// Puts a removed entry back between the neighbours it had. Returns the index it landed at.
    ///
    /// The link that followed it wins over the one that preceded it. When neither is still
    /// around, the entry goes in front of the first entry with a larger position. It keeps its
    /// old position; call [`RouteSequence::renumber`] afterwards.
    pub fn reinsert(&mut self, removed: RemovedEntry) -> usize {
        let RemovedEntry { entry, neighbours } = removed;
        let index = neighbours
            .and_then(|Neighbours { after, before }| {
                let previous = after.map(|link| self.position(link));
                let next = before.map(|link| self.position(link));
                match (previous, next) {
                    (_, Some(Some(index))) => Some(index),
                    (Some(Some(index)), _) => Some(index + 1),
                    (_, None) => Some(self.entries.len()),
                    (None, _) => Some(0),
                    (Some(None), Some(None)) => None,
                }
            })
            .unwrap_or_else(|| {
                self.entries
                    .iter()
                    .position(|e| e.order > entry.order)
                    .unwrap_or(self.entries.len())
            });
        self.entries.insert(index, entry);
        index
    }

    /// Moves the entry at `from` so that it ends up at `to`. Returns `false` for a no-op move.
    ///
    /// Positions are not touched; call [`RouteSequence::renumber`] afterwards.
    pub fn move_entry(&mut self, from: usize, to: usize) -> Result<bool, IndexOutOfRange> {
        let len = self.entries.len();
        for index in [from, to] {
            if index >= len {
                return Err(IndexOutOfRange { index, len });
            }
        }
        if from == to {
            return Ok(false);
        }

        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
        Ok(true)
    }

    /// Rewrites every position as `index + 1`. Returns whether any position changed.
    pub fn renumber(&mut self) -> bool {
        let mut changed = false;
        for (index, entry) in self.entries.iter_mut().enumerate() {
            let order = index as i32 + 1;
            if entry.order != order {
                entry.order = order;
                changed = true;
            }
        }
        changed
    }

    #[cfg(test)]
    pub fn is_dense(&self) -> bool {
        self.entries
            .iter()
            .enumerate()
            .all(|(index, e)| e.order == index as i32 + 1)
    }

    /// Full state of every confirmed link, ready for one bulk upsert.
    ///
    /// Pending links are left out: they have no store id yet and their create call already
    /// carries a position. They are synced once confirmed.
    pub fn upsert_rows(&self) -> Vec<RouteStopUpsert> {
        self.entries
            .iter()
            .filter_map(|e| match e.link {
                LinkKey::Confirmed(id) => Some(RouteStopUpsert {
                    id,
                    route_id: self.route_id,
                    stop_id: e.stop.id,
                    stop_order: e.order,
                }),
                LinkKey::Pending(_) => None,
            })
            .collect_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(id: StopId, name: &str) -> StopDb {
        StopDb {
            id,
            name: name.to_string(),
            lat: 6.9 + id as f64 / 100.0,
            lng: 79.8,
        }
    }

    fn row(id: LinkId, stop_id: StopId, name: &str, stop_order: i32) -> RouteStopDb {
        let stop = stop(stop_id, name);
        RouteStopDb {
            id,
            route_id: 1,
            stop_order,
            stop_id,
            stop_name: stop.name,
            lat: stop.lat,
            lng: stop.lng,
        }
    }

    fn abc() -> RouteSequence {
        RouteSequence::from_rows(
            1,
            vec![row(12, 3, "C", 3), row(10, 1, "A", 1), row(11, 2, "B", 2)],
        )
    }

    fn names(sequence: &RouteSequence) -> Vec<&str> {
        sequence
            .entries()
            .iter()
            .map(|e| e.stop.name.as_str())
            .collect()
    }

    #[test]
    fn rows_are_sorted_by_position() {
        let sequence = abc();
        assert_eq!(names(&sequence), ["A", "B", "C"]);
        assert!(sequence.is_dense());
    }

    #[test]
    fn link_keys_round_trip_through_strings() {
        assert_eq!(
            "temp-4".parse::<LinkKey>(),
            Ok(LinkKey::Pending(PlaceholderId(4)))
        );
        assert_eq!("17".parse::<LinkKey>(), Ok(LinkKey::Confirmed(17)));
        assert!("temp-".parse::<LinkKey>().is_err());
        assert!("seventeen".parse::<LinkKey>().is_err());
        assert_eq!(LinkKey::Pending(PlaceholderId(1)).to_string(), "temp-1");
    }

    #[test]
    fn dragging_last_to_front_renumbers_everything() {
        let mut sequence = abc();
        assert_eq!(sequence.move_entry(2, 0), Ok(true));
        assert!(sequence.renumber());

        assert_eq!(names(&sequence), ["C", "A", "B"]);
        let rows = sequence.upsert_rows();
        assert_eq!(
            rows.iter().map(|r| (r.id, r.stop_order)).collect_vec(),
            [(12, 1), (10, 2), (11, 3)]
        );
    }

    #[test]
    fn no_op_move_leaves_positions_alone() {
        let mut sequence = abc();
        let before = sequence.clone();
        assert_eq!(sequence.move_entry(1, 1), Ok(false));
        assert!(!sequence.renumber());
        assert_eq!(sequence, before);
    }

    #[test]
    fn out_of_range_move_is_rejected() {
        let mut sequence = abc();
        assert_eq!(
            sequence.move_entry(0, 3),
            Err(IndexOutOfRange { index: 3, len: 3 })
        );
    }

    #[test]
    fn pending_entry_is_appended_and_confirmed_in_place() {
        let mut sequence = abc();
        let order = sequence.push_pending(PlaceholderId(1), stop(4, "D"));
        assert_eq!(order, 4);
        assert!(sequence.upsert_rows().iter().all(|r| r.stop_id != 4));

        // a later drag moves the pending entry before the confirmation lands
        sequence.move_entry(3, 0).unwrap();
        sequence.renumber();

        let index = sequence.confirm(PlaceholderId(1), row(13, 4, "D", 4));
        assert_eq!(index, Some(0));
        assert_eq!(sequence.entries()[0].link, LinkKey::Confirmed(13));
        assert!(sequence.position(LinkKey::Pending(PlaceholderId(1))).is_none());
        assert!(sequence.renumber());
        assert!(sequence.is_dense());
    }

    #[test]
    fn confirming_a_missing_placeholder_does_nothing() {
        let mut sequence = abc();
        let before = sequence.clone();
        assert_eq!(sequence.confirm(PlaceholderId(9), row(13, 4, "D", 4)), None);
        assert_eq!(sequence, before);
    }

    #[test]
    fn removed_entry_goes_back_between_its_neighbours() {
        let mut sequence = abc();
        let removed = sequence.remove(LinkKey::Confirmed(11)).unwrap();
        assert_eq!(names(&sequence), ["A", "C"]);

        assert_eq!(sequence.reinsert(removed), 1);
        assert_eq!(names(&sequence), ["A", "B", "C"]);
        assert!(!sequence.renumber());
    }

    #[test]
    fn reinsert_after_a_reorder_still_leaves_dense_positions() {
        let mut sequence = abc();
        let removed = sequence.remove(LinkKey::Confirmed(10)).unwrap();
        sequence.move_entry(1, 0).unwrap();
        sequence.renumber();

        sequence.reinsert(removed);
        assert_eq!(names(&sequence), ["C", "A", "B"]);
        assert!(!sequence.is_dense());
        assert!(sequence.renumber());
        assert!(sequence.is_dense());
    }

    #[test]
    fn reinsert_follows_neighbours_after_a_renumber() {
        let mut sequence = abc();
        sequence.push_pending(PlaceholderId(1), stop(4, "D"));
        sequence.confirm(PlaceholderId(1), row(13, 4, "D", 4));

        sequence.remove(LinkKey::Confirmed(11));
        let c = sequence.remove(LinkKey::Confirmed(12)).unwrap();
        sequence.renumber();
        assert_eq!(names(&sequence), ["A", "D"]);

        assert_eq!(sequence.reinsert(c), 1);
        assert_eq!(names(&sequence), ["A", "C", "D"]);
    }

    #[test]
    fn two_removals_go_back_in_either_order() {
        for undo_b_first in [true, false] {
            let mut sequence = abc();
            let b = sequence.remove(LinkKey::Confirmed(11)).unwrap();
            let c = sequence.remove(LinkKey::Confirmed(12)).unwrap();

            if undo_b_first {
                sequence.reinsert(b);
                sequence.reinsert(c);
            } else {
                sequence.reinsert(c);
                sequence.reinsert(b);
            }
            assert_eq!(names(&sequence), ["A", "B", "C"]);
        }
    }

    #[test]
    fn detached_entry_goes_back_by_position() {
        let mut sequence = abc();
        let entry = SequenceEntry::confirmed(row(13, 4, "D", 2));

        assert_eq!(sequence.reinsert(RemovedEntry::detached(entry)), 2);
        assert_eq!(names(&sequence), ["A", "B", "D", "C"]);
    }

    #[test]
    fn next_order_follows_the_largest_position() {
        let mut sequence = RouteSequence::from_rows(1, vec![]);
        assert_eq!(sequence.next_order(), 1);
        sequence.push_pending(PlaceholderId(1), stop(1, "A"));
        assert_eq!(sequence.next_order(), 2);
    }
}
