//! Editing the stop sequence of the selected route.
//!
//! Every mutation is applied to the local sequence first and reported to the operator right
//! away. The store call runs behind it, and its completion either confirms the optimistic
//! state or reverts exactly the entry it was about, found by identity.

use tracing::{debug, info};

use super::{Completion, Engine, Reply, Selection};
use crate::{
    error::{EngineError, StoreError},
    model::{
        LinkId, LinkKey, NewRouteStop, PlaceholderId, RemovedEntry, RouteId, RouteSequence,
        RouteStopDb, SequenceEntry, StopId,
    },
};

impl Engine {
    fn open_sequence(&self) -> Result<&RouteSequence, EngineError> {
        let selection = self.selection.as_ref().ok_or(EngineError::NoRouteSelected)?;
        selection
            .sequence
            .as_ref()
            .ok_or(EngineError::SequenceLoading(selection.route_id))
    }

    fn open_sequence_mut(&mut self) -> Result<&mut RouteSequence, EngineError> {
        let selection = self.selection.as_mut().ok_or(EngineError::NoRouteSelected)?;
        let route_id = selection.route_id;
        selection
            .sequence
            .as_mut()
            .ok_or(EngineError::SequenceLoading(route_id))
    }

    /// The loaded sequence of `route_id`, if that route is still the open one.
    pub(super) fn sequence_for(&mut self, route_id: RouteId) -> Option<&mut RouteSequence> {
        self.selection
            .as_mut()
            .filter(|s| s.route_id == route_id)
            .and_then(|s| s.sequence.as_mut())
    }

    pub(super) fn select_route(&mut self, route_id: Option<RouteId>, reply: Reply) {
        let Some(route_id) = route_id else {
            self.selection = None;
            self.release_select_waiters();
            return self.respond(reply, Ok(()));
        };

        if !self.routes.iter().any(|r| r.id == route_id) {
            return self.respond(reply, Err(EngineError::UnknownRoute(route_id)));
        }

        if let Some(selection) = self.selection.as_ref().filter(|s| s.route_id == route_id) {
            if selection.sequence.is_some() {
                return self.respond(reply, Ok(()));
            }
            self.select_waiters.push(reply);
            return;
        }

        self.select_generation += 1;
        let generation = self.select_generation;
        self.selection = Some(Selection {
            route_id,
            generation,
            sequence: None,
        });
        self.select_waiters.push(reply);

        info!(route_id, "loading the stops of the route");
        let store = self.store.clone();
        // queued with the writes so that it sees every edit made before it
        self.spawn_write(async move {
            let result = store.fetch_route_stops(route_id).await;
            Completion::SequenceLoaded {
                route_id,
                generation,
                result,
            }
        });
    }

    pub(super) fn release_select_waiters(&mut self) {
        for waiter in std::mem::take(&mut self.select_waiters) {
            self.respond(waiter, Ok(()));
        }
    }

    pub(super) fn on_sequence_loaded(
        &mut self,
        route_id: RouteId,
        generation: u64,
        result: Result<Vec<RouteStopDb>, StoreError>,
    ) {
        let Some(selection) = self
            .selection
            .as_mut()
            .filter(|s| s.generation == generation)
        else {
            debug!(route_id, "dropping the stops of a route that is no longer selected");
            return;
        };

        match result {
            Ok(rows) => {
                let mut sequence = RouteSequence::from_rows(route_id, rows);
                let healed = sequence.renumber();
                debug!(route_id, stops = sequence.len(), "loaded route");
                selection.sequence = Some(sequence);

                if healed {
                    info!(route_id, "stored positions had gaps, renumbering");
                    self.persist_order(route_id);
                }
                self.release_select_waiters();
            }
            Err(err) => {
                self.selection = None;
                self.surface("Could not load the stops of the route", &err);
                for waiter in std::mem::take(&mut self.select_waiters) {
                    self.respond(
                        waiter,
                        Err(EngineError::SequenceLoadFailed {
                            route_id,
                            message: err.to_string(),
                        }),
                    );
                }
            }
        }
    }

    pub(super) fn add_stop(&mut self, stop_id: StopId) -> Result<(), EngineError> {
        let stop = self
            .stops
            .iter()
            .find(|s| s.id == stop_id)
            .cloned()
            .ok_or(EngineError::UnknownStop(stop_id))?;

        let sequence = self.open_sequence()?;
        let route_id = sequence.route_id();
        if sequence.contains_stop(stop_id) {
            return Err(EngineError::StopAlreadyOnRoute { route_id, stop_id });
        }

        let placeholder = self.next_placeholder();
        let stop_order = self.open_sequence_mut()?.push_pending(placeholder, stop);
        debug!(%placeholder, route_id, stop_id, stop_order, "added stop");

        let store = self.store.clone();
        self.spawn_write(async move {
            let result = store
                .create_route_stop(NewRouteStop {
                    route_id,
                    stop_id,
                    stop_order,
                })
                .await;
            Completion::LinkCreated {
                route_id,
                placeholder,
                result,
            }
        });

        Ok(())
    }

    pub(super) fn on_link_created(
        &mut self,
        route_id: RouteId,
        placeholder: PlaceholderId,
        result: Result<RouteStopDb, StoreError>,
    ) {
        let cancelled = self.cancelled_adds.remove(&placeholder);

        match result {
            Ok(row) if cancelled => {
                debug!(
                    %placeholder,
                    link_id = row.id,
                    "link was removed while pending, deleting it"
                );
                let link_id = row.id;
                let entry = RemovedEntry::detached(SequenceEntry::confirmed(row));
                self.removals.insert(link_id, entry);
                self.spawn_link_delete(route_id, link_id);
            }
            Ok(row) => {
                let link_id = row.id;
                let Some(sequence) = self.sequence_for(route_id) else {
                    debug!(
                        %placeholder,
                        link_id,
                        "confirmed a link of a route that is no longer open"
                    );
                    return;
                };

                if sequence.confirm(placeholder, row).is_some() && sequence.renumber() {
                    self.persist_order(route_id);
                }
                debug!(%placeholder, link_id, "link confirmed");
            }
            Err(err) if cancelled => {
                debug!(%placeholder, error = %err, "add of a removed link failed");
                self.settle_order(route_id);
            }
            Err(err) => {
                if let Some(sequence) = self.sequence_for(route_id) {
                    sequence.remove(LinkKey::Pending(placeholder));
                }
                self.settle_order(route_id);
                self.surface("Could not add the stop to the route", &err);
            }
        }
    }

    pub(super) fn remove_link(&mut self, link: LinkKey) -> Result<(), EngineError> {
        let sequence = self.open_sequence_mut()?;
        let route_id = sequence.route_id();
        let removed = sequence.remove(link).ok_or(EngineError::UnknownLink(link))?;
        debug!(%link, route_id, stop_id = removed.entry.stop.id, "removed stop");

        match link {
            LinkKey::Pending(placeholder) => {
                // the link is deleted once its create call resolves
                self.cancelled_adds.insert(placeholder);
                self.settle_order(route_id);
            }
            LinkKey::Confirmed(link_id) => {
                self.removals.insert(link_id, removed);
                self.spawn_link_delete(route_id, link_id);
            }
        }

        Ok(())
    }

    fn spawn_link_delete(&mut self, route_id: RouteId, link_id: LinkId) {
        self.saving += 1;
        let store = self.store.clone();
        self.spawn_write(async move {
            let result = store.delete_route_stop(link_id).await;
            Completion::LinkDeleted {
                route_id,
                link_id,
                result,
            }
        });
    }

    pub(super) fn on_link_deleted(
        &mut self,
        route_id: RouteId,
        link_id: LinkId,
        result: Result<(), StoreError>,
    ) {
        self.saving -= 1;
        let removed = self.removals.remove(&link_id);

        match result {
            Ok(()) => {
                debug!(link_id, "link deleted");
                self.settle_order(route_id);
            }
            Err(StoreError::NotFound(_)) => {
                debug!(link_id, "link was already gone");
                self.settle_order(route_id);
            }
            Err(err) => {
                if let (Some(entry), Some(sequence)) = (removed, self.sequence_for(route_id)) {
                    sequence.reinsert(entry);
                }
                self.settle_order(route_id);
                self.surface("Could not remove the stop from the route", &err);
            }
        }
    }

    pub(super) fn reorder(&mut self, from: usize, to: usize) -> Result<(), EngineError> {
        let sequence = self.open_sequence_mut()?;
        let route_id = sequence.route_id();
        if !sequence.move_entry(from, to)? {
            return Ok(());
        }

        sequence.renumber();
        debug!(route_id, from, to, "reordered stops");
        self.persist_order(route_id);
        Ok(())
    }

    /// Renumbers the open sequence of `route_id` and persists it if anything moved.
    pub(super) fn settle_order(&mut self, route_id: RouteId) {
        if self
            .sequence_for(route_id)
            .is_some_and(|sequence| sequence.renumber())
        {
            self.persist_order(route_id);
        }
    }

    /// Writes the position of every confirmed link of the open sequence in one call.
    pub(super) fn persist_order(&mut self, route_id: RouteId) {
        let Some(sequence) = self.sequence_for(route_id) else {
            return;
        };
        let rows = sequence.upsert_rows();
        if rows.is_empty() {
            return;
        }

        self.saving += 1;
        let store = self.store.clone();
        self.spawn_write(async move {
            let result = store.upsert_route_stops(rows).await;
            Completion::OrderPersisted { route_id, result }
        });
    }

    pub(super) fn on_order_persisted(&mut self, route_id: RouteId, result: Result<(), StoreError>) {
        self.saving -= 1;
        match result {
            Ok(()) => debug!(route_id, "stop order saved"),
            // the local order stands, the next sync overwrites the stored one
            Err(err) => self.surface("Could not save the stop order", &err),
        }
    }
}
