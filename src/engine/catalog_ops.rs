//! Route and stop catalogs, route and stop lifecycle, and committing stop drafts.

use tracing::{debug, info};

use super::{Catalog, Completion, Engine, Reply};
use crate::{
    error::{EngineError, StoreError},
    geocoding::DraftId,
    model::{LinkKey, RouteDb, RouteId, StopDb, StopId},
};

const DUPLICATE_LOCATION: &str = "A stop already exists at this exact location.";

/// Catalog rows are kept sorted by name, the way the store returns them.
trait CatalogRow {
    fn id(&self) -> i64;
    fn name(&self) -> &str;
}

impl CatalogRow for RouteDb {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl CatalogRow for StopDb {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn insert_by_name<T: CatalogRow>(rows: &mut Vec<T>, row: T) {
    rows.retain(|r| r.id() != row.id());
    let index = rows.partition_point(|r| (r.name(), r.id()) < (row.name(), row.id()));
    rows.insert(index, row);
}

impl Engine {
    pub(super) fn refresh_catalog(&mut self, catalog: Catalog) {
        let store = self.store.clone();
        match catalog {
            Catalog::Routes => {
                self.routes_generation += 1;
                let generation = self.routes_generation;
                self.spawn_call(async move {
                    let result = store.fetch_routes().await;
                    Completion::RoutesFetched { generation, result }
                });
            }
            Catalog::Stops => {
                self.stops_generation += 1;
                let generation = self.stops_generation;
                self.spawn_call(async move {
                    let result = store.fetch_stops().await;
                    Completion::StopsFetched { generation, result }
                });
            }
        }
    }

    pub(super) fn on_routes_fetched(
        &mut self,
        generation: u64,
        result: Result<Vec<RouteDb>, StoreError>,
    ) {
        if generation != self.routes_generation {
            debug!(generation, "dropping an outdated route catalog");
            return;
        }

        match result {
            Ok(routes) => {
                debug!(routes = routes.len(), "route catalog refreshed");
                self.routes = routes;
            }
            Err(err) => self.surface("Could not load the routes", &err),
        }
    }

    pub(super) fn on_stops_fetched(
        &mut self,
        generation: u64,
        result: Result<Vec<StopDb>, StoreError>,
    ) {
        if generation != self.stops_generation {
            debug!(generation, "dropping an outdated stop catalog");
            return;
        }

        match result {
            Ok(stops) => {
                debug!(stops = stops.len(), "stop catalog refreshed");
                self.stops = stops;
            }
            Err(err) => self.surface("Could not load the stops", &err),
        }
    }

    pub(super) fn create_route(&mut self, name: String, reply: Reply) {
        let name = name.trim().to_string();
        if name.is_empty() {
            return self.respond(reply, Err(EngineError::EmptyRouteName));
        }

        let store = self.store.clone();
        self.spawn_write(async move {
            let result = store.create_route(name).await;
            Completion::RouteCreated { result, reply }
        });
    }

    pub(super) fn on_route_created(&mut self, result: Result<RouteDb, StoreError>, reply: Reply) {
        match result {
            Ok(route) => {
                info!(route_id = route.id, name = %route.name, "created route");
                insert_by_name(&mut self.routes, route);
                self.respond(reply, Ok(()));
            }
            Err(err) => {
                self.surface("Could not create the route", &err);
                self.respond(reply, Err(err.into()));
            }
        }
    }

    /// Buses and students are detached before the route row goes, so that no reference
    /// blocks the delete.
    pub(super) fn delete_route(&mut self, route_id: RouteId, reply: Reply) {
        if !self.routes.iter().any(|r| r.id == route_id) {
            return self.respond(reply, Err(EngineError::UnknownRoute(route_id)));
        }

        let store = self.store.clone();
        self.spawn_write(async move {
            let result = match store.clear_route_references(route_id).await {
                Ok(()) => store.delete_route(route_id).await,
                Err(err) => Err(err),
            };
            Completion::RouteDeleted {
                route_id,
                result,
                reply,
            }
        });
    }

    pub(super) fn on_route_deleted(
        &mut self,
        route_id: RouteId,
        result: Result<(), StoreError>,
        reply: Reply,
    ) {
        match result {
            Ok(()) => {
                info!(route_id, "deleted route");
                self.routes.retain(|r| r.id != route_id);
                if self
                    .selection
                    .as_ref()
                    .is_some_and(|s| s.route_id == route_id)
                {
                    self.selection = None;
                    self.release_select_waiters();
                }
                self.respond(reply, Ok(()));
            }
            Err(err) => {
                self.surface("Could not delete the route", &err);
                self.respond(reply, Err(err.into()));
            }
        }
    }

    pub(super) fn delete_stop(&mut self, stop_id: StopId, reply: Reply) {
        if !self.stops.iter().any(|s| s.id == stop_id) {
            return self.respond(reply, Err(EngineError::UnknownStop(stop_id)));
        }

        let store = self.store.clone();
        self.spawn_write(async move {
            let result = store.delete_stop(stop_id).await;
            Completion::StopDeleted {
                stop_id,
                result,
                reply,
            }
        });
    }

    pub(super) fn on_stop_deleted(
        &mut self,
        stop_id: StopId,
        result: Result<(), StoreError>,
        reply: Reply,
    ) {
        if let Err(err) = result {
            self.surface("Could not delete the stop", &err);
            return self.respond(reply, Err(err.into()));
        }

        info!(stop_id, "deleted stop");
        self.stops.retain(|s| s.id != stop_id);

        // the store dropped the stop's links, close the gap it left in the open route
        let removed = self.selection.as_mut().and_then(|selection| {
            let sequence = selection.sequence.as_mut()?;
            let index = sequence.position_of_stop(stop_id)?;
            let link = sequence.entries()[index].link;
            sequence.remove(link)?;
            Some((selection.route_id, link))
        });
        if let Some((route_id, link)) = removed {
            if let LinkKey::Pending(placeholder) = link {
                self.cancelled_adds.insert(placeholder);
            }
            self.settle_order(route_id);
        }

        self.respond(reply, Ok(()));
    }

    pub(super) fn commit_draft(&mut self, reply: Reply) {
        let validated = self
            .draft
            .current()
            .ok_or(EngineError::NoDraft)
            .and_then(|draft| Ok((draft.id, draft.to_new_stop()?)));
        let (draft_id, new_stop) = match validated {
            Ok(validated) => validated,
            Err(err) => return self.respond(reply, Err(err)),
        };

        let store = self.store.clone();
        self.spawn_write(async move {
            let result = store.create_stop(new_stop).await;
            Completion::StopCreated {
                draft_id,
                result,
                reply,
            }
        });
    }

    pub(super) fn on_stop_created(
        &mut self,
        draft_id: DraftId,
        result: Result<StopDb, StoreError>,
        reply: Reply,
    ) {
        match result {
            Ok(stop) => {
                info!(stop_id = stop.id, name = %stop.name, "created stop");
                insert_by_name(&mut self.stops, stop);
                self.draft.close(draft_id);
                self.respond(reply, Ok(()));
            }
            Err(err) => {
                // the draft stays open so the operator can move or rename it
                match &err {
                    StoreError::UniqueViolation { .. } => self.surface(DUPLICATE_LOCATION, &err),
                    _ => self.surface("Could not save the stop", &err),
                }
                self.respond(reply, Err(err.into()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(id: RouteId, name: &str) -> RouteDb {
        RouteDb {
            id,
            name: name.to_string(),
            bus_count: 0,
        }
    }

    #[test]
    fn rows_are_inserted_in_name_order_without_duplicates() {
        let mut routes = vec![route(1, "Alpha"), route(2, "Gamma")];

        insert_by_name(&mut routes, route(3, "Beta"));
        insert_by_name(&mut routes, route(1, "Alpha"));
        insert_by_name(&mut routes, route(4, "Zulu"));

        let names = routes.iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["Alpha", "Beta", "Gamma", "Zulu"]);
    }
}
