//! In-memory [`RouteStore`] for tests.
//!
//! Mirrors the constraints of the Postgres schema, records every call and can fail or hold
//! calls of a given kind.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use itertools::Itertools;
use tokio::sync::Semaphore;

use super::RouteStore;
use crate::{
    error::StoreError,
    model::{
        LinkId, NewRouteStop, NewStop, RouteDb, RouteId, RouteStopDb, RouteStopUpsert, StopDb,
        StopId,
    },
};

/// Record of a store call for test assertions.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreOp {
    FetchRoutes,
    FetchStops,
    FetchRouteStops(RouteId),
    CreateStop(NewStop),
    CreateRoute(String),
    ClearRouteReferences(RouteId),
    DeleteRoute(RouteId),
    DeleteStop(StopId),
    CreateRouteStop(NewRouteStop),
    DeleteRouteStop(LinkId),
    UpsertRouteStops(Vec<RouteStopUpsert>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOpKind {
    FetchRoutes,
    FetchStops,
    FetchRouteStops,
    CreateStop,
    CreateRoute,
    ClearRouteReferences,
    DeleteRoute,
    DeleteStop,
    CreateRouteStop,
    DeleteRouteStop,
    UpsertRouteStops,
}

impl StoreOp {
    pub fn kind(&self) -> StoreOpKind {
        match self {
            StoreOp::FetchRoutes => StoreOpKind::FetchRoutes,
            StoreOp::FetchStops => StoreOpKind::FetchStops,
            StoreOp::FetchRouteStops(_) => StoreOpKind::FetchRouteStops,
            StoreOp::CreateStop(_) => StoreOpKind::CreateStop,
            StoreOp::CreateRoute(_) => StoreOpKind::CreateRoute,
            StoreOp::ClearRouteReferences(_) => StoreOpKind::ClearRouteReferences,
            StoreOp::DeleteRoute(_) => StoreOpKind::DeleteRoute,
            StoreOp::DeleteStop(_) => StoreOpKind::DeleteStop,
            StoreOp::CreateRouteStop(_) => StoreOpKind::CreateRouteStop,
            StoreOp::DeleteRouteStop(_) => StoreOpKind::DeleteRouteStop,
            StoreOp::UpsertRouteStops(_) => StoreOpKind::UpsertRouteStops,
        }
    }
}

#[derive(Clone, Debug)]
struct LinkRow {
    id: LinkId,
    route_id: RouteId,
    stop_id: StopId,
    stop_order: i32,
}

#[derive(Clone, Debug)]
struct Dependent {
    route_id: Option<RouteId>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    routes: Vec<(RouteId, String)>,
    stops: Vec<StopDb>,
    links: Vec<LinkRow>,
    buses: Vec<Dependent>,
    students: Vec<Dependent>,
    operations: Vec<StoreOp>,
    failures: HashSet<StoreOpKind>,
    gates: HashMap<StoreOpKind, Arc<Semaphore>>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn joined(&self, link: &LinkRow) -> Option<RouteStopDb> {
        let stop = self.stops.iter().find(|s| s.id == link.stop_id)?;
        Some(RouteStopDb {
            id: link.id,
            route_id: link.route_id,
            stop_order: link.stop_order,
            stop_id: stop.id,
            stop_name: stop.name.clone(),
            lat: stop.lat,
            lng: stop.lng,
        })
    }

    fn bus_count(&self, route_id: RouteId) -> i64 {
        self.buses
            .iter()
            .filter(|b| b.route_id == Some(route_id))
            .count() as i64
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("lock")
    }

    pub fn add_route(&self, name: &str) -> RouteId {
        let mut state = self.lock();
        let id = state.next_id();
        state.routes.push((id, name.to_string()));
        id
    }

    pub fn add_stop(&self, name: &str, lat: f64, lng: f64) -> StopId {
        let mut state = self.lock();
        let id = state.next_id();
        state.stops.push(StopDb {
            id,
            name: name.to_string(),
            lat,
            lng,
        });
        id
    }

    pub fn add_link(&self, route_id: RouteId, stop_id: StopId, stop_order: i32) -> LinkId {
        let mut state = self.lock();
        let id = state.next_id();
        state.links.push(LinkRow {
            id,
            route_id,
            stop_id,
            stop_order,
        });
        id
    }

    pub fn add_bus(&self, route_id: Option<RouteId>) {
        self.lock().buses.push(Dependent { route_id });
    }

    pub fn add_student(&self, route_id: Option<RouteId>) {
        self.lock().students.push(Dependent { route_id });
    }

    /// Renames a stop behind the engine's back, as another operator would.
    pub fn rename_stop(&self, stop_id: StopId, name: &str) {
        let mut state = self.lock();
        if let Some(stop) = state.stops.iter_mut().find(|s| s.id == stop_id) {
            stop.name = name.to_string();
        }
    }

    pub fn operations(&self) -> Vec<StoreOp> {
        self.lock().operations.clone()
    }

    pub fn operations_of(&self, kind: StoreOpKind) -> Vec<StoreOp> {
        self.lock()
            .operations
            .iter()
            .filter(|op| op.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    /// The next call of this kind fails with a transient error.
    pub fn fail_next(&self, kind: StoreOpKind) {
        self.lock().failures.insert(kind);
    }

    /// Calls of this kind wait until [`MemoryStore::release`] lets them through.
    pub fn hold(&self, kind: StoreOpKind) {
        self.lock()
            .gates
            .insert(kind, Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, kind: StoreOpKind, calls: usize) {
        if let Some(gate) = self.lock().gates.get(&kind) {
            gate.add_permits(calls);
        }
    }

    /// `(link id, stop id, position)` of the route's stored links, by position.
    pub fn stored_orders(&self, route_id: RouteId) -> Vec<(LinkId, StopId, i32)> {
        self.lock()
            .links
            .iter()
            .filter(|l| l.route_id == route_id)
            .sorted_by_key(|l| (l.stop_order, l.id))
            .map(|l| (l.id, l.stop_id, l.stop_order))
            .collect()
    }

    pub fn stop_names(&self) -> Vec<String> {
        self.lock().stops.iter().map(|s| s.name.clone()).collect()
    }

    pub fn route_referenced(&self, route_id: RouteId) -> bool {
        let state = self.lock();
        state
            .buses
            .iter()
            .chain(state.students.iter())
            .any(|d| d.route_id == Some(route_id))
    }

    async fn begin(&self, op: StoreOp) -> Result<(), StoreError> {
        let kind = op.kind();
        let gate = {
            let mut state = self.lock();
            state.operations.push(op);
            state.gates.get(&kind).cloned()
        };

        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        if self.lock().failures.remove(&kind) {
            return Err(StoreError::Unavailable(format!("injected {kind:?} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl RouteStore for MemoryStore {
    async fn fetch_routes(&self) -> Result<Vec<RouteDb>, StoreError> {
        self.begin(StoreOp::FetchRoutes).await?;
        let state = self.lock();
        Ok(state
            .routes
            .iter()
            .map(|(id, name)| RouteDb {
                id: *id,
                name: name.clone(),
                bus_count: state.bus_count(*id),
            })
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .collect())
    }

    async fn fetch_stops(&self) -> Result<Vec<StopDb>, StoreError> {
        self.begin(StoreOp::FetchStops).await?;
        Ok(self
            .lock()
            .stops
            .iter()
            .cloned()
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .collect())
    }

    async fn fetch_route_stops(&self, route_id: RouteId) -> Result<Vec<RouteStopDb>, StoreError> {
        self.begin(StoreOp::FetchRouteStops(route_id)).await?;
        let state = self.lock();
        Ok(state
            .links
            .iter()
            .filter(|l| l.route_id == route_id)
            .sorted_by_key(|l| (l.stop_order, l.id))
            .filter_map(|l| state.joined(l))
            .collect())
    }

    async fn create_stop(&self, stop: NewStop) -> Result<StopDb, StoreError> {
        self.begin(StoreOp::CreateStop(stop.clone())).await?;
        let mut state = self.lock();
        if state
            .stops
            .iter()
            .any(|s| s.lat == stop.lat && s.lng == stop.lng)
        {
            return Err(StoreError::UniqueViolation {
                constraint: Some("stops_location_key".to_string()),
            });
        }

        let created = StopDb {
            id: state.next_id(),
            name: stop.name,
            lat: stop.lat,
            lng: stop.lng,
        };
        state.stops.push(created.clone());
        Ok(created)
    }

    async fn create_route(&self, name: String) -> Result<RouteDb, StoreError> {
        self.begin(StoreOp::CreateRoute(name.clone())).await?;
        let mut state = self.lock();
        let id = state.next_id();
        state.routes.push((id, name.clone()));
        Ok(RouteDb {
            id,
            name,
            bus_count: 0,
        })
    }

    async fn clear_route_references(&self, route_id: RouteId) -> Result<(), StoreError> {
        self.begin(StoreOp::ClearRouteReferences(route_id)).await?;
        let mut state = self.lock();
        let MemoryState {
            buses, students, ..
        } = &mut *state;
        for dependent in buses.iter_mut().chain(students.iter_mut()) {
            if dependent.route_id == Some(route_id) {
                dependent.route_id = None;
            }
        }
        Ok(())
    }

    async fn delete_route(&self, route_id: RouteId) -> Result<(), StoreError> {
        self.begin(StoreOp::DeleteRoute(route_id)).await?;
        let mut state = self.lock();
        if state
            .buses
            .iter()
            .chain(state.students.iter())
            .any(|d| d.route_id == Some(route_id))
        {
            return Err(StoreError::ForeignKeyViolation {
                constraint: Some("buses_route_id_fkey".to_string()),
            });
        }
        if !state.routes.iter().any(|(id, _)| *id == route_id) {
            return Err(StoreError::NotFound(format!("route {route_id}")));
        }

        state.routes.retain(|(id, _)| *id != route_id);
        state.links.retain(|l| l.route_id != route_id);
        Ok(())
    }

    async fn delete_stop(&self, stop_id: StopId) -> Result<(), StoreError> {
        self.begin(StoreOp::DeleteStop(stop_id)).await?;
        let mut state = self.lock();
        if !state.stops.iter().any(|s| s.id == stop_id) {
            return Err(StoreError::NotFound(format!("stop {stop_id}")));
        }

        state.stops.retain(|s| s.id != stop_id);
        state.links.retain(|l| l.stop_id != stop_id);
        Ok(())
    }

    async fn create_route_stop(&self, link: NewRouteStop) -> Result<RouteStopDb, StoreError> {
        self.begin(StoreOp::CreateRouteStop(link)).await?;
        let mut state = self.lock();
        let route_exists = state.routes.iter().any(|(id, _)| *id == link.route_id);
        let stop_exists = state.stops.iter().any(|s| s.id == link.stop_id);
        if !route_exists || !stop_exists {
            return Err(StoreError::ForeignKeyViolation {
                constraint: Some("route_stops_stop_id_fkey".to_string()),
            });
        }
        if state
            .links
            .iter()
            .any(|l| l.route_id == link.route_id && l.stop_id == link.stop_id)
        {
            return Err(StoreError::UniqueViolation {
                constraint: Some("route_stops_route_stop_key".to_string()),
            });
        }

        let row = LinkRow {
            id: state.next_id(),
            route_id: link.route_id,
            stop_id: link.stop_id,
            stop_order: link.stop_order,
        };
        let joined = state.joined(&row);
        state.links.push(row);
        joined.ok_or_else(|| StoreError::NotFound(format!("stop {}", link.stop_id)))
    }

    async fn delete_route_stop(&self, link_id: LinkId) -> Result<(), StoreError> {
        self.begin(StoreOp::DeleteRouteStop(link_id)).await?;
        let mut state = self.lock();
        let before = state.links.len();
        state.links.retain(|l| l.id != link_id);
        if state.links.len() == before {
            return Err(StoreError::NotFound(format!("route stop {link_id}")));
        }
        Ok(())
    }

    async fn upsert_route_stops(&self, rows: Vec<RouteStopUpsert>) -> Result<(), StoreError> {
        self.begin(StoreOp::UpsertRouteStops(rows.clone())).await?;
        let mut state = self.lock();
        for row in &rows {
            if state.links.iter().any(|l| {
                l.id != row.id && l.route_id == row.route_id && l.stop_id == row.stop_id
            }) {
                return Err(StoreError::UniqueViolation {
                    constraint: Some("route_stops_route_stop_key".to_string()),
                });
            }
        }

        for row in rows {
            let updated = LinkRow {
                id: row.id,
                route_id: row.route_id,
                stop_id: row.stop_id,
                stop_order: row.stop_order,
            };
            match state.links.iter_mut().find(|l| l.id == row.id) {
                Some(link) => *link = updated,
                None => state.links.push(updated),
            }
        }
        Ok(())
    }
}
