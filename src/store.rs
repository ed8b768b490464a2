//! The boundary between the route engine and the authoritative store.

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::{
    dal,
    error::StoreError,
    model::{
        LinkId, NewRouteStop, NewStop, RouteDb, RouteId, RouteStopDb, RouteStopUpsert, StopDb,
        StopId,
    },
};

#[cfg(test)]
pub mod memory;

#[async_trait]
pub trait RouteStore: Send + Sync {
    async fn fetch_routes(&self) -> Result<Vec<RouteDb>, StoreError>;

    async fn fetch_stops(&self) -> Result<Vec<StopDb>, StoreError>;

    /// Links of the route joined with their stops, ordered by position.
    async fn fetch_route_stops(&self, route_id: RouteId) -> Result<Vec<RouteStopDb>, StoreError>;

    async fn create_stop(&self, stop: NewStop) -> Result<StopDb, StoreError>;

    async fn create_route(&self, name: String) -> Result<RouteDb, StoreError>;

    /// Detaches buses and students from the route.
    async fn clear_route_references(&self, route_id: RouteId) -> Result<(), StoreError>;

    async fn delete_route(&self, route_id: RouteId) -> Result<(), StoreError>;

    async fn delete_stop(&self, stop_id: StopId) -> Result<(), StoreError>;

    async fn create_route_stop(&self, link: NewRouteStop) -> Result<RouteStopDb, StoreError>;

    async fn delete_route_stop(&self, link_id: LinkId) -> Result<(), StoreError>;

    async fn upsert_route_stops(&self, rows: Vec<RouteStopUpsert>) -> Result<(), StoreError>;
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        PgStore { pool }
    }
}

#[async_trait]
impl RouteStore for PgStore {
    async fn fetch_routes(&self) -> Result<Vec<RouteDb>, StoreError> {
        dal::get_routes(&self.pool).await
    }

    async fn fetch_stops(&self) -> Result<Vec<StopDb>, StoreError> {
        dal::get_stops(&self.pool).await
    }

    async fn fetch_route_stops(&self, route_id: RouteId) -> Result<Vec<RouteStopDb>, StoreError> {
        dal::get_route_stops(route_id, &self.pool).await
    }

    async fn create_stop(&self, stop: NewStop) -> Result<StopDb, StoreError> {
        dal::insert_stop(&stop, &self.pool).await
    }

    async fn create_route(&self, name: String) -> Result<RouteDb, StoreError> {
        dal::insert_route(&name, &self.pool).await
    }

    async fn clear_route_references(&self, route_id: RouteId) -> Result<(), StoreError> {
        dal::clear_route_references(route_id, &self.pool).await
    }

    async fn delete_route(&self, route_id: RouteId) -> Result<(), StoreError> {
        dal::delete_route(route_id, &self.pool).await
    }

    async fn delete_stop(&self, stop_id: StopId) -> Result<(), StoreError> {
        dal::delete_stop(stop_id, &self.pool).await
    }

    async fn create_route_stop(&self, link: NewRouteStop) -> Result<RouteStopDb, StoreError> {
        dal::insert_route_stop(link, &self.pool).await
    }

    async fn delete_route_stop(&self, link_id: LinkId) -> Result<(), StoreError> {
        dal::delete_route_stop(link_id, &self.pool).await
    }

    async fn upsert_route_stops(&self, rows: Vec<RouteStopUpsert>) -> Result<(), StoreError> {
        dal::upsert_route_stops(&rows, &self.pool).await
    }
}
