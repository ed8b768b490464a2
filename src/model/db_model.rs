use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

pub type RouteId = i64;
pub type StopId = i64;
/// Store-assigned identity of a `route_stops` row.
pub type LinkId = i64;

#[derive(Clone, Debug, PartialEq, FromRow, Serialize, Deserialize)]
pub struct StopDb {
    pub id: StopId,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Clone, Debug, PartialEq, FromRow, Serialize, Deserialize)]
pub struct RouteDb {
    pub id: RouteId,
    pub name: String,
    /// Number of buses currently assigned to the route.
    pub bus_count: i64,
}

/// A `route_stops` row joined with the stop it points at.
#[derive(Clone, Debug, PartialEq, FromRow)]
pub struct RouteStopDb {
    pub id: LinkId,
    pub route_id: RouteId,
    pub stop_order: i32,
    pub stop_id: StopId,
    pub stop_name: String,
    pub lat: f64,
    pub lng: f64,
}

impl RouteStopDb {
    pub fn stop(&self) -> StopDb {
        StopDb {
            id: self.stop_id,
            name: self.stop_name.clone(),
            lat: self.lat,
            lng: self.lng,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewStop {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewRouteStop {
    pub route_id: RouteId,
    pub stop_id: StopId,
    pub stop_order: i32,
}

/// One row of the bulk order sync. Carries the full row so the upsert is an overwrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteStopUpsert {
    pub id: LinkId,
    pub route_id: RouteId,
    pub stop_id: StopId,
    pub stop_order: i32,
}
