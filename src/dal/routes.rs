use sqlx::{Pool, Postgres, query, query_as};
use tracing::{Instrument, info_span};

use crate::{
    error::StoreError,
    model::{RouteDb, RouteId},
};

/// Routes ordered by name, with the number of buses assigned to each.
#[tracing::instrument(err, skip(pool))]
pub async fn get_routes(pool: &Pool<Postgres>) -> Result<Vec<RouteDb>, StoreError> {
    let routes = query_as(
        "SELECT
        r.id,
        r.name,
        (SELECT COUNT(*) FROM buses b WHERE b.route_id = r.id) AS bus_count
        FROM routes r
        ORDER BY r.name ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(routes)
}

#[tracing::instrument(err, skip(pool))]
pub async fn insert_route(name: &str, pool: &Pool<Postgres>) -> Result<RouteDb, StoreError> {
    let route = query_as(
        "INSERT INTO routes (name) VALUES ($1) RETURNING id, name, 0::BIGINT AS bus_count",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;

    Ok(route)
}

/// Nulls `route_id` on every bus and student of the route.
#[tracing::instrument(err, skip(pool))]
pub async fn clear_route_references(
    route_id: RouteId,
    pool: &Pool<Postgres>,
) -> Result<(), StoreError> {
    query("UPDATE buses SET route_id = NULL WHERE route_id = $1")
        .bind(route_id)
        .execute(pool)
        .instrument(info_span!("Clearing bus routes"))
        .await?;

    query("UPDATE students SET route_id = NULL WHERE route_id = $1")
        .bind(route_id)
        .execute(pool)
        .instrument(info_span!("Clearing student routes"))
        .await?;

    Ok(())
}

#[tracing::instrument(err, skip(pool))]
pub async fn delete_route(route_id: RouteId, pool: &Pool<Postgres>) -> Result<(), StoreError> {
    let result = query("DELETE FROM routes WHERE id = $1")
        .bind(route_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("route {route_id}")));
    }

    Ok(())
}
