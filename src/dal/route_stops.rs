use sqlx::{Pool, Postgres, QueryBuilder, query, query_as};
use tracing::{Instrument, info_span};

use crate::{
    error::StoreError,
    model::{LinkId, NewRouteStop, RouteId, RouteStopDb, RouteStopUpsert},
};

#[tracing::instrument(err, skip(pool))]
pub async fn get_route_stops(
    route_id: RouteId,
    pool: &Pool<Postgres>,
) -> Result<Vec<RouteStopDb>, StoreError> {
    let route_stops = query_as(
        "SELECT
        rs.id,
        rs.route_id,
        rs.stop_order,
        s.id AS stop_id,
        s.name AS stop_name,
        s.lat,
        s.lng
        FROM route_stops rs
        JOIN stops s ON s.id = rs.stop_id
        WHERE rs.route_id = $1
        ORDER BY rs.stop_order ASC",
    )
    .bind(route_id)
    .fetch_all(pool)
    .await?;

    Ok(route_stops)
}

/// Returns the created row joined with its stop.
#[tracing::instrument(err, skip(pool))]
pub async fn insert_route_stop(
    link: NewRouteStop,
    pool: &Pool<Postgres>,
) -> Result<RouteStopDb, StoreError> {
    let route_stop = query_as(
        "WITH inserted AS (
            INSERT INTO route_stops (route_id, stop_id, stop_order)
            VALUES ($1, $2, $3)
            RETURNING id, route_id, stop_id, stop_order
        )
        SELECT
        i.id,
        i.route_id,
        i.stop_order,
        s.id AS stop_id,
        s.name AS stop_name,
        s.lat,
        s.lng
        FROM inserted i
        JOIN stops s ON s.id = i.stop_id",
    )
    .bind(link.route_id)
    .bind(link.stop_id)
    .bind(link.stop_order)
    .fetch_one(pool)
    .await?;

    Ok(route_stop)
}

#[tracing::instrument(err, skip(pool))]
pub async fn delete_route_stop(link_id: LinkId, pool: &Pool<Postgres>) -> Result<(), StoreError> {
    let result = query("DELETE FROM route_stops WHERE id = $1")
        .bind(link_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("route stop {link_id}")));
    }

    Ok(())
}

/// Writes the full state of every given row in one statement.
#[tracing::instrument(err, skip(rows, pool), fields(rows = rows.len()))]
pub async fn upsert_route_stops(
    rows: &[RouteStopUpsert],
    pool: &Pool<Postgres>,
) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }

    let mut query_builder = QueryBuilder::new(
        "INSERT INTO route_stops (
            id,
            route_id,
            stop_id,
            stop_order
        )",
    );

    query_builder.push_values(rows, |mut b, row| {
        b.push_bind(row.id)
            .push_bind(row.route_id)
            .push_bind(row.stop_id)
            .push_bind(row.stop_order);
    });

    query_builder.push(
        " ON CONFLICT ( id ) DO UPDATE SET
            route_id = EXCLUDED.route_id,
            stop_id = EXCLUDED.stop_id,
            stop_order = EXCLUDED.stop_order",
    );

    query_builder
        .build()
        .execute(pool)
        .instrument(info_span!("Upserting route stops"))
        .await?;

    Ok(())
}
