use sqlx::{Pool, Postgres, query, query_as};

use crate::{
    error::StoreError,
    model::{NewStop, StopDb, StopId},
};

#[tracing::instrument(err, skip(pool))]
pub async fn get_stops(pool: &Pool<Postgres>) -> Result<Vec<StopDb>, StoreError> {
    let stops = query_as("SELECT id, name, lat, lng FROM stops ORDER BY name ASC")
        .fetch_all(pool)
        .await?;

    Ok(stops)
}

/// Fails with [`StoreError::UniqueViolation`] if a stop already sits at the same coordinates.
#[tracing::instrument(err, skip(pool))]
pub async fn insert_stop(stop: &NewStop, pool: &Pool<Postgres>) -> Result<StopDb, StoreError> {
    let stop = query_as(
        "INSERT INTO stops (name, lat, lng) VALUES ($1, $2, $3) RETURNING id, name, lat, lng",
    )
    .bind(&stop.name)
    .bind(stop.lat)
    .bind(stop.lng)
    .fetch_one(pool)
    .await?;

    Ok(stop)
}

/// The `route_stops` rows of the stop go with it (`ON DELETE CASCADE`).
#[tracing::instrument(err, skip(pool))]
pub async fn delete_stop(stop_id: StopId, pool: &Pool<Postgres>) -> Result<(), StoreError> {
    let result = query("DELETE FROM stops WHERE id = $1")
        .bind(stop_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("stop {stop_id}")));
    }

    Ok(())
}
