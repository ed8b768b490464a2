use std::sync::Arc;

use anyhow::{Context, Result};
use api::AppState;
use background_services::change_feed::listen_for_changes;
use clap::Parser;
use config::Config;
use dotenvy::dotenv;
use geocoding::MapboxGeocoder;
use store::PgStore;
use tokio::{select, signal, spawn};
use tracing::{error, info, warn};

mod api;
mod background_services;
mod config;
mod dal;
mod engine;
mod error;
mod geocoding;
mod model;
mod store;
mod telemetry;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    _ = dotenv();
    let config = Config::parse();
    let _telemetry = telemetry::init(&config)?;

    info!("OTLP_ENDPOINT: {}", config.otlp_endpoint);

    let pool = sqlx::PgPool::connect(&config.database_url)
        .await
        .context("connecting to the database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running migrations")?;

    let (engine, engine_task) = engine::spawn(Arc::new(PgStore::new(pool.clone())));
    engine.refresh_catalogs().await?;

    let geocoder = match &config.mapbox_token {
        Some(token) => Some(Arc::new(MapboxGeocoder::new(
            token.clone(),
            config.geocoder_proximity,
        ))),
        None => {
            warn!("MAPBOX_TOKEN is not set, address search is disabled");
            None
        }
    };

    let mut change_feed = spawn(listen_for_changes(
        pool,
        engine.clone(),
        config.change_feed_debounce(),
    ));

    let mut server = spawn(api::serve(
        AppState {
            engine: engine.clone(),
            geocoder,
        },
        config.port,
    ));

    select! {
        res = &mut server => {
            match res {
                Ok(Ok(())) => info!("Server stopped"),
                Ok(Err(err)) => error!("{err:?}"),
                Err(err) => error!("{:?}", err),
            }
        },
        res = &mut change_feed => {
            if let Err(err) = res {
                error!("{:?}", err);
            }
        },
        _ = signal::ctrl_c() => info!("Shutting down"),
    }

    server.abort();
    change_feed.abort();

    // let outstanding store calls land before exiting
    if let Err(err) = engine.wait_idle().await {
        warn!("Engine stopped before going idle: {err}");
    }
    drop(engine);
    if let Err(err) = engine_task.await {
        error!("{:?}", err);
    }

    Ok(())
}
