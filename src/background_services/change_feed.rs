//! Responsible for keeping the engine's catalogs in step with changes made by other operators

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use sqlx::{Pool, Postgres, postgres::PgListener};
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, error, info, warn};

use crate::engine::{Catalog, EngineHandle};

/// Channel the table triggers notify on.
pub const CHANNEL: &str = "table_changes";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Stops,
    Routes,
    Buses,
}

impl Table {
    /// The catalog to refetch when the table changes. Buses only show up as a route's bus count.
    pub fn catalog(self) -> Catalog {
        match self {
            Table::Stops => Catalog::Stops,
            Table::Routes | Table::Buses => Catalog::Routes,
        }
    }
}

/// Payload of a notification on [`CHANNEL`].
#[derive(Debug, PartialEq, Deserialize)]
pub struct TableChange {
    pub table: Table,
    /// `INSERT`, `UPDATE` or `DELETE`.
    pub op: String,
}

pub fn parse_change(payload: &str) -> Result<TableChange, serde_json::Error> {
    serde_json::from_str(payload)
}

/// Collects changed catalogs until a deadline set by the first change of a burst.
#[derive(Debug, Default)]
pub struct ChangeCoalescer {
    pending: BTreeSet<Catalog>,
    deadline: Option<Instant>,
}

impl ChangeCoalescer {
    pub fn push(&mut self, catalog: Catalog, now: Instant, debounce: Duration) {
        self.pending.insert(catalog);
        self.deadline.get_or_insert(now + debounce);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn take(&mut self) -> BTreeSet<Catalog> {
        self.deadline = None;
        std::mem::take(&mut self.pending)
    }
}

/// Listens until the engine stops, reconnecting after failures.
pub async fn listen_for_changes(pool: Pool<Postgres>, engine: EngineHandle, debounce: Duration) {
    loop {
        match follow_changes(&pool, &engine, debounce).await {
            Ok(()) => {
                info!("Engine stopped, no longer listening for changes");
                return;
            }
            Err(e) => {
                error!("Change feed failed: {e:?}");
                sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Returns `Ok` once the engine is gone.
async fn follow_changes(
    pool: &Pool<Postgres>,
    engine: &EngineHandle,
    debounce: Duration,
) -> anyhow::Result<()> {
    let mut listener = PgListener::connect_with(pool)
        .await
        .context("connecting the change listener")?;
    listener
        .listen(CHANNEL)
        .await
        .with_context(|| format!("listening on {CHANNEL}"))?;
    info!("Listening for changes on {CHANNEL}");

    let mut coalescer = ChangeCoalescer::default();
    loop {
        // checked before receiving, notifications that are always ready can't hold off a flush
        if coalescer.is_due(Instant::now()) {
            for catalog in coalescer.take() {
                if engine.catalog_changed(catalog).await.is_err() {
                    return Ok(());
                }
            }
        }

        let received = match coalescer.deadline() {
            Some(deadline) => timeout_at(deadline, listener.try_recv()).await.ok(),
            None => Some(listener.try_recv().await),
        };

        match received {
            Some(Ok(Some(notification))) => match parse_change(notification.payload()) {
                Ok(change) => {
                    debug!(table = ?change.table, op = %change.op, "store changed");
                    coalescer.push(change.table.catalog(), Instant::now(), debounce);
                }
                Err(e) => warn!(
                    "Ignoring malformed change notification {:?}: {e}",
                    notification.payload()
                ),
            },
            Some(Ok(None)) => {
                // notifications sent while disconnected are lost
                warn!("Change listener lost its connection, refetching everything");
                coalescer.push(Catalog::Routes, Instant::now(), Duration::ZERO);
                coalescer.push(Catalog::Stops, Instant::now(), Duration::ZERO);
            }
            Some(Err(e)) => return Err(e).context("receiving change notifications"),
            // deadline reached, flushed at the top of the loop
            None => {}
        }
    }
}
