use serde::Serialize;

use crate::model::{IndexOutOfRange, LinkKey, RouteId, StopId};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// How an error is presented to the operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The operator asked for something the data doesn't allow. Never retried.
    Validation,
    /// The store or the network failed. The operator may repeat the action.
    Transient,
    /// A delete was rejected because something still points at the row.
    Referential,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("unique constraint {} violated", constraint.as_deref().unwrap_or("<unknown>"))]
    UniqueViolation { constraint: Option<String> },

    #[error("foreign key constraint {} violated", constraint.as_deref().unwrap_or("<unknown>"))]
    ForeignKeyViolation { constraint: Option<String> },

    #[error("{0} not found")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::UniqueViolation { .. } => ErrorKind::Validation,
            StoreError::ForeignKeyViolation { .. } => ErrorKind::Referential,
            StoreError::NotFound(_) | StoreError::Unavailable(_) | StoreError::Database(_) => {
                ErrorKind::Transient
            }
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let constraint = db_err.constraint().map(str::to_string);
            match db_err.code().as_deref() {
                Some(UNIQUE_VIOLATION) => return StoreError::UniqueViolation { constraint },
                Some(FOREIGN_KEY_VIOLATION) => {
                    return StoreError::ForeignKeyViolation { constraint };
                }
                _ => {}
            }
        }

        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            err => StoreError::Database(err),
        }
    }
}

/// Why the engine refused or failed a command.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("no route is selected")]
    NoRouteSelected,

    #[error("the stops of route {0} are still loading")]
    SequenceLoading(RouteId),

    #[error("unknown route {0}")]
    UnknownRoute(RouteId),

    #[error("unknown stop {0}")]
    UnknownStop(StopId),

    #[error("link {0} is not on the selected route")]
    UnknownLink(LinkKey),

    #[error("stop {stop_id} is already on route {route_id}")]
    StopAlreadyOnRoute { route_id: RouteId, stop_id: StopId },

    #[error("could not load the stops of route {route_id}: {message}")]
    SequenceLoadFailed { route_id: RouteId, message: String },

    #[error(transparent)]
    IndexOutOfRange(#[from] IndexOutOfRange),

    #[error("route name can't be empty")]
    EmptyRouteName,

    #[error("stop name can't be empty")]
    EmptyStopName,

    #[error("there is no stop draft")]
    NoDraft,

    #[error("({lat}, {lng}) is not a valid coordinate")]
    InvalidCoordinates { lat: f64, lng: f64 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("the route engine has stopped")]
    EngineStopped,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Store(err) => err.kind(),
            EngineError::EngineStopped | EngineError::SequenceLoadFailed { .. } => {
                ErrorKind::Transient
            }
            _ => ErrorKind::Validation,
        }
    }
}
