use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::warn;

use crate::{
    error::{EngineError, ErrorKind},
    geocoding::GeocodeError,
    model::ParseLinkKeyError,
};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Geocode(#[from] GeocodeError),

    #[error(transparent)]
    BadLinkKey(#[from] ParseLinkKeyError),

    #[error("geocoding is not configured")]
    GeocoderDisabled,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, ErrorKind) {
        match self {
            ApiError::Engine(err) => {
                let status = match err {
                    EngineError::UnknownRoute(_)
                    | EngineError::UnknownStop(_)
                    | EngineError::UnknownLink(_)
                    | EngineError::NoDraft => StatusCode::NOT_FOUND,
                    EngineError::StopAlreadyOnRoute { .. } | EngineError::SequenceLoading(_) => {
                        StatusCode::CONFLICT
                    }
                    EngineError::EngineStopped => StatusCode::SERVICE_UNAVAILABLE,
                    EngineError::SequenceLoadFailed { .. } => StatusCode::BAD_GATEWAY,
                    EngineError::Store(store) => match store.kind() {
                        ErrorKind::Validation | ErrorKind::Referential => StatusCode::CONFLICT,
                        ErrorKind::Transient => StatusCode::BAD_GATEWAY,
                    },
                    _ => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (status, err.kind())
            }
            ApiError::Geocode(_) => (StatusCode::BAD_GATEWAY, ErrorKind::Transient),
            ApiError::BadLinkKey(_) => (StatusCode::BAD_REQUEST, ErrorKind::Validation),
            ApiError::GeocoderDisabled => (StatusCode::NOT_IMPLEMENTED, ErrorKind::Validation),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            warn!("request failed: {self:?}");
        }

        let body = ErrorBody {
            kind,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
