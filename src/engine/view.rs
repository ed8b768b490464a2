use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Engine;
use crate::{
    error::ErrorKind,
    geocoding::StopDraft,
    model::{RouteDb, RouteId, SequenceEntry, StopDb},
};

/// What the operator sees after a command has been applied.
#[derive(Clone, Debug, Serialize)]
pub struct EngineView {
    pub routes: Vec<RouteDb>,
    pub stops: Vec<StopDb>,
    /// Stops that can be added to the selected route.
    pub available_stops: Vec<StopDb>,
    pub selected_route: Option<RouteId>,
    /// `None` while nothing is selected or the selected route is loading.
    pub sequence: Option<Vec<SequenceEntry>>,
    /// A delete or an order sync is outstanding.
    pub saving: bool,
    pub draft: Option<StopDraft>,
}

/// A store failure surfaced to the operator.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notice {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn new(kind: ErrorKind, message: String) -> Self {
        Notice {
            kind,
            message,
            at: Utc::now(),
        }
    }
}

impl Engine {
    pub(super) fn view(&self) -> EngineView {
        let sequence = self
            .selection
            .as_ref()
            .and_then(|selection| selection.sequence.as_ref());

        let available_stops = match sequence {
            Some(sequence) => {
                let taken = sequence.stop_ids();
                self.stops
                    .iter()
                    .filter(|s| !taken.contains(&s.id))
                    .cloned()
                    .collect()
            }
            None => self.stops.clone(),
        };

        EngineView {
            routes: self.routes.clone(),
            stops: self.stops.clone(),
            available_stops,
            selected_route: self.selection.as_ref().map(|s| s.route_id),
            sequence: sequence.map(|s| s.entries().to_vec()),
            saving: self.saving > 0,
            draft: self.draft.current().cloned(),
        }
    }
}
