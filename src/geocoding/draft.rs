//! The one "new stop" the operator may be in the middle of creating.

use serde::Serialize;

use super::GeocodeResult;
use crate::{error::EngineError, model::NewStop};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct DraftId(pub u64);

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StopDraft {
    pub id: DraftId,
    pub lat: f64,
    pub lng: f64,
    /// Editable by the operator. Empty for a plain map click.
    pub name: String,
}

impl StopDraft {
    /// Validates the draft into the row to insert.
    pub fn to_new_stop(&self) -> Result<NewStop, EngineError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(EngineError::EmptyStopName);
        }
        if !(-90.0..=90.0).contains(&self.lat) || !(-180.0..=180.0).contains(&self.lng) {
            return Err(EngineError::InvalidCoordinates {
                lat: self.lat,
                lng: self.lng,
            });
        }

        Ok(NewStop {
            name: name.to_string(),
            lat: self.lat,
            lng: self.lng,
        })
    }
}

/// Holds at most one draft. Opening a new one discards the previous.
#[derive(Debug, Default)]
pub struct DraftSlot {
    current: Option<StopDraft>,
    last_id: u64,
}

impl DraftSlot {
    pub fn current(&self) -> Option<&StopDraft> {
        self.current.as_ref()
    }

    pub fn open_at(&mut self, lat: f64, lng: f64) -> &StopDraft {
        self.open(lat, lng, String::new())
    }

    pub fn open_from_result(&mut self, result: GeocodeResult) -> &StopDraft {
        self.open(result.lat, result.lng, result.label)
    }

    fn open(&mut self, lat: f64, lng: f64, name: String) -> &StopDraft {
        self.last_id += 1;
        self.current.insert(StopDraft {
            id: DraftId(self.last_id),
            lat,
            lng,
            name,
        })
    }

    pub fn rename(&mut self, name: String) -> Result<&StopDraft, EngineError> {
        let draft = self.current.as_mut().ok_or(EngineError::NoDraft)?;
        draft.name = name;
        Ok(&*draft)
    }

    pub fn discard(&mut self) -> Option<StopDraft> {
        self.current.take()
    }

    /// Clears the slot only if it still holds the given draft.
    pub fn close(&mut self, id: DraftId) -> bool {
        if self.current.as_ref().is_some_and(|d| d.id == id) {
            self.current = None;
            return true;
        }
        false
    }
}
