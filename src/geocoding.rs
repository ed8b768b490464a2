pub mod draft;
pub mod mapbox;

pub use draft::*;
pub use mapbox::*;

use serde::{Deserialize, Serialize};

/// One address candidate as chosen by the operator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub lat: f64,
    pub lng: f64,
    pub label: String,
}
