//! Forward geocoding against the Mapbox places API.

use itertools::Itertools;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{Instrument, info, info_span};

use super::GeocodeResult;
use crate::config::LngLat;

const PLACES_URL: &str = "https://api.mapbox.com/geocoding/v5/mapbox.places";
const RESULT_LIMIT: u8 = 5;

#[derive(thiserror::Error, Debug)]
pub enum GeocodeError {
    #[error("error querying the geocoder")]
    HttpRequestError(#[from] reqwest::Error),

    #[error("error parsing the geocoder response")]
    ParsingError(#[from] serde_json::Error),

    #[error("invalid geocoder url: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    text: String,
    place_name: Option<String>,
    /// `[lng, lat]`
    center: [f64; 2],
    #[serde(default)]
    context: Vec<ContextEntry>,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    text: String,
}

impl From<Feature> for GeocodeResult {
    fn from(feature: Feature) -> Self {
        let [lng, lat] = feature.center;
        let label = match feature.place_name {
            Some(place_name) if !place_name.is_empty() => place_name,
            _ if !feature.context.is_empty() => format!(
                "{}, {}",
                feature.text,
                feature.context.iter().map(|c| c.text.as_str()).join(", ")
            ),
            _ => feature.text,
        };

        GeocodeResult { lat, lng, label }
    }
}

#[derive(Clone, Debug)]
pub struct MapboxGeocoder {
    client: Client,
    access_token: String,
    proximity: LngLat,
}

impl MapboxGeocoder {
    pub fn new(access_token: String, proximity: LngLat) -> Self {
        MapboxGeocoder {
            client: Client::new(),
            access_token,
            proximity,
        }
    }

    /// Street addresses matching `query`, best match first, biased towards the proximity point.
    #[tracing::instrument(err, skip(self))]
    pub async fn search(&self, query: &str) -> Result<Vec<GeocodeResult>, GeocodeError> {
        let url = self.search_url(query)?;

        let response = self
            .client
            .get(url)
            .send()
            .instrument(info_span!("Geocoding address"))
            .await?
            .error_for_status()?;

        let body = response
            .text()
            .instrument(info_span!("Reading body of response"))
            .await?;

        let results = parse_features(&body)?;

        info!("got {} candidates", results.len());

        Ok(results)
    }

    fn search_url(&self, query: &str) -> Result<Url, GeocodeError> {
        let mut url =
            Url::parse(PLACES_URL).map_err(|e| GeocodeError::InvalidUrl(e.to_string()))?;
        // one segment, a '/' in the query is escaped
        url.path_segments_mut()
            .map_err(|()| GeocodeError::InvalidUrl(PLACES_URL.to_string()))?
            .push(&format!("{query}.json"));
        url.query_pairs_mut()
            .append_pair("access_token", &self.access_token)
            .append_pair("types", "address")
            .append_pair(
                "proximity",
                &format!("{},{}", self.proximity.lng, self.proximity.lat),
            )
            .append_pair("limit", &RESULT_LIMIT.to_string());
        Ok(url)
    }
}

fn parse_features(body: &str) -> Result<Vec<GeocodeResult>, serde_json::Error> {
    let collection: FeatureCollection = serde_json::from_str(body)?;
    Ok(collection
        .features
        .into_iter()
        .map(GeocodeResult::from)
        .collect_vec())
}
