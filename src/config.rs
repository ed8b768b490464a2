use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "route_builder")]
#[command(about = "Route and stop sequencing service for the school bus dashboard")]
pub struct Config {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    /// Port to run the HTTP server on
    #[arg(short, long, env = "SERVER_PORT", default_value = "8080")]
    pub port: u16,

    #[arg(long, env = "OTLP_ENDPOINT", default_value = "http://localhost:4317")]
    pub otlp_endpoint: String,

    /// Directory for the daily rolling log files
    #[arg(long, env = "LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,

    /// Address search is disabled without a token
    #[arg(long, env = "MAPBOX_TOKEN", hide_env_values = true)]
    pub mapbox_token: Option<String>,

    /// `lng,lat` the geocoder biases results towards
    #[arg(long, env = "GEOCODER_PROXIMITY", default_value = "79.8612,6.9271")]
    pub geocoder_proximity: LngLat,

    /// How long change notifications are collected before the catalogs are refetched
    #[arg(long, env = "CHANGE_FEED_DEBOUNCE_MS", default_value_t = 300)]
    pub change_feed_debounce_ms: u64,
}

impl Config {
    pub fn change_feed_debounce(&self) -> Duration {
        Duration::from_millis(self.change_feed_debounce_ms)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl FromStr for LngLat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lng, lat) = s
            .split_once(',')
            .ok_or_else(|| format!("expected `lng,lat`, got {s:?}"))?;
        let lng: f64 = lng.trim().parse().map_err(|e| format!("bad longitude: {e}"))?;
        let lat: f64 = lat.trim().parse().map_err(|e| format!("bad latitude: {e}"))?;

        Ok(LngLat { lng, lat })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_only_the_database_is_given() {
        let config =
            Config::try_parse_from(["route_builder", "--database-url", "postgres://localhost/bus"])
                .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.change_feed_debounce(), Duration::from_millis(300));
        assert_eq!(
            config.geocoder_proximity,
            LngLat {
                lng: 79.8612,
                lat: 6.9271
            }
        );
    }

    #[test]
    fn proximity_needs_two_numbers() {
        assert!("79.8".parse::<LngLat>().is_err());
        assert!("x,6.9".parse::<LngLat>().is_err());
        assert_eq!(
            " 1.5, -2 ".parse::<LngLat>(),
            Ok(LngLat { lng: 1.5, lat: -2.0 })
        );
    }
}
