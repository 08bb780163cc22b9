// Static configuration: endpoint, key, timers and the tracked route groups

use std::env;
use std::time::Duration;

use crate::arrivals::{Aggregator, Destination, RouteGroup, RouteSpec, Symbol};
use crate::mbta_api_models::MbtaClient;

pub const API_KEY_VAR: &str = "MBTA_API_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub api_key: Option<String>,
    pub refresh_interval: Duration,
    pub rotate_interval: Duration,
    pub page_size: usize,
    pub window_secs: i64,
    pub bind_address: String,
    pub port: u16,
    pub media_dir: String,
    pub route_groups: Vec<RouteGroup>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_url: MbtaClient::DEFAULT_API_URL.to_string(),
            api_key: None,
            refresh_interval: Duration::from_secs(30),
            rotate_interval: Duration::from_secs(5),
            page_size: 3,
            window_secs: Aggregator::DEFAULT_WINDOW_SECS,
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            media_dir: "media".to_string(),
            route_groups: default_route_groups(),
        }
    }
}

impl Config {
    /// Defaults plus the API key from `MBTA_API_KEY`. A blank value counts as unset.
    pub fn from_env() -> Self {
        let api_key = env::var(API_KEY_VAR)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Config {
            api_key,
            ..Config::default()
        }
    }
}

/// Red Line at Central Sq, Green-B at BU Central and the 47 bus.
pub fn default_route_groups() -> Vec<RouteGroup> {
    vec![
        RouteGroup {
            name: "Red Line".to_string(),
            symbol: Symbol::RedLine,
            stops: vec![RouteSpec::new(
                "place-cntsq",
                "Red",
                Destination::ByDirection {
                    direction_0: "Ashmont/Braintree".to_string(),
                    direction_1: "Alewife".to_string(),
                },
            )],
        },
        RouteGroup {
            name: "Green Line B".to_string(),
            symbol: Symbol::GreenB,
            stops: vec![
                RouteSpec::new(
                    "70144",
                    "Green-B",
                    Destination::Fixed("Government Center".to_string()),
                ),
                RouteSpec::new(
                    "70145",
                    "Green-B",
                    Destination::Fixed("Boston College".to_string()),
                ),
            ],
        },
        RouteGroup {
            name: "Bus 47".to_string(),
            symbol: Symbol::Bus,
            stops: vec![
                RouteSpec::new("1812", "47", Destination::Fixed("Central Square".to_string())),
                RouteSpec::new("11767", "47", Destination::Fixed("Broadway".to_string())),
            ],
        },
    ]
}
