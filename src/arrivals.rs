// Arrival aggregation: route groups, normalization and the time-ordered board list

use chrono::{DateTime, FixedOffset, Local, TimeDelta};
use serde::{Serialize, Serializer};

use crate::mbta_api_models::{PredictionSource, RawPrediction};

pub const UNKNOWN_DESTINATION: &str = "Unknown";

// ============================================================================
// Route configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    RedLine,
    GreenB,
    Bus,
}

impl Symbol {
    pub fn tag(&self) -> &'static str {
        match self {
            Symbol::RedLine => "🔴",
            Symbol::GreenB => "🟩",
            Symbol::Bus => "🚌",
        }
    }

    pub fn asset_path(&self) -> &'static str {
        match self {
            Symbol::RedLine => "media/MBTA-Red-Line.png",
            Symbol::GreenB => "media/green_line.jpg",
            Symbol::Bus => "media/Logo_Ligne_Bus_RATP_47.svg.png",
        }
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

#[derive(Debug, Clone)]
pub enum Destination {
    /// Label chosen from the prediction's `direction_id`.
    ByDirection {
        direction_0: String,
        direction_1: String,
    },
    /// The stop only serves one direction.
    Fixed(String),
}

impl Destination {
    pub fn label_for(&self, direction_id: Option<i64>) -> &str {
        match self {
            Destination::Fixed(label) => label,
            Destination::ByDirection {
                direction_0,
                direction_1,
            } => match direction_id {
                Some(0) => direction_0,
                Some(1) => direction_1,
                _ => UNKNOWN_DESTINATION,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub stop_id: String,
    pub route_id: String,
    pub destination: Destination,
}

impl RouteSpec {
    pub fn new(stop_id: &str, route_id: &str, destination: Destination) -> Self {
        RouteSpec {
            stop_id: stop_id.to_string(),
            route_id: route_id.to_string(),
            destination,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteGroup {
    pub name: String,
    pub symbol: Symbol,
    pub stops: Vec<RouteSpec>,
}

// ============================================================================
// Cycle output
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Arrival {
    pub symbol: Symbol,
    pub destination: String,
    pub minutes: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchFailure {
    pub stop_id: String,
    pub route_id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub reference_time: DateTime<FixedOffset>,
    pub arrivals: Vec<Arrival>,
    pub failures: Vec<FetchFailure>,
}

/// Whole minutes until `departure_time`, or `None` when the timestamp is
/// missing, unparseable, already past, or beyond `window`.
pub fn minutes_until(
    departure_time: Option<&str>,
    now: &DateTime<FixedOffset>,
    window: TimeDelta,
) -> Option<u32> {
    let departure = DateTime::parse_from_rfc3339(departure_time?).ok()?;
    let delta = departure - *now;
    if delta < TimeDelta::zero() || delta > window {
        return None;
    }
    u32::try_from(delta.num_minutes()).ok()
}

// ============================================================================
// Aggregator
// ============================================================================

pub struct Aggregator {
    groups: Vec<RouteGroup>,
    window: TimeDelta,
}

impl Aggregator {
    pub const DEFAULT_WINDOW_SECS: i64 = 1800;

    pub fn new(groups: Vec<RouteGroup>, window_secs: i64) -> Self {
        Aggregator {
            groups,
            window: TimeDelta::seconds(window_secs),
        }
    }

    pub fn groups(&self) -> &[RouteGroup] {
        &self.groups
    }

    /// Runs one cycle against the current local time.
    pub fn fetch_arrivals<S: PredictionSource + ?Sized>(&self, source: &S) -> CycleReport {
        self.fetch_arrivals_at(source, Local::now().fixed_offset())
    }

    /// Runs one cycle with an explicit reference timestamp. Every stop of every
    /// group is fetched in order; a failed fetch contributes nothing.
    pub fn fetch_arrivals_at<S: PredictionSource + ?Sized>(
        &self,
        source: &S,
        now: DateTime<FixedOffset>,
    ) -> CycleReport {
        let mut arrivals = Vec::new();
        let mut failures = Vec::new();

        for group in &self.groups {
            for spec in &group.stops {
                match source.get_predictions(&spec.stop_id, &spec.route_id) {
                    Ok(predictions) => {
                        let before = arrivals.len();
                        arrivals.extend(predictions.iter().filter_map(|prediction| {
                            self.normalize(prediction, group.symbol, &spec.destination, &now)
                        }));
                        log::debug!(
                            "{} {}/{}: {} predictions, {} in window",
                            group.name,
                            spec.stop_id,
                            spec.route_id,
                            predictions.len(),
                            arrivals.len() - before
                        );
                    }
                    Err(e) => {
                        log::warn!("⚠️  {} {}/{} unavailable: {}", group.name, spec.stop_id, spec.route_id, e);
                        failures.push(FetchFailure {
                            stop_id: spec.stop_id.clone(),
                            route_id: spec.route_id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        arrivals.sort_by_key(|arrival| arrival.minutes);

        CycleReport {
            reference_time: now,
            arrivals,
            failures,
        }
    }

    /// A cycle where no source could be reached at all.
    pub fn unavailable(&self, reason: &str) -> CycleReport {
        let failures = self
            .groups
            .iter()
            .flat_map(|group| group.stops.iter())
            .map(|spec| FetchFailure {
                stop_id: spec.stop_id.clone(),
                route_id: spec.route_id.clone(),
                reason: reason.to_string(),
            })
            .collect();

        CycleReport {
            reference_time: Local::now().fixed_offset(),
            arrivals: Vec::new(),
            failures,
        }
    }

    fn normalize(
        &self,
        prediction: &RawPrediction,
        symbol: Symbol,
        destination: &Destination,
        now: &DateTime<FixedOffset>,
    ) -> Option<Arrival> {
        let attributes = &prediction.attributes;
        let minutes = minutes_until(attributes.departure_time.as_deref(), now, self.window)?;
        Some(Arrival {
            symbol,
            destination: destination.label_for(attributes.direction_id).to_string(),
            minutes,
        })
    }
}
