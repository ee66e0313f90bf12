//! Trip data access: loading, cleaning and splitting.

/// CSV sources (local file or bucket download).
pub mod source;
/// Row filters enforcing plausible fares, passengers and coordinates.
pub mod clean;
/// Shuffled train/validation split.
pub mod split;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainerError};

pub use clean::{clean_df, BoundingBox};
pub use source::{get_data, DataSource};
pub use split::{train_test_split, SplitIndices};

/// Label column.
pub const FARE_AMOUNT: &str = "fare_amount";
/// Pickup timestamp column.
pub const PICKUP_DATETIME: &str = "pickup_datetime";
/// Pickup longitude column.
pub const PICKUP_LONGITUDE: &str = "pickup_longitude";
/// Pickup latitude column.
pub const PICKUP_LATITUDE: &str = "pickup_latitude";
/// Dropoff longitude column.
pub const DROPOFF_LONGITUDE: &str = "dropoff_longitude";
/// Dropoff latitude column.
pub const DROPOFF_LATITUDE: &str = "dropoff_latitude";
/// Passenger count column.
pub const PASSENGER_COUNT: &str = "passenger_count";

/// Raw CSV row; any field may be missing until the dataset is cleaned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TripRecord {
    /// Row identifier.
    pub key: Option<String>,
    /// Fare paid (label).
    pub fare_amount: Option<f64>,
    /// Pickup time in UTC.
    pub pickup_datetime: Option<DateTime<Utc>>,
    /// Pickup longitude.
    pub pickup_longitude: Option<f64>,
    /// Pickup latitude.
    pub pickup_latitude: Option<f64>,
    /// Dropoff longitude.
    pub dropoff_longitude: Option<f64>,
    /// Dropoff latitude.
    pub dropoff_latitude: Option<f64>,
    /// Passenger count.
    pub passenger_count: Option<f64>,
}

impl TripRecord {
    /// Returns the complete trip and its fare, or `None` when a field is missing.
    #[must_use]
    pub fn complete(&self) -> Option<(Trip, f64)> {
        Some((
            Trip {
                key: self.key.clone(),
                pickup_datetime: self.pickup_datetime?,
                pickup_longitude: self.pickup_longitude?,
                pickup_latitude: self.pickup_latitude?,
                dropoff_longitude: self.dropoff_longitude?,
                dropoff_latitude: self.dropoff_latitude?,
                passenger_count: self.passenger_count?,
            },
            self.fare_amount?,
        ))
    }
}

/// Feature-side view of a cleaned trip (label removed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    /// Row identifier.
    pub key: Option<String>,
    /// Pickup time in UTC.
    pub pickup_datetime: DateTime<Utc>,
    /// Pickup longitude.
    pub pickup_longitude: f64,
    /// Pickup latitude.
    pub pickup_latitude: f64,
    /// Dropoff longitude.
    pub dropoff_longitude: f64,
    /// Dropoff latitude.
    pub dropoff_latitude: f64,
    /// Passenger count.
    pub passenger_count: f64,
}

impl Trip {
    /// Looks up a numeric input column by name.
    pub fn numeric(&self, column: &str) -> Result<f64> {
        match column {
            PICKUP_LONGITUDE => Ok(self.pickup_longitude),
            PICKUP_LATITUDE => Ok(self.pickup_latitude),
            DROPOFF_LONGITUDE => Ok(self.dropoff_longitude),
            DROPOFF_LATITUDE => Ok(self.dropoff_latitude),
            PASSENGER_COUNT => Ok(self.passenger_count),
            other => Err(TrainerError::UnknownColumn(other.to_string())),
        }
    }

    /// Looks up a timestamp input column by name.
    pub fn timestamp(&self, column: &str) -> Result<DateTime<Utc>> {
        match column {
            PICKUP_DATETIME => Ok(self.pickup_datetime),
            other => Err(TrainerError::UnknownColumn(other.to_string())),
        }
    }
}

/// Ordered collection of raw trip rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    /// Rows in source order.
    pub rows: Vec<TripRecord>,
}

impl Dataset {
    /// Wraps rows.
    #[must_use]
    pub const fn new(rows: Vec<TripRecord>) -> Self {
        Self { rows }
    }

    /// Row count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the dataset has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Separates features from the `fare_amount` label.
    ///
    /// Fails on rows with missing fields; run [`clean_df`] first.
    pub fn into_features_and_target(self) -> Result<(Vec<Trip>, Array1<f64>)> {
        let mut trips = Vec::with_capacity(self.rows.len());
        let mut fares = Vec::with_capacity(self.rows.len());
        for (idx, row) in self.rows.iter().enumerate() {
            let (trip, fare) = row.complete().ok_or_else(|| {
                TrainerError::Data(format!("row {idx} has missing fields; clean the dataset first"))
            })?;
            trips.push(trip);
            fares.push(fare);
        }
        Ok((trips, Array1::from_vec(fares)))
    }

    /// Approximate in-memory footprint in megabytes.
    #[must_use]
    pub fn size_mb(&self) -> f64 {
        (self.rows.len() * std::mem::size_of::<TripRecord>()) as f64 / 1e6
    }
}

/// Parses `YYYY-MM-DD HH:MM:SS UTC` (or RFC 3339) timestamps.
#[must_use]
pub fn parse_pickup_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = trimmed.strip_suffix("UTC").unwrap_or(trimmed).trim_end();
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|value| Utc.from_utc_datetime(&value))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::Duration;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    /// Deterministic synthetic Manhattan trips with fares driven by distance.
    pub fn synthetic_dataset(count: usize, seed: u64) -> Dataset {
        let mut rng = SmallRng::seed_from_u64(seed);
        let start = parse_pickup_datetime("2013-07-02 19:54:00 UTC").unwrap();
        let rows = (0..count)
            .map(|idx| {
                let pickup_longitude: f64 = rng.gen_range(-74.02..-73.93);
                let pickup_latitude: f64 = rng.gen_range(40.70..40.80);
                let dropoff_longitude = pickup_longitude + rng.gen_range(-0.05..0.05);
                let dropoff_latitude = pickup_latitude + rng.gen_range(-0.05..0.05);
                let dx = (dropoff_longitude - pickup_longitude) * 84.0;
                let dy = (dropoff_latitude - pickup_latitude) * 111.0;
                let km: f64 = (dx * dx + dy * dy).sqrt();
                TripRecord {
                    key: Some(format!("trip-{idx}")),
                    fare_amount: Some(2.5 + 1.6 * km + rng.gen_range(0.0..1.0)),
                    pickup_datetime: Some(start + Duration::minutes(rng.gen_range(0..525_600))),
                    pickup_longitude: Some(pickup_longitude),
                    pickup_latitude: Some(pickup_latitude),
                    dropoff_longitude: Some(dropoff_longitude),
                    dropoff_latitude: Some(dropoff_latitude),
                    passenger_count: Some(f64::from(rng.gen_range(1u8..=6))),
                }
            })
            .collect();
        Dataset::new(rows)
    }

    /// Cleaned synthetic trips split into features and target.
    pub fn synthetic_trips(count: usize, seed: u64) -> (Vec<Trip>, Array1<f64>) {
        clean_df(synthetic_dataset(count, seed))
            .into_features_and_target()
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_csv_timestamp_formats() {
        let parsed = parse_pickup_datetime("2013-07-02 19:54:00 UTC").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2013-07-02T19:54:00+00:00");
        assert_eq!(
            parse_pickup_datetime("2013-07-02T19:54:00Z"),
            Some(parsed)
        );
        assert!(parse_pickup_datetime("yesterday").is_none());
    }

    #[test]
    fn incomplete_rows_cannot_become_features() {
        let dataset = Dataset::new(vec![TripRecord {
            fare_amount: Some(5.0),
            ..TripRecord::default()
        }]);
        assert!(matches!(
            dataset.into_features_and_target(),
            Err(TrainerError::Data(_))
        ));
    }

    #[test]
    fn trips_expose_columns_by_name() {
        let (trips, fares) = fixtures::synthetic_trips(5, 1);
        assert_eq!(trips.len(), fares.len());
        let trip = &trips[0];
        assert_eq!(trip.numeric(PICKUP_LATITUDE).unwrap(), trip.pickup_latitude);
        assert!(trip.numeric("fare_amount").is_err());
        assert!(trip.timestamp(PICKUP_DATETIME).is_ok());
    }
}
