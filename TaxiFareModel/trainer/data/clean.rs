use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Dataset, TripRecord};

/// Coordinate window every retained trip must fall into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Southern latitude bound.
    pub min_latitude: f64,
    /// Northern latitude bound.
    pub max_latitude: f64,
    /// Western longitude bound.
    pub min_longitude: f64,
    /// Eastern longitude bound.
    pub max_longitude: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::NEW_YORK
    }
}

impl BoundingBox {
    /// Greater New York area.
    pub const NEW_YORK: Self = Self {
        min_latitude: 40.0,
        max_latitude: 42.0,
        min_longitude: -74.3,
        max_longitude: -72.9,
    };

    /// Whether the point lies inside the box (edges included).
    #[must_use]
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&latitude)
            && (self.min_longitude..=self.max_longitude).contains(&longitude)
    }
}

const MAX_FARE: f64 = 4000.0;
const MAX_PASSENGERS: f64 = 8.0;

fn keep(row: &TripRecord, bounds: &BoundingBox) -> bool {
    let Some((trip, fare)) = row.complete() else {
        return false;
    };
    if trip.pickup_latitude == 0.0
        || trip.pickup_longitude == 0.0
        || trip.dropoff_latitude == 0.0
        || trip.dropoff_longitude == 0.0
    {
        return false;
    }
    fare > 0.0
        && fare <= MAX_FARE
        && (1.0..=MAX_PASSENGERS).contains(&trip.passenger_count)
        && bounds.contains(trip.pickup_latitude, trip.pickup_longitude)
        && bounds.contains(trip.dropoff_latitude, trip.dropoff_longitude)
}

/// Drops incomplete and implausible trips, preserving row order.
#[must_use]
pub fn clean_df(dataset: Dataset) -> Dataset {
    clean_with_bounds(dataset, &BoundingBox::NEW_YORK)
}

/// [`clean_df`] with a custom coordinate window.
#[must_use]
pub fn clean_with_bounds(dataset: Dataset, bounds: &BoundingBox) -> Dataset {
    let before = dataset.len();
    let rows: Vec<TripRecord> = dataset
        .rows
        .into_iter()
        .filter(|row| keep(row, bounds))
        .collect();
    debug!(before, after = rows.len(), "cleaned dataset");
    Dataset::new(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{fixtures::synthetic_dataset, parse_pickup_datetime};

    fn valid_row(key: &str) -> TripRecord {
        TripRecord {
            key: Some(key.into()),
            fare_amount: Some(8.5),
            pickup_datetime: parse_pickup_datetime("2014-03-01 10:00:00 UTC"),
            pickup_longitude: Some(-73.98),
            pickup_latitude: Some(40.75),
            dropoff_longitude: Some(-73.96),
            dropoff_latitude: Some(40.77),
            passenger_count: Some(1.0),
        }
    }

    #[test]
    fn drops_each_kind_of_invalid_row() {
        let rows = vec![
            valid_row("ok-1"),
            TripRecord {
                fare_amount: Some(0.0),
                ..valid_row("zero-fare")
            },
            TripRecord {
                fare_amount: Some(4000.5),
                ..valid_row("huge-fare")
            },
            TripRecord {
                passenger_count: Some(0.0),
                ..valid_row("no-passengers")
            },
            TripRecord {
                passenger_count: Some(9.0),
                ..valid_row("bus")
            },
            TripRecord {
                pickup_latitude: Some(0.0),
                ..valid_row("zero-coord")
            },
            TripRecord {
                dropoff_longitude: Some(-75.0),
                ..valid_row("out-of-box")
            },
            TripRecord {
                pickup_datetime: None,
                ..valid_row("missing")
            },
            TripRecord {
                fare_amount: Some(4000.0),
                passenger_count: Some(8.0),
                ..valid_row("ok-2")
            },
        ];
        let cleaned = clean_df(Dataset::new(rows));
        let keys: Vec<_> = cleaned
            .rows
            .iter()
            .filter_map(|row| row.key.as_deref())
            .collect();
        assert_eq!(keys, vec!["ok-1", "ok-2"]);
    }

    #[test]
    fn output_is_ordered_subset_within_bounds() {
        let mut dataset = synthetic_dataset(200, 9);
        for (idx, row) in dataset.rows.iter_mut().enumerate() {
            if idx % 7 == 0 {
                row.pickup_latitude = Some(39.5);
            }
            if idx % 11 == 0 {
                row.fare_amount = Some(-2.0);
            }
        }
        let original = dataset.clone();
        let cleaned = clean_df(dataset);
        assert!(cleaned.len() < original.len());

        let mut cursor = original.rows.iter();
        for row in &cleaned.rows {
            assert!(cursor.any(|candidate| candidate == row));
            let (trip, fare) = row.complete().unwrap();
            assert!(fare > 0.0 && fare <= 4000.0);
            assert!((1.0..=8.0).contains(&trip.passenger_count));
            assert!(BoundingBox::NEW_YORK.contains(trip.pickup_latitude, trip.pickup_longitude));
            assert!(BoundingBox::NEW_YORK.contains(trip.dropoff_latitude, trip.dropoff_longitude));
        }
    }
}
