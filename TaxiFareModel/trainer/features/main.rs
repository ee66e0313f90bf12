//! Feature-engineering blocks and the column-wise composer that joins them.

/// Scalers and categorical encoders applied after each block.
pub mod encoders;
/// Trip and center distances.
pub mod distance;
/// Local time features.
pub mod time;
/// Geohash cells.
pub mod geohash;
/// Trip deltas and heading.
pub mod direction;

use std::fmt;

use chrono::{DateTime, Utc};
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::DistanceType,
    data::{
        Trip, DROPOFF_LATITUDE, DROPOFF_LONGITUDE, PICKUP_DATETIME, PICKUP_LATITUDE,
        PICKUP_LONGITUDE,
    },
    error::{Result, TrainerError},
};

pub use encoders::{HashingEncoder, OneHotEncoder, StandardScaler};

/// Pickup/dropoff coordinate columns read by the geometric blocks.
pub const DIST_ARGS: [&str; 4] = [
    PICKUP_LATITUDE,
    PICKUP_LONGITUDE,
    DROPOFF_LATITUDE,
    DROPOFF_LONGITUDE,
];

/// Named feature block, listed in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureBlock {
    /// Scaled pickup-to-dropoff distance.
    Distance,
    /// One-hot local day-of-week, hour, month and year.
    TimeFeatures,
    /// Hashed pickup and dropoff geohash cells.
    Geohash,
    /// Scaled coordinate deltas and heading.
    Direction,
    /// Scaled pickup distance to the city center.
    DistanceToCenter,
}

impl FeatureBlock {
    /// Every block in output order.
    pub const ALL: [Self; 5] = [
        Self::Distance,
        Self::TimeFeatures,
        Self::Geohash,
        Self::Direction,
        Self::DistanceToCenter,
    ];

    /// Configuration name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Distance => "distance",
            Self::TimeFeatures => "time_features",
            Self::Geohash => "geohash",
            Self::Direction => "direction",
            Self::DistanceToCenter => "distance_to_center",
        }
    }

    /// Input columns the block reads.
    #[must_use]
    pub fn input_columns(self) -> &'static [&'static str] {
        match self {
            Self::TimeFeatures => &[PICKUP_DATETIME],
            Self::DistanceToCenter => &DIST_ARGS[..2],
            Self::Distance | Self::Geohash | Self::Direction => &DIST_ARGS,
        }
    }

    /// Numeric input columns of every trip, in [`Self::input_columns`] order.
    pub fn numeric_inputs(self, trips: &[Trip]) -> Result<Array2<f64>> {
        let columns = self.input_columns();
        let mut out = Array2::zeros((trips.len(), columns.len()));
        for (row, trip) in trips.iter().enumerate() {
            for (col, name) in columns.iter().enumerate() {
                out[[row, col]] = trip.numeric(name)?;
            }
        }
        Ok(out)
    }

    /// Timestamp input column of every trip.
    pub fn timestamp_inputs(self, trips: &[Trip]) -> Result<Vec<DateTime<Utc>>> {
        let [column] = self.input_columns() else {
            return Err(TrainerError::shape(
                "one timestamp column",
                format!("{} columns", self.input_columns().len()),
            ));
        };
        trips.iter().map(|trip| trip.timestamp(column)).collect()
    }

    /// Keeps the configured blocks in output order; unknown names are skipped.
    #[must_use]
    pub fn select<S: AsRef<str>>(names: &[S]) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|block| names.iter().any(|name| name.as_ref() == block.name()))
            .collect()
    }
}

impl fmt::Display for FeatureBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Learned state of one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FittedBlock {
    /// Distance followed by a scaler.
    Distance {
        /// Metric used for the raw distance.
        metric: DistanceType,
        /// Fitted scaler.
        scaler: StandardScaler,
    },
    /// Time features followed by one-hot encoding.
    TimeFeatures {
        /// Fitted one-hot encoder.
        encoder: OneHotEncoder,
    },
    /// Geohash cells followed by feature hashing.
    Geohash {
        /// Hashing encoder.
        hasher: HashingEncoder,
    },
    /// Direction columns followed by a scaler.
    Direction {
        /// Fitted scaler.
        scaler: StandardScaler,
    },
    /// Center distance followed by a scaler.
    DistanceToCenter {
        /// Fitted scaler.
        scaler: StandardScaler,
    },
}

impl FittedBlock {
    fn fit(block: FeatureBlock, trips: &[Trip], metric: DistanceType) -> Result<Self> {
        Ok(match block {
            FeatureBlock::Distance => {
                let coordinates = block.numeric_inputs(trips)?;
                Self::Distance {
                    metric,
                    scaler: StandardScaler::fit(
                        distance::distance_matrix(coordinates.view(), metric).view(),
                    )?,
                }
            }
            FeatureBlock::TimeFeatures => {
                let pickups = block.timestamp_inputs(trips)?;
                Self::TimeFeatures {
                    encoder: OneHotEncoder::fit(time::time_feature_matrix(&pickups).view())?,
                }
            }
            FeatureBlock::Geohash => Self::Geohash {
                hasher: HashingEncoder::default(),
            },
            FeatureBlock::Direction => {
                let coordinates = block.numeric_inputs(trips)?;
                Self::Direction {
                    scaler: StandardScaler::fit(
                        direction::direction_matrix(coordinates.view()).view(),
                    )?,
                }
            }
            FeatureBlock::DistanceToCenter => {
                let pickups = block.numeric_inputs(trips)?;
                Self::DistanceToCenter {
                    scaler: StandardScaler::fit(
                        distance::center_distance_matrix(pickups.view()).view(),
                    )?,
                }
            }
        })
    }

    /// Block this state was fitted for.
    #[must_use]
    pub const fn block(&self) -> FeatureBlock {
        match self {
            Self::Distance { .. } => FeatureBlock::Distance,
            Self::TimeFeatures { .. } => FeatureBlock::TimeFeatures,
            Self::Geohash { .. } => FeatureBlock::Geohash,
            Self::Direction { .. } => FeatureBlock::Direction,
            Self::DistanceToCenter { .. } => FeatureBlock::DistanceToCenter,
        }
    }

    fn transform(&self, trips: &[Trip]) -> Result<Array2<f64>> {
        let block = self.block();
        match self {
            Self::Distance { metric, scaler } => {
                let coordinates = block.numeric_inputs(trips)?;
                scaler.transform(distance::distance_matrix(coordinates.view(), *metric).view())
            }
            Self::TimeFeatures { encoder } => {
                let pickups = block.timestamp_inputs(trips)?;
                encoder.transform(time::time_feature_matrix(&pickups).view())
            }
            Self::Geohash { hasher } => {
                let coordinates = block.numeric_inputs(trips)?;
                Ok(hasher.transform(&geohash::geohash_cells(coordinates.view())?))
            }
            Self::Direction { scaler } => {
                let coordinates = block.numeric_inputs(trips)?;
                scaler.transform(direction::direction_matrix(coordinates.view()).view())
            }
            Self::DistanceToCenter { scaler } => {
                let pickups = block.numeric_inputs(trips)?;
                scaler.transform(distance::center_distance_matrix(pickups.view()).view())
            }
        }
    }

    /// Output width of the block.
    #[must_use]
    pub fn width(&self) -> usize {
        match self {
            Self::Distance { .. } | Self::DistanceToCenter { .. } => 1,
            Self::TimeFeatures { encoder } => encoder.width(),
            Self::Geohash { hasher } => hasher.n_components(),
            Self::Direction { .. } => direction::DIRECTION_FEATURES.len(),
        }
    }
}

/// Column-wise composition of the selected feature blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureComposer {
    blocks: Vec<FeatureBlock>,
    distance_type: DistanceType,
    fitted: Option<Vec<FittedBlock>>,
}

impl FeatureComposer {
    /// Selects blocks by name; an empty selection is rejected.
    pub fn new<S: AsRef<str>>(feateng: &[S], distance_type: DistanceType) -> Result<Self> {
        let blocks = FeatureBlock::select(feateng);
        if blocks.is_empty() {
            return Err(TrainerError::NoFeatureBlocks(
                feateng.iter().map(|name| name.as_ref().to_string()).collect(),
            ));
        }
        Ok(Self {
            blocks,
            distance_type,
            fitted: None,
        })
    }

    /// Selected blocks in output order.
    #[must_use]
    pub fn blocks(&self) -> &[FeatureBlock] {
        &self.blocks
    }

    /// Metric of the `distance` block.
    #[must_use]
    pub const fn distance_type(&self) -> DistanceType {
        self.distance_type
    }

    /// Whether `fit` has run.
    #[must_use]
    pub const fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Drops the fitted state.
    pub fn reset(&mut self) {
        self.fitted = None;
    }

    /// Fits every block independently on `trips`.
    pub fn fit(&mut self, trips: &[Trip]) -> Result<()> {
        if trips.is_empty() {
            return Err(TrainerError::EmptyInput("feature composer"));
        }
        let fitted = self
            .blocks
            .iter()
            .map(|block| FittedBlock::fit(*block, trips, self.distance_type))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            blocks = ?self.blocks,
            width = fitted.iter().map(FittedBlock::width).sum::<usize>(),
            "feature composer fitted"
        );
        self.fitted = Some(fitted);
        Ok(())
    }

    /// Concatenates every block's output column-wise.
    pub fn transform(&self, trips: &[Trip]) -> Result<Array2<f64>> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or(TrainerError::NotFitted("feature composer"))?;
        let parts = fitted
            .iter()
            .map(|block| block.transform(trips))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<ArrayView2<'_, f64>> = parts.iter().map(Array2::view).collect();
        concatenate(Axis(1), &views)
            .map_err(|err| TrainerError::shape("aligned blocks", err.to_string()))
    }

    /// Fits then transforms the same rows.
    pub fn fit_transform(&mut self, trips: &[Trip]) -> Result<Array2<f64>> {
        self.fit(trips)?;
        self.transform(trips)
    }

    /// Output width once fitted.
    #[must_use]
    pub fn width(&self) -> Option<usize> {
        self.fitted
            .as_ref()
            .map(|fitted| fitted.iter().map(FittedBlock::width).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::synthetic_trips;

    #[test]
    fn selection_filters_unknown_and_keeps_canonical_order() {
        let blocks = FeatureBlock::select(&["direction", "bogus", "distance"]);
        assert_eq!(blocks, vec![FeatureBlock::Distance, FeatureBlock::Direction]);
        assert!(matches!(
            FeatureComposer::new(&["bogus"], DistanceType::Euclidian),
            Err(TrainerError::NoFeatureBlocks(_))
        ));
    }

    #[test]
    fn blocks_project_their_declared_columns() {
        let (trips, _) = synthetic_trips(3, 7);
        let pickups = FeatureBlock::DistanceToCenter.numeric_inputs(&trips).unwrap();
        assert_eq!(pickups.dim(), (3, 2));
        assert_eq!(pickups[[1, 0]], trips[1].pickup_latitude);
        assert_eq!(pickups[[1, 1]], trips[1].pickup_longitude);

        let coordinates = FeatureBlock::Direction.numeric_inputs(&trips).unwrap();
        assert_eq!(coordinates.ncols(), DIST_ARGS.len());
        assert_eq!(coordinates[[2, 3]], trips[2].dropoff_longitude);

        let stamps = FeatureBlock::TimeFeatures.timestamp_inputs(&trips).unwrap();
        assert_eq!(stamps[0], trips[0].pickup_datetime);
        assert!(matches!(
            FeatureBlock::TimeFeatures.numeric_inputs(&trips),
            Err(TrainerError::UnknownColumn(column)) if column == PICKUP_DATETIME
        ));
        assert!(matches!(
            FeatureBlock::Geohash.timestamp_inputs(&trips),
            Err(TrainerError::Shape { .. })
        ));
    }

    #[test]
    fn composer_concatenates_block_widths() {
        let (trips, _) = synthetic_trips(120, 4);
        let mut composer = FeatureComposer::new(
            &["distance_to_center", "direction", "distance", "geohash"],
            DistanceType::Manhattan,
        )
        .unwrap();
        let matrix = composer.fit_transform(&trips).unwrap();
        assert_eq!(matrix.nrows(), trips.len());
        assert_eq!(matrix.ncols(), 1 + 8 + 3 + 1);
        assert_eq!(composer.width(), Some(matrix.ncols()));
        assert!(matrix.iter().all(|value| value.is_finite()));
        assert!(matrix.column(0).sum().abs() < 1e-9);
    }

    #[test]
    fn time_block_ignores_unseen_categories() {
        let (trips, _) = synthetic_trips(60, 5);
        let mut composer = FeatureComposer::new(&["time_features"], DistanceType::Euclidian).unwrap();
        composer.fit(&trips[..30]).unwrap();
        let matrix = composer.transform(&trips[30..]).unwrap();
        assert_eq!(matrix.ncols(), composer.width().unwrap());
        assert!(matrix.rows().into_iter().all(|row| row.sum() <= 4.0));
    }

    #[test]
    fn transform_before_fit_is_rejected() {
        let (trips, _) = synthetic_trips(5, 6);
        let composer = FeatureComposer::new(&["distance"], DistanceType::Haversine).unwrap();
        assert!(matches!(
            composer.transform(&trips),
            Err(TrainerError::NotFitted(_))
        ));
    }
}
