use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use polars::prelude::*;
use tracing::{debug, info};

use super::{
    parse_pickup_datetime, Dataset, TripRecord, DROPOFF_LATITUDE, DROPOFF_LONGITUDE, FARE_AMOUNT,
    PASSENGER_COUNT, PICKUP_DATETIME, PICKUP_LATITUDE, PICKUP_LONGITUDE,
};
use crate::{
    config::TrainerConfig,
    error::{Result, TrainerError},
};

/// Where the training CSV comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// CSV already on disk.
    Local(PathBuf),
    /// CSV downloaded over HTTP into a cache file before reading.
    Remote {
        /// Download URL.
        url: String,
        /// Local destination of the download.
        cache: PathBuf,
    },
}

impl DataSource {
    /// Resolves the source from `local` and the environment block.
    #[must_use]
    pub fn from_config(config: &TrainerConfig) -> Self {
        let env = &config.env;
        if config.local {
            return Self::Local(PathBuf::from(&env.local_data_path));
        }
        if let Some(root) = env.storage_root.as_deref() {
            if let Some(dir) = root.strip_prefix("file://") {
                return Self::Local(
                    Path::new(dir)
                        .join(&env.bucket_name)
                        .join(&env.train_data_path),
                );
            }
        }
        let file_name = Path::new(&env.train_data_path)
            .file_name()
            .map_or_else(|| PathBuf::from("train.csv"), PathBuf::from);
        Self::Remote {
            url: env.remote_data_url(),
            cache: Path::new(&env.data_cache_dir).join(file_name),
        }
    }

    /// Makes the CSV available locally and returns its path.
    pub fn fetch(&self) -> Result<PathBuf> {
        match self {
            Self::Local(path) => {
                if path.exists() {
                    Ok(path.clone())
                } else {
                    Err(TrainerError::Data(format!(
                        "training data {} not found",
                        path.display()
                    )))
                }
            }
            Self::Remote { url, cache } => {
                info!(%url, cache = %cache.display(), "downloading training data");
                let response = reqwest::blocking::get(url)?.error_for_status()?;
                let bytes = response.bytes()?;
                if let Some(parent) = cache.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(cache, &bytes)?;
                Ok(cache.clone())
            }
        }
    }
}

/// Retrieves up to `nrows` raw rows from the configured source.
pub fn get_data(config: &TrainerConfig) -> Result<Dataset> {
    let path = DataSource::from_config(config).fetch()?;
    read_csv(&path, config.nrows, config.optimize)
}

/// Reads a trip CSV, optionally capped and with numeric columns downcast.
pub fn read_csv(path: &Path, nrows: Option<usize>, optimize: bool) -> Result<Dataset> {
    let file = File::open(path)
        .map_err(|err| TrainerError::Data(format!("opening {}: {err}", path.display())))?;
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_n_rows(nrows)
        .with_infer_schema_length(Some(1000))
        .into_reader_with_file_handle(file)
        .finish()?;
    debug!(rows = df.height(), columns = df.width(), "csv loaded");

    if optimize {
        let before = df.estimated_size();
        let changes = optimize_dtypes(&mut df);
        let after = df.estimated_size();
        let ratio = if before == 0 {
            0.0
        } else {
            (1.0 - after as f64 / before as f64) * 100.0
        };
        info!(
            reduction_pct = format!("{ratio:.0}"),
            size_gb = after as f64 / 1e9,
            ?changes,
            "optimized dataframe size"
        );
    }

    frame_to_dataset(&df)
}

/// Downcasts numeric columns to the smallest type that holds their range.
pub fn optimize_dtypes(df: &mut DataFrame) -> Vec<String> {
    let mut changes = Vec::new();
    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(ToString::to_string)
        .collect();
    for name in &names {
        let Some(series) = df
            .column(name)
            .ok()
            .map(|column| column.as_materialized_series().clone())
        else {
            continue;
        };
        let target = match series.dtype() {
            DataType::Int64 => series.i64().ok().and_then(|ca| {
                let (min, max) = (ca.min()?, ca.max()?);
                if min >= i64::from(i8::MIN) && max <= i64::from(i8::MAX) {
                    Some(DataType::Int8)
                } else if min >= i64::from(i16::MIN) && max <= i64::from(i16::MAX) {
                    Some(DataType::Int16)
                } else if min >= i64::from(i32::MIN) && max <= i64::from(i32::MAX) {
                    Some(DataType::Int32)
                } else {
                    None
                }
            }),
            DataType::Float64 => series.f64().ok().and_then(|ca| {
                let lossless = ca
                    .into_iter()
                    .flatten()
                    .take(1000)
                    .all(|v| (v - f64::from(v as f32)).abs() <= 1e-6 * v.abs().max(1.0));
                lossless.then_some(DataType::Float32)
            }),
            _ => None,
        };
        if let Some(dtype) = target {
            if let Ok(cast) = series.cast(&dtype) {
                if df.replace(name, cast).is_ok() {
                    changes.push(format!("{name}: {} -> {dtype}", series.dtype()));
                }
            }
        }
    }
    changes
}

fn float_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df
        .column(name)
        .map_err(|_| TrainerError::Data(format!("missing column {name:?}")))?;
    let series = column.as_materialized_series().cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

fn text_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = df
        .column(name)
        .map_err(|_| TrainerError::Data(format!("missing column {name:?}")))?;
    let series = column.as_materialized_series().cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|value| value.map(ToString::to_string))
        .collect())
}

fn frame_to_dataset(df: &DataFrame) -> Result<Dataset> {
    let height = df.height();
    let keys = if df.column("key").is_ok() {
        text_column(df, "key")?
    } else {
        vec![None; height]
    };
    let fares = float_column(df, FARE_AMOUNT)?;
    let pickups = text_column(df, PICKUP_DATETIME)?;
    let pickup_lon = float_column(df, PICKUP_LONGITUDE)?;
    let pickup_lat = float_column(df, PICKUP_LATITUDE)?;
    let dropoff_lon = float_column(df, DROPOFF_LONGITUDE)?;
    let dropoff_lat = float_column(df, DROPOFF_LATITUDE)?;
    let passengers = float_column(df, PASSENGER_COUNT)?;

    let rows = (0..height)
        .map(|idx| TripRecord {
            key: keys[idx].clone(),
            fare_amount: fares[idx],
            pickup_datetime: pickups[idx].as_deref().and_then(parse_pickup_datetime),
            pickup_longitude: pickup_lon[idx],
            pickup_latitude: pickup_lat[idx],
            dropoff_longitude: dropoff_lon[idx],
            dropoff_latitude: dropoff_lat[idx],
            passenger_count: passengers[idx],
        })
        .collect();
    Ok(Dataset::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentConfig;
    use tempfile::tempdir;

    const SAMPLE: &str = "\
key,fare_amount,pickup_datetime,pickup_longitude,pickup_latitude,dropoff_longitude,dropoff_latitude,passenger_count
2009-06-15 17:26:21.0000001,4.5,2009-06-15 17:26:21 UTC,-73.844311,40.721319,-73.84161,40.712278,1
2010-01-05 16:52:16.0000002,16.9,2010-01-05 16:52:16 UTC,-74.016048,40.711303,-73.979268,40.782004,1
2011-08-18 00:35:00.00000049,5.7,2011-08-18 00:35:00 UTC,-73.982738,40.76127,-73.991242,40.750562,2
2012-04-21 04:30:42.0000001,7.7,2012-04-21 04:30:42 UTC,-73.98713,40.733143,,40.758092,1
";

    fn write_sample(dir: &Path) -> PathBuf {
        let path = dir.join("train.csv");
        fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn reads_rows_and_keeps_missing_values() {
        let dir = tempdir().unwrap();
        let dataset = read_csv(&write_sample(dir.path()), None, false).unwrap();
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.rows[1].fare_amount, Some(16.9));
        assert_eq!(dataset.rows[2].passenger_count, Some(2.0));
        assert!(dataset.rows[3].dropoff_longitude.is_none());
        assert!(dataset.rows[0].pickup_datetime.is_some());
    }

    #[test]
    fn honours_row_cap_and_optimize() {
        let dir = tempdir().unwrap();
        let dataset = read_csv(&write_sample(dir.path()), Some(2), true).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.rows[0].passenger_count, Some(1.0));
    }

    #[test]
    fn local_source_reads_configured_path() {
        let dir = tempdir().unwrap();
        let path = write_sample(dir.path());
        let config = TrainerConfig {
            local: true,
            nrows: Some(3),
            env: EnvironmentConfig {
                local_data_path: path.display().to_string(),
                ..EnvironmentConfig::default()
            },
            ..TrainerConfig::default()
        };
        assert_eq!(DataSource::from_config(&config), DataSource::Local(path));
        assert_eq!(get_data(&config).unwrap().len(), 3);
    }

    #[test]
    fn file_storage_root_maps_bucket_to_directory() {
        let dir = tempdir().unwrap();
        let config = TrainerConfig {
            env: EnvironmentConfig {
                storage_root: Some(format!("file://{}", dir.path().display())),
                ..EnvironmentConfig::default()
            },
            ..TrainerConfig::default()
        };
        let expected = dir.path().join("wagon-ml-taxifare/data/train_1k.csv");
        assert_eq!(
            DataSource::from_config(&config),
            DataSource::Local(expected)
        );
        assert!(matches!(get_data(&config), Err(TrainerError::Data(_))));
    }

    #[test]
    fn remote_source_targets_bucket_url() {
        let source = DataSource::from_config(&TrainerConfig::default());
        match source {
            DataSource::Remote { url, cache } => {
                assert!(url.ends_with("/wagon-ml-taxifare/data/train_1k.csv"));
                assert_eq!(cache, Path::new("raw_data").join("train_1k.csv"));
            }
            DataSource::Local(_) => panic!("expected remote source"),
        }
    }
}
