use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::config::DistanceType;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;
/// Kilometres per degree of latitude.
pub const KM_PER_DEGREE: f64 = 111.0;
/// Latitude of the New York City reference center.
pub const NYC_CENTER_LATITUDE: f64 = 40.714_166_7;
/// Longitude of the New York City reference center.
pub const NYC_CENTER_LONGITUDE: f64 = -74.006_388_9;

/// Great-circle distance in kilometres between two `(lat, lon)` points.
#[must_use]
pub fn haversine_km(start_lat: f64, start_lon: f64, end_lat: f64, end_lon: f64) -> f64 {
    let (lat1, lat2) = (start_lat.to_radians(), end_lat.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (end_lon - start_lon).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

/// Minkowski distance of order `p` on an equirectangular km projection.
#[must_use]
pub fn minkowski_km(start_lat: f64, start_lon: f64, end_lat: f64, end_lon: f64, p: f64) -> f64 {
    let mean_lat = ((start_lat + end_lat) / 2.0).to_radians();
    let dx = (end_lon - start_lon).abs() * KM_PER_DEGREE * mean_lat.cos();
    let dy = (end_lat - start_lat).abs() * KM_PER_DEGREE;
    (dx.powf(p) + dy.powf(p)).powf(1.0 / p)
}

/// Pickup-to-dropoff distance under `metric` for one coordinate row
/// (pickup lat, pickup lon, dropoff lat, dropoff lon).
#[must_use]
pub fn coordinate_distance(row: ArrayView1<'_, f64>, metric: DistanceType) -> f64 {
    let (lat1, lon1, lat2, lon2) = (row[0], row[1], row[2], row[3]);
    match metric {
        DistanceType::Haversine => haversine_km(lat1, lon1, lat2, lon2),
        DistanceType::Euclidian => minkowski_km(lat1, lon1, lat2, lon2, 2.0),
        DistanceType::Manhattan => minkowski_km(lat1, lon1, lat2, lon2, 1.0),
    }
}

/// Single-column matrix of trip distances over pickup/dropoff coordinate rows.
#[must_use]
pub fn distance_matrix(coordinates: ArrayView2<'_, f64>, metric: DistanceType) -> Array2<f64> {
    coordinates
        .map_axis(Axis(1), |row| coordinate_distance(row, metric))
        .insert_axis(Axis(1))
}

/// Single-column matrix of pickup distances to the city center over
/// (pickup lat, pickup lon) rows.
#[must_use]
pub fn center_distance_matrix(pickups: ArrayView2<'_, f64>) -> Array2<f64> {
    pickups
        .map_axis(Axis(1), |row| {
            haversine_km(NYC_CENTER_LATITUDE, NYC_CENTER_LONGITUDE, row[0], row[1])
        })
        .insert_axis(Axis(1))
}
