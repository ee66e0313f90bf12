use ndarray::{Array2, ArrayView2};

/// Output columns of the direction encoder.
pub const DIRECTION_FEATURES: [&str; 3] = ["delta_lon", "delta_lat", "direction"];

/// Heading in degrees in `(-180, 180]`, counter-clockwise from east.
///
/// A trip that does not move has heading `0`.
#[must_use]
pub fn heading_degrees(delta_lon: f64, delta_lat: f64) -> f64 {
    if delta_lon == 0.0 && delta_lat == 0.0 {
        0.0
    } else {
        delta_lat.atan2(delta_lon).to_degrees()
    }
}

/// `delta_lon`, `delta_lat` and heading of every
/// (pickup lat, pickup lon, dropoff lat, dropoff lon) row.
#[must_use]
pub fn direction_matrix(coordinates: ArrayView2<'_, f64>) -> Array2<f64> {
    let mut out = Array2::zeros((coordinates.nrows(), DIRECTION_FEATURES.len()));
    for (idx, row) in coordinates.rows().into_iter().enumerate() {
        let delta_lon = row[3] - row[1];
        let delta_lat = row[2] - row[0];
        out[[idx, 0]] = delta_lon;
        out[[idx, 1]] = delta_lat;
        out[[idx, 2]] = heading_degrees(delta_lon, delta_lat);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn headings_cover_all_quadrants() {
        assert_relative_eq!(heading_degrees(1.0, 1.0), 45.0);
        assert_relative_eq!(heading_degrees(-1.0, 1.0), 135.0);
        assert_relative_eq!(heading_degrees(-1.0, -1.0), -135.0);
        assert_relative_eq!(heading_degrees(0.0, 0.0), 0.0);
    }
}
