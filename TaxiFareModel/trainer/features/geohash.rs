use geohash::Coord;
use ndarray::ArrayView2;

use crate::error::Result;

/// Geohash precision used for pickup and dropoff cells.
pub const GEOHASH_PRECISION: usize = 6;

/// Encodes a point as a base32 geohash of `precision` characters.
pub fn encode(latitude: f64, longitude: f64, precision: usize) -> Result<String> {
    Ok(geohash::encode(
        Coord {
            x: longitude,
            y: latitude,
        },
        precision,
    )?)
}

/// Pickup and dropoff geohash cells of every
/// (pickup lat, pickup lon, dropoff lat, dropoff lon) row.
pub fn geohash_cells(coordinates: ArrayView2<'_, f64>) -> Result<Vec<Vec<String>>> {
    coordinates
        .rows()
        .into_iter()
        .map(|row| {
            Ok(vec![
                encode(row[0], row[1], GEOHASH_PRECISION)?,
                encode(row[2], row[3], GEOHASH_PRECISION)?,
            ])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrainerError;
    use ndarray::array;

    #[test]
    fn encodes_reference_points() {
        assert_eq!(encode(57.64911, 10.40744, 11).unwrap(), "u4pruydqqvj");
        assert_eq!(encode(40.7580, -73.9855, 6).unwrap(), "dr5ru7");
    }

    #[test]
    fn nearby_points_share_prefix() {
        let a = encode(40.7580, -73.9855, GEOHASH_PRECISION).unwrap();
        let b = encode(40.7581, -73.9856, GEOHASH_PRECISION).unwrap();
        assert_eq!(a.len(), GEOHASH_PRECISION);
        assert_eq!(a[..5], b[..5]);
    }

    #[test]
    fn cells_pair_pickup_and_dropoff() {
        let cells = geohash_cells(array![[40.7580, -73.9855, 57.64911, 10.40744]].view()).unwrap();
        assert_eq!(cells, vec![vec!["dr5ru7".to_string(), "u4pruy".to_string()]]);
        assert!(matches!(
            geohash_cells(array![[95.0, -73.9855, 40.7580, -73.9855]].view()),
            Err(TrainerError::Geohash(_))
        ));
    }
}
