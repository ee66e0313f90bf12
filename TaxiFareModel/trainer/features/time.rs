use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use chrono_tz::America::New_York;
use ndarray::Array2;

/// Output columns of the time encoder.
pub const TIME_FEATURES: [&str; 4] = ["dow", "hour", "month", "year"];

/// Converts a UTC instant to New York wall-clock time.
#[must_use]
pub fn to_new_york(instant: DateTime<Utc>) -> NaiveDateTime {
    instant.with_timezone(&New_York).naive_local()
}

/// Local day-of-week (Monday = 0), hour, month and year of every pickup.
#[must_use]
pub fn time_feature_matrix(pickups: &[DateTime<Utc>]) -> Array2<i64> {
    let mut out = Array2::zeros((pickups.len(), TIME_FEATURES.len()));
    for (row, pickup) in pickups.iter().enumerate() {
        let local = to_new_york(*pickup);
        out[[row, 0]] = i64::from(local.weekday().num_days_from_monday());
        out[[row, 1]] = i64::from(local.hour());
        out[[row, 2]] = i64::from(local.month());
        out[[row, 3]] = i64::from(local.year());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_pickup_datetime;

    fn utc(raw: &str) -> DateTime<Utc> {
        parse_pickup_datetime(raw).unwrap()
    }

    #[test]
    fn winter_and_summer_offsets() {
        assert_eq!(
            to_new_york(utc("2013-01-15 12:00:00 UTC")).hour(),
            7
        );
        assert_eq!(
            to_new_york(utc("2013-07-02 19:54:00 UTC")).hour(),
            15
        );
    }

    #[test]
    fn dst_boundaries_follow_local_two_am() {
        // 2015 DST: March 8 to November 1.
        assert_eq!(to_new_york(utc("2015-03-08 06:59:59 UTC")).hour(), 1);
        assert_eq!(to_new_york(utc("2015-03-08 07:00:00 UTC")).hour(), 3);
        assert_eq!(to_new_york(utc("2015-11-01 05:59:59 UTC")).hour(), 1);
        assert_eq!(to_new_york(utc("2015-11-01 06:00:00 UTC")).hour(), 1);
    }

    #[test]
    fn pre_2007_dst_starts_in_april() {
        // 2005 DST: April 3 to October 30.
        assert_eq!(to_new_york(utc("2005-03-20 12:00:00 UTC")).hour(), 7);
        assert_eq!(to_new_york(utc("2005-04-03 06:59:59 UTC")).hour(), 1);
        assert_eq!(to_new_york(utc("2005-04-03 07:00:00 UTC")).hour(), 3);
        assert_eq!(to_new_york(utc("2005-11-01 12:00:00 UTC")).hour(), 7);
    }

    #[test]
    fn new_year_rolls_back_to_previous_local_day() {
        let local = to_new_york(utc("2014-01-01 03:00:00 UTC"));
        assert_eq!(local.year(), 2013);
        assert_eq!(local.month(), 12);
        assert_eq!(local.weekday(), chrono::Weekday::Tue);
    }
}
