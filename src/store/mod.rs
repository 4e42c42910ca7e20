pub mod events;
pub mod weather;

pub use events::RawEventStore;
pub use weather::{dedup_last_write_wins, WeatherSeriesStore};

use chrono::NaiveDate;

/// Date embedded in a per-period file name, e.g. `lot_2019-09-01.csv` or
/// `lot_2019-09-01_hourly.json`. `stem` is the file name without extension.
pub(crate) fn date_from_stem(stem: &str, location_id: &str) -> Option<NaiveDate> {
    let rest = stem.strip_prefix(location_id)?.strip_prefix('_')?;
    let date_part = rest.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_from_stem() {
        assert_eq!(
            date_from_stem("east_mount_falcon_2019-09-01_hourly", "east_mount_falcon"),
            NaiveDate::from_ymd_opt(2019, 9, 1)
        );
        assert_eq!(
            date_from_stem("mount_galbraith_2020-01-31", "mount_galbraith"),
            NaiveDate::from_ymd_opt(2020, 1, 31)
        );
    }

    #[test]
    fn test_date_from_stem_rejects_other_locations() {
        // "east_mount_falcon" must not pick up "east_mount_falcon_north" files
        assert_eq!(
            date_from_stem("east_mount_falcon_north_2019-09-01", "east_mount_falcon"),
            None
        );
        assert_eq!(date_from_stem("other_2019-09-01", "east_mount_falcon"), None);
        assert_eq!(date_from_stem("east_mount_falcon_latest", "east_mount_falcon"), None);
    }
}
