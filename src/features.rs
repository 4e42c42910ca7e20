use crate::error::{AppError, Result};
use crate::models::{FeatureRow, HourlySeries, HourlySlot, WeatherObservation};
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Counts of rows lost to the inner join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub matched: usize,
    /// Hourly occupancy slots with no weather at the same instant.
    pub dropped_occupancy: usize,
    /// Weather observations with no occupancy slot at the same instant.
    pub dropped_weather: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinedFeatures {
    pub rows: Vec<FeatureRow>,
    pub report: JoinReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainTestSplit {
    pub train: Vec<FeatureRow>,
    pub test: Vec<FeatureRow>,
    pub train_dates: BTreeSet<NaiveDate>,
    pub test_dates: BTreeSet<NaiveDate>,
}

pub struct FeatureJoinEngine;

impl FeatureJoinEngine {
    /// Inner join of hourly occupancy and hourly weather on the local instant.
    ///
    /// Slots without weather are dropped, not null-padded, so periods with no
    /// weather coverage lose their occupancy rows. Both sides' losses are
    /// counted in the [`JoinReport`]. Duplicate weather times each produce a
    /// row; deduplicate the weather first if that is unwanted.
    pub fn join(hourly: &HourlySeries, weather: &[WeatherObservation]) -> JoinedFeatures {
        let mut weather_by_time: HashMap<i64, Vec<&WeatherObservation>> = HashMap::new();
        for obs in weather {
            weather_by_time
                .entry(obs.time.timestamp())
                .or_default()
                .push(obs);
        }

        let slot_times: HashSet<i64> = hourly
            .slots
            .iter()
            .map(|slot| slot.local_datetime.timestamp())
            .collect();

        let mut rows = Vec::new();
        let mut report = JoinReport::default();

        for slot in &hourly.slots {
            match weather_by_time.get(&slot.local_datetime.timestamp()) {
                Some(matches) => {
                    for obs in matches {
                        rows.push(feature_row(slot, obs));
                    }
                    report.matched += 1;
                }
                None => report.dropped_occupancy += 1,
            }
        }

        report.dropped_weather = weather
            .iter()
            .filter(|obs| !slot_times.contains(&obs.time.timestamp()))
            .count();

        debug!(
            "Joined {} feature rows from {} hourly slots and {} weather observations",
            rows.len(),
            hourly.slots.len(),
            weather.len()
        );
        if report.dropped_occupancy > 0 || report.dropped_weather > 0 {
            warn!(
                "JoinMismatchWarning: dropped {} occupancy slots without weather and {} weather rows without occupancy",
                report.dropped_occupancy, report.dropped_weather
            );
        }

        JoinedFeatures { rows, report }
    }

    /// Partition rows by whole calendar dates.
    ///
    /// `round(train_fraction * n_dates)` distinct dates, drawn without
    /// replacement from a generator seeded with `seed`, go to train; every
    /// other date goes to test. Rounding is half-to-even.
    pub fn split_by_date(
        rows: &[FeatureRow],
        train_fraction: f64,
        seed: u64,
    ) -> Result<TrainTestSplit> {
        if !(0.0..=1.0).contains(&train_fraction) {
            return Err(AppError::InvalidData(format!(
                "train_fraction {} must be between 0 and 1",
                train_fraction
            )));
        }

        let all_dates: Vec<NaiveDate> = rows
            .iter()
            .map(|row| row.calendar.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let n_train = (train_fraction * all_dates.len() as f64).round_ties_even() as usize;
        let mut rng = StdRng::seed_from_u64(seed);
        let train_dates: BTreeSet<NaiveDate> = all_dates
            .choose_multiple(&mut rng, n_train)
            .copied()
            .collect();
        let test_dates: BTreeSet<NaiveDate> = all_dates
            .iter()
            .filter(|d| !train_dates.contains(d))
            .copied()
            .collect();

        let (train, test): (Vec<FeatureRow>, Vec<FeatureRow>) = rows
            .iter()
            .cloned()
            .partition(|row| train_dates.contains(&row.calendar.date));

        debug!(
            "Split {} dates into {} train / {} test ({} / {} rows)",
            all_dates.len(),
            train_dates.len(),
            test_dates.len(),
            train.len(),
            test.len()
        );

        Ok(TrainTestSplit {
            train,
            test,
            train_dates,
            test_dates,
        })
    }
}

fn feature_row(slot: &HourlySlot, obs: &WeatherObservation) -> FeatureRow {
    FeatureRow {
        local_datetime: slot.local_datetime,
        calendar: slot.calendar,
        is_weekend: u8::from(slot.calendar.is_weekend()),
        percent_capacity: slot.values.map(|v| v.percent_capacity),
        spots_taken: slot.values.map(|v| v.spots_taken),
        total_spots: slot.values.map(|v| v.total_spots),
        temperature: obs.temperature,
        apparent_temperature: obs.apparent_temperature,
        humidity: obs.humidity,
        cloud_cover: obs.cloud_cover,
        precip_intensity: obs.precip_intensity,
        precip_probability: obs.precip_probability,
        wind_speed: obs.wind_speed,
        wind_gust: obs.wind_gust,
        uv_index: obs.uv_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        local_from_epoch, CalendarFields, OccupancyValues, ResampleReport, SlotProvenance,
    };
    use chrono_tz::Tz;

    const TZ: Tz = chrono_tz::America::Denver;
    // 2019-09-07 00:00 MDT, a Saturday
    const SATURDAY: i64 = 1_567_836_000;

    fn slot(ts: i64, pc: Option<f64>) -> HourlySlot {
        let local_datetime = local_from_epoch(ts, TZ).unwrap();
        HourlySlot {
            calendar: CalendarFields::from_datetime(&local_datetime),
            local_datetime,
            values: pc.map(|pc| OccupancyValues {
                percent_capacity: pc,
                spots_taken: 10,
                total_spots: 50,
            }),
            provenance: if pc.is_some() {
                SlotProvenance::Observed
            } else {
                SlotProvenance::Missing
            },
        }
    }

    fn weather(ts: i64, temperature: f64) -> WeatherObservation {
        WeatherObservation {
            time: local_from_epoch(ts, TZ).unwrap(),
            summary: None,
            temperature: Some(temperature),
            apparent_temperature: None,
            humidity: None,
            cloud_cover: Some(0.5),
            precip_intensity: Some(0.0),
            precip_probability: None,
            wind_speed: None,
            wind_gust: None,
            uv_index: Some(3.0),
            visibility: None,
            temperature_high: None,
            temperature_low: None,
            precip_intensity_max: None,
            lat: None,
            lon: None,
        }
    }

    fn series(slots: Vec<HourlySlot>) -> HourlySeries {
        HourlySeries {
            slots,
            report: ResampleReport::default(),
        }
    }

    #[test]
    fn test_missing_weather_hour_is_dropped_and_counted() {
        let hourly = series((12..=15).map(|h| slot(SATURDAY + h * 3600, Some(40.0))).collect());
        let weather: Vec<_> = [12, 13, 15]
            .iter()
            .map(|h| weather(SATURDAY + h * 3600, 70.0))
            .collect();

        let joined = FeatureJoinEngine::join(&hourly, &weather);
        let hours: Vec<u32> = joined.rows.iter().map(|r| r.calendar.hour).collect();
        assert_eq!(hours, vec![12, 13, 15]);
        assert_eq!(joined.report.dropped_occupancy, 1);
        assert_eq!(joined.report.dropped_weather, 0);
        assert_eq!(joined.report.matched, 3);
    }

    #[test]
    fn test_weather_without_occupancy_counted() {
        let hourly = series(vec![slot(SATURDAY, Some(40.0))]);
        let weather = vec![weather(SATURDAY, 60.0), weather(SATURDAY + 3600, 61.0)];
        let joined = FeatureJoinEngine::join(&hourly, &weather);
        assert_eq!(joined.rows.len(), 1);
        assert_eq!(joined.report.dropped_weather, 1);
    }

    #[test]
    fn test_null_slots_keep_their_row() {
        let hourly = series(vec![slot(SATURDAY, None)]);
        let joined = FeatureJoinEngine::join(&hourly, &[weather(SATURDAY, 60.0)]);
        assert_eq!(joined.rows.len(), 1);
        assert_eq!(joined.rows[0].percent_capacity, None);
        assert_eq!(joined.rows[0].temperature, Some(60.0));
    }

    #[test]
    fn test_is_weekend_flag() {
        let hourly = series(vec![
            slot(SATURDAY, Some(1.0)),
            slot(SATURDAY + 2 * 86_400, Some(1.0)),
        ]);
        let weather = vec![weather(SATURDAY, 1.0), weather(SATURDAY + 2 * 86_400, 1.0)];
        let joined = FeatureJoinEngine::join(&hourly, &weather);
        assert_eq!(joined.rows[0].is_weekend, 1);
        // Monday
        assert_eq!(joined.rows[1].is_weekend, 0);
    }

    #[test]
    fn test_duplicate_weather_times_produce_one_row_each() {
        let hourly = series(vec![slot(SATURDAY, Some(1.0))]);
        let weather = vec![weather(SATURDAY, 1.0), weather(SATURDAY, 2.0)];
        let joined = FeatureJoinEngine::join(&hourly, &weather);
        assert_eq!(joined.rows.len(), 2);
        assert_eq!(joined.report.matched, 1);
    }

    fn rows_over_days(days: i64) -> Vec<FeatureRow> {
        let slots: Vec<_> = (0..days)
            .flat_map(|d| (8..11).map(move |h| slot(SATURDAY + d * 86_400 + h * 3600, Some(50.0))))
            .collect();
        let weather: Vec<_> = slots
            .iter()
            .map(|s| weather(s.local_datetime.timestamp(), 65.0))
            .collect();
        FeatureJoinEngine::join(&series(slots), &weather).rows
    }

    #[test]
    fn test_split_keeps_dates_whole() {
        let rows = rows_over_days(10);
        let split = FeatureJoinEngine::split_by_date(&rows, 0.8, 47).unwrap();

        assert_eq!(split.train_dates.len(), 8);
        assert_eq!(split.test_dates.len(), 2);
        assert!(split.train_dates.is_disjoint(&split.test_dates));
        assert_eq!(split.train.len() + split.test.len(), rows.len());
        assert!(split
            .train
            .iter()
            .all(|r| split.train_dates.contains(&r.calendar.date)));
        assert!(split
            .test
            .iter()
            .all(|r| split.test_dates.contains(&r.calendar.date)));
    }

    #[test]
    fn test_split_is_reproducible() {
        let rows = rows_over_days(12);
        let a = FeatureJoinEngine::split_by_date(&rows, 0.75, 7).unwrap();
        let b = FeatureJoinEngine::split_by_date(&rows, 0.75, 7).unwrap();
        assert_eq!(a.train_dates, b.train_dates);
        assert_eq!(a.train_dates.len(), 9);
    }

    #[test]
    fn test_split_rounds_half_to_even() {
        // 0.5 * 5 = 2.5 -> 2
        let rows = rows_over_days(5);
        let split = FeatureJoinEngine::split_by_date(&rows, 0.5, 1).unwrap();
        assert_eq!(split.train_dates.len(), 2);
        assert_eq!(split.test_dates.len(), 3);
    }

    #[test]
    fn test_split_rejects_bad_fraction() {
        assert!(FeatureJoinEngine::split_by_date(&[], 1.2, 1).is_err());
        let empty = FeatureJoinEngine::split_by_date(&[], 0.8, 1).unwrap();
        assert!(empty.train.is_empty() && empty.test.is_empty());
    }
}
