use crate::config::{Config, Location};
use crate::daily::DailyAggregator;
use crate::error::Result;
use crate::features::{FeatureJoinEngine, JoinReport};
use crate::model::{rmse, MatrixBuilder, MeanRegressor, Regressor};
use crate::models::{Granularity, NormalizedRecord, ResampleReport, WeatherObservation};
use crate::resample::HourlyResampler;
use crate::snapshot::SnapshotWriter;
use crate::store::{dedup_last_write_wins, RawEventStore, WeatherSeriesStore};
use rayon::prelude::*;
use tracing::{error, info, warn};

/// Weather batches further than this from the configured coordinates, in
/// degrees of latitude or longitude, are reported as off-site.
const COORDINATE_TOLERANCE: f64 = 0.01;

/// Baseline scores of the mean predictor on a date-grouped split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineScores {
    pub train_r2: f64,
    pub test_r2: f64,
    pub test_rmse: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationReport {
    pub location_id: String,
    pub events: usize,
    /// Events whose `total_spots` disagrees with the configured capacity.
    pub capacity_mismatches: usize,
    /// Hourly weather observations fetched for other coordinates.
    pub weather_off_site: usize,
    pub skipped_rows: usize,
    pub resample: ResampleReport,
    pub daily_rows: usize,
    pub missing_dates: usize,
    pub hourly_weather: usize,
    pub daily_weather: usize,
    pub join: JoinReport,
    pub feature_rows: usize,
    pub model_rows: usize,
    pub train_dates: usize,
    pub test_dates: usize,
    /// `None` when either partition ends up empty.
    pub baseline: Option<BaselineScores>,
}

#[derive(Debug)]
pub enum LocationOutcome {
    Completed(LocationReport),
    Failed { location_id: String, error: String },
}

impl LocationOutcome {
    pub fn location_id(&self) -> &str {
        match self {
            LocationOutcome::Completed(report) => &report.location_id,
            LocationOutcome::Failed { location_id, .. } => location_id,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, LocationOutcome::Failed { .. })
    }
}

#[derive(Debug)]
pub struct BatchReport {
    /// In configuration order.
    pub outcomes: Vec<LocationOutcome>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_failed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }
}

/// Runs every configured location through load, align, join and split.
///
/// Each location runs on its own rayon worker with its own series; an error
/// in one location is recorded in its outcome and never stops the others.
pub struct Pipeline {
    config: Config,
    events: RawEventStore,
    weather: WeatherSeriesStore,
    resampler: HourlyResampler,
    aggregator: DailyAggregator,
    matrix: MatrixBuilder,
    snapshots: SnapshotWriter,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            events: RawEventStore::from_config(&config),
            weather: WeatherSeriesStore::from_config(&config),
            resampler: HourlyResampler::new(config.resample.gap_limit),
            aggregator: DailyAggregator::new(),
            matrix: MatrixBuilder::new(&config.model),
            snapshots: SnapshotWriter::new(&config.data.output_dir),
            config,
        }
    }

    pub fn run(&self) -> BatchReport {
        info!(
            "Processing {} location(s) with gap limit {:?} in {}",
            self.config.locations.len(),
            self.config.resample.gap_limit,
            self.config.timezone
        );

        let outcomes: Vec<LocationOutcome> = self
            .config
            .locations
            .par_iter()
            .map(|location| match self.process_location(location) {
                Ok(report) => LocationOutcome::Completed(report),
                Err(e) => {
                    error!("Error processing {}: {}", location.id, e);
                    LocationOutcome::Failed {
                        location_id: location.id.clone(),
                        error: e.to_string(),
                    }
                }
            })
            .collect();

        let report = BatchReport { outcomes };
        info!(
            "Batch complete: {} location(s) processed, {} failed",
            report.completed(),
            report.failed()
        );
        report
    }

    pub fn process_location(&self, location: &Location) -> Result<LocationReport> {
        let id = location.id.as_str();
        info!("Processing {} ({})", location.display_name(), id);

        let (records, parse_stats) = self.events.load_with_stats(id)?;
        self.snapshots.save_events(id, &records)?;
        let capacity_mismatches = count_capacity_mismatches(location, &records);

        let hourly = self.resampler.resample(&records);
        let daily = self.aggregator.aggregate(&records);
        self.snapshots.save_hourly(id, &hourly)?;
        self.snapshots.save_daily(id, &daily)?;

        let hourly_weather = self.weather.load_combined(id, Granularity::Hourly)?;
        let daily_weather = self.weather.load_combined(id, Granularity::Daily)?;
        self.snapshots
            .save_weather(id, Granularity::Hourly, &hourly_weather)?;
        self.snapshots
            .save_weather(id, Granularity::Daily, &daily_weather)?;

        let weather_off_site = count_off_site(location, &hourly_weather);
        let hourly_weather_count = hourly_weather.len();
        let unique_weather = dedup_last_write_wins(hourly_weather);
        if unique_weather.len() < hourly_weather_count {
            warn!(
                "{}: {} duplicate hourly weather times resolved last-write-wins",
                id,
                hourly_weather_count - unique_weather.len()
            );
        }

        let joined = FeatureJoinEngine::join(&hourly, &unique_weather);
        self.snapshots.save_features(id, &joined.rows)?;

        let model_rows = self.matrix.select(&joined.rows);
        let split = FeatureJoinEngine::split_by_date(
            &model_rows,
            self.config.split.train_fraction,
            self.config.split.seed,
        )?;
        let train = self.matrix.build(&split.train);
        let test = self.matrix.build(&split.test);

        let baseline = if train.is_empty() || test.is_empty() {
            warn!(
                "{}: not enough complete rows for a baseline ({} train, {} test)",
                id,
                train.len(),
                test.len()
            );
            None
        } else {
            let mut model = MeanRegressor::new();
            model.fit(&train.x, &train.y)?;
            let scores = BaselineScores {
                train_r2: model.score(&train.x, &train.y)?,
                test_r2: model.score(&test.x, &test.y)?,
                test_rmse: rmse(&test.y, &model.predict(&test.x)?)?,
            };
            info!(
                "{}: predict-mean baseline train R^2 {:.2}, test R^2 {:.2}, test RMSE {:.2}",
                id, scores.train_r2, scores.test_r2, scores.test_rmse
            );
            Some(scores)
        };

        Ok(LocationReport {
            location_id: id.to_string(),
            events: records.len(),
            capacity_mismatches,
            weather_off_site,
            skipped_rows: parse_stats.parse_failures,
            resample: hourly.report,
            daily_rows: daily.summaries.len(),
            missing_dates: daily.missing_dates,
            hourly_weather: hourly_weather_count,
            daily_weather: daily_weather.len(),
            join: joined.report,
            feature_rows: joined.rows.len(),
            model_rows: model_rows.len(),
            train_dates: split.train_dates.len(),
            test_dates: split.test_dates.len(),
            baseline,
        })
    }
}

fn count_capacity_mismatches(location: &Location, records: &[NormalizedRecord]) -> usize {
    let Some(capacity) = location.capacity else {
        return 0;
    };
    let mismatches = records
        .iter()
        .filter(|r| i64::from(r.total_spots) != i64::from(capacity))
        .count();
    if mismatches > 0 {
        warn!(
            "{}: {} event(s) report a lot size other than the configured capacity {}",
            location.id, mismatches, capacity
        );
    }
    mismatches
}

fn count_off_site(location: &Location, weather: &[WeatherObservation]) -> usize {
    let off_site = weather
        .iter()
        .filter(|obs| match (obs.lat, obs.lon) {
            (Some(lat), Some(lon)) => {
                (lat - location.lat).abs() > COORDINATE_TOLERANCE
                    || (lon - location.lon).abs() > COORDINATE_TOLERANCE
            }
            _ => false,
        })
        .count();
    if off_site > 0 {
        warn!(
            "{}: {} weather observation(s) were fetched away from ({}, {})",
            location.id, off_site, location.lat, location.lon
        );
    }
    off_site
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawEvent;
    use chrono::TimeZone;

    fn location(capacity: Option<u32>) -> Location {
        Location {
            id: "lot".to_string(),
            name: None,
            lat: 39.646865,
            lon: -105.196314,
            capacity,
        }
    }

    fn record(total_spots: i32) -> NormalizedRecord {
        let raw = RawEvent {
            percent_capacity: 0.5,
            spots_taken: 10,
            total_spots,
            timestamp: 1_567_317_600,
            in_out: Some(1),
        };
        NormalizedRecord::from_raw(raw, chrono_tz::America::Denver).unwrap()
    }

    fn observation(lat: Option<f64>, lon: Option<f64>) -> WeatherObservation {
        WeatherObservation {
            time: chrono_tz::America::Denver.timestamp_opt(1_567_317_600, 0).unwrap(),
            summary: None,
            temperature: None,
            apparent_temperature: None,
            humidity: None,
            cloud_cover: None,
            precip_intensity: None,
            precip_probability: None,
            wind_speed: None,
            wind_gust: None,
            uv_index: None,
            visibility: None,
            temperature_high: None,
            temperature_low: None,
            precip_intensity_max: None,
            lat,
            lon,
        }
    }

    #[test]
    fn test_capacity_mismatches() {
        let records = vec![record(50), record(48), record(50)];
        assert_eq!(count_capacity_mismatches(&location(Some(50)), &records), 1);
        assert_eq!(count_capacity_mismatches(&location(None), &records), 0);
    }

    #[test]
    fn test_off_site_weather() {
        let weather = vec![
            observation(Some(39.646865), Some(-105.196314)),
            observation(Some(39.62), Some(-105.34)),
            observation(None, None),
        ];
        assert_eq!(count_off_site(&location(None), &weather), 1);
    }
}
