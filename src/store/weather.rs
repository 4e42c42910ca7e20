use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{local_from_epoch, Granularity, WeatherObservation};
use crate::store::date_from_stem;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One row of a fetched weather batch, in the upstream API's field naming.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchRow {
    time: i64,
    summary: Option<String>,
    temperature: Option<f64>,
    apparent_temperature: Option<f64>,
    humidity: Option<f64>,
    cloud_cover: Option<f64>,
    precip_intensity: Option<f64>,
    precip_probability: Option<f64>,
    wind_speed: Option<f64>,
    wind_gust: Option<f64>,
    uv_index: Option<f64>,
    visibility: Option<f64>,
    temperature_high: Option<f64>,
    temperature_low: Option<f64>,
    precip_intensity_max: Option<f64>,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl BatchRow {
    fn into_observation(self, tz: Tz) -> Option<WeatherObservation> {
        Some(WeatherObservation {
            time: local_from_epoch(self.time, tz)?,
            summary: self.summary,
            temperature: self.temperature,
            apparent_temperature: self.apparent_temperature,
            humidity: self.humidity,
            cloud_cover: self.cloud_cover,
            precip_intensity: self.precip_intensity,
            precip_probability: self.precip_probability,
            wind_speed: self.wind_speed,
            wind_gust: self.wind_gust,
            uv_index: self.uv_index,
            visibility: self.visibility,
            temperature_high: self.temperature_high,
            temperature_low: self.temperature_low,
            precip_intensity_max: self.precip_intensity_max,
            lat: self.lat,
            lon: self.lon,
        })
    }
}

/// Combines the per-day weather batches written by the fetch job into one
/// series per location and granularity.
///
/// Batches are `<weather_dir>/<id>_<YYYY-MM-DD>_<hourly|daily>.json`, each a
/// JSON array of observations with epoch-second `time`.
#[derive(Debug, Clone)]
pub struct WeatherSeriesStore {
    weather_dir: PathBuf,
    tz: Tz,
}

impl WeatherSeriesStore {
    pub fn new(weather_dir: impl Into<PathBuf>, tz: Tz) -> Self {
        Self {
            weather_dir: weather_dir.into(),
            tz,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.data.weather_dir, config.timezone)
    }

    /// Batch files for a location, ordered by the date in their name.
    pub fn batch_files(&self, location_id: &str, granularity: Granularity) -> Result<Vec<PathBuf>> {
        let suffix = granularity.as_str();
        let pattern = format!(
            "{}/{}_*_{}.json",
            glob::Pattern::escape(&self.weather_dir.to_string_lossy()),
            location_id,
            suffix
        );
        let entries = glob::glob(&pattern).map_err(|e| {
            AppError::InvalidData(format!("Bad weather file pattern '{}': {}", pattern, e))
        })?;

        let mut batches: Vec<(NaiveDate, PathBuf)> = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| AppError::Io(e.into()))?;
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match date_from_stem(stem, location_id) {
                Some(date) if stem == format!("{}_{}_{}", location_id, date, suffix) => {
                    batches.push((date, path))
                }
                _ => debug!("Ignoring {} for {}", path.display(), location_id),
            }
        }
        batches.sort();

        Ok(batches.into_iter().map(|(_, path)| path).collect())
    }

    /// Every observation for a location and granularity, sorted by time.
    ///
    /// Duplicate times are kept in batch order; use
    /// [`dedup_last_write_wins`] when unique times are needed.
    pub fn load_combined(
        &self,
        location_id: &str,
        granularity: Granularity,
    ) -> Result<Vec<WeatherObservation>> {
        let files = self.batch_files(location_id, granularity)?;
        if files.is_empty() {
            warn!(
                "No {} weather batches for {} in {}",
                granularity.as_str(),
                location_id,
                self.weather_dir.display()
            );
            return Ok(Vec::new());
        }

        let mut series = Vec::new();
        for path in &files {
            series.extend(self.load_batch(path)?);
        }
        series.sort_by_key(|obs| obs.time.timestamp());

        info!(
            "Combined {} {} weather observations for {} from {} batch(es)",
            series.len(),
            granularity.as_str(),
            location_id,
            files.len()
        );
        Ok(series)
    }

    fn load_batch(&self, path: &Path) -> Result<Vec<WeatherObservation>> {
        let source = path.display().to_string();
        let content = std::fs::read_to_string(path)?;
        let rows: Vec<BatchRow> =
            serde_json::from_str(&content).map_err(|e| AppError::DataFormat {
                location: source.clone(),
                line: e.line(),
                reason: e.to_string(),
            })?;

        rows.into_iter()
            .map(|row| {
                let time = row.time;
                row.into_observation(self.tz).ok_or_else(|| AppError::DataFormat {
                    location: source.clone(),
                    line: 0,
                    reason: format!("weather time {} is out of range", time),
                })
            })
            .collect()
    }
}

/// Collapse equal times in a time-sorted series, keeping the last occurrence.
pub fn dedup_last_write_wins(series: Vec<WeatherObservation>) -> Vec<WeatherObservation> {
    let mut unique: Vec<WeatherObservation> = Vec::with_capacity(series.len());
    for obs in series {
        match unique.last_mut() {
            Some(last) if last.time == obs.time => *last = obs,
            _ => unique.push(obs),
        }
    }
    unique
}
