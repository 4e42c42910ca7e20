//! Boundary between the feature table and whatever regressor consumes it.
//!
//! [`MatrixBuilder`] turns joined [`FeatureRow`]s into a dense X matrix and y
//! vector; any type implementing [`Regressor`] can be fitted on it.

use crate::config::{ModelConfig, WeatherFeature};
use crate::error::{AppError, Result};
use crate::models::FeatureRow;
use chrono::NaiveDate;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    pub feature_names: Vec<String>,
    pub x: Vec<Vec<f64>>,
    /// Occupancy percentage, 0-100.
    pub y: Vec<f64>,
    /// Calendar date of each row, kept for date-grouped evaluation.
    pub dates: Vec<NaiveDate>,
}

impl DesignMatrix {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

/// Builds the model matrix: `is_weekend`, the configured weather columns,
/// then one-hot hour columns for the modelled window with the first hour
/// dropped as the reference level.
#[derive(Debug, Clone)]
pub struct MatrixBuilder {
    min_hour: u32,
    max_hour: u32,
    cutoff_date: Option<NaiveDate>,
    weather_features: Vec<WeatherFeature>,
}

impl MatrixBuilder {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            min_hour: config.min_hour,
            max_hour: config.max_hour,
            cutoff_date: config.cutoff_date,
            weather_features: config.weather_features.clone(),
        }
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names = vec!["is_weekend".to_string()];
        names.extend(self.weather_features.iter().map(|f| f.name().to_string()));
        names.extend((self.min_hour + 1..=self.max_hour).map(|h| format!("hour_{}", h)));
        names
    }

    /// The rows [`build`](Self::build) keeps: inside the hour window, before
    /// the cutoff, and with no missing target or weather value.
    ///
    /// Date-grouped splits must draw their dates from this set so that
    /// dates without model rows never count toward either partition.
    pub fn select(&self, rows: &[FeatureRow]) -> Vec<FeatureRow> {
        rows.iter()
            .filter(|row| self.encode(row).is_some())
            .cloned()
            .collect()
    }

    pub fn build(&self, rows: &[FeatureRow]) -> DesignMatrix {
        let mut matrix = DesignMatrix {
            feature_names: self.feature_names(),
            x: Vec::new(),
            y: Vec::new(),
            dates: Vec::new(),
        };

        let mut dropped = 0usize;
        for row in rows {
            let Some((features, target)) = self.encode(row) else {
                dropped += 1;
                continue;
            };
            matrix.x.push(features);
            matrix.y.push(target);
            matrix.dates.push(row.calendar.date);
        }

        debug!(
            "Built {}x{} design matrix ({} rows outside the window or incomplete)",
            matrix.len(),
            matrix.feature_names.len(),
            dropped
        );
        matrix
    }

    fn in_window(&self, row: &FeatureRow) -> bool {
        let hour = row.calendar.hour;
        (self.min_hour..=self.max_hour).contains(&hour)
            && !self.cutoff_date.is_some_and(|cutoff| row.calendar.date >= cutoff)
    }

    fn encode(&self, row: &FeatureRow) -> Option<(Vec<f64>, f64)> {
        if !self.in_window(row) {
            return None;
        }
        let target = row.percent_capacity?;
        let weather = self
            .weather_features
            .iter()
            .map(|f| weather_value(row, *f))
            .collect::<Option<Vec<f64>>>()?;

        let hour = row.calendar.hour;
        let mut features = Vec::with_capacity(1 + weather.len() + self.hour_columns());
        features.push(f64::from(row.is_weekend));
        features.extend(weather);
        features.extend(
            (self.min_hour + 1..=self.max_hour).map(|h| if h == hour { 1.0 } else { 0.0 }),
        );
        Some((features, target))
    }

    fn hour_columns(&self) -> usize {
        self.max_hour.saturating_sub(self.min_hour) as usize
    }
}

fn weather_value(row: &FeatureRow, feature: WeatherFeature) -> Option<f64> {
    match feature {
        WeatherFeature::Temperature => row.temperature,
        WeatherFeature::ApparentTemperature => row.apparent_temperature,
        WeatherFeature::Humidity => row.humidity,
        WeatherFeature::CloudCover => row.cloud_cover,
        WeatherFeature::PrecipIntensity => row.precip_intensity,
        WeatherFeature::PrecipProbability => row.precip_probability,
        WeatherFeature::WindSpeed => row.wind_speed,
        WeatherFeature::WindGust => row.wind_gust,
        WeatherFeature::UvIndex => row.uv_index,
    }
}

/// The fit/predict/score contract the pipeline hands its matrices to.
pub trait Regressor {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()>;

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>>;

    /// Coefficient of determination on `(x, y)`.
    fn score(&self, x: &[Vec<f64>], y: &[f64]) -> Result<f64> {
        let predictions = self.predict(x)?;
        r2_score(y, &predictions)
    }
}

/// Predicts the training mean for every row. The baseline any real model must beat.
#[derive(Debug, Clone, Default)]
pub struct MeanRegressor {
    mean: Option<f64>,
}

impl MeanRegressor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Regressor for MeanRegressor {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        check_shapes(x.len(), y.len())?;
        if y.is_empty() {
            return Err(AppError::Model("cannot fit on an empty training set".to_string()));
        }
        self.mean = Some(y.iter().sum::<f64>() / y.len() as f64);
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        let mean = self
            .mean
            .ok_or_else(|| AppError::Model("predict called before fit".to_string()))?;
        Ok(vec![mean; x.len()])
    }
}

fn check_shapes(rows: usize, targets: usize) -> Result<()> {
    if rows != targets {
        return Err(AppError::Model(format!(
            "feature rows ({}) and targets ({}) differ in length",
            rows, targets
        )));
    }
    Ok(())
}

/// R² = 1 - SS_res / SS_tot. A constant target scores 0 unless predicted exactly.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    check_shapes(y_pred.len(), y_true.len())?;
    if y_true.is_empty() {
        return Err(AppError::Model("cannot score an empty set".to_string()));
    }

    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_tot: f64 = y_true.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(y, p)| (y - p).powi(2))
        .sum();

    if ss_tot == 0.0 {
        return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_res / ss_tot)
}

pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    check_shapes(y_pred.len(), y_true.len())?;
    if y_true.is_empty() {
        return Err(AppError::Model("cannot score an empty set".to_string()));
    }
    let mse = y_true
        .iter()
        .zip(y_pred)
        .map(|(y, p)| (y - p).powi(2))
        .sum::<f64>()
        / y_true.len() as f64;
    Ok(mse.sqrt())
}
