use crate::error::{AppError, Result};
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_timezone", deserialize_with = "deserialize_timezone")]
    pub timezone: Tz,
    pub data: DataConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub resample: ResampleConfig,
    #[serde(default)]
    pub split: SplitConfig,
    #[serde(default)]
    pub model: ModelConfig,
    pub locations: Vec<Location>,
}

fn default_timezone() -> Tz {
    chrono_tz::America::Denver
}

/// Accepts any IANA name chrono-tz knows, e.g. `America/Denver` or `US/Mountain`.
fn deserialize_timezone<'de, D>(deserializer: D) -> std::result::Result<Tz, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    name.parse::<Tz>()
        .map_err(|_| serde::de::Error::custom(format!("Unknown timezone: '{}'", name)))
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    pub raw_dir: PathBuf,
    pub weather_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RowPolicy {
    /// First malformed row fails the whole location load.
    #[default]
    Abort,
    /// Malformed rows are logged and counted; the load fails only past the threshold.
    Skip,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default)]
    pub on_malformed_row: RowPolicy,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
}

fn default_failure_threshold() -> f64 {
    0.10
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            on_malformed_row: RowPolicy::default(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// Maximum run of consecutive forward-filled hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapLimit {
    Hours(u32),
    Unbounded,
}

impl GapLimit {
    pub fn allows(&self, run: u32) -> bool {
        match self {
            GapLimit::Hours(limit) => run <= *limit,
            GapLimit::Unbounded => true,
        }
    }
}

impl Default for GapLimit {
    fn default() -> Self {
        GapLimit::Hours(3)
    }
}

/// Handles gap limit as both number and keyword
///
/// Accepts:
/// - `gap_limit: 3`
/// - `gap_limit: "3"`
/// - `gap_limit: unbounded`
impl<'de> Deserialize<'de> for GapLimit {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum GapValue {
            Number(u32),
            String(String),
        }

        match GapValue::deserialize(deserializer)? {
            GapValue::Number(n) => Ok(GapLimit::Hours(n)),
            GapValue::String(s) if s.eq_ignore_ascii_case("unbounded") => Ok(GapLimit::Unbounded),
            GapValue::String(s) => s.parse::<u32>().map(GapLimit::Hours).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Invalid gap_limit: '{}' (expected hours or 'unbounded')",
                    s
                ))
            }),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ResampleConfig {
    #[serde(default)]
    pub gap_limit: GapLimit,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SplitConfig {
    #[serde(default = "default_train_fraction")]
    pub train_fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_train_fraction() -> f64 {
    0.8
}

fn default_seed() -> u64 {
    47
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_fraction: default_train_fraction(),
            seed: default_seed(),
        }
    }
}

/// Weather columns that may be used as model features.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum WeatherFeature {
    Temperature,
    ApparentTemperature,
    Humidity,
    CloudCover,
    PrecipIntensity,
    PrecipProbability,
    WindSpeed,
    WindGust,
    UvIndex,
}

impl WeatherFeature {
    pub fn name(&self) -> &'static str {
        match self {
            WeatherFeature::Temperature => "temperature",
            WeatherFeature::ApparentTemperature => "apparentTemperature",
            WeatherFeature::Humidity => "humidity",
            WeatherFeature::CloudCover => "cloudCover",
            WeatherFeature::PrecipIntensity => "precipIntensity",
            WeatherFeature::PrecipProbability => "precipProbability",
            WeatherFeature::WindSpeed => "windSpeed",
            WeatherFeature::WindGust => "windGust",
            WeatherFeature::UvIndex => "uvIndex",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_min_hour")]
    pub min_hour: u32,
    #[serde(default = "default_max_hour")]
    pub max_hour: u32,
    /// Rows on or after this date are excluded.
    #[serde(default)]
    pub cutoff_date: Option<NaiveDate>,
    #[serde(default = "default_weather_features")]
    pub weather_features: Vec<WeatherFeature>,
}

fn default_min_hour() -> u32 {
    6
}

fn default_max_hour() -> u32 {
    19
}

fn default_weather_features() -> Vec<WeatherFeature> {
    vec![
        WeatherFeature::Temperature,
        WeatherFeature::CloudCover,
        WeatherFeature::PrecipIntensity,
        WeatherFeature::UvIndex,
    ]
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            min_hour: default_min_hour(),
            max_hour: default_max_hour(),
            cutoff_date: None,
            weather_features: default_weather_features(),
        }
    }
}

/// A monitored trailhead parking lot.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Location {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub capacity: Option<u32>,
}

impl Location {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // Substitute environment variables
        let expanded = expand_env_vars(content)?;

        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Checks for:
    /// - At least one location, with unique non-empty ids
    /// - Coordinates in range
    /// - Fractions and thresholds in [0, 1]
    /// - A well-formed model hour window
    fn validate(&self) -> Result<()> {
        if self.locations.is_empty() {
            return Err(AppError::Config(
                "At least one location must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for location in &self.locations {
            if location.id.trim().is_empty() {
                return Err(AppError::Config("Location id cannot be empty".to_string()));
            }
            // Ids end up in file names and glob patterns
            if location
                .id
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            {
                return Err(AppError::Config(format!(
                    "Location id '{}' may only contain letters, digits, '_' and '-'",
                    location.id
                )));
            }
            if !seen.insert(location.id.as_str()) {
                return Err(AppError::Config(format!(
                    "Duplicate location id '{}'",
                    location.id
                )));
            }
            if !(-90.0..=90.0).contains(&location.lat) || !(-180.0..=180.0).contains(&location.lon)
            {
                return Err(AppError::Config(format!(
                    "Location '{}' has out-of-range coordinates ({}, {})",
                    location.id, location.lat, location.lon
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.ingest.failure_threshold) {
            return Err(AppError::Config(format!(
                "ingest.failure_threshold {} must be between 0 and 1",
                self.ingest.failure_threshold
            )));
        }

        if !(0.0..=1.0).contains(&self.split.train_fraction) {
            return Err(AppError::Config(format!(
                "split.train_fraction {} must be between 0 and 1",
                self.split.train_fraction
            )));
        }

        if self.model.max_hour > 23 || self.model.min_hour > self.model.max_hour {
            return Err(AppError::Config(format!(
                "Model hour window {}..={} must be ordered and within 0..=23",
                self.model.min_hour, self.model.max_hour
            )));
        }

        if self.resample.gap_limit == GapLimit::Unbounded {
            tracing::warn!(
                "Hourly resampling with an unbounded gap limit will carry readings across sensor outages"
            );
        }

        Ok(())
    }
}

fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| AppError::Config(format!("Invalid env var pattern: {}", e)))?;

    let mut missing_vars = Vec::new();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                missing_vars.push(var_name.to_string());
            }
        }
    }

    if !missing_vars.is_empty() {
        return Err(AppError::Config(format!(
            "Missing required environment variable{}: {}\n\n\
             To fix this:\n\
             1. Create a .env file in the project root\n\
             2. Set the missing variable{}: export {}=<value>",
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars.join(", "),
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars[0],
        )));
    }

    Ok(result)
}
