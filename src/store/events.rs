use crate::config::{Config, IngestConfig, RowPolicy};
use crate::error::{AppError, Result};
use crate::models::NormalizedRecord;
use crate::parser::{ParseStats, Parser};
use crate::store::date_from_stem;
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reads raw LotSpot event files for a location and places them on the
/// local civil clock.
///
/// A location's events live in `<raw_dir>/<id>.csv` and/or one file per
/// collection day, `<raw_dir>/<id>_<YYYY-MM-DD>.csv`.
#[derive(Debug, Clone)]
pub struct RawEventStore {
    raw_dir: PathBuf,
    tz: Tz,
    policy: RowPolicy,
    failure_threshold: f64,
}

impl RawEventStore {
    pub fn new(raw_dir: impl Into<PathBuf>, tz: Tz, ingest: &IngestConfig) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            tz,
            policy: ingest.on_malformed_row,
            failure_threshold: ingest.failure_threshold,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.data.raw_dir, config.timezone, &config.ingest)
    }

    /// Raw files for a location: the combined file first, then day files by date.
    pub fn files_for(&self, location_id: &str) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        let combined = self.raw_dir.join(format!("{}.csv", location_id));
        if combined.is_file() {
            files.push(combined);
        }

        let pattern = format!(
            "{}/{}_*.csv",
            glob::Pattern::escape(&self.raw_dir.to_string_lossy()),
            location_id
        );
        let entries = glob::glob(&pattern)
            .map_err(|e| {
                AppError::InvalidData(format!("Bad raw file pattern '{}': {}", pattern, e))
            })?;

        let mut day_files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| AppError::Io(e.into()))?;
            let date = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|stem| date_from_stem(stem, location_id));
            match date {
                Some(date) => day_files.push((date, path)),
                None => debug!("Ignoring {} for {}", path.display(), location_id),
            }
        }
        day_files.sort();
        files.extend(day_files.into_iter().map(|(_, path)| path));

        Ok(files)
    }

    /// Load every event for a location, ordered by local time.
    pub fn load(&self, location_id: &str) -> Result<Vec<NormalizedRecord>> {
        self.load_with_stats(location_id).map(|(records, _)| records)
    }

    pub fn load_with_stats(
        &self,
        location_id: &str,
    ) -> Result<(Vec<NormalizedRecord>, ParseStats)> {
        let files = self.files_for(location_id)?;
        if files.is_empty() {
            return Err(AppError::MissingInput(format!(
                "no raw event files for '{}' in {}",
                location_id,
                self.raw_dir.display()
            )));
        }

        let mut records = Vec::new();
        let mut stats = ParseStats::new();

        for path in &files {
            let (file_records, file_stats) = self.load_file(path)?;
            stats.merge(&file_stats);
            records.extend(file_records);
        }

        // Stable: events sharing a timestamp keep their file order
        records.sort_by_key(|r| r.timestamp);

        if stats.noisy_direction_codes > 0 {
            warn!(
                "{}: {} events had noisy in_out codes, treated as missing",
                location_id, stats.noisy_direction_codes
            );
        }
        info!(
            "Loaded {} events for {} from {} file(s) ({} skipped rows)",
            records.len(),
            location_id,
            files.len(),
            stats.parse_failures
        );

        Ok((records, stats))
    }

    fn load_file(&self, path: &Path) -> Result<(Vec<NormalizedRecord>, ParseStats)> {
        let content = std::fs::read_to_string(path)?;
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let (events, stats) =
            Parser::parse_file_with_policy(&content, &source, self.policy, self.failure_threshold)?;

        let records = events
            .into_iter()
            .map(|event| {
                let timestamp = event.timestamp;
                NormalizedRecord::from_raw(event, self.tz).ok_or_else(|| AppError::DataFormat {
                    location: source.clone(),
                    line: 0,
                    reason: format!("timestamp {} cannot be localized", timestamp),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Parsed {} events from {}", records.len(), source);
        Ok((records, stats))
    }
}
