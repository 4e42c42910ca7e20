use crate::config::RowPolicy;
use crate::error::{AppError, Result};
use crate::models::RawEvent;
use tracing::warn;

/// Raw LotSpot files carry exactly these columns, in this order, with no header.
pub const RAW_COLUMNS: [&str; 5] = [
    "percent_capacity",
    "spots_taken",
    "total_spots",
    "timestamp",
    "in_out",
];

/// Direction codes at or above this value are sensor noise.
const IN_OUT_NOISE_FLOOR: i64 = 2;

/// Default failure threshold - fail if more than 10% of lines fail to parse
const DEFAULT_FAILURE_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseStats {
    pub total_lines: usize,
    pub parsed_successfully: usize,
    pub parse_failures: usize,
    pub empty_lines: usize,
    /// Rows whose in_out code was sensor noise and mapped to missing.
    pub noisy_direction_codes: usize,
    pub failure_rate: f64,
}

impl ParseStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finalize(&mut self) {
        let non_empty = self.total_lines - self.empty_lines;
        self.failure_rate = if non_empty > 0 {
            self.parse_failures as f64 / non_empty as f64
        } else {
            0.0
        };
    }

    pub fn exceeds_threshold(&self, threshold: f64) -> bool {
        self.failure_rate > threshold
    }

    /// Fold the stats of another file into this one.
    pub fn merge(&mut self, other: &ParseStats) {
        self.total_lines += other.total_lines;
        self.parsed_successfully += other.parsed_successfully;
        self.parse_failures += other.parse_failures;
        self.empty_lines += other.empty_lines;
        self.noisy_direction_codes += other.noisy_direction_codes;
        self.finalize();
    }
}

pub struct Parser;

impl Parser {
    /// Parse a raw LotSpot file, aborting on the first malformed row.
    pub fn parse_file(content: &str, source: &str) -> Result<(Vec<RawEvent>, ParseStats)> {
        Self::parse_file_with_policy(content, source, RowPolicy::Abort, DEFAULT_FAILURE_THRESHOLD)
    }

    /// Parse a raw LotSpot file with an explicit malformed-row policy.
    ///
    /// With [`RowPolicy::Skip`] bad rows are logged and counted, and the
    /// file is still rejected once the failure rate passes `failure_threshold`.
    pub fn parse_file_with_policy(
        content: &str,
        source: &str,
        policy: RowPolicy,
        failure_threshold: f64,
    ) -> Result<(Vec<RawEvent>, ParseStats)> {
        let mut events = Vec::new();
        let mut stats = ParseStats::new();

        for (line_num, line) in content.lines().enumerate() {
            stats.total_lines += 1;

            let line = line.trim();
            if line.is_empty() {
                stats.empty_lines += 1;
                continue;
            }

            match Self::parse_line(line) {
                Ok((event, noisy)) => {
                    if noisy {
                        stats.noisy_direction_codes += 1;
                    }
                    events.push(event);
                    stats.parsed_successfully += 1;
                }
                Err(reason) => match policy {
                    RowPolicy::Abort => {
                        return Err(AppError::DataFormat {
                            location: source.to_string(),
                            line: line_num + 1,
                            reason,
                        });
                    }
                    RowPolicy::Skip => {
                        stats.parse_failures += 1;
                        warn!(
                            "Skipping {} line {} (failure {}/{}): {} - {}",
                            source,
                            line_num + 1,
                            stats.parse_failures,
                            stats.total_lines - stats.empty_lines,
                            reason,
                            line
                        );
                    }
                },
            }
        }

        stats.finalize();

        if stats.exceeds_threshold(failure_threshold) {
            return Err(AppError::DataFormat {
                location: source.to_string(),
                line: 0,
                reason: format!(
                    "parse failure rate {:.1}% exceeds threshold {:.1}%: {} failures out of {} non-empty lines",
                    stats.failure_rate * 100.0,
                    failure_threshold * 100.0,
                    stats.parse_failures,
                    stats.total_lines - stats.empty_lines
                ),
            });
        }

        Ok((events, stats))
    }

    /// Returns the event and whether its direction code was sensor noise.
    fn parse_line(line: &str) -> std::result::Result<(RawEvent, bool), String> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();

        if fields.len() != RAW_COLUMNS.len() {
            return Err(format!(
                "expected {} columns ({}), got {}",
                RAW_COLUMNS.len(),
                RAW_COLUMNS.join(","),
                fields.len()
            ));
        }

        let percent_capacity = parse_float(fields[0], RAW_COLUMNS[0])?;
        let spots_taken = parse_count(fields[1], RAW_COLUMNS[1])?;
        let total_spots = parse_count(fields[2], RAW_COLUMNS[2])?;
        let timestamp = parse_timestamp(fields[3])?;
        let (in_out, noisy) = parse_direction(fields[4])?;

        Ok((
            RawEvent {
                percent_capacity,
                spots_taken,
                total_spots,
                timestamp,
                in_out,
            },
            noisy,
        ))
    }
}

fn parse_float(s: &str, column: &str) -> std::result::Result<f64, String> {
    let val = s
        .parse::<f64>()
        .map_err(|e| format!("failed to parse {} '{}': {}", column, s, e))?;
    if !val.is_finite() {
        return Err(format!("{} '{}' is not a finite number", column, s));
    }
    Ok(val)
}

fn parse_count(s: &str, column: &str) -> std::result::Result<i32, String> {
    s.parse::<i32>()
        .map_err(|e| format!("failed to parse {} '{}': {}", column, s, e))
}

fn parse_timestamp(s: &str) -> std::result::Result<i64, String> {
    let secs = s
        .parse::<i64>()
        .map_err(|e| format!("failed to parse timestamp '{}': {}", s, e))?;
    if chrono::DateTime::from_timestamp(secs, 0).is_none() {
        return Err(format!("timestamp {} is out of range", secs));
    }
    Ok(secs)
}

/// Empty, `nan` and codes >= 2 are missing. Codes below -1 are rejected.
fn parse_direction(s: &str) -> std::result::Result<(Option<i8>, bool), String> {
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return Ok((None, false));
    }

    let code = s
        .parse::<i64>()
        .or_else(|_| {
            // Some exports write the flag as a float, e.g. "1.0"
            s.parse::<f64>()
                .ok()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
                .ok_or(())
        })
        .map_err(|_| format!("failed to parse in_out '{}'", s))?;

    if code >= IN_OUT_NOISE_FLOOR {
        return Ok((None, true));
    }
    if code < -1 {
        return Err(format!("unknown in_out direction code {}", code));
    }
    Ok((Some(code as i8), false))
}
