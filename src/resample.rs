use crate::config::GapLimit;
use crate::models::{
    local_from_epoch, CalendarFields, HourlySeries, HourlySlot, NormalizedRecord, OccupancyValues,
    ResampleReport, SlotProvenance,
};
use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const SECONDS_PER_HOUR: i64 = 3600;

/// Start of the local clock hour containing `dt`, as epoch seconds.
pub fn floor_to_hour(dt: &DateTime<Tz>) -> i64 {
    dt.timestamp() - i64::from(dt.minute() * 60 + dt.second())
}

/// Turns an irregular event sequence into one slot per clock hour.
///
/// A slot takes the latest record inside its hour. Hours without a record are
/// forward-filled from the last observed hour for at most `gap_limit`
/// consecutive slots, and are null after that.
#[derive(Debug, Clone, Copy)]
pub struct HourlyResampler {
    gap_limit: GapLimit,
}

impl HourlyResampler {
    pub fn new(gap_limit: GapLimit) -> Self {
        Self { gap_limit }
    }

    pub fn gap_limit(&self) -> GapLimit {
        self.gap_limit
    }

    pub fn resample(&self, records: &[NormalizedRecord]) -> HourlySeries {
        let Some(tz) = records.first().map(|r| r.local_datetime.timezone()) else {
            return HourlySeries {
                slots: Vec::new(),
                report: ResampleReport::default(),
            };
        };

        // hour start -> (timestamp, values) of the latest record in that hour
        let mut buckets: BTreeMap<i64, (i64, OccupancyValues)> = BTreeMap::new();
        for record in records {
            let hour = floor_to_hour(&record.local_datetime);
            let candidate = (record.timestamp, OccupancyValues::from(record));
            buckets
                .entry(hour)
                .and_modify(|current| {
                    if candidate.0 >= current.0 {
                        *current = candidate;
                    }
                })
                .or_insert(candidate);
        }

        let (Some(&first), Some(&last)) = (buckets.keys().next(), buckets.keys().next_back()) else {
            return HourlySeries {
                slots: Vec::new(),
                report: ResampleReport::default(),
            };
        };

        let mut slots = Vec::with_capacity(((last - first) / SECONDS_PER_HOUR + 1) as usize);
        let mut report = ResampleReport::default();
        let mut last_observed: Option<OccupancyValues> = None;
        let mut run: u32 = 0;

        for hour in (first..=last).step_by(SECONDS_PER_HOUR as usize) {
            let Some(local_datetime) = local_from_epoch(hour, tz) else {
                continue;
            };

            let (values, provenance) = match buckets.get(&hour) {
                Some((_, values)) => {
                    last_observed = Some(*values);
                    run = 0;
                    report.observed += 1;
                    (Some(*values), SlotProvenance::Observed)
                }
                None => {
                    run = run.saturating_add(1);
                    match last_observed {
                        Some(values) if self.gap_limit.allows(run) => {
                            report.forward_filled += 1;
                            (Some(values), SlotProvenance::ForwardFilled { hours: run })
                        }
                        _ => {
                            report.missing += 1;
                            (None, SlotProvenance::Missing)
                        }
                    }
                }
            };

            slots.push(HourlySlot {
                calendar: CalendarFields::from_datetime(&local_datetime),
                local_datetime,
                values,
                provenance,
            });
        }

        debug!(
            "Resampled {} records into {} hourly slots ({} observed, {} filled, {} missing)",
            records.len(),
            slots.len(),
            report.observed,
            report.forward_filled,
            report.missing
        );
        if report.missing > 0 {
            warn!(
                "MissingDataWarning: {} hourly slots exceed the {:?} gap limit and are null",
                report.missing, self.gap_limit
            );
        }

        HourlySeries { slots, report }
    }
}
