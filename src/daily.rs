use crate::models::{DailySeries, DailySummary, NormalizedRecord};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Per-date occupancy summaries over a gap-free calendar range.
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyAggregator;

impl DailyAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn aggregate(&self, records: &[NormalizedRecord]) -> DailySeries {
        let mut by_date: BTreeMap<NaiveDate, Vec<&NormalizedRecord>> = BTreeMap::new();
        for record in records {
            by_date.entry(record.calendar.date).or_default().push(record);
        }

        let (Some(&first), Some(&last)) = (by_date.keys().next(), by_date.keys().next_back()) else {
            return DailySeries {
                summaries: Vec::new(),
                missing_dates: 0,
            };
        };

        let mut summaries = Vec::new();
        let mut missing_dates = 0;

        for date in first.iter_days().take_while(|d| *d <= last) {
            match by_date.get(&date) {
                Some(group) => summaries.push(summarize(date, group)),
                None => {
                    missing_dates += 1;
                    summaries.push(DailySummary {
                        date,
                        total_cars: None,
                        med_pc: None,
                        avg_pc: None,
                        max_pc: None,
                        event_count: 0,
                    });
                }
            }
        }

        debug!(
            "Aggregated {} records into {} daily rows ({} to {})",
            records.len(),
            summaries.len(),
            first,
            last
        );
        if missing_dates > 0 {
            warn!(
                "MissingDataWarning: {} of {} dates between {} and {} have no events",
                missing_dates,
                summaries.len(),
                first,
                last
            );
        }

        DailySeries {
            summaries,
            missing_dates,
        }
    }
}

fn summarize(date: NaiveDate, group: &[&NormalizedRecord]) -> DailySummary {
    let directions: Vec<i64> = group
        .iter()
        .filter_map(|r| r.in_out.map(i64::from))
        .collect();
    let total_cars = if directions.is_empty() {
        None
    } else {
        Some(directions.iter().sum())
    };

    let mut pcs: Vec<f64> = group
        .iter()
        .map(|r| r.percent_capacity)
        .filter(|pc| !pc.is_nan())
        .collect();
    pcs.sort_by(f64::total_cmp);

    DailySummary {
        date,
        total_cars,
        med_pc: median(&pcs),
        avg_pc: mean(&pcs),
        max_pc: pcs.last().copied(),
        event_count: group.len(),
    }
}

/// Median of an already sorted slice; even lengths average the middle pair.
fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawEvent;

    // 2019-09-01 12:00 MDT
    const NOON: i64 = 1_567_360_800;
    const DAY: i64 = 86_400;

    fn record(pc: f64, timestamp: i64, in_out: Option<i8>) -> NormalizedRecord {
        NormalizedRecord::from_raw(
            RawEvent {
                percent_capacity: pc,
                spots_taken: 0,
                total_spots: 50,
                timestamp,
                in_out,
            },
            chrono_tz::America::Denver,
        )
        .unwrap()
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[1.0, 2.0, 9.0]), Some(2.0));
        assert_eq!(median(&[1.0, 2.0, 4.0, 9.0]), Some(3.0));
    }

    #[test]
    fn test_summary_statistics() {
        let records = vec![
            record(0.10, NOON, Some(1)),
            record(0.30, NOON + 60, Some(1)),
            record(0.20, NOON + 120, Some(-1)),
            record(0.60, NOON + 180, None),
        ];
        let series = DailyAggregator::new().aggregate(&records);
        assert_eq!(series.summaries.len(), 1);

        let day = &series.summaries[0];
        assert_eq!(day.total_cars, Some(1));
        assert!((day.med_pc.unwrap() - 25.0).abs() < 1e-9);
        assert!((day.avg_pc.unwrap() - 30.0).abs() < 1e-9);
        assert!((day.max_pc.unwrap() - 60.0).abs() < 1e-9);
        assert_eq!(day.event_count, 4);
    }

    #[test]
    fn test_total_cars_null_without_valid_directions() {
        let records = vec![record(0.10, NOON, None), record(0.20, NOON + 60, None)];
        let series = DailyAggregator::new().aggregate(&records);
        assert_eq!(series.summaries[0].total_cars, None);
        assert!(series.summaries[0].avg_pc.is_some());
    }

    #[test]
    fn test_missing_dates_are_backfilled_with_nulls() {
        let records = vec![
            record(0.10, NOON, Some(1)),
            record(0.20, NOON + 3 * DAY, Some(1)),
        ];
        let series = DailyAggregator::new().aggregate(&records);
        let dates: Vec<String> = series
            .summaries
            .iter()
            .map(|s| s.date.to_string())
            .collect();
        assert_eq!(
            dates,
            vec!["2019-09-01", "2019-09-02", "2019-09-03", "2019-09-04"]
        );
        assert_eq!(series.missing_dates, 2);
        let gap = &series.summaries[1];
        assert_eq!(gap.total_cars, None);
        assert_eq!(gap.med_pc, None);
        assert_eq!(gap.event_count, 0);
    }

    #[test]
    fn test_empty_input() {
        let series = DailyAggregator::new().aggregate(&[]);
        assert!(series.summaries.is_empty());
        assert_eq!(series.missing_dates, 0);
    }
}
