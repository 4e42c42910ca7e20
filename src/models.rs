use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// A single LotSpot sensor event exactly as stored in the raw files.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Fraction of the lot in use, 0-1.
    pub percent_capacity: f64,
    pub spots_taken: i32,
    pub total_spots: i32,
    /// Epoch seconds, UTC.
    pub timestamp: i64,
    /// Direction flag: -1 out, 0 none, 1 in. `None` for sensor noise codes (>= 2).
    pub in_out: Option<i8>,
}

/// Calendar fields derived from a local timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFields {
    pub date: NaiveDate,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: u32,
}

impl CalendarFields {
    pub fn from_datetime(dt: &DateTime<Tz>) -> Self {
        Self {
            date: dt.date_naive(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            day_of_week: dt.weekday().num_days_from_monday(),
        }
    }

    pub fn is_weekend(&self) -> bool {
        self.day_of_week >= 5
    }
}

/// A raw event placed on the local civil clock.
///
/// `percent_capacity` is already on the 0-100 scale. The only way to build
/// one from a [`RawEvent`] is [`NormalizedRecord::from_raw`], which performs
/// that rescale.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub percent_capacity: f64,
    pub spots_taken: i32,
    pub total_spots: i32,
    pub timestamp: i64,
    pub in_out: Option<i8>,
    pub local_datetime: DateTime<Tz>,
    pub calendar: CalendarFields,
}

impl NormalizedRecord {
    /// Returns `None` when the timestamp is outside chrono's representable range.
    pub fn from_raw(raw: RawEvent, tz: Tz) -> Option<Self> {
        let local_datetime = local_from_epoch(raw.timestamp, tz)?;
        Some(Self {
            percent_capacity: raw.percent_capacity * 100.0,
            spots_taken: raw.spots_taken,
            total_spots: raw.total_spots,
            timestamp: raw.timestamp,
            in_out: raw.in_out,
            calendar: CalendarFields::from_datetime(&local_datetime),
            local_datetime,
        })
    }
}

pub fn local_from_epoch(secs: i64, tz: Tz) -> Option<DateTime<Tz>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|utc| utc.with_timezone(&tz))
}

/// Occupancy values carried by an hourly slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccupancyValues {
    pub percent_capacity: f64,
    pub spots_taken: i32,
    pub total_spots: i32,
}

impl From<&NormalizedRecord> for OccupancyValues {
    fn from(record: &NormalizedRecord) -> Self {
        Self {
            percent_capacity: record.percent_capacity,
            spots_taken: record.spots_taken,
            total_spots: record.total_spots,
        }
    }
}

/// Where the values of an hourly slot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotProvenance {
    Observed,
    /// Carried forward; `hours` is the distance to the last observed slot.
    ForwardFilled { hours: u32 },
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HourlySlot {
    pub local_datetime: DateTime<Tz>,
    pub calendar: CalendarFields,
    pub values: Option<OccupancyValues>,
    pub provenance: SlotProvenance,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResampleReport {
    pub observed: usize,
    pub forward_filled: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HourlySeries {
    pub slots: Vec<HourlySlot>,
    pub report: ResampleReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_cars: Option<i64>,
    pub med_pc: Option<f64>,
    pub avg_pc: Option<f64>,
    pub max_pc: Option<f64>,
    pub event_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailySeries {
    pub summaries: Vec<DailySummary>,
    /// Dates inside the range with no source events.
    pub missing_dates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Hourly,
    Daily,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
        }
    }
}

/// One weather observation, hourly or daily, on the local civil clock.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherObservation {
    pub time: DateTime<Tz>,
    pub summary: Option<String>,
    pub temperature: Option<f64>,
    pub apparent_temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub cloud_cover: Option<f64>,
    pub precip_intensity: Option<f64>,
    pub precip_probability: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub uv_index: Option<f64>,
    pub visibility: Option<f64>,
    // Daily batches only
    pub temperature_high: Option<f64>,
    pub temperature_low: Option<f64>,
    pub precip_intensity_max: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// An hourly occupancy slot joined with the weather for the same instant.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub local_datetime: DateTime<Tz>,
    pub calendar: CalendarFields,
    pub is_weekend: u8,
    pub percent_capacity: Option<f64>,
    pub spots_taken: Option<i32>,
    pub total_spots: Option<i32>,
    pub temperature: Option<f64>,
    pub apparent_temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub cloud_cover: Option<f64>,
    pub precip_intensity: Option<f64>,
    pub precip_probability: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub uv_index: Option<f64>,
}
