use crate::error::Result;
use crate::models::{
    DailySeries, FeatureRow, Granularity, HourlySeries, NormalizedRecord, SlotProvenance,
    WeatherObservation,
};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Serialize)]
struct EventCsvRow {
    datetime: String,
    timestamp: i64,
    date: String,
    month: u32,
    day: u32,
    hour: u32,
    dow: u32,
    percent_capacity: f64,
    spots_taken: i32,
    total_spots: i32,
    in_out: Option<i8>,
}

#[derive(Debug, Serialize)]
struct HourlyCsvRow {
    datetime: String,
    date: String,
    month: u32,
    day: u32,
    hour: u32,
    dow: u32,
    percent_capacity: Option<f64>,
    spots_taken: Option<i32>,
    total_spots: Option<i32>,
    provenance: &'static str,
    hours_since_observed: Option<u32>,
}

#[derive(Debug, Serialize)]
struct DailyCsvRow {
    date: String,
    total_cars: Option<i64>,
    med_pc: Option<f64>,
    avg_pc: Option<f64>,
    max_pc: Option<f64>,
    event_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WeatherCsvRow<'a> {
    time: String,
    summary: Option<&'a str>,
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

#[derive(Debug, Serialize)]
struct FeatureCsvRow {
    datetime: String,
    date: String,
    month: u32,
    day: u32,
    hour: u32,
    dow: u32,
    is_wknd: u8,
    percent_capacity: Option<f64>,
    spots_taken: Option<i32>,
    total_spots: Option<i32>,
    temperature: Option<f64>,
    #[serde(rename = "apparentTemperature")]
    apparent_temperature: Option<f64>,
    humidity: Option<f64>,
    #[serde(rename = "cloudCover")]
    cloud_cover: Option<f64>,
    #[serde(rename = "precipIntensity")]
    precip_intensity: Option<f64>,
    #[serde(rename = "precipProbability")]
    precip_probability: Option<f64>,
    #[serde(rename = "windSpeed")]
    wind_speed: Option<f64>,
    #[serde(rename = "windGust")]
    wind_gust: Option<f64>,
    #[serde(rename = "uvIndex")]
    uv_index: Option<f64>,
}

fn provenance_label(provenance: SlotProvenance) -> (&'static str, Option<u32>) {
    match provenance {
        SlotProvenance::Observed => ("observed", Some(0)),
        SlotProvenance::ForwardFilled { hours } => ("filled", Some(hours)),
        SlotProvenance::Missing => ("missing", None),
    }
}

/// Normalized events, one row per raw record, percent capacity on 0-100.
pub fn write_events<W: Write>(writer: W, records: &[NormalizedRecord]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for record in records {
        csv.serialize(EventCsvRow {
            datetime: record.local_datetime.to_rfc3339(),
            timestamp: record.timestamp,
            date: record.calendar.date.to_string(),
            month: record.calendar.month,
            day: record.calendar.day,
            hour: record.calendar.hour,
            dow: record.calendar.day_of_week,
            percent_capacity: record.percent_capacity,
            spots_taken: record.spots_taken,
            total_spots: record.total_spots,
            in_out: record.in_out,
        })?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_hourly<W: Write>(writer: W, series: &HourlySeries) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for slot in &series.slots {
        let (provenance, hours_since_observed) = provenance_label(slot.provenance);
        csv.serialize(HourlyCsvRow {
            datetime: slot.local_datetime.to_rfc3339(),
            date: slot.calendar.date.to_string(),
            month: slot.calendar.month,
            day: slot.calendar.day,
            hour: slot.calendar.hour,
            dow: slot.calendar.day_of_week,
            percent_capacity: slot.values.map(|v| v.percent_capacity),
            spots_taken: slot.values.map(|v| v.spots_taken),
            total_spots: slot.values.map(|v| v.total_spots),
            provenance,
            hours_since_observed,
        })?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_daily<W: Write>(writer: W, series: &DailySeries) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for summary in &series.summaries {
        csv.serialize(DailyCsvRow {
            date: summary.date.to_string(),
            total_cars: summary.total_cars,
            med_pc: summary.med_pc,
            avg_pc: summary.avg_pc,
            max_pc: summary.max_pc,
            event_count: summary.event_count,
        })?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_weather<W: Write>(writer: W, series: &[WeatherObservation]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for obs in series {
        csv.serialize(WeatherCsvRow {
            time: obs.time.to_rfc3339(),
            summary: obs.summary.as_deref(),
            temperature: obs.temperature,
            apparent_temperature: obs.apparent_temperature,
            humidity: obs.humidity,
            cloud_cover: obs.cloud_cover,
            precip_intensity: obs.precip_intensity,
            precip_probability: obs.precip_probability,
            wind_speed: obs.wind_speed,
            wind_gust: obs.wind_gust,
            uv_index: obs.uv_index,
            visibility: obs.visibility,
            temperature_high: obs.temperature_high,
            temperature_low: obs.temperature_low,
            precip_intensity_max: obs.precip_intensity_max,
            lat: obs.lat,
            lon: obs.lon,
        })?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_features<W: Write>(writer: W, rows: &[FeatureRow]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in rows {
        csv.serialize(FeatureCsvRow {
            datetime: row.local_datetime.to_rfc3339(),
            date: row.calendar.date.to_string(),
            month: row.calendar.month,
            day: row.calendar.day,
            hour: row.calendar.hour,
            dow: row.calendar.day_of_week,
            is_wknd: row.is_weekend,
            percent_capacity: row.percent_capacity,
            spots_taken: row.spots_taken,
            total_spots: row.total_spots,
            temperature: row.temperature,
            apparent_temperature: row.apparent_temperature,
            humidity: row.humidity,
            cloud_cover: row.cloud_cover,
            precip_intensity: row.precip_intensity,
            precip_probability: row.precip_probability,
            wind_speed: row.wind_speed,
            wind_gust: row.wind_gust,
            uv_index: row.uv_index,
        })?;
    }
    csv.flush()?;
    Ok(())
}

/// Writes per-location snapshots under one output directory.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    output_dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn events_path(&self, location_id: &str) -> PathBuf {
        self.output_dir.join(format!("{}_raw.csv", location_id))
    }

    pub fn hourly_path(&self, location_id: &str) -> PathBuf {
        self.output_dir.join(format!("{}_hourly.csv", location_id))
    }

    pub fn daily_path(&self, location_id: &str) -> PathBuf {
        self.output_dir.join(format!("{}_daily.csv", location_id))
    }

    pub fn weather_path(&self, location_id: &str, granularity: Granularity) -> PathBuf {
        self.output_dir
            .join(format!("{}_weather_{}.csv", location_id, granularity.as_str()))
    }

    pub fn features_path(&self, location_id: &str) -> PathBuf {
        self.output_dir.join(format!("{}_features.csv", location_id))
    }

    pub fn save_events(
        &self,
        location_id: &str,
        records: &[NormalizedRecord],
    ) -> Result<PathBuf> {
        let path = self.events_path(location_id);
        write_events(self.create(&path)?, records)?;
        Ok(path)
    }

    pub fn save_hourly(&self, location_id: &str, series: &HourlySeries) -> Result<PathBuf> {
        let path = self.hourly_path(location_id);
        write_hourly(self.create(&path)?, series)?;
        Ok(path)
    }

    pub fn save_daily(&self, location_id: &str, series: &DailySeries) -> Result<PathBuf> {
        let path = self.daily_path(location_id);
        write_daily(self.create(&path)?, series)?;
        Ok(path)
    }

    pub fn save_weather(
        &self,
        location_id: &str,
        granularity: Granularity,
        series: &[WeatherObservation],
    ) -> Result<PathBuf> {
        let path = self.weather_path(location_id, granularity);
        write_weather(self.create(&path)?, series)?;
        Ok(path)
    }

    pub fn save_features(&self, location_id: &str, rows: &[FeatureRow]) -> Result<PathBuf> {
        let path = self.features_path(location_id);
        write_features(self.create(&path)?, rows)?;
        Ok(path)
    }

    fn create(&self, path: &Path) -> Result<std::io::BufWriter<std::fs::File>> {
        std::fs::create_dir_all(&self.output_dir)?;
        debug!("Writing snapshot {}", path.display());
        Ok(std::io::BufWriter::new(std::fs::File::create(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DailySummary, ResampleReport};
    use chrono::NaiveDate;

    #[test]
    fn test_daily_nulls_are_empty_cells() {
        let series = DailySeries {
            summaries: vec![
                DailySummary {
                    date: NaiveDate::from_ymd_opt(2019, 9, 1).unwrap(),
                    total_cars: Some(3),
                    med_pc: Some(25.0),
                    avg_pc: Some(30.0),
                    max_pc: Some(60.0),
                    event_count: 4,
                },
                DailySummary {
                    date: NaiveDate::from_ymd_opt(2019, 9, 2).unwrap(),
                    total_cars: None,
                    med_pc: None,
                    avg_pc: None,
                    max_pc: None,
                    event_count: 0,
                },
            ],
            missing_dates: 1,
        };

        let mut buf = Vec::new();
        write_daily(&mut buf, &series).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "date,total_cars,med_pc,avg_pc,max_pc,event_count\n\
             2019-09-01,3,25.0,30.0,60.0,4\n\
             2019-09-02,,,,,0\n"
        );
    }

    #[test]
    fn test_empty_hourly_writes_nothing() {
        let mut buf = Vec::new();
        write_hourly(
            &mut buf,
            &HourlySeries {
                slots: Vec::new(),
                report: ResampleReport::default(),
            },
        )
        .unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_events_keep_missing_direction_empty() {
        let raw = crate::models::RawEvent {
            percent_capacity: 0.4,
            spots_taken: 20,
            total_spots: 50,
            timestamp: 1_567_317_600,
            in_out: None,
        };
        let record = NormalizedRecord::from_raw(raw, chrono_tz::America::Denver).unwrap();

        let mut buf = Vec::new();
        write_events(&mut buf, &[record]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "datetime,timestamp,date,month,day,hour,dow,percent_capacity,spots_taken,total_spots,in_out\n\
             2019-09-01T00:00:00-06:00,1567317600,2019-09-01,9,1,0,6,40.0,20,50,\n"
        );
    }

    #[test]
    fn test_writer_paths() {
        let writer = SnapshotWriter::new("/tmp/out");
        assert_eq!(
            writer.weather_path("lot", Granularity::Hourly),
            PathBuf::from("/tmp/out/lot_weather_hourly.csv")
        );
        assert_eq!(writer.features_path("lot"), PathBuf::from("/tmp/out/lot_features.csv"));
        assert_eq!(writer.events_path("lot"), PathBuf::from("/tmp/out/lot_raw.csv"));
    }
}
