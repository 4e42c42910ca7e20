use lotspot_pipeline::config::Config;
use lotspot_pipeline::pipeline::{LocationOutcome, Pipeline};
use std::fs;
use std::path::Path;

// 2019-09-02 00:00 MDT, a Monday
const MONDAY: i64 = 1_567_404_000;
const HOUR: i64 = 3600;
const DAY: i64 = 86_400;
const DAYS: i64 = 5;

fn config_for(root: &Path) -> Config {
    config_with_model(root, "")
}

fn config_with_model(root: &Path, model: &str) -> Config {
    let yaml = format!(
        r#"
{model}
timezone: America/Denver
data:
  raw_dir: {root}/raw
  weather_dir: {root}/weather
  output_dir: {root}/out
resample:
  gap_limit: 3
split:
  train_fraction: 0.8
  seed: 47
locations:
  - id: lot
    name: Test Lot
    lat: 39.646865
    lon: -105.196314
    capacity: 50
  - id: broken_lot
    lat: 39.62
    lon: -105.34
"#,
        root = root.display(),
        model = model
    );
    Config::from_yaml(&yaml).expect("config")
}

/// Occupancy every 15 minutes from 06:00 to 20:00 local for five days.
fn write_raw(root: &Path) {
    let raw = root.join("raw");
    fs::create_dir_all(&raw).expect("mkdir");

    let mut lines = Vec::new();
    for day in 0..DAYS {
        for quarter in 0..(14 * 4) {
            let ts = MONDAY + day * DAY + 6 * HOUR + quarter * 15 * 60;
            let pc = 0.1 + (quarter as f64) / 100.0 + (day as f64) / 50.0;
            let in_out = if quarter % 2 == 0 { "1" } else { "-1" };
            lines.push(format!("{:.3},{},50,{},{}", pc, (pc * 50.0) as i64, ts, in_out));
        }
    }
    fs::write(raw.join("lot.csv"), lines.join("\n")).expect("write raw");
}

/// One hourly and one daily batch per day; day one is missing its 14:00 hour.
fn write_weather(root: &Path) {
    let weather = root.join("weather");
    fs::create_dir_all(&weather).expect("mkdir");

    for day in 0..DAYS {
        let date = format!("2019-09-{:02}", 2 + day);
        let hourly: Vec<serde_json::Value> = (0..24)
            .filter(|h| !(day == 0 && *h == 14))
            .map(|h| {
                let temperature = 55.0 + h as f64;
                let uv_index = if (8..18).contains(&h) { 5 } else { 0 };
                serde_json::json!({
                    "time": MONDAY + day * DAY + h * HOUR,
                    "summary": "Clear",
                    "temperature": temperature,
                    "cloudCover": 0.1,
                    "precipIntensity": 0.0,
                    "uvIndex": uv_index,
                    "lat": 39.646865,
                    "lon": -105.196314
                })
            })
            .collect();
        fs::write(
            weather.join(format!("lot_{}_hourly.json", date)),
            serde_json::to_string(&hourly).expect("json"),
        )
        .expect("write hourly");

        let daily = serde_json::json!([{
            "time": MONDAY + day * DAY,
            "temperatureHigh": 80.0,
            "temperatureLow": 50.0,
            "precipIntensityMax": 0.0
        }]);
        fs::write(
            weather.join(format!("lot_{}_daily.json", date)),
            daily.to_string(),
        )
        .expect("write daily");
    }
}

/// Test a full batch run: outputs written, join losses counted, failures isolated
#[test]
fn test_full_batch_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_raw(dir.path());
    write_weather(dir.path());

    let report = Pipeline::new(config_for(dir.path())).run();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.completed(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.outcomes[0].location_id(), "lot");
    assert_eq!(report.outcomes[1].location_id(), "broken_lot");

    let LocationOutcome::Completed(lot) = &report.outcomes[0] else {
        panic!("lot should complete: {:?}", report.outcomes[0]);
    };

    assert_eq!(lot.events, (DAYS * 14 * 4) as usize);
    assert_eq!(lot.capacity_mismatches, 0);
    assert_eq!(lot.weather_off_site, 0);
    // Day one 06:00 through day five 19:00
    let span = ((DAYS - 1) * 24 + 13 + 1) as usize;
    assert_eq!(
        lot.resample.observed + lot.resample.forward_filled + lot.resample.missing,
        span
    );
    // Each night: 20:00-22:00 filled, 23:00-05:00 null
    assert_eq!(lot.resample.forward_filled, ((DAYS - 1) * 3) as usize);
    assert_eq!(lot.resample.missing, ((DAYS - 1) * 7) as usize);

    assert_eq!(lot.daily_rows, DAYS as usize);
    assert_eq!(lot.missing_dates, 0);
    assert_eq!(lot.hourly_weather, (DAYS * 24 - 1) as usize);
    assert_eq!(lot.daily_weather, DAYS as usize);

    // The missing 14:00 weather hour drops exactly one occupancy slot
    assert_eq!(lot.join.dropped_occupancy, 1);
    assert_eq!(lot.join.dropped_weather, 6 + 4);
    assert_eq!(lot.feature_rows, span - 1);

    assert_eq!(lot.train_dates, 4);
    assert_eq!(lot.test_dates, 1);
    // 14 modelled hours a day, minus the dropped 14:00
    assert_eq!(lot.model_rows, (DAYS * 14 - 1) as usize);
    let baseline = lot.baseline.expect("baseline");
    assert!(baseline.train_r2.abs() < 1e-9);
    assert!(baseline.test_rmse > 0.0);

    let LocationOutcome::Failed { error, .. } = &report.outcomes[1] else {
        panic!("broken_lot should fail");
    };
    assert!(error.contains("no raw event files"));

    let out = dir.path().join("out");
    for name in [
        "lot_raw.csv",
        "lot_hourly.csv",
        "lot_daily.csv",
        "lot_weather_hourly.csv",
        "lot_weather_daily.csv",
        "lot_features.csv",
    ] {
        assert!(out.join(name).is_file(), "missing output {}", name);
    }
    assert!(!out.join("broken_lot_hourly.csv").exists());

    let hourly = fs::read_to_string(out.join("lot_hourly.csv")).expect("read hourly");
    assert!(hourly.starts_with(
        "datetime,date,month,day,hour,dow,percent_capacity,spots_taken,total_spots,provenance,hours_since_observed\n\
         2019-09-02T06:00:00-06:00,2019-09-02,9,2,6,0,"
    ));

    let features = fs::read_to_string(out.join("lot_features.csv")).expect("read features");
    assert!(!features.contains("2019-09-02T14:00:00"));
}

/// Test that the date split only counts dates that still have model rows
#[test]
fn test_cutoff_split_counts_model_dates() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_raw(dir.path());
    write_weather(dir.path());

    // Leaves 2019-09-02 through 2019-09-04 for modelling
    let config = config_with_model(dir.path(), "model:\n  cutoff_date: 2019-09-05");
    let report = Pipeline::new(config).run();

    let LocationOutcome::Completed(lot) = &report.outcomes[0] else {
        panic!("lot should complete: {:?}", report.outcomes[0]);
    };
    // round(0.8 * 3) = 2 train dates, 1 test date
    assert_eq!(lot.train_dates, 2);
    assert_eq!(lot.test_dates, 1);
    assert_eq!(lot.model_rows, (3 * 14 - 1) as usize);
    assert!(lot.baseline.is_some());
}

/// Test that a second run regenerates identical snapshots
#[test]
fn test_rerun_regenerates_identical_outputs() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_raw(dir.path());
    write_weather(dir.path());

    let out = dir.path().join("out");
    let read_all = || {
        ["lot_hourly.csv", "lot_daily.csv", "lot_features.csv"]
            .iter()
            .map(|name| fs::read(out.join(name)).expect("read"))
            .collect::<Vec<_>>()
    };

    Pipeline::new(config_for(dir.path())).run();
    let first = read_all();
    Pipeline::new(config_for(dir.path())).run();
    let second = read_all();

    assert_eq!(first, second);
}
