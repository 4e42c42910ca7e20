use lotspot_pipeline::config::Config;
use lotspot_pipeline::pipeline::{LocationOutcome, Pipeline};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lotspot_pipeline=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("LotSpot alignment pipeline starting...");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/config.yaml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {}: {}\n\n\
             Make sure:\n\
             1. The config file exists (pass its path as the first argument)\n\
             2. All referenced environment variables are set\n\
             3. Every location has an id, lat and lon",
            config_path,
            e
        )
    })?;
    info!("Configuration loaded from {}", config_path);

    let report = Pipeline::new(config).run();

    for outcome in &report.outcomes {
        match outcome {
            LocationOutcome::Completed(r) => info!(
                "{}: {} events, {} hourly slots ({} filled, {} missing), {} days ({} without data), {} feature rows ({} slots without weather)",
                r.location_id,
                r.events,
                r.resample.observed + r.resample.forward_filled + r.resample.missing,
                r.resample.forward_filled,
                r.resample.missing,
                r.daily_rows,
                r.missing_dates,
                r.feature_rows,
                r.join.dropped_occupancy
            ),
            LocationOutcome::Failed { location_id, error } => {
                warn!("{}: failed: {}", location_id, error)
            }
        }
    }

    if report.completed() == 0 {
        error!("Every location failed");
        anyhow::bail!("no location was processed successfully");
    }

    info!("LotSpot alignment pipeline finished");
    Ok(())
}
