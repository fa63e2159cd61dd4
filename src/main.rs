use std::{sync::Arc, time::Duration};

use tokio::net::TcpListener;
use tracing::{info, warn};
use wayfarer::clock::SystemClock;
use wayfarer::config::AppConfig;
use wayfarer::db::{init_pool, run_migrations};
use wayfarer::error::AppError;
use wayfarer::routes::create_router;
use wayfarer::services::trips::TripService;
use wayfarer::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = AppConfig::from_env()?;
    let db = init_pool(&config.database_url, config.max_connections).await?;
    run_migrations(&db).await?;

    let state = AppState::new(db, Arc::new(SystemClock));

    if let Some(interval) = config.status_sweep_interval {
        tokio::spawn(run_status_sweep(state.trips.clone(), interval));
    }

    let app = create_router(state);

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn run_status_sweep(trips: TripService, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if let Err(err) = trips.sweep_statuses().await {
            warn!("status sweep failed: {err}");
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,wayfarer=debug".into());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
