use axum::Router;
use contest_engine::config::Config;
use contest_engine::services::{
    Clock, ContestService, MarketDataGateway, PhaseScheduler, SnapshotStore, SystemClock,
};
use contest_engine::{api, AppState};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "contest_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env());
    info!("Starting contest engine on {}:{}", config.host, config.port);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Open the snapshot store
    let store = Arc::new(match &config.database_path {
        Some(path) => SnapshotStore::new(path)?,
        None => {
            warn!("DATABASE_PATH not set, snapshots will not survive a restart");
            SnapshotStore::new_in_memory()?
        }
    });

    // Market data gateway (live when credentialed, simulated otherwise)
    let gateway = Arc::new(MarketDataGateway::new(
        &config,
        clock.clone(),
        Some(store.clone()),
    ));
    if gateway.is_live_source_configured() {
        if let Err(e) = gateway.ensure_session().await {
            error!("Broker session unavailable: {}", e);
        }
    }

    // Contests and portfolios
    let contests = Arc::new(
        ContestService::new(clock.clone(), config.default_virtual_cash).with_store(store.clone()),
    );
    if let Err(e) = contests.restore() {
        error!("Failed to restore contests: {}", e);
    }

    // Phase scheduler
    let scheduler = Arc::new(PhaseScheduler::new(
        contests.clone(),
        clock.clone(),
        Duration::from_secs(config.scheduler_interval_secs),
    ));
    scheduler.start();

    // Hourly EOD cache check
    {
        let gateway = gateway.clone();
        let every = Duration::from_secs(config.eod_check_secs);
        tokio::spawn(async move {
            loop {
                if gateway.refresh_eod_prices_if_stale().await {
                    debug!("EOD cache refreshed");
                }
                tokio::time::sleep(every).await;
            }
        });
    }

    // Feed ticks for every held symbol into the ledgers
    let _ticks = {
        let symbols_source = contests.clone();
        let tick_target = contests.clone();
        gateway.subscribe_ticks_with(
            move || symbols_source.held_symbols(),
            move |quote| {
                tick_target.apply_quote(&quote);
            },
        )
    };

    // Re-rank standings after price movement
    {
        let contests = contests.clone();
        let every = Duration::from_secs(config.tick_interval_secs());
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                contests.refresh_all_standings();
            }
        });
    }

    let state = AppState {
        config: config.clone(),
        gateway,
        contests,
    };

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Contest engine listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
