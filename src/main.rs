//! Number Rush Back binary entrypoint wiring the round scheduler, REST, WebSocket and storage layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use number_rush_back::{
    config::AppConfig,
    dao::round_store::{InMemoryRoundStore, RoundStore},
    routes,
    services::scheduler,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(config);

    install_round_store(&app_state).await;

    let scheduler = scheduler::spawn(app_state.clone())
        .await
        .context("starting round scheduler")?;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    scheduler.shutdown().await;
    Ok(())
}

/// Use MongoDB when `MONGO_URI` is set, otherwise keep rounds in memory.
async fn install_round_store(state: &SharedState) {
    #[cfg(feature = "mongo-store")]
    if let Ok(uri) = env::var("MONGO_URI") {
        use number_rush_back::dao::{
            round_store::mongodb::{MongoConfig, MongoRoundStore},
            storage::StorageError,
        };
        use number_rush_back::services::storage_supervisor;

        let db_name = env::var("MONGO_DB").ok();
        info!("using MongoDB round store; starting in degraded mode until connected");
        tokio::spawn(storage_supervisor::run(state.clone(), move || {
            let uri = uri.clone();
            let db_name = db_name.clone();
            async move {
                let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
                let store = MongoRoundStore::connect(config).await?;
                Ok::<_, StorageError>(Arc::new(store) as Arc<dyn RoundStore>)
            }
        }));
        return;
    }

    info!("MONGO_URI not set; keeping rounds in memory");
    let store: Arc<dyn RoundStore> = Arc::new(InMemoryRoundStore::new());
    state.set_round_store(store).await;
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
