use std::sync::Arc;

use lingo_backend::config::Config;
use lingo_backend::db::DatabaseProxy;
use lingo_backend::memory::SchedulerPolicy;
use lingo_backend::state::AppState;
use lingo_backend::{build_app, load_curricula, logging};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log_level);

    let db_proxy = match DatabaseProxy::from_env().await {
        Ok(proxy) => Some(proxy),
        Err(err) => {
            tracing::warn!(error = %err, "database proxy not initialized");
            None
        }
    };

    let curricula = match load_curricula(&config) {
        Ok(registry) => registry,
        Err(err) => {
            tracing::error!(error = %err, "failed to load curricula");
            std::process::exit(1);
        }
    };
    tracing::info!(languages = ?curricula.languages(), "curricula ready");

    let policy = SchedulerPolicy::from_env();
    tracing::info!(?policy, "scheduler policy");

    let state = AppState::new(db_proxy, Arc::new(curricula), policy);
    let app = build_app(state);

    let addr = config.bind_addr();
    tracing::info!(%addr, "lingo-backend listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind listener failed");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        tracing::error!(error = %e, "server error");
    }

    tracing::info!("graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
