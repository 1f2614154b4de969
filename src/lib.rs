pub mod config;
pub mod curriculum;
pub mod db;
pub mod logging;
pub mod memory;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;

use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::curriculum::{CurriculumError, CurriculumRegistry};
use crate::memory::SchedulerPolicy;
use crate::state::AppState;

/// Curricula from `CURRICULUM_DIR` when set, else the embedded defaults.
pub fn load_curricula(config: &Config) -> Result<CurriculumRegistry, CurriculumError> {
    match &config.curriculum_dir {
        Some(dir) => CurriculumRegistry::from_dir(dir),
        None => CurriculumRegistry::builtin(),
    }
}

pub fn build_app(state: AppState) -> axum::Router {
    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// App wired from the environment. A database that cannot be opened leaves
/// the store-backed routes answering 503.
pub async fn create_app() -> axum::Router {
    let config = Config::from_env();

    let db_proxy = match db::DatabaseProxy::from_env().await {
        Ok(proxy) => Some(proxy),
        Err(err) => {
            tracing::warn!(error = %err, "database proxy not initialized");
            None
        }
    };

    let curricula = load_curricula(&config).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to load curricula, continuing without them");
        CurriculumRegistry::default()
    });

    let state = AppState::new(db_proxy, Arc::new(curricula), SchedulerPolicy::from_env());
    build_app(state)
}
