pub mod config;
pub mod logging;
pub mod mastery;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;

use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::mastery::config::ConfigError;
use crate::mastery::{EngineOptions, MasteryConfig, MasteryEngine, MasteryStore, StoreError};
use crate::services::cf::{CfClientConfig, CfEstimator, HttpCfClient, UnavailableCf};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid mastery configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot open mastery store: {0}")]
    Store(#[from] StoreError),
}

/// Validates configuration, loads the store and wires the CF collaborator.
pub fn build_engine(config: &Config, mastery: MasteryConfig) -> Result<MasteryEngine, StartupError> {
    mastery.validate()?;

    let store = MasteryStore::open(&config.store_path, mastery.bkt.epsilon)?;

    let cf: Arc<dyn CfEstimator> = match &config.cf_endpoint {
        Some(endpoint) => {
            tracing::info!(%endpoint, "using HTTP CF estimator");
            Arc::new(HttpCfClient::new(CfClientConfig {
                endpoint: endpoint.clone(),
                timeout: config.cf_timeout,
            }))
        }
        None => {
            tracing::warn!("CF_ENDPOINT not set, unseen skills fall back to p_init");
            Arc::new(UnavailableCf)
        }
    };

    Ok(MasteryEngine::new(
        mastery,
        Arc::new(store),
        cf,
        EngineOptions {
            persist_mode: config.persist_mode,
            cf_timeout: config.cf_timeout,
        },
    ))
}

pub fn create_app(engine: Arc<MasteryEngine>) -> axum::Router {
    let state = AppState::new(engine);

    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
