use std::net::SocketAddr;
use std::sync::Arc;

use mastery_backend::config::Config;
use mastery_backend::mastery::MasteryConfig;
use mastery_backend::{build_engine, create_app, logging};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log_level, config.log_dir.as_deref());

    let engine = match build_engine(&config, MasteryConfig::from_env()) {
        Ok(engine) => Arc::new(engine),
        Err(err) => {
            tracing::error!(error = %err, "failed to start mastery engine");
            std::process::exit(1);
        }
    };

    tracing::info!(
        store = %config.store_path.display(),
        records = engine.store().record_count(),
        persist_mode = engine.persist_mode().as_str(),
        "mastery store loaded"
    );

    // batched mode relies on it; per_attempt mode only needs it after a failed save
    let flusher = engine.spawn_periodic_flush(config.flush_interval);

    let app = create_app(Arc::clone(&engine));

    let addr = config.bind_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%addr, error = %err, "bind listener failed");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "mastery-backend listening");

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        tracing::error!(error = %e, "server error");
    }

    tracing::info!("HTTP server stopped, flushing mastery store");

    flusher.abort();

    match engine.flush_pending().await {
        Ok(0) => {}
        Ok(applied) => tracing::info!(applied, "pending attempts applied at shutdown"),
        Err(e) => tracing::error!(error = %e, "failed to apply pending attempts at shutdown"),
    }

    if let Err(e) = engine.flush().await {
        tracing::error!(error = %e, "final mastery save failed");
    }

    tracing::info!("Graceful shutdown complete");
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
