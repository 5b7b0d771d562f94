//! caracald - the Caracal operational binary.
//!
//! Wires the core together from environment-derived settings, serves the
//! HTTP surface, and drains writers on shutdown. Exit codes: 0 clean,
//! 2 configuration, 3 store, 4 pipeline, 5 key material.

use std::net::SocketAddr;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use caracal_crypto::SignatureAlgorithm;
use caracal_service::{build_router, ServiceConfig, ServiceError, ServiceState};

fn config_from_env() -> Result<ServiceConfig, ServiceError> {
    let mut config = ServiceConfig::default();

    if let Ok(bind) = std::env::var("CARACAL_BIND") {
        config.bind_addr = bind
            .parse::<SocketAddr>()
            .map_err(|e| ServiceError::Config(format!("CARACAL_BIND: {e}")))?;
    }
    if let Ok(partitions) = std::env::var("CARACAL_PARTITIONS") {
        config.partitions = partitions
            .parse()
            .map_err(|e| ServiceError::Config(format!("CARACAL_PARTITIONS: {e}")))?;
    }
    if let Ok(algorithm) = std::env::var("CARACAL_SIGNING_ALGORITHM") {
        config.signing_algorithm = algorithm
            .parse::<SignatureAlgorithm>()
            .map_err(|e| ServiceError::Config(e.to_string()))?;
    }
    if let Ok(url) = std::env::var("CARACAL_DATABASE_URL") {
        #[cfg(feature = "postgres")]
        {
            config.storage = caracal_service::StorageConfig::Postgres { url };
        }
        #[cfg(not(feature = "postgres"))]
        {
            let _ = url;
            return Err(ServiceError::Config(
                "CARACAL_DATABASE_URL set but the postgres feature is not compiled in".into(),
            ));
        }
    }

    Ok(config)
}

async fn run() -> Result<(), ServiceError> {
    let config = config_from_env()?;
    let bind_addr = config.bind_addr;

    let state = ServiceState::bootstrap(config).await?;
    let router = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ServiceError::Config(format!("bind {bind_addr}: {e}")))?;
    info!(%bind_addr, "caracald listening");

    let shutdown_state = state.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, draining");
        })
        .await
        .map_err(|e| ServiceError::Pipeline(format!("server error: {e}")))?;

    shutdown_state.shutdown().await;
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            std::process::exit(2);
        }
    };

    if let Err(e) = runtime.block_on(run()) {
        error!(error = %e, "caracald exiting");
        std::process::exit(e.exit_code());
    }
}
