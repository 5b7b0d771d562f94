use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use caracal_crypto::{SignatureAlgorithm, SignerHandle};
use caracal_gateway::{spawn_replay_sweeper, Validator, ValidatorConfig};
use caracal_ledger::{LedgerConfig, PartitionWriter};
use caracal_pipeline::{InMemoryPipeline, PipelineConfig, PipelineProducer};
use caracal_store::{
    CaracalStore, InMemoryStore, KeyStore, MandateIssuer, PolicyCache, PolicyStore,
};
use caracal_types::{Clock, KeyId, SigningKeyRecord, SystemClock, ValidatorId};
use caracal_verifier::QueryService;

/// Which store backend the process runs against.
#[derive(Clone, Debug, Default)]
pub enum StorageConfig {
    #[default]
    Memory,
    #[cfg(feature = "postgres")]
    Postgres {
        url: String,
    },
}

/// Process-level configuration. Field defaults carry the contract
/// values; loading them from files is someone else's concern.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub storage: StorageConfig,
    pub partitions: u32,
    pub pipeline_capacity: usize,
    pub signing_algorithm: SignatureAlgorithm,
    pub validator: ValidatorConfig,
    pub ledger: LedgerConfig,
    /// Replay-cache sweep cadence.
    pub sweep_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8640".parse().expect("static addr"),
            storage: StorageConfig::Memory,
            partitions: 1,
            pipeline_capacity: 1024,
            signing_algorithm: SignatureAlgorithm::Ed25519,
            validator: ValidatorConfig::default(),
            ledger: LedgerConfig::default(),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Unrecoverable bootstrap failures, one class per exit code.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("key material error: {0}")]
    KeyMaterial(String),
}

impl ServiceError {
    /// Distinct process exit code per failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            ServiceError::Config(_) => 2,
            ServiceError::Store(_) => 3,
            ServiceError::Pipeline(_) => 4,
            ServiceError::KeyMaterial(_) => 5,
        }
    }
}

/// Everything the routes need, plus the background task handles.
#[derive(Clone)]
pub struct ServiceState {
    pub store: Arc<dyn CaracalStore>,
    pub pipeline: Arc<InMemoryPipeline>,
    pub validator: Arc<Validator>,
    pub issuer: Arc<MandateIssuer>,
    pub verifier: Arc<QueryService>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<ServiceConfig>,
    shutdown: watch::Sender<bool>,
    writers: Arc<tokio::sync::Mutex<Vec<JoinHandle<Result<(), caracal_ledger::LedgerError>>>>>,
}

impl ServiceState {
    /// Wire the whole core together and start background tasks.
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        if config.partitions == 0 {
            return Err(ServiceError::Config("partitions must be at least 1".into()));
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = build_store(&config).await?;

        let pipeline = Arc::new(InMemoryPipeline::new(PipelineConfig {
            partitions: config.partitions,
            capacity: config.pipeline_capacity,
        }));

        // Root-signing key: reuse the active registration or mint one.
        // Key custody beyond process lifetime is the deployment's problem.
        let signer = Arc::new(SignerHandle::generate(config.signing_algorithm));
        let key_id = KeyId::generate();
        store
            .register_key(SigningKeyRecord {
                id: key_id.clone(),
                algorithm: signer.algorithm(),
                public_key: signer.public_key_hex(),
                created_at: clock.now(),
                retired_at: None,
            })
            .await
            .map_err(|e| ServiceError::KeyMaterial(e.to_string()))?;
        info!(key = %key_id, algorithm = %signer.algorithm(), "root signing key registered");

        let policy_cache = Arc::new(PolicyCache::with_default_ttl());
        {
            let cache = policy_cache.clone();
            let bumps = store.policy_bumps();
            tokio::spawn(async move { cache.run_invalidation_listener(bumps).await });
        }

        let validator = Arc::new(Validator::new(
            store.clone(),
            policy_cache,
            pipeline.clone(),
            clock.clone(),
            config.validator.clone(),
        ));
        let issuer = Arc::new(MandateIssuer::new(
            store.clone(),
            clock.clone(),
            ValidatorId::new("val:issuance"),
        ));
        let verifier = Arc::new(QueryService::new(store.clone()));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut writers = Vec::new();
        for partition in 0..config.partitions {
            let writer = PartitionWriter::new(
                partition,
                store.clone(),
                pipeline.clone(),
                signer.clone(),
                key_id.clone(),
                clock.clone(),
                LedgerConfig {
                    partitions: config.partitions,
                    ..config.ledger.clone()
                },
            );
            writers.push(tokio::spawn(writer.run(shutdown_rx.clone())));
        }

        spawn_replay_sweeper(
            store.clone(),
            clock.clone(),
            config.sweep_interval,
            config.validator.replay_window,
        );

        Ok(Self {
            store,
            pipeline,
            validator,
            issuer,
            verifier,
            clock,
            config: Arc::new(config),
            shutdown,
            writers: Arc::new(tokio::sync::Mutex::new(writers)),
        })
    }

    /// Publish an issuance/revocation event through the same pipeline
    /// the gateway uses, so the ledger carries all four event kinds.
    pub async fn publish_event(&self, event: &caracal_types::AuthorityEvent) {
        if let Err(e) = self
            .pipeline
            .publish(event, self.config.validator.pipeline_timeout)
            .await
        {
            warn!(error = %e, "authority event could not be published");
        }
    }

    /// Flip the shutdown signal and drain every writer. Buffers seal
    /// with reason `shutdown`.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let mut writers = self.writers.lock().await;
        for handle in writers.drain(..) {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "writer exited with error"),
                Err(e) => warn!(error = %e, "writer task panicked"),
            }
        }
        info!("service drained");
    }
}

async fn build_store(config: &ServiceConfig) -> Result<Arc<dyn CaracalStore>, ServiceError> {
    match &config.storage {
        StorageConfig::Memory => Ok(Arc::new(InMemoryStore::new())),
        #[cfg(feature = "postgres")]
        StorageConfig::Postgres { url } => {
            let store = caracal_store::postgres::PostgresStore::connect(url)
                .await
                .map_err(|e| ServiceError::Store(e.to_string()))?;
            Ok(Arc::new(store))
        }
    }
}
