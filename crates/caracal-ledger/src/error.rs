use thiserror::Error;

use caracal_crypto::CryptoError;
use caracal_pipeline::PipelineError;
use caracal_store::StoreError;

/// Ledger-layer errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("empty batches are never sealed")]
    EmptyBatch,

    #[error("partition {0} lease could not be acquired")]
    LeaseUnavailable(u32),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
