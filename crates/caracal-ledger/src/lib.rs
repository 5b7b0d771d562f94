//! Caracal ledger writer and Merkle engine.
//!
//! Consumes the event pipeline, assigns globally monotonic sequence
//! numbers, persists events exactly once, seals them into Merkle batches,
//! and signs the roots. One writer task per partition, sequential within
//! a partition, parallel across; the shared sequence allocator is the
//! single cross-partition synchronization point.

#![deny(unsafe_code)]

mod batcher;
mod error;
pub mod merkle;
mod writer;

pub use batcher::{BatcherConfig, MerkleBatcher, SealedBatch};
pub use error::LedgerError;
pub use writer::{LedgerConfig, PartitionWriter};
