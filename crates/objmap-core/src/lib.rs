//! objmap — Replicated Map on a Clustered Object Store
//!
//! A durable key→value mapping whose authoritative state lives inside a
//! single attribute-bearing object on a clustered store, with a local
//! read-through cache per handle. Any number of processes may mutate the
//! same mapping concurrently; an epoch-versioned changelog protocol layered
//! over compare-and-swap batches keeps every cache convergent with the
//! durable state while mutations stay linearizable.
//!
//! # Architecture
//!
//! - **Write path**: tentative local apply → atomic batch asserting the
//!   current epoch, bumping it, and appending one changelog record → commit.
//!   A lost race rolls back, replays the unseen changelog tail, retries.
//! - **Read path**: cache only. `size`/`count`/`find`/iteration never touch
//!   the store and **can return stale results** — call
//!   [`ReplicatedMap::sync`] (or open a fresh handle) when freshness
//!   matters.
//! - **Compaction**: once the changelog grows stale-heavy, it is rewritten
//!   as a snapshot of the live entries and the epoch resets to zero; peers
//!   detect the epoch regression and reinitialize.
//!
//! The store itself sits behind the [`ObjectStore`] trait; [`MemCluster`]
//! is a process-local implementation for tests and embedded use.

pub mod adapter;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod map;
pub mod memory;
pub mod record;

// Re-export key types for convenience
pub use adapter::{Batch, BatchHandle, BatchResult, DataOp, ObjectStat, ObjectStore};
pub use cache::LocalCache;
pub use codec::{TypeTag, Value};
pub use config::MapConfig;
pub use error::{MapError, MapResult, StoreError};
pub use map::{OpenOptions, ReplicatedMap};
pub use memory::{MemCluster, MemIoCtx};
pub use record::Record;
