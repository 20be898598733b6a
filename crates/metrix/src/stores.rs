//! 🗄️ Stores: where finished metrics go to live (until the next file overwrites them).
//!
//! 🎭 This module is the casting agency for persistence. Need a real Redis? We have one.
//! Need something that lives entirely in RAM so the tests don't need Docker? Also have one.
//! Both speak [`MetricStore`], and [`StoreBackend`] picks between them so the workers never
//! need to know which one they are talking to.
//!
//! # The write protocol 📜
//! Every `store(record)` is three separate round trips, in this order:
//! 1. `DEL <product_id>`: no stale fields survive a rewrite
//! 2. `HSET <product_id> mean_metric <mean> source_file <file>`
//! 3. `ZADD <rank_index> <mean> <product_id>`
//!
//! No transaction wraps them. If step 2 or 3 fails the record is half-written and the
//! error says exactly which step it was. Ancient proverb: "He who swallows a ZADD error,
//! queries a rank index that lies."

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::app_config::StoreConfig;
use crate::common::ProductMetric;

pub mod in_mem_store;
pub mod redis_store;

pub use in_mem_store::InMemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};

/// 🏷️ Hash field holding the mean.
pub const MEAN_METRIC_FIELD: &str = "mean_metric";
/// 🏷️ Hash field holding the file the mean came from.
pub const SOURCE_FILE_FIELD: &str = "source_file";
/// 📊 Default sorted-set key for the rank index.
pub const DEFAULT_RANK_INDEX_KEY: &str = "products_by_mean_score";

/// 📦 Whatever an error from some client library happens to be, boxed and sendable.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 🔢 The individual round trips a store performs. Errors name the one that broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    DeletePrimary,
    WritePrimary,
    UpsertRankIndex,
    RemoveFromRankIndex,
}

impl fmt::Display for WriteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WriteStep::DeletePrimary => "DEL primary record",
            WriteStep::WritePrimary => "HSET primary record",
            WriteStep::UpsertRankIndex => "ZADD rank index",
            WriteStep::RemoveFromRankIndex => "ZREM rank index",
        };
        f.write_str(label)
    }
}

/// 💀 Store failures, per record or per query. Never fatal to the pipeline on their own.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("💀 store is unreachable")]
    Unreachable(#[source] BoxError),

    #[error("💀 step '{step}' failed for product '{product_id}'")]
    Write {
        step: WriteStep,
        product_id: String,
        #[source]
        source: BoxError,
    },

    #[error("💀 store query '{operation}' failed")]
    Query {
        operation: &'static str,
        #[source]
        source: BoxError,
    },
}

impl StoreError {
    pub(crate) fn write(step: WriteStep, product_id: &str, source: impl Into<BoxError>) -> Self {
        StoreError::Write {
            step,
            product_id: product_id.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn query(operation: &'static str, source: impl Into<BoxError>) -> Self {
        StoreError::Query {
            operation,
            source: source.into(),
        }
    }

    /// 🔢 The write step that failed, if this was a write.
    pub fn step(&self) -> Option<WriteStep> {
        match self {
            StoreError::Write { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// 📄 A primary record as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProduct {
    pub mean_metric: f64,
    pub source_file: String,
}

/// 🗄️ The persistence capability. `&self` everywhere: one handle, shared by every worker.
///
/// # Contract 📜
/// - `store` performs DEL → HSET → ZADD, in that order, each its own round trip.
/// - `remove` performs DEL → ZREM so the index never outlives the record.
/// - `rank_range` is ascending by score, both bounds inclusive.
/// - Implementations MUST tolerate concurrent calls from any number of tasks.
#[async_trait]
pub trait MetricStore: fmt::Debug + Send + Sync {
    /// 📡 "Hello? Is this thing on?" Used once at startup to fail fast.
    async fn ping(&self) -> Result<(), StoreError>;

    /// 📥 Idempotently overwrite the product's record and upsert its rank entry.
    async fn store(&self, record: &ProductMetric) -> Result<(), StoreError>;

    /// 🗑️ Delete the product's record and pull it out of the rank index.
    async fn remove(&self, product_id: &str) -> Result<(), StoreError>;

    /// 📊 Products whose mean is within `[min, max]`, lowest first.
    async fn rank_range(&self, min: f64, max: f64) -> Result<Vec<(String, f64)>, StoreError>;

    /// 🔎 Read one primary record back. `None` if there is no such product.
    async fn fetch(&self, product_id: &str) -> Result<Option<StoredProduct>, StoreError>;
}

/// 🎭 The many faces of a store. Cheap to clone: every variant is a shared handle inside.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Redis(RedisStore),
    InMemory(InMemoryStore),
}

impl StoreBackend {
    /// 🚀 Builds (and for Redis, connects) the configured backend. Does not ping,
    /// that is the caller's call.
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        Ok(match config {
            StoreConfig::Redis(redis_config) => {
                StoreBackend::Redis(RedisStore::connect(redis_config.clone()).await?)
            }
            StoreConfig::InMemory => StoreBackend::InMemory(InMemoryStore::new()),
        })
    }
}

#[async_trait]
impl MetricStore for StoreBackend {
    async fn ping(&self) -> Result<(), StoreError> {
        match self {
            StoreBackend::Redis(store) => store.ping().await,
            StoreBackend::InMemory(store) => store.ping().await,
        }
    }

    async fn store(&self, record: &ProductMetric) -> Result<(), StoreError> {
        match self {
            StoreBackend::Redis(store) => store.store(record).await,
            StoreBackend::InMemory(store) => store.store(record).await,
        }
    }

    async fn remove(&self, product_id: &str) -> Result<(), StoreError> {
        match self {
            StoreBackend::Redis(store) => store.remove(product_id).await,
            StoreBackend::InMemory(store) => store.remove(product_id).await,
        }
    }

    async fn rank_range(&self, min: f64, max: f64) -> Result<Vec<(String, f64)>, StoreError> {
        match self {
            StoreBackend::Redis(store) => store.rank_range(min, max).await,
            StoreBackend::InMemory(store) => store.rank_range(min, max).await,
        }
    }

    async fn fetch(&self, product_id: &str) -> Result<Option<StoredProduct>, StoreError> {
        match self {
            StoreBackend::Redis(store) => store.fetch(product_id).await,
            StoreBackend::InMemory(store) => store.fetch(product_id).await,
        }
    }
}
