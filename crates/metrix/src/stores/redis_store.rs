//! 🟥 RedisStore: the production store. Hashes for records, one sorted set for the ranking.
//!
//! One [`ConnectionManager`] for the whole process. It multiplexes, it reconnects, and
//! cloning it is just bumping a refcount, so every worker gets its own clone per call
//! and nobody waits on a mutex to talk to Redis.
//!
//! The command sequences themselves are plain functions over any [`ConnectionLike`], so the
//! exact bytes we send can be checked against a mocked connection without a server.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionLike, ConnectionManager, ConnectionManagerConfig};
use serde::Deserialize;
use tracing::{debug, info};

use crate::common::ProductMetric;
use crate::stores::{
    DEFAULT_RANK_INDEX_KEY, MEAN_METRIC_FIELD, MetricStore, SOURCE_FILE_FIELD, StoreError,
    StoredProduct, WriteStep,
};

// -- 📡 RedisStoreConfig lives next to the thing it configures. No 2am scavenger hunts.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RedisStoreConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub db: i64,
    #[serde(default = "default_rank_index_key")]
    pub rank_index_key: String,
    /// ⏱️ How long one TCP connect may take before it counts as failed.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// ⏱️ How long any single command may wait for its reply.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// 🔁 Extra connect attempts after the first one fails.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: usize,
}

fn default_rank_index_key() -> String {
    DEFAULT_RANK_INDEX_KEY.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_response_timeout_ms() -> u64 {
    5_000
}

fn default_connect_retries() -> usize {
    1
}

impl RedisStoreConfig {
    /// 🏗️ Host and port, everything else at its default.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            db: 0,
            rank_index_key: default_rank_index_key(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            connect_retries: default_connect_retries(),
        }
    }

    /// 🔗 `redis://host:port/db`. No credentials, authentication is not our department.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }

    /// 🧯 Bounded everything. A dead Redis should cost seconds at startup, not minutes.
    fn manager_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig::new()
            .set_number_of_retries(self.connect_retries)
            .set_max_delay(500)
            .set_connection_timeout(Duration::from_millis(self.connect_timeout_ms))
            .set_response_timeout(Duration::from_millis(self.response_timeout_ms))
    }
}

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
}

// 🎭 manual Debug because ConnectionManager keeps its feelings (and its sockets) to itself
impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish()
    }
}

impl RedisStore {
    /// 🚀 Opens the shared connection. If Redis is not there, this is where we find out,
    /// within `connect_timeout_ms × (connect_retries + 1)` plus a little backoff.
    pub async fn connect(config: RedisStoreConfig) -> Result<Self> {
        let url = config.url();
        let client = redis::Client::open(url.as_str())
            .with_context(|| format!("💀 '{url}' is not a Redis URL we can work with"))?;
        let connection = client
            .get_connection_manager_with_config(config.manager_config())
            .await
            .with_context(|| {
                format!(
                    "💀 Could not connect to Redis at {}:{}. We knocked {} time(s). Nobody answered.",
                    config.host,
                    config.port,
                    config.connect_retries + 1
                )
            })?;
        info!("🟥 Connected to Redis at {}:{}", config.host, config.port);
        Ok(Self { connection, config })
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }
}

#[async_trait]
impl MetricStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let pong = ping(&mut self.connection.clone()).await?;
        debug!("🏓 Redis at {}:{} says {pong}", self.config().host, self.config().port);
        Ok(())
    }

    async fn store(&self, record: &ProductMetric) -> Result<(), StoreError> {
        write_product(&mut self.connection.clone(), &self.config.rank_index_key, record).await
    }

    async fn remove(&self, product_id: &str) -> Result<(), StoreError> {
        remove_product(&mut self.connection.clone(), &self.config.rank_index_key, product_id).await
    }

    async fn rank_range(&self, min: f64, max: f64) -> Result<Vec<(String, f64)>, StoreError> {
        rank_range(&mut self.connection.clone(), &self.config.rank_index_key, min, max).await
    }

    async fn fetch(&self, product_id: &str) -> Result<Option<StoredProduct>, StoreError> {
        fetch_product(&mut self.connection.clone(), product_id).await
    }
}

async fn ping<C: ConnectionLike + Send + Sync>(connection: &mut C) -> Result<String, StoreError> {
    redis::cmd("PING")
        .query_async(connection)
        .await
        .map_err(|err| StoreError::Unreachable(err.into()))
}

/// 📜 DEL, HSET, ZADD. Three round trips, in that order, each one named when it fails.
pub(crate) async fn write_product<C: ConnectionLike + Send + Sync>(
    connection: &mut C,
    rank_index_key: &str,
    record: &ProductMetric,
) -> Result<(), StoreError> {
    let product_id = record.product_id.as_str();

    // -- 1️⃣ clear the slate so fields from an older write can't linger
    let _: () = connection
        .del(product_id)
        .await
        .map_err(|err| StoreError::write(WriteStep::DeletePrimary, product_id, err))?;

    // -- 2️⃣ the record itself
    let fields = [
        (MEAN_METRIC_FIELD, record.mean_value.to_string()),
        (SOURCE_FILE_FIELD, record.source_file.clone()),
    ];
    let _: () = connection
        .hset_multiple(product_id, &fields)
        .await
        .map_err(|err| StoreError::write(WriteStep::WritePrimary, product_id, err))?;

    // -- 3️⃣ the ranking. ZADD upserts, so a re-ingested product just moves.
    let _: () = connection
        .zadd(rank_index_key, product_id, record.mean_value)
        .await
        .map_err(|err| StoreError::write(WriteStep::UpsertRankIndex, product_id, err))?;

    Ok(())
}

pub(crate) async fn remove_product<C: ConnectionLike + Send + Sync>(
    connection: &mut C,
    rank_index_key: &str,
    product_id: &str,
) -> Result<(), StoreError> {
    let _: () = connection
        .del(product_id)
        .await
        .map_err(|err| StoreError::write(WriteStep::DeletePrimary, product_id, err))?;
    let _: () = connection
        .zrem(rank_index_key, product_id)
        .await
        .map_err(|err| StoreError::write(WriteStep::RemoveFromRankIndex, product_id, err))?;
    Ok(())
}

pub(crate) async fn rank_range<C: ConnectionLike + Send + Sync>(
    connection: &mut C,
    rank_index_key: &str,
    min: f64,
    max: f64,
) -> Result<Vec<(String, f64)>, StoreError> {
    connection
        .zrangebyscore_withscores(rank_index_key, min, max)
        .await
        .map_err(|err| StoreError::query("ZRANGEBYSCORE", err))
}

pub(crate) async fn fetch_product<C: ConnectionLike + Send + Sync>(
    connection: &mut C,
    product_id: &str,
) -> Result<Option<StoredProduct>, StoreError> {
    let fields: HashMap<String, String> = connection
        .hgetall(product_id)
        .await
        .map_err(|err| StoreError::query("HGETALL", err))?;
    stored_product_from_fields(&fields).map_err(|err| StoreError::query("HGETALL", err))
}

/// 🔄 Turns a raw hash back into a [`StoredProduct`]. An empty hash means "no such product".
pub(crate) fn stored_product_from_fields(
    fields: &HashMap<String, String>,
) -> Result<Option<StoredProduct>, std::num::ParseFloatError> {
    if fields.is_empty() {
        return Ok(None);
    }
    let mean_metric = fields
        .get(MEAN_METRIC_FIELD)
        .map(|raw| raw.parse::<f64>())
        .transpose()?
        .unwrap_or(f64::NAN);
    Ok(Some(StoredProduct {
        mean_metric,
        source_file: fields.get(SOURCE_FILE_FIELD).cloned().unwrap_or_default(),
    }))
}
