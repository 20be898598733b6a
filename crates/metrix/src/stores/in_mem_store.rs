//! # Previously, on metrix...
//!
//! 🎬 Redis was down. Or Docker was not installed. Or CI was being CI. Someone needed
//! a store that lives entirely in RAM and forgets everything the moment you blink.
//!
//! That someone was this module.
//!
//! [`InMemoryStore`] speaks the exact same three-step write protocol as Redis: it
//! deletes the hash, writes the hash, upserts the sorted set. It writes down every
//! command in a little ledger, so tests can check the order. It can also be told to
//! fail at a given step for a given product, so tests can watch the pipeline shrug it off.
//!
//! ⚠️ Not for production. For tests and dry runs. If you deploy this, deploy a therapist too.
//!
//! 🦆

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::common::ProductMetric;
use crate::stores::redis_store::stored_product_from_fields;
use crate::stores::{
    MEAN_METRIC_FIELD, MetricStore, SOURCE_FILE_FIELD, StoreError, StoredProduct, WriteStep,
};

#[derive(Debug, Default)]
pub(crate) struct InMemoryState {
    // -- 🗂️ key → field → value, exactly like a Redis hash, stale fields and all
    pub(crate) hashes: HashMap<String, HashMap<String, String>>,
    // -- 📊 member → score. sorted on the way out, not on the way in.
    pub(crate) rank_index: HashMap<String, f64>,
    // -- 📜 every command that reached the "server", in arrival order
    pub(crate) command_log: Vec<String>,
    // -- 💣 (step, product) pairs that should blow up on purpose
    failures: Vec<(WriteStep, String)>,
}

impl InMemoryState {
    fn check(&self, step: WriteStep, product_id: &str) -> Result<(), StoreError> {
        if self
            .failures
            .iter()
            .any(|(failing_step, failing_id)| *failing_step == step && failing_id == product_id)
        {
            return Err(StoreError::write(
                step,
                product_id,
                std::io::Error::other("injected failure"),
            ));
        }
        Ok(())
    }
}

/// 📦 A store that never forgets (until it is dropped).
///
/// Clone-able because tests need to peek inside after handing a clone to the pipeline.
/// The `Arc` means everyone shares the same state. The borrow checker approved. Barely.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    pub(crate) state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 💣 Makes `step` fail for `product_id` from now on. For testing the sad paths.
    pub async fn fail_on(&self, step: WriteStep, product_id: impl Into<String>) {
        self.state
            .lock()
            .await
            .failures
            .push((step, product_id.into()));
    }

    /// 🔎 The raw hash for `key`, every field, stale or not.
    pub async fn raw_fields(&self, key: &str) -> Option<HashMap<String, String>> {
        self.state.lock().await.hashes.get(key).cloned()
    }

    /// 🔧 Writes a raw hash directly, skipping the protocol. For setting up stale data.
    pub async fn seed_raw(&self, key: impl Into<String>, fields: HashMap<String, String>) {
        self.state.lock().await.hashes.insert(key.into(), fields);
    }

    /// 📊 The rank score for `product_id`, if it has one.
    pub async fn rank_score(&self, product_id: &str) -> Option<f64> {
        self.state.lock().await.rank_index.get(product_id).copied()
    }

    /// 📜 Every command received so far, e.g. `DEL P1`, `HSET P1`, `ZADD P1 15`.
    pub async fn command_log(&self) -> Vec<String> {
        self.state.lock().await.command_log.clone()
    }

    pub async fn product_count(&self) -> usize {
        self.state.lock().await.hashes.len()
    }
}

#[async_trait]
impl MetricStore for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        // -- 🏓 RAM is always home
        Ok(())
    }

    async fn store(&self, record: &ProductMetric) -> Result<(), StoreError> {
        let product_id = record.product_id.as_str();

        // -- 🔒 one lock per step, like one round trip per step. other writers may sneak in between.
        {
            let mut state = self.state.lock().await;
            state.check(WriteStep::DeletePrimary, product_id)?;
            state.hashes.remove(product_id);
            state.command_log.push(format!("DEL {product_id}"));
        }
        {
            let mut state = self.state.lock().await;
            state.check(WriteStep::WritePrimary, product_id)?;
            state.hashes.insert(
                product_id.to_string(),
                HashMap::from([
                    (MEAN_METRIC_FIELD.to_string(), record.mean_value.to_string()),
                    (SOURCE_FILE_FIELD.to_string(), record.source_file.clone()),
                ]),
            );
            state.command_log.push(format!("HSET {product_id}"));
        }
        {
            let mut state = self.state.lock().await;
            state.check(WriteStep::UpsertRankIndex, product_id)?;
            state
                .rank_index
                .insert(product_id.to_string(), record.mean_value);
            state
                .command_log
                .push(format!("ZADD {product_id} {}", record.mean_value));
        }
        Ok(())
    }

    async fn remove(&self, product_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check(WriteStep::DeletePrimary, product_id)?;
        state.hashes.remove(product_id);
        state.command_log.push(format!("DEL {product_id}"));
        state.check(WriteStep::RemoveFromRankIndex, product_id)?;
        state.rank_index.remove(product_id);
        state.command_log.push(format!("ZREM {product_id}"));
        Ok(())
    }

    async fn rank_range(&self, min: f64, max: f64) -> Result<Vec<(String, f64)>, StoreError> {
        let state = self.state.lock().await;
        let mut hits: Vec<(String, f64)> = state
            .rank_index
            .iter()
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        // -- 📐 Redis orders ties by member name, so do we
        hits.sort_by(|(a_member, a_score), (b_member, b_score)| {
            a_score.total_cmp(b_score).then_with(|| a_member.cmp(b_member))
        });
        Ok(hits)
    }

    async fn fetch(&self, product_id: &str) -> Result<Option<StoredProduct>, StoreError> {
        let state = self.state.lock().await;
        match state.hashes.get(product_id) {
            Some(fields) => {
                stored_product_from_fields(fields).map_err(|err| StoreError::query("HGETALL", err))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn metric(product_id: &str, mean_value: f64, source_file: &str) -> ProductMetric {
        ProductMetric {
            product_id: product_id.into(),
            mean_value,
            source_file: source_file.into(),
            metric_count: 1,
        }
    }

    #[tokio::test]
    async fn the_one_where_p1_lands_in_the_hash_and_the_index() -> Result<()> {
        let store = InMemoryStore::new();

        store.store(&metric("P1", 15.0, "a.xml")).await?;

        assert_eq!(
            store.fetch("P1").await?,
            Some(StoredProduct {
                mean_metric: 15.0,
                source_file: "a.xml".into(),
            })
        );
        assert_eq!(store.rank_score("P1").await, Some(15.0));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_three_steps_happen_in_order() -> Result<()> {
        let store = InMemoryStore::new();

        store.store(&metric("P1", 15.0, "a.xml")).await?;

        assert_eq!(store.command_log().await, vec!["DEL P1", "HSET P1", "ZADD P1 15"]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_storing_twice_is_the_same_as_storing_once() -> Result<()> {
        let once = InMemoryStore::new();
        let twice = InMemoryStore::new();
        let record = metric("P1", 15.0, "a.xml");

        once.store(&record).await?;
        twice.store(&record).await?;
        twice.store(&record).await?;

        assert_eq!(once.raw_fields("P1").await, twice.raw_fields("P1").await);
        assert_eq!(once.rank_range(f64::MIN, f64::MAX).await?, twice.rank_range(f64::MIN, f64::MAX).await?);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_stale_fields_do_not_survive_a_rewrite() -> Result<()> {
        let store = InMemoryStore::new();
        store
            .seed_raw(
                "P1",
                HashMap::from([
                    ("mean_metric".to_string(), "1".to_string()),
                    ("legacy_weight".to_string(), "0.3".to_string()),
                ]),
            )
            .await;

        store.store(&metric("P1", 15.0, "a.xml")).await?;

        let fields = store.raw_fields("P1").await.expect("💀 P1 should exist");
        assert!(!fields.contains_key("legacy_weight"), "{fields:?}");
        assert_eq!(fields.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_rewrite_moves_the_product_in_the_ranking() -> Result<()> {
        let store = InMemoryStore::new();
        store.store(&metric("P1", 15.0, "a.xml")).await?;
        store.store(&metric("P1", 3.0, "b.xml")).await?;

        assert_eq!(store.rank_range(0.0, 100.0).await?, vec![("P1".to_string(), 3.0)]);
        assert_eq!(
            store.fetch("P1").await?.map(|p| p.source_file),
            Some("b.xml".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_rank_range_is_ascending_and_inclusive() -> Result<()> {
        let store = InMemoryStore::new();
        for (id, mean) in [("HIGH", 90.0), ("LOW", 1.0), ("MID", 50.0), ("EDGE", 10.0)] {
            store.store(&metric(id, mean, "r.xml")).await?;
        }

        let below_fifty = store.rank_range(f64::NEG_INFINITY, 50.0).await?;

        assert_eq!(
            below_fifty,
            vec![
                ("LOW".to_string(), 1.0),
                ("EDGE".to_string(), 10.0),
                ("MID".to_string(), 50.0),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_removing_a_product_also_unranks_it() -> Result<()> {
        let store = InMemoryStore::new();
        store.store(&metric("P1", 15.0, "a.xml")).await?;

        store.remove("P1").await?;

        assert_eq!(store.fetch("P1").await?, None);
        assert_eq!(store.rank_score("P1").await, None);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failed_zadd_leaves_a_written_but_unindexed_record() -> Result<()> {
        let store = InMemoryStore::new();
        store.fail_on(WriteStep::UpsertRankIndex, "P1").await;

        let err = store
            .store(&metric("P1", 15.0, "a.xml"))
            .await
            .expect_err("💀 the injected failure should surface");

        assert_eq!(err.step(), Some(WriteStep::UpsertRankIndex));
        // -- 🩹 the inconsistent window, exactly as advertised
        assert!(store.fetch("P1").await?.is_some());
        assert_eq!(store.rank_score("P1").await, None);
        Ok(())
    }
}
