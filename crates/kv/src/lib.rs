//! Key-value port over the auxiliary store.
//!
//! The serving pipeline uses the KV for three things: the personalised serve
//! cache, per-customer impression profiles, and rate-limit buckets. All three
//! degrade gracefully when the store is down, so every operation reports
//! failure as [`KvError::Unavailable`] and callers decide whether to skip,
//! fall back, or fail open.

use async_trait::async_trait;
use thiserror::Error;

pub mod client;
pub mod memory;

pub use client::RedisKv;
pub use memory::MemoryKv;

pub type KvResult<T> = Result<T, KvError>;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv store unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected kv reply: {0}")]
    UnexpectedReply(String),
}

/// One step of a batched pipeline.
#[derive(Debug, Clone)]
pub enum KvCommand {
    Set { key: String, value: String },
    SetWithTtl {
        key: String,
        value: String,
        ttl_secs: u64,
    },
    Expire { key: String, ttl_secs: u64 },
    SortedSetRemoveRange {
        key: String,
        min_score: f64,
        max_score: f64,
    },
    SortedSetAdd {
        key: String,
        score: f64,
        member: String,
    },
    SortedSetCardinality { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvReply {
    Unit,
    Count(u64),
}

impl KvReply {
    pub fn count(&self) -> Option<u64> {
        match self {
            KvReply::Count(n) => Some(*n),
            KvReply::Unit => None,
        }
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<()>;

    async fn delete(&self, keys: &[String]) -> KvResult<()>;

    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<()>;

    async fn sorted_set_add(&self, key: &str, score: f64, member: &str) -> KvResult<()>;

    async fn sorted_set_remove_range(
        &self,
        key: &str,
        min_score: f64,
        max_score: f64,
    ) -> KvResult<()>;

    async fn sorted_set_cardinality(&self, key: &str) -> KvResult<u64>;

    /// Glob SCAN. Returns the next cursor (0 when the cycle is complete) and
    /// the keys found in this step.
    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> KvResult<(u64, Vec<String>)>;

    /// Execute a batch so that reads within it observe the batch's earlier
    /// writes. Replies are positional.
    async fn pipeline(&self, commands: Vec<KvCommand>) -> KvResult<Vec<KvReply>>;

    /// Last observed connection state. Cheap, never blocks.
    fn is_available(&self) -> bool;

    /// Active connectivity check, refreshing the availability flag.
    async fn probe(&self) -> bool;
}
