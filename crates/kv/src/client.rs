//! Redis adapter for the KV port.
//!
//! Uses multiplexed async connections; the availability flag tracks the last
//! observed outcome so request handlers can skip the store without paying a
//! connect timeout when it is known to be down.

use crate::{KvCommand, KvError, KvReply, KvResult, KvStore};
use adserve_core::config::RedisConfig;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

pub struct RedisKv {
    client: redis::Client,
    available: AtomicBool,
}

impl RedisKv {
    /// Build the client and probe once. An unreachable store is not fatal:
    /// the service starts degraded and the flag flips when Redis comes back.
    pub async fn connect(config: &RedisConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let kv = Self {
            client,
            available: AtomicBool::new(false),
        };

        if kv.probe().await {
            info!(url = %config.url, "Redis connection established");
        } else {
            warn!(url = %config.url, "Redis unreachable, starting degraded");
        }
        Ok(kv)
    }

    async fn conn(&self) -> KvResult<MultiplexedConnection> {
        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                self.available.store(false, Ordering::Relaxed);
                Err(KvError::Unavailable(err.to_string()))
            }
        }
    }

    fn observe<T>(&self, result: redis::RedisResult<T>) -> KvResult<T> {
        match result {
            Ok(value) => {
                self.available.store(true, Ordering::Relaxed);
                Ok(value)
            }
            Err(err) => {
                self.available.store(false, Ordering::Relaxed);
                Err(KvError::Unavailable(err.to_string()))
            }
        }
    }
}

fn apply(pipe: &mut redis::Pipeline, command: &KvCommand) {
    match command {
        KvCommand::Set { key, value } => {
            pipe.cmd("SET").arg(key).arg(value);
        }
        KvCommand::SetWithTtl {
            key,
            value,
            ttl_secs,
        } => {
            pipe.cmd("SET").arg(key).arg(value).arg("EX").arg(*ttl_secs);
        }
        KvCommand::Expire { key, ttl_secs } => {
            pipe.cmd("EXPIRE").arg(key).arg(*ttl_secs);
        }
        KvCommand::SortedSetRemoveRange {
            key,
            min_score,
            max_score,
        } => {
            pipe.cmd("ZREMRANGEBYSCORE")
                .arg(key)
                .arg(*min_score)
                .arg(*max_score);
        }
        KvCommand::SortedSetAdd { key, score, member } => {
            pipe.cmd("ZADD").arg(key).arg(*score).arg(member);
        }
        KvCommand::SortedSetCardinality { key } => {
            pipe.cmd("ZCARD").arg(key);
        }
    }
}

fn reply_for(command: &KvCommand, value: &redis::Value) -> KvResult<KvReply> {
    match command {
        KvCommand::SortedSetCardinality { .. } => {
            let count: u64 = redis::from_redis_value(value)
                .map_err(|err| KvError::UnexpectedReply(err.to_string()))?;
            Ok(KvReply::Count(count))
        }
        _ => Ok(KvReply::Unit),
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn().await?;
        let result: redis::RedisResult<Option<String>> = conn.get(key).await;
        self.observe(result)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<()> {
        let mut conn = self.conn().await?;
        let result: redis::RedisResult<()> = conn.set_ex(key, value, ttl_secs).await;
        self.observe(result)
    }

    async fn delete(&self, keys: &[String]) -> KvResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let result: redis::RedisResult<()> = conn.del(keys).await;
        self.observe(result)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<()> {
        let mut conn = self.conn().await?;
        let result: redis::RedisResult<()> = conn.expire(key, ttl_secs as i64).await;
        self.observe(result)
    }

    async fn sorted_set_add(&self, key: &str, score: f64, member: &str) -> KvResult<()> {
        let mut conn = self.conn().await?;
        let result: redis::RedisResult<()> = conn.zadd(key, member, score).await;
        self.observe(result)
    }

    async fn sorted_set_remove_range(
        &self,
        key: &str,
        min_score: f64,
        max_score: f64,
    ) -> KvResult<()> {
        let mut conn = self.conn().await?;
        let result: redis::RedisResult<()> = conn.zrembyscore(key, min_score, max_score).await;
        self.observe(result)
    }

    async fn sorted_set_cardinality(&self, key: &str) -> KvResult<u64> {
        let mut conn = self.conn().await?;
        let result: redis::RedisResult<u64> = conn.zcard(key).await;
        self.observe(result)
    }

    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> KvResult<(u64, Vec<String>)> {
        let mut conn = self.conn().await?;
        let result: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await;
        self.observe(result)
    }

    async fn pipeline(&self, commands: Vec<KvCommand>) -> KvResult<Vec<KvReply>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in &commands {
            apply(&mut pipe, command);
        }
        let result: redis::RedisResult<Vec<redis::Value>> = pipe.query_async(&mut conn).await;
        let values = self.observe(result)?;

        if values.len() != commands.len() {
            return Err(KvError::UnexpectedReply(format!(
                "pipeline returned {} replies for {} commands",
                values.len(),
                commands.len()
            )));
        }
        commands
            .iter()
            .zip(values.iter())
            .map(|(command, value)| reply_for(command, value))
            .collect()
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn probe(&self) -> bool {
        match self.client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                let pong: redis::RedisResult<String> =
                    redis::cmd("PING").query_async(&mut conn).await;
                let up = pong.is_ok();
                self.available.store(up, Ordering::Relaxed);
                up
            }
            Err(_) => {
                self.available.store(false, Ordering::Relaxed);
                false
            }
        }
    }
}
