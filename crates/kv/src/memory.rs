//! In-memory adapter for the KV port, backed by DashMap.
//!
//! Used by the test suite and for dependency-free local development. Expiry
//! is enforced lazily on read and by [`MemoryKv::purge_expired`]. The
//! availability switch simulates a store outage so degradation paths can be
//! exercised hermetically.

use crate::{KvCommand, KvError, KvReply, KvResult, KvStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Stored {
    Value(String),
    SortedSet(BTreeMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    stored: Stored,
    expires_at: Option<Instant>,
    ttl_secs: Option<u64>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

pub struct MemoryKv {
    entries: DashMap<String, Entry>,
    available: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, up: bool) {
        self.available.store(up, Ordering::Relaxed);
    }

    /// TTL in seconds the key was last written with, if any.
    pub fn ttl_of(&self, key: &str) -> Option<u64> {
        self.entries
            .get(key)
            .filter(|entry| !entry.expired())
            .and_then(|entry| entry.ttl_secs)
    }

    /// Snapshot of live keys, for assertions.
    pub fn live_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().expired())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.expired());
        before - self.entries.len()
    }

    fn check_up(&self) -> KvResult<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(KvError::Unavailable("simulated outage".to_string()))
        }
    }

    fn set_entry(&self, key: &str, stored: Stored, ttl_secs: Option<u64>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                stored,
                expires_at: ttl_secs.map(|secs| Instant::now() + Duration::from_secs(secs)),
                ttl_secs,
            },
        );
    }

    fn touch_ttl(&self, key: &str, ttl_secs: u64) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
            entry.ttl_secs = Some(ttl_secs);
        }
    }

    fn with_sorted_set<T>(&self, key: &str, f: impl FnOnce(&mut BTreeMap<String, f64>) -> T) -> T {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            stored: Stored::SortedSet(BTreeMap::new()),
            expires_at: None,
            ttl_secs: None,
        });
        if entry.expired() {
            entry.stored = Stored::SortedSet(BTreeMap::new());
            entry.expires_at = None;
            entry.ttl_secs = None;
        }
        match &mut entry.stored {
            Stored::SortedSet(members) => f(members),
            Stored::Value(_) => {
                // Key reused with the wrong type: reset, matching no entry.
                entry.stored = Stored::SortedSet(BTreeMap::new());
                match &mut entry.stored {
                    Stored::SortedSet(members) => f(members),
                    Stored::Value(_) => unreachable!(),
                }
            }
        }
    }

    fn execute(&self, command: &KvCommand) -> KvReply {
        match command {
            KvCommand::Set { key, value } => {
                self.set_entry(key, Stored::Value(value.clone()), None);
                KvReply::Unit
            }
            KvCommand::SetWithTtl {
                key,
                value,
                ttl_secs,
            } => {
                self.set_entry(key, Stored::Value(value.clone()), Some(*ttl_secs));
                KvReply::Unit
            }
            KvCommand::Expire { key, ttl_secs } => {
                self.touch_ttl(key, *ttl_secs);
                KvReply::Unit
            }
            KvCommand::SortedSetRemoveRange {
                key,
                min_score,
                max_score,
            } => {
                self.with_sorted_set(key, |members| {
                    members.retain(|_, score| *score < *min_score || *score > *max_score);
                });
                KvReply::Unit
            }
            KvCommand::SortedSetAdd { key, score, member } => {
                self.with_sorted_set(key, |members| {
                    members.insert(member.clone(), *score);
                });
                KvReply::Unit
            }
            KvCommand::SortedSetCardinality { key } => {
                let count = self.with_sorted_set(key, |members| members.len() as u64);
                KvReply::Count(count)
            }
        }
    }
}

/// Redis-style glob matching, `*` wildcards only.
fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0;
    let last = parts.len() - 1;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == last {
            return text.len() >= pos + part.len() && text[pos..].ends_with(part);
        } else {
            match text[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.check_up()?;
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.expired() {
            drop(entry);
            self.entries.remove(key);
            return Ok(None);
        }
        match &entry.stored {
            Stored::Value(value) => Ok(Some(value.clone())),
            Stored::SortedSet(_) => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<()> {
        self.check_up()?;
        self.set_entry(key, Stored::Value(value.to_string()), Some(ttl_secs));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> KvResult<()> {
        self.check_up()?;
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<()> {
        self.check_up()?;
        self.touch_ttl(key, ttl_secs);
        Ok(())
    }

    async fn sorted_set_add(&self, key: &str, score: f64, member: &str) -> KvResult<()> {
        self.check_up()?;
        self.execute(&KvCommand::SortedSetAdd {
            key: key.to_string(),
            score,
            member: member.to_string(),
        });
        Ok(())
    }

    async fn sorted_set_remove_range(
        &self,
        key: &str,
        min_score: f64,
        max_score: f64,
    ) -> KvResult<()> {
        self.check_up()?;
        self.execute(&KvCommand::SortedSetRemoveRange {
            key: key.to_string(),
            min_score,
            max_score,
        });
        Ok(())
    }

    async fn sorted_set_cardinality(&self, key: &str) -> KvResult<u64> {
        self.check_up()?;
        match self.execute(&KvCommand::SortedSetCardinality {
            key: key.to_string(),
        }) {
            KvReply::Count(count) => Ok(count),
            KvReply::Unit => Ok(0),
        }
    }

    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> KvResult<(u64, Vec<String>)> {
        self.check_up()?;
        let matching: Vec<String> = self
            .live_keys()
            .into_iter()
            .filter(|key| glob_match(pattern, key))
            .collect();

        let start = cursor as usize;
        if start >= matching.len() {
            return Ok((0, Vec::new()));
        }
        let end = (start + count.max(1)).min(matching.len());
        let next = if end == matching.len() { 0 } else { end as u64 };
        Ok((next, matching[start..end].to_vec()))
    }

    async fn pipeline(&self, commands: Vec<KvCommand>) -> KvResult<Vec<KvReply>> {
        self.check_up()?;
        Ok(commands.iter().map(|command| self.execute(command)).collect())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn probe(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }
}
