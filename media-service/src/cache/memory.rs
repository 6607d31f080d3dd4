//! In-process cache with Redis semantics for the command subset in use.
//!
//! Bounded like a capped Redis instance: at most `max_keys` keys, each
//! expiring after a fixed time to live, and sorted sets trimmed to their
//! `max_set_members` highest-scored members.

use async_trait::async_trait;
use moka::sync::Cache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{CacheClient, CacheCommand, CacheError, CacheReply};

const MAX_KEYS: u64 = 10_000;
const MAX_SET_MEMBERS: usize = 1_000;
const TTL_SECS: u64 = 3600;

#[derive(Clone, Debug)]
enum Value {
    SortedSet(HashMap<String, i64>),
    Integer(i64),
}

/// Clones share the same keyspace, so every pooled client of one pool sees
/// the same data.
#[derive(Clone)]
pub struct MemoryCache {
    keyspace: Cache<String, Value>,
    max_set_members: usize,
    /// Held for a whole pipeline so it applies as one unit.
    commit: Arc<Mutex<()>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_limits(MAX_KEYS, MAX_SET_MEMBERS)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_keys: u64, max_set_members: usize) -> Self {
        let keyspace = Cache::builder()
            .max_capacity(max_keys)
            .time_to_live(Duration::from_secs(TTL_SECS))
            .build();

        Self {
            keyspace,
            max_set_members,
            commit: Arc::new(Mutex::new(())),
        }
    }

    /// Current value of a counter key, if it holds one.
    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.keyspace.get(key) {
            Some(Value::Integer(value)) => Some(value),
            _ => None,
        }
    }

    /// Number of members of a sorted set key.
    pub fn zcard(&self, key: &str) -> usize {
        match self.keyspace.get(key) {
            Some(Value::SortedSet(members)) => members.len(),
            _ => 0,
        }
    }

    /// Number of live keys once pending evictions have run.
    pub fn key_count(&self) -> u64 {
        self.keyspace.run_pending_tasks();
        self.keyspace.entry_count()
    }

    fn apply(&self, command: CacheCommand) -> Result<CacheReply, CacheError> {
        match command {
            CacheCommand::ZAdd { key, members } => {
                let mut set = match self.keyspace.get(&key) {
                    None => HashMap::new(),
                    Some(Value::SortedSet(set)) => set,
                    Some(Value::Integer(_)) => return Err(CacheError::WrongType(key)),
                };
                let mut added = 0;
                for (score, member) in members {
                    if set.insert(member, score).is_none() {
                        added += 1;
                    }
                }
                trim(&mut set, self.max_set_members);
                self.keyspace.insert(key, Value::SortedSet(set));
                Ok(CacheReply::Integer(added))
            }
            CacheCommand::ZRevRange { key, start, stop } => match self.keyspace.get(&key) {
                None => Ok(CacheReply::Members(Vec::new())),
                Some(Value::Integer(_)) => Err(CacheError::WrongType(key)),
                Some(Value::SortedSet(set)) => {
                    let ordered = by_score_descending(&set);
                    let members = match resolve_range(ordered.len(), start, stop) {
                        Some((from, to)) => ordered[from..=to]
                            .iter()
                            .map(|(member, _)| (*member).clone())
                            .collect(),
                        None => Vec::new(),
                    };
                    Ok(CacheReply::Members(members))
                }
            },
            CacheCommand::Del { keys } => {
                let removed = keys
                    .iter()
                    .filter(|key| self.keyspace.remove(*key).is_some())
                    .count();
                Ok(CacheReply::Integer(removed as i64))
            }
            CacheCommand::IncrBy { key, delta } => self.increment(key, delta),
            CacheCommand::Incr { key } => self.increment(key, 1),
        }
    }

    fn increment(&self, key: String, delta: i64) -> Result<CacheReply, CacheError> {
        let value = match self.keyspace.get(&key) {
            None => delta,
            Some(Value::Integer(value)) => value + delta,
            Some(Value::SortedSet(_)) => return Err(CacheError::WrongType(key)),
        };
        self.keyspace.insert(key, Value::Integer(value));
        Ok(CacheReply::Integer(value))
    }
}

/// Members by descending score, ties by descending member.
fn by_score_descending(set: &HashMap<String, i64>) -> Vec<(&String, i64)> {
    let mut ordered: Vec<(&String, i64)> =
        set.iter().map(|(member, score)| (member, *score)).collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(a.0)));
    ordered
}

/// Drops the lowest-scored members beyond `max`.
fn trim(set: &mut HashMap<String, i64>, max: usize) {
    if set.len() <= max {
        return;
    }
    let evicted: Vec<String> = by_score_descending(set)[max..]
        .iter()
        .map(|(member, _)| (*member).clone())
        .collect();
    for member in evicted {
        set.remove(&member);
    }
}

/// Resolves Redis-style inclusive indices against a collection of `len`
/// items. Returns `None` for an empty range.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn execute(&self, commands: Vec<CacheCommand>) -> Result<Vec<CacheReply>, CacheError> {
        let _commit = self.commit.lock();
        commands
            .into_iter()
            .map(|command| self.apply(command))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Pipeline;

    fn members(pairs: &[(i64, &str)]) -> Vec<(i64, String)> {
        pairs
            .iter()
            .map(|(score, member)| (*score, member.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_zrevrange_orders_by_score_descending() {
        let cache = MemoryCache::new();
        let mut pipeline = Pipeline::new();
        pipeline.zadd("7", members(&[(100, "1"), (300, "3"), (200, "2")]));
        pipeline.zrevrange("7", 0, 1);
        pipeline.zrevrange("7", 1, -1);
        pipeline.zrevrange("7", 5, 9);
        pipeline.zrevrange("missing", 0, 9);

        let replies = pipeline.commit(&cache).await.unwrap();
        assert_eq!(replies[0], CacheReply::Integer(3));
        assert_eq!(replies[1], CacheReply::Members(vec!["3".into(), "2".into()]));
        assert_eq!(replies[2], CacheReply::Members(vec!["2".into(), "1".into()]));
        assert_eq!(replies[3], CacheReply::Members(vec![]));
        assert_eq!(replies[4], CacheReply::Members(vec![]));
    }

    #[tokio::test]
    async fn test_zadd_updates_existing_member_score() {
        let cache = MemoryCache::new();
        let mut pipeline = Pipeline::new();
        pipeline.zadd("u", members(&[(1, "a"), (2, "b")]));
        pipeline.zadd("u", members(&[(3, "a")]));
        pipeline.zrevrange("u", 0, -1);

        let replies = pipeline.commit(&cache).await.unwrap();
        assert_eq!(replies[1], CacheReply::Integer(0));
        assert_eq!(replies[2], CacheReply::Members(vec!["a".into(), "b".into()]));
        assert_eq!(cache.zcard("u"), 2);
    }

    #[tokio::test]
    async fn test_del_then_zadd_replaces_set() {
        let cache = MemoryCache::new();
        Pipeline::new()
            .zadd("u", members(&[(1, "old")]))
            .commit(&cache)
            .await
            .unwrap();

        let replies = Pipeline::new()
            .del("u")
            .zadd("u", members(&[(5, "new")]))
            .zrevrange("u", 0, -1)
            .commit(&cache)
            .await
            .unwrap();
        assert_eq!(replies[0], CacheReply::Integer(1));
        assert_eq!(replies[2], CacheReply::Members(vec!["new".into()]));
    }

    #[tokio::test]
    async fn test_counters() {
        let cache = MemoryCache::new();
        let replies = Pipeline::new()
            .incrby("m1:uncommit_sum", 4)
            .incr("m1:uncommit_num")
            .incrby("m1:uncommit_sum", 2)
            .commit(&cache)
            .await
            .unwrap();
        assert_eq!(replies[2], CacheReply::Integer(6));
        assert_eq!(cache.integer("m1:uncommit_sum"), Some(6));
        assert_eq!(cache.integer("m1:uncommit_num"), Some(1));
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let cache = MemoryCache::new();
        let err = Pipeline::new()
            .incr("k")
            .zadd("k", members(&[(1, "a")]))
            .commit(&cache)
            .await
            .unwrap_err();
        assert_eq!(err, CacheError::WrongType("k".into()));
    }

    #[tokio::test]
    async fn test_sorted_set_keeps_most_recent_window() {
        let cache = MemoryCache::with_limits(100, 3);
        for timestamp in 1..=1_000 {
            Pipeline::new()
                .zadd("u", members(&[(timestamp, timestamp.to_string().as_str())]))
                .commit(&cache)
                .await
                .unwrap();
        }
        assert_eq!(cache.zcard("u"), 3);

        let replies = Pipeline::new()
            .zrevrange("u", 0, -1)
            .commit(&cache)
            .await
            .unwrap();
        assert_eq!(
            replies[0],
            CacheReply::Members(vec!["1000".into(), "999".into(), "998".into()])
        );
    }

    #[tokio::test]
    async fn test_key_count_is_capped() {
        let cache = MemoryCache::with_limits(8, 10);
        for id in 0..200 {
            Pipeline::new()
                .incr(format!("{id}:uncommit_num"))
                .commit(&cache)
                .await
                .unwrap();
        }
        assert!(cache.key_count() <= 8);
    }

    #[test]
    fn test_resolve_range() {
        assert_eq!(resolve_range(5, 0, 2), Some((0, 2)));
        assert_eq!(resolve_range(5, 3, 10), Some((3, 4)));
        assert_eq!(resolve_range(5, -2, -1), Some((3, 4)));
        assert_eq!(resolve_range(5, -10, 1), Some((0, 1)));
        assert_eq!(resolve_range(5, 5, 9), None);
        assert_eq!(resolve_range(5, 3, 2), None);
        assert_eq!(resolve_range(0, 0, 0), None);
    }
}
