//! Fast-cache dependency: sorted sets and counters.
//!
//! Commands are queued on a [`Pipeline`] and sent in one round trip by
//! [`Pipeline::commit`], which is always done before the pooled cache
//! client is returned. Semantics follow the Redis commands of the same
//! name; [`RedisCache`] runs them against a Redis server.

mod redis_cache;

#[cfg(test)]
mod memory;

pub use self::redis_cache::RedisCache;

#[cfg(test)]
pub use self::memory::MemoryCache;

use async_trait::async_trait;
use thiserror::Error;

use crate::errors::{ErrorCode, ServiceError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("operation against a key holding the wrong kind of value: {0}")]
    WrongType(String),

    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

impl From<CacheError> for ServiceError {
    fn from(e: CacheError) -> Self {
        ServiceError::new(ErrorCode::CacheError, e.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheCommand {
    /// Adds members with scores; an existing member has its score updated.
    ZAdd {
        key: String,
        members: Vec<(i64, String)>,
    },
    /// Members by descending score, inclusive indices, negative from the end.
    ZRevRange { key: String, start: i64, stop: i64 },
    Del { keys: Vec<String> },
    IncrBy { key: String, delta: i64 },
    Incr { key: String },
}

impl CacheCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CacheCommand::ZAdd { .. } => "ZADD",
            CacheCommand::ZRevRange { .. } => "ZREVRANGE",
            CacheCommand::Del { .. } => "DEL",
            CacheCommand::IncrBy { .. } => "INCRBY",
            CacheCommand::Incr { .. } => "INCR",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheReply {
    Integer(i64),
    Members(Vec<String>),
}

impl CacheReply {
    pub fn into_members(self) -> Result<Vec<String>, CacheError> {
        match self {
            CacheReply::Members(members) => Ok(members),
            CacheReply::Integer(_) => Err(CacheError::UnexpectedReply("ZREVRANGE")),
        }
    }

    pub fn into_integer(self) -> Result<i64, CacheError> {
        match self {
            CacheReply::Integer(value) => Ok(value),
            CacheReply::Members(_) => Err(CacheError::UnexpectedReply("integer command")),
        }
    }
}

/// A connection to the cache.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Runs the queued commands in order and returns one reply per command.
    /// Execution stops at the first failing command.
    async fn execute(&self, commands: Vec<CacheCommand>) -> Result<Vec<CacheReply>, CacheError>;
}

/// Commands queued for a single commit.
#[derive(Debug, Default)]
pub struct Pipeline {
    commands: Vec<CacheCommand>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zadd(&mut self, key: impl Into<String>, members: Vec<(i64, String)>) -> &mut Self {
        self.commands.push(CacheCommand::ZAdd {
            key: key.into(),
            members,
        });
        self
    }

    pub fn zrevrange(&mut self, key: impl Into<String>, start: i64, stop: i64) -> &mut Self {
        self.commands.push(CacheCommand::ZRevRange {
            key: key.into(),
            start,
            stop,
        });
        self
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(CacheCommand::Del {
            keys: vec![key.into()],
        });
        self
    }

    pub fn incrby(&mut self, key: impl Into<String>, delta: i64) -> &mut Self {
        self.commands.push(CacheCommand::IncrBy {
            key: key.into(),
            delta,
        });
        self
    }

    pub fn incr(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(CacheCommand::Incr { key: key.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub async fn commit(
        &mut self,
        client: &dyn CacheClient,
    ) -> Result<Vec<CacheReply>, CacheError> {
        let commands = std::mem::take(&mut self.commands);
        let expected = commands.len();
        let replies = client.execute(commands).await?;
        if replies.len() != expected {
            return Err(CacheError::UnexpectedReply("pipeline"));
        }
        Ok(replies)
    }
}
