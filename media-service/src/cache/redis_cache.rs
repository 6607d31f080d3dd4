use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{ErrorKind, RedisError, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::{CacheClient, CacheCommand, CacheError, CacheReply};

/// Cache client backed by a Redis server.
///
/// Clones share one multiplexed connection, opened on first use and
/// re-established by the connection manager after failures. Each commit is
/// sent as a single `MULTI`/`EXEC` transaction.
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    connection: Arc<OnceCell<ConnectionManager>>,
}

impl RedisCache {
    pub fn open(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(cache_error)?;
        Ok(Self {
            client,
            connection: Arc::new(OnceCell::new()),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let connection = ConnectionManager::new(self.client.clone()).await?;
                tracing::info!("Connected to redis");
                Ok::<_, RedisError>(connection)
            })
            .await
            .map_err(cache_error)?;
        Ok(connection.clone())
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    async fn execute(&self, commands: Vec<CacheCommand>) -> Result<Vec<CacheReply>, CacheError> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        let mut connection = self.connection().await?;
        let values: Vec<Value> = build_pipeline(&commands)
            .query_async(&mut connection)
            .await
            .map_err(cache_error)?;

        if values.len() != commands.len() {
            return Err(CacheError::UnexpectedReply("EXEC"));
        }
        commands
            .iter()
            .zip(values)
            .map(|(command, value)| to_reply(command, value))
            .collect()
    }
}

fn build_pipeline(commands: &[CacheCommand]) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for command in commands {
        pipe.cmd(command.name());
        match command {
            CacheCommand::ZAdd { key, members } => {
                pipe.arg(key);
                for (score, member) in members {
                    pipe.arg(*score).arg(member);
                }
            }
            CacheCommand::ZRevRange { key, start, stop } => {
                pipe.arg(key).arg(*start).arg(*stop);
            }
            CacheCommand::Del { keys } => {
                pipe.arg(keys);
            }
            CacheCommand::IncrBy { key, delta } => {
                pipe.arg(key).arg(*delta);
            }
            CacheCommand::Incr { key } => {
                pipe.arg(key);
            }
        }
    }
    pipe
}

fn to_reply(command: &CacheCommand, value: Value) -> Result<CacheReply, CacheError> {
    let reply = match command {
        CacheCommand::ZRevRange { .. } => {
            redis::from_redis_value::<Vec<String>>(&value).map(CacheReply::Members)
        }
        _ => redis::from_redis_value::<i64>(&value).map(CacheReply::Integer),
    };
    reply.map_err(|e| match e.kind() {
        ErrorKind::TypeError => CacheError::UnexpectedReply(command.name()),
        _ => cache_error(e),
    })
}

fn cache_error(e: RedisError) -> CacheError {
    if e.code() == Some("WRONGTYPE") {
        return CacheError::WrongType(e.detail().unwrap_or_default().to_string());
    }
    match e.kind() {
        ErrorKind::TypeError => CacheError::UnexpectedReply("redis"),
        _ => CacheError::Unavailable(e.to_string()),
    }
}
