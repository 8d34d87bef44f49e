//! Redis implementation of [`KvStore`].
//!
//! Ordinary commands share one auto-reconnecting multiplexed connection.
//! `BLPOP` holds its connection for the whole wait, so blocking pops run on
//! dedicated connections kept in a small idle pool.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{Client, Cmd, FromRedisValue, RedisError};

use qgate_core::error::{QgateError, Result};
use qgate_core::protocol::command::ScoreBound;

use super::{KvStore, ScoredMember};

const MAX_IDLE_BLOCKING: usize = 16;

/// Smallest `BLPOP` timeout sent; zero would block forever.
const MIN_BLOCK_SECS: f64 = 0.01;

fn transport(e: RedisError) -> QgateError {
    QgateError::Transport(format!("redis: {e}"))
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn scored(raw: Vec<(Vec<u8>, f64)>) -> Vec<ScoredMember> {
    raw.into_iter()
        .map(|(member, score)| ScoredMember {
            member: Bytes::from(member),
            score,
        })
        .collect()
}

pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
    blocking: Mutex<Vec<MultiplexedConnection>>,
}

impl RedisStore {
    /// Connect to `url` (`redis://[user:pass@]host:port/db`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(transport)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(transport)?;
        tracing::info!(addr = %client.get_connection_info().addr, "redis store connected");
        Ok(Self {
            client,
            conn,
            blocking: Mutex::new(Vec::new()),
        })
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let mut conn = self.conn.clone();
        cmd.query_async(&mut conn).await.map_err(transport)
    }

    async fn blocking_conn(&self) -> Result<MultiplexedConnection> {
        let idle = self.blocking.lock().ok().and_then(|mut idle| idle.pop());
        if let Some(conn) = idle {
            return Ok(conn);
        }
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(transport)
    }

    fn release(&self, conn: MultiplexedConnection) {
        if let Ok(mut idle) = self.blocking.lock() {
            if idle.len() < MAX_IDLE_BLOCKING {
                idle.push(conn);
            }
        }
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn rpush(&self, key: &str, value: Bytes) -> Result<usize> {
        self.query(redis::cmd("RPUSH").arg(key).arg(value.as_ref()))
            .await
    }

    async fn rpush_expire(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("RPUSH")
            .arg(key)
            .arg(value.as_ref())
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .ignore();
        let mut conn = self.conn.clone();
        let () = pipe.query_async(&mut conn).await.map_err(transport)?;
        Ok(())
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<(String, Bytes)>> {
        // a cancelled wait drops its connection with the reply still pending
        let mut conn = self.blocking_conn().await?;
        let popped: Option<(String, Vec<u8>)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(timeout.as_secs_f64().max(MIN_BLOCK_SECS))
            .query_async(&mut conn)
            .await
            .map_err(transport)?;
        self.release(conn);
        Ok(popped.map(|(k, v)| (k, Bytes::from(v))))
    }

    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<Bytes>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let popped: Option<Vec<Vec<u8>>> =
            self.query(redis::cmd("LPOP").arg(key).arg(count)).await?;
        Ok(popped
            .unwrap_or_default()
            .into_iter()
            .map(Bytes::from)
            .collect())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.query(redis::cmd("PEXPIRE").arg(key).arg(millis(ttl)))
            .await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let n: usize = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(n > 0)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        let v: Option<Vec<u8>> = self.query(redis::cmd("HGET").arg(key).arg(field)).await?;
        Ok(v.map(Bytes::from))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Bytes>> {
        let raw: HashMap<String, Vec<u8>> = self.query(redis::cmd("HGETALL").arg(key)).await?;
        Ok(raw.into_iter().map(|(f, v)| (f, Bytes::from(v))).collect())
    }

    async fn hset(&self, key: &str, field: &str, value: Bytes) -> Result<()> {
        let _: i64 = self
            .query(redis::cmd("HSET").arg(key).arg(field).arg(value.as_ref()))
            .await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let n: usize = self.query(redis::cmd("HDEL").arg(key).arg(field)).await?;
        Ok(n > 0)
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Bytes>>> {
        let raw: Vec<Option<Vec<u8>>> = self.query(redis::cmd("HMGET").arg(key).arg(fields)).await?;
        Ok(raw.into_iter().map(|v| v.map(Bytes::from)).collect())
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.query(redis::cmd("HKEYS").arg(key)).await?;
        keys.sort();
        Ok(keys)
    }

    async fn hlen(&self, key: &str) -> Result<usize> {
        self.query(redis::cmd("HLEN").arg(key)).await
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        self.query(redis::cmd("HEXISTS").arg(key).arg(field)).await
    }

    async fn sadd(&self, key: &str, member: Bytes) -> Result<bool> {
        let n: usize = self.query(redis::cmd("SADD").arg(key).arg(member.as_ref())).await?;
        Ok(n > 0)
    }

    async fn sismember(&self, key: &str, member: &[u8]) -> Result<bool> {
        self.query(redis::cmd("SISMEMBER").arg(key).arg(member)).await
    }

    async fn zadd(&self, key: &str, score: f64, member: Bytes) -> Result<bool> {
        let n: usize = self
            .query(redis::cmd("ZADD").arg(key).arg(score).arg(member.as_ref()))
            .await?;
        Ok(n > 0)
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<ScoredMember>> {
        let raw: Vec<(Vec<u8>, f64)> = self
            .query(
                redis::cmd("ZRANGE")
                    .arg(key)
                    .arg(start)
                    .arg(stop)
                    .arg("WITHSCORES"),
            )
            .await?;
        Ok(scored(raw))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<ScoredMember>> {
        let raw: Vec<(Vec<u8>, f64)> = self
            .query(
                redis::cmd("ZRANGEBYSCORE")
                    .arg(key)
                    .arg(min.to_arg())
                    .arg(max.to_arg())
                    .arg("WITHSCORES"),
            )
            .await?;
        Ok(scored(raw))
    }

    async fn zrank(&self, key: &str, member: &[u8]) -> Result<Option<usize>> {
        self.query(redis::cmd("ZRANK").arg(key).arg(member)).await
    }
}
