use super::CoordinationStore;
use crate::Result;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

/// Redis-backed `CoordinationStore`, built on a `ConnectionManager` so every
/// caller shares one multiplexed connection instead of pooling one per task.
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        let mut conn = self.conn.clone();
        if fields.is_empty() {
            return Ok(vec![]);
        }
        Ok(conn.hget(key, fields).await?)
    }

    async fn hmset(&self, key: &str, fields: &[(&str, &str)]) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hincr_by(&self, key: &str, field: &str, by: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.hincr(key, field, by).await?)
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, by).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush(key, value).await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.rpush(key, value).await?;
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lpop(key, None).await?)
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(key).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.zcard(key).await?)
    }

    async fn setbit(&self, key: &str, offset: u64, value: bool) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.setbit(key, offset as usize, value).await?)
    }

    async fn getbit(&self, key: &str, offset: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.getbit(key, offset as usize).await?)
    }

    async fn setnx_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let opts = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::PX(ttl.as_millis() as usize));
        let res: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg(opts)
            .query_async(&mut conn)
            .await?;
        Ok(res.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del(key).await?;
        Ok(())
    }

    async fn flush_all(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }
}
