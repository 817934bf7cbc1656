use crate::error::Result;
use crate::KvBackend;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::BTreeSet;
use std::time::Duration;

const DELETE_IF_EQUALS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Redis backend over a reconnecting tokio connection manager.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        tracing::info!(url, "Connected to Redis");
        Ok(Self { conn })
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_secs(ttl));
        }
        cmd.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed = redis::cmd("DEL").arg(key).query_async::<i64>(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let millis = ttl.as_millis().max(1) as u64;
        let reply = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis)
            .query_async::<Option<String>>(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed = redis::Script::new(DELETE_IF_EQUALS)
            .key(key)
            .arg(value)
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn add_member(&self, key: &str, member: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("SADD").arg(key).arg(member).ignore();
        match ttl {
            Some(ttl) => pipe.cmd("EXPIRE").arg(key).arg(ttl_secs(ttl)).ignore(),
            None => pipe.cmd("PERSIST").arg(key).ignore(),
        };
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn members(&self, key: &str) -> Result<BTreeSet<String>> {
        let mut conn = self.conn.clone();
        let members = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async::<Vec<String>>(&mut conn)
            .await?;
        Ok(members.into_iter().collect())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = redis::cmd("KEYS")
            .arg(format!("{prefix}*"))
            .query_async::<Vec<String>>(&mut conn)
            .await?;
        keys.sort();
        Ok(keys)
    }
}
