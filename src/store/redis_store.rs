//! Redis 键值存储
//! 多进程部署时身份映射、消息 ID 关联和投递状态都放在 Redis 中，写入是后写覆盖、可交换的

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::Result;

use super::{KvStore, with_timeout};

/// Redis 存储
#[derive(Clone)]
pub struct RedisStore {
    /// 自动重连的连接管理器
    conn: ConnectionManager,
    /// 单次调用超时
    op_timeout: Duration,
}

impl RedisStore {
    /// 连接 Redis 并创建存储
    pub async fn connect(url: &str, database: Option<u32>, op_timeout: Duration) -> Result<Self> {
        let url = match database {
            Some(db) => format!("{}/{}", url.trim_end_matches('/'), db),
            None => url.to_string(),
        };
        let client = redis::Client::open(url.as_str())?;
        let conn = with_timeout("redis.connect", op_timeout, async {
            Ok(client.get_connection_manager().await?)
        })
        .await?;

        tracing::info!(url = %url, "redis store connected");
        Ok(Self { conn, op_timeout })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        with_timeout("redis.get", self.op_timeout, async move {
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        with_timeout("redis.set_ex", self.op_timeout, async move {
            if ttl.is_zero() {
                let _: () = conn.set(key, value).await?;
            } else {
                // 不足 1 秒的 TTL 向上取整
                let seconds = ttl.as_secs().max(1);
                let _: () = conn.set_ex(key, value, seconds).await?;
            }
            Ok(())
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        with_timeout("redis.exists", self.op_timeout, async move {
            let exists: bool = conn.exists(key).await?;
            Ok(exists)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "需要一个运行中的 Redis 实例"]
    async fn round_trip_against_local_redis() -> Result<()> {
        let store =
            RedisStore::connect("redis://127.0.0.1/", None, Duration::from_secs(1)).await?;

        store
            .set_ex("bridge:test:key", "value", Duration::from_secs(30))
            .await?;
        assert_eq!(
            store.get("bridge:test:key").await?.as_deref(),
            Some("value")
        );
        assert!(store.exists("bridge:test:key").await?);

        store
            .set_ex("bridge:test:short", "value", Duration::from_millis(10))
            .await?;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!store.exists("bridge:test:short").await?);
        Ok(())
    }
}
