//! 键值存储抽象
//!
//! 身份映射、消息 ID 关联、投递状态与黑名单都落在同一个键值存储上，
//! 每个键族有各自的 TTL。所有调用都带显式超时，超时按瞬时错误处理。

mod memory;
mod redis_store;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{BridgeAppConfig, StoreBackend};
use crate::error::{BridgeError, Result};

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// 键值存储端口
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// 写入并设置过期时间，`ttl` 为 0 表示不过期
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;
}

/// 为单次存储调用加上超时
pub(crate) async fn with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(BridgeError::Timeout {
            operation,
            elapsed: timeout,
        }),
    }
}

/// 根据配置构建存储实例
pub async fn build_store(config: &BridgeAppConfig) -> Result<Arc<dyn KvStore>> {
    let timeout = Duration::from_millis(config.store.op_timeout_ms.max(1));
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Redis => {
            let profile_name = config.store.redis_profile.as_deref().ok_or_else(|| {
                BridgeError::Configuration("store.redis_profile is not set".to_string())
            })?;
            let profile = config.redis_profile(profile_name).ok_or_else(|| {
                BridgeError::Configuration(format!("unknown redis profile {profile_name}"))
            })?;
            let store = RedisStore::connect(&profile.url, profile.database, timeout).await?;
            Ok(Arc::new(store))
        }
    }
}

/// 键族构造器，集中维护键格式
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn message_id(&self, session: &str, provider_id: &str) -> String {
        format!("{}:msgid:{}:{}", self.prefix, session, provider_id)
    }

    pub fn message_id_reverse(&self, session: &str, internal_id: &str) -> String {
        format!("{}:msgid:rev:{}:{}", self.prefix, session, internal_id)
    }

    pub fn status(&self, session: &str, message_id: &str) -> String {
        format!("{}:status:{}:{}", self.prefix, session, message_id)
    }

    pub fn blacklist(&self, session: &str, destination: &str, counterparty: &str) -> String {
        format!(
            "{}:blacklist:{}:{}:{}",
            self.prefix, session, destination, counterparty
        )
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("bridge")
    }
}
