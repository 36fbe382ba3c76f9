use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::store::{KeySpace, KvStore};

use super::DeliveryStatus;

/// 按消息 ID 持久化的投递状态，存储不可用时按“未知”处理
#[derive(Clone)]
pub struct StatusStore {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    ttl: Duration,
}

impl StatusStore {
    pub fn new(store: Arc<dyn KvStore>, keys: KeySpace, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    pub async fn get(&self, session: &str, message_id: &str) -> Option<DeliveryStatus> {
        let key = self.keys.status(session, message_id);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match DeliveryStatus::from_str(&raw) {
                Ok(status) => Some(status),
                Err(err) => {
                    warn!(key = %key, error = %err, "ignoring unreadable persisted status");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key = %key, error = %err, "status store unavailable, treating as unknown");
                None
            }
        }
    }

    pub async fn put(&self, session: &str, message_id: &str, status: DeliveryStatus) {
        let key = self.keys.status(session, message_id);
        if let Err(err) = self.store.set_ex(&key, status.as_str(), self.ttl).await {
            warn!(key = %key, status = %status, error = %err, "failed to persist status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn persists_and_reads_back() {
        let store = StatusStore::new(
            Arc::new(MemoryStore::new()),
            KeySpace::default(),
            Duration::from_secs(60),
        );
        assert_eq!(store.get("s", "M1").await, None);
        store.put("s", "M1", DeliveryStatus::Delivered).await;
        assert_eq!(store.get("s", "M1").await, Some(DeliveryStatus::Delivered));
    }

    #[tokio::test]
    async fn garbage_values_read_as_unknown() {
        let backend = Arc::new(MemoryStore::new());
        backend
            .set_ex("bridge:status:s:M1", "??", Duration::ZERO)
            .await
            .unwrap();
        let store = StatusStore::new(backend, KeySpace::default(), Duration::from_secs(60));
        assert_eq!(store.get("s", "M1").await, None);
    }
}
