//! 消息 ID 关联器
//!
//! 维护内部消息 ID 与提供方消息 ID 的双向映射。内部 ID 在首次规范化时生成并绑定，
//! 之后的状态、回应、引用事件都通过 `lookup` 改写为内部 ID。映射不会被显式删除，依赖 TTL 过期。

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use ulid::Ulid;

use crate::error::BridgeError;
use crate::store::{KeySpace, KvStore};

/// 消息 ID 关联器
#[derive(Clone)]
pub struct MessageIdCorrelator {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    ttl: Duration,
}

impl MessageIdCorrelator {
    pub fn new(store: Arc<dyn KvStore>, keys: KeySpace, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    /// 生成新的内部消息 ID
    ///
    /// ULID：唯一、大致按时间递增，便于排查问题。
    pub fn mint() -> String {
        Ulid::new().to_string()
    }

    /// 绑定提供方 ID 与内部 ID（重复绑定同一对是幂等的）
    pub async fn bind(&self, session: &str, provider_id: &str, internal_id: &str) {
        if provider_id.is_empty() || internal_id.is_empty() {
            return;
        }
        let forward = self.keys.message_id(session, provider_id);
        let reverse = self.keys.message_id_reverse(session, internal_id);
        if let Err(err) = self.store.set_ex(&forward, internal_id, self.ttl).await {
            self.degrade(&err, provider_id);
            return;
        }
        if let Err(err) = self.store.set_ex(&reverse, provider_id, self.ttl).await {
            self.degrade(&err, provider_id);
        }
    }

    /// 提供方 ID → 内部 ID
    pub async fn lookup(&self, session: &str, provider_id: &str) -> Option<String> {
        if provider_id.is_empty() {
            return None;
        }
        let key = self.keys.message_id(session, provider_id);
        match self.store.get(&key).await {
            Ok(value) => value,
            Err(err) => {
                self.degrade(&err, provider_id);
                None
            }
        }
    }

    /// 内部 ID → 提供方 ID
    pub async fn lookup_provider(&self, session: &str, internal_id: &str) -> Option<String> {
        let key = self.keys.message_id_reverse(session, internal_id);
        match self.store.get(&key).await {
            Ok(value) => value,
            Err(err) => {
                self.degrade(&err, internal_id);
                None
            }
        }
    }

    /// 改写引用的提供方 ID；未绑定时原样返回
    pub async fn rewrite(&self, session: &str, provider_id: &str) -> String {
        self.lookup(session, provider_id)
            .await
            .unwrap_or_else(|| provider_id.to_string())
    }

    /// 返回已绑定的内部 ID，没有则生成并绑定
    pub async fn bind_or_mint(&self, session: &str, provider_id: &str) -> String {
        if let Some(existing) = self.lookup(session, provider_id).await {
            return existing;
        }
        let internal = Self::mint();
        self.bind(session, provider_id, &internal).await;
        internal
    }

    fn degrade(&self, err: &BridgeError, message_id: &str) {
        warn!(error = %err, message_id = %message_id, "message id correlation unavailable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn correlator(store: Arc<MemoryStore>) -> MessageIdCorrelator {
        MessageIdCorrelator::new(store, KeySpace::default(), Duration::from_secs(60))
    }

    #[test]
    fn minted_ids_are_unique() {
        let a = MessageIdCorrelator::mint();
        let b = MessageIdCorrelator::mint();
        assert_ne!(a, b);
        assert_eq!(a.len(), 26);
    }

    #[tokio::test]
    async fn binding_is_stable_across_lookups() {
        let correlator = correlator(Arc::new(MemoryStore::new()));
        correlator.bind("s1", "3EB0ABC", "01HX").await;

        for _ in 0..3 {
            assert_eq!(correlator.lookup("s1", "3EB0ABC").await.as_deref(), Some("01HX"));
        }
        assert_eq!(
            correlator.lookup_provider("s1", "01HX").await.as_deref(),
            Some("3EB0ABC")
        );
        assert_eq!(correlator.lookup("s2", "3EB0ABC").await, None);
    }

    #[tokio::test]
    async fn unbound_ids_pass_through() {
        let correlator = correlator(Arc::new(MemoryStore::new()));
        assert_eq!(correlator.rewrite("s1", "unknown").await, "unknown");
    }

    #[tokio::test]
    async fn bind_or_mint_reuses_existing_binding() {
        let correlator = correlator(Arc::new(MemoryStore::new()));
        let first = correlator.bind_or_mint("s1", "P1").await;
        let second = correlator.bind_or_mint("s1", "P1").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn store_outage_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        let correlator = correlator(store.clone());
        store.set_unavailable(true);

        correlator.bind("s1", "P1", "I1").await;
        assert_eq!(correlator.lookup("s1", "P1").await, None);
        assert_eq!(correlator.rewrite("s1", "P1").await, "P1");
    }
}
