use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::store::{KeySpace, KvStore};

/// 按 (会话, 目标, 对端) 的投递黑名单，条目带 TTL
///
/// 存储不可用时视为未拉黑。
#[derive(Clone)]
pub struct Blacklist {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
}

impl Blacklist {
    pub fn new(store: Arc<dyn KvStore>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    pub async fn contains(&self, session: &str, destination: &str, counterparty: &str) -> bool {
        let key = self.keys.blacklist(session, destination, counterparty);
        match self.store.exists(&key).await {
            Ok(found) => found,
            Err(err) => {
                warn!(key = %key, error = %err, "blacklist unavailable, treating as not listed");
                false
            }
        }
    }

    /// 重复添加只会刷新 TTL
    pub async fn add(&self, session: &str, destination: &str, counterparty: &str, ttl: Duration) {
        let key = self.keys.blacklist(session, destination, counterparty);
        match self.store.set_ex(&key, "1", ttl).await {
            Ok(()) => info!(
                session = %session,
                destination = %destination,
                counterparty = %counterparty,
                ttl_secs = ttl.as_secs(),
                "counterparty blacklisted"
            ),
            Err(err) => warn!(key = %key, error = %err, "failed to write blacklist entry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn entries_are_scoped_per_destination() {
        let blacklist = Blacklist::new(Arc::new(MemoryStore::new()), KeySpace::default());
        assert!(!blacklist.contains("s", "crm", "5511988887777").await);

        blacklist
            .add("s", "crm", "5511988887777", Duration::from_secs(60))
            .await;
        assert!(blacklist.contains("s", "crm", "5511988887777").await);
        assert!(!blacklist.contains("s", "bot", "5511988887777").await);
    }
}
