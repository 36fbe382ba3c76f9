use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{BridgeError, Result};

use super::KvStore;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

const DEFAULT_SWEEP_THRESHOLD: usize = 10_000;

/// 进程内键值存储
///
/// 过期条目在读取时惰性清理；写入时条目数超过水位线则整体清扫一次，
/// 清扫后水位线调整为存活条目数的两倍（不低于初始阈值）。
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    sweep_threshold: usize,
    sweep_at: Arc<AtomicUsize>,
    // 测试用：模拟存储不可用
    unavailable: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_sweep_threshold(DEFAULT_SWEEP_THRESHOLD)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_threshold(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            entries: Arc::new(DashMap::new()),
            sweep_threshold: threshold,
            sweep_at: Arc::new(AtomicUsize::new(threshold)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 切换为不可用状态，之后的调用全部返回 `StoreUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 清除所有已过期条目
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    fn sweep_if_needed(&self) {
        if self.entries.len() <= self.sweep_at.load(Ordering::Relaxed) {
            return;
        }
        let removed = self.purge_expired();
        let remaining = self.entries.len();
        self.sweep_at.store(
            remaining.saturating_mul(2).max(self.sweep_threshold),
            Ordering::Relaxed,
        );
        debug!(removed, remaining, "memory store swept");
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BridgeError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_available()?;
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        self.sweep_if_needed();
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_exists() {
        let store = MemoryStore::new();
        store.set_ex("a", "1", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(store.exists("a").await.unwrap());
        assert!(!store.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entries_read_as_missing() {
        let store = MemoryStore::new();
        store
            .set_ex("short", "x", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn writes_sweep_expired_entries_past_threshold() {
        let store = MemoryStore::with_sweep_threshold(100);
        for i in 0..100 {
            store
                .set_ex(&format!("short:{i}"), "x", Duration::from_millis(1))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        for i in 0..10 {
            store
                .set_ex(&format!("live:{i}"), "y", Duration::ZERO)
                .await
                .unwrap();
        }

        assert!(store.len() <= 10);
        assert_eq!(store.get("live:9").await.unwrap().as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn live_entries_raise_the_sweep_mark() {
        let store = MemoryStore::with_sweep_threshold(10);
        for i in 0..50 {
            store
                .set_ex(&format!("k:{i}"), "v", Duration::ZERO)
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 50);
        assert!(store.sweep_at.load(Ordering::Relaxed) >= 22);
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get("a").await,
            Err(BridgeError::StoreUnavailable(_))
        ));
    }
}
