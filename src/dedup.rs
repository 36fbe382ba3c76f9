//! 内容事件去重窗口
//!
//! 按 (chat, 提供方消息 ID) 记录最近一次接受的时间。每个会话持有一个实例，
//! 随会话创建和销毁；状态/回执事件不经过这里。

use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

/// 去重过滤器
#[derive(Debug)]
pub struct DedupFilter {
    seen: DashMap<(String, String), i64>,
    window_ms: i64,
    max_entries: usize,
}

impl DedupFilter {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            seen: DashMap::new(),
            window_ms: window.as_millis().min(i64::MAX as u128) as i64,
            max_entries: max_entries.max(1),
        }
    }

    /// `shouldProcess(chatId, providerMessageId, now)`
    ///
    /// 窗口内重复返回 false 且不改动状态；否则记录并返回 true。
    pub fn should_process(&self, chat_id: &str, message_id: &str, now_ms: i64) -> bool {
        let accepted = match self.seen.entry((chat_id.to_string(), message_id.to_string())) {
            Entry::Occupied(mut entry) => {
                if now_ms - *entry.get() < self.window_ms {
                    false
                } else {
                    entry.insert(now_ms);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now_ms);
                true
            }
        };

        if accepted && self.seen.len() > self.max_entries {
            self.sweep(now_ms);
        }
        accepted
    }

    /// 投递失败后释放条目，让队列层的重投不被窗口吞掉
    pub fn forget(&self, chat_id: &str, message_id: &str) {
        self.seen
            .remove(&(chat_id.to_string(), message_id.to_string()));
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// 清除早于两倍窗口的条目
    fn sweep(&self, now_ms: i64) {
        let horizon = now_ms - self.window_ms.saturating_mul(2);
        let before = self.seen.len();
        self.seen.retain(|_, seen_at| *seen_at >= horizon);
        debug!(
            removed = before.saturating_sub(self.seen.len()),
            remaining = self.seen.len(),
            "dedup window swept"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> DedupFilter {
        DedupFilter::new(Duration::from_millis(7000), 50_000)
    }

    #[test]
    fn duplicate_within_window_is_rejected() {
        let dedup = filter();
        assert!(dedup.should_process("chat", "M1", 1_000));
        assert!(!dedup.should_process("chat", "M1", 2_000));
        // 被拒绝的调用不刷新时间戳
        assert!(dedup.should_process("chat", "M1", 8_001));
    }

    #[test]
    fn same_id_in_other_chat_is_distinct() {
        let dedup = filter();
        assert!(dedup.should_process("chat-a", "M1", 0));
        assert!(dedup.should_process("chat-b", "M1", 0));
    }

    #[test]
    fn forget_releases_entry() {
        let dedup = filter();
        assert!(dedup.should_process("chat", "M1", 0));
        dedup.forget("chat", "M1");
        assert!(dedup.should_process("chat", "M1", 10));
    }

    #[test]
    fn sweep_drops_entries_older_than_twice_the_window() {
        let dedup = DedupFilter::new(Duration::from_millis(100), 3);
        assert!(dedup.should_process("c", "1", 0));
        assert!(dedup.should_process("c", "2", 0));
        assert!(dedup.should_process("c", "3", 150));
        assert_eq!(dedup.len(), 3);

        assert!(dedup.should_process("c", "4", 250));
        // 1、2 早于 250 - 200 被清除
        assert_eq!(dedup.len(), 2);
    }
}
