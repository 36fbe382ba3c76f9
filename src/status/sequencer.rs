use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// 按消息 ID 串行化对账
///
/// 同一消息 ID 的对账不会并发执行，不同消息 ID 之间互不阻塞。
#[derive(Debug, Default)]
pub struct MessageSequencer {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl MessageSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, T>(&self, message_id: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let slot = self
            .slots
            .entry(message_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let output = {
            let _guard = slot.lock().await;
            fut.await
        };

        drop(slot);
        // 没有其他等待者时回收槽位
        self.slots
            .remove_if(message_id, |_, slot| Arc::strong_count(slot) == 1);
        output
    }

    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_id_runs_one_at_a_time() {
        let sequencer = Arc::new(MessageSequencer::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let sequencer = sequencer.clone();
                let active = active.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    sequencer
                        .run("M1", async {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        })
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(sequencer.in_flight(), 0);
    }
}
