use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// 固定窗口计数限流，按 (会话, 目标) 分桶
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回本次请求是否放行
    pub fn try_acquire(&self, bucket: &str, limit: &RateLimitConfig) -> bool {
        self.try_acquire_at(bucket, limit, Instant::now())
    }

    pub(crate) fn try_acquire_at(&self, bucket: &str, limit: &RateLimitConfig, now: Instant) -> bool {
        if limit.max_requests == 0 {
            return true;
        }
        let period = Duration::from_secs(limit.per_seconds.max(1));
        let mut window = self.windows.entry(bucket.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= period {
            *window = Window {
                started: now,
                count: 0,
            };
        }
        if window.count >= limit.max_requests {
            return false;
        }
        window.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_limit_until_window_rolls() {
        let limiter = RateLimiter::new();
        let limit = RateLimitConfig {
            max_requests: 2,
            per_seconds: 1,
        };
        let t0 = Instant::now();
        assert!(limiter.try_acquire_at("s:crm", &limit, t0));
        assert!(limiter.try_acquire_at("s:crm", &limit, t0));
        assert!(!limiter.try_acquire_at("s:crm", &limit, t0));
        assert!(limiter.try_acquire_at("s:bot", &limit, t0));
        assert!(limiter.try_acquire_at("s:crm", &limit, t0 + Duration::from_secs(1)));
    }
}
