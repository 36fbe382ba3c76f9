use async_trait::async_trait;
use tracing::{error, info};

/// 通知优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticePriority {
    Normal,
    High,
}

impl NoticePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticePriority::Normal => "normal",
            NoticePriority::High => "high",
        }
    }
}

/// 面向运维的会话通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNotice {
    pub session: String,
    pub priority: NoticePriority,
    pub title: String,
    pub detail: String,
}

/// 会话通知出口
#[async_trait]
pub trait SessionNotifier: Send + Sync {
    async fn notify(&self, notice: SessionNotice);
}

/// 默认实现：写结构化日志
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl SessionNotifier for LoggingNotifier {
    async fn notify(&self, notice: SessionNotice) {
        match notice.priority {
            NoticePriority::High => error!(
                session = %notice.session,
                priority = notice.priority.as_str(),
                detail = %notice.detail,
                "{}",
                notice.title
            ),
            NoticePriority::Normal => info!(
                session = %notice.session,
                priority = notice.priority.as_str(),
                detail = %notice.detail,
                "{}",
                notice.title
            ),
        }
    }
}
