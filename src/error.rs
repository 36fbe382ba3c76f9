//! Flare Cloud Bridge 错误模块
//!
//! - 统一的错误分类（基础设施瞬时错误 / 内容畸形 / 身份不匹配）
//! - 解密失败不是错误，而是事件分类中的消息桩
//! - 每类错误对应唯一的处理策略，由各组件在边界处统一评估，而不是在调用点各自吞掉

use std::time::Duration;

use thiserror::Error;

/// 桥接核心错误类型
#[derive(Debug, Error)]
pub enum BridgeError {
    /// 缓存/存储不可用
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// 外部调用超时
    #[error("Operation timed out after {elapsed:?}: {operation}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// Webhook 投递失败（非 2xx 或网络错误）
    #[error("Webhook delivery to {destination} failed: {reason}")]
    Delivery { destination: String, reason: String },

    /// 目标限流
    #[error("Webhook destination {0} is rate limited")]
    RateLimited(String),

    /// 未知或畸形的消息内容
    #[error("Malformed content: {0}")]
    MalformedContent(String),

    /// 会话凭证与配置的手机号不一致
    #[error("Session {configured} is authenticated as {actual}")]
    IdentityMismatch { configured: String, actual: String },

    /// 配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 会话已关闭（登出或清理）
    #[error("Session {0} is closed")]
    SessionClosed(String),

    /// 事件源读取失败
    #[error("Event source error: {0}")]
    Transport(String),
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 基础设施瞬时错误（缓存不可用、HTTP 超时）
    TransientInfra,
    /// 畸形/未知内容
    MalformedContent,
    /// 配置/身份不匹配
    IdentityMismatch,
    /// 本地配置错误
    Configuration,
}

/// 错误处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// 降级为缓存未命中，继续处理
    Degrade,
    /// 交给队列层决定是否重试
    Propagate,
    /// 降级为 `failed` 状态载荷
    Downgrade,
    /// 会话级致命错误：强制登出并发出高优先级通知
    Fatal,
}

/// 组件在错误边界上的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    IdentityCache,
    Correlator,
    StatusStore,
    Normalizer,
    Dispatcher,
    Session,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::StoreUnavailable(_)
            | BridgeError::Timeout { .. }
            | BridgeError::Delivery { .. }
            | BridgeError::RateLimited(_)
            | BridgeError::SessionClosed(_)
            | BridgeError::Transport(_) => ErrorKind::TransientInfra,
            BridgeError::MalformedContent(_) => ErrorKind::MalformedContent,
            BridgeError::IdentityMismatch { .. } => ErrorKind::IdentityMismatch,
            BridgeError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// 该错误是否值得由队列层重新投递
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientInfra
    }
}

/// 策略表：组件 × 错误分类 → 处理策略
pub fn policy_for(component: Component, kind: ErrorKind) -> ErrorPolicy {
    use Component::*;
    use ErrorKind::*;

    match (component, kind) {
        (_, IdentityMismatch) => ErrorPolicy::Fatal,
        (IdentityCache | Correlator | StatusStore, _) => ErrorPolicy::Degrade,
        (Normalizer, MalformedContent) => ErrorPolicy::Downgrade,
        (Normalizer, _) => ErrorPolicy::Degrade,
        (Dispatcher | Session, TransientInfra) => ErrorPolicy::Propagate,
        (Dispatcher | Session, MalformedContent) => ErrorPolicy::Downgrade,
        (Dispatcher | Session, Configuration) => ErrorPolicy::Fatal,
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<redis::RedisError> for BridgeError {
    fn from(err: redis::RedisError) -> Self {
        BridgeError::StoreUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        let destination = err
            .url()
            .map(|url| url.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        BridgeError::Delivery {
            destination,
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_degrade_on_every_kind_except_mismatch() {
        for kind in [
            ErrorKind::TransientInfra,
            ErrorKind::MalformedContent,
            ErrorKind::Configuration,
        ] {
            assert_eq!(policy_for(Component::IdentityCache, kind), ErrorPolicy::Degrade);
            assert_eq!(policy_for(Component::Correlator, kind), ErrorPolicy::Degrade);
        }
        assert_eq!(
            policy_for(Component::IdentityCache, ErrorKind::IdentityMismatch),
            ErrorPolicy::Fatal
        );
    }

    #[test]
    fn delivery_errors_propagate_to_queue() {
        let err = BridgeError::Delivery {
            destination: "crm".into(),
            reason: "503".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(
            policy_for(Component::Dispatcher, err.kind()),
            ErrorPolicy::Propagate
        );
    }

    #[test]
    fn malformed_content_is_downgraded_by_normalizer() {
        let err = BridgeError::MalformedContent("unknown type".into());
        assert!(!err.is_retryable());
        assert_eq!(
            policy_for(Component::Normalizer, err.kind()),
            ErrorPolicy::Downgrade
        );
    }
}
