//! 投递状态
//!
//! 每条消息的投递状态是一个全序枚举：
//! - FAILED(0) < PROGRESS(1) < SENT(2) < DELIVERED(3) < READ(4) < DELETED(5)
//!
//! 持久化状态单调不减，只有 `deleted`/`failed` 走显式覆盖路径。

mod reconciler;
mod sequencer;
mod store;

pub use reconciler::{ReconcileOutcome, ReconcilePlan, ReconcileStep, StatusReconciler};
pub use sequencer::MessageSequencer;
pub use store::StatusStore;

use serde::{Deserialize, Serialize};
use std::fmt;

/// 投递状态枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// 发送失败
    Failed,
    /// 发送中（不对外发出）
    Progress,
    /// 服务器已接收
    Sent,
    /// 已送达
    Delivered,
    /// 已读（含语音已播放）
    Read,
    /// 已删除（撤回）
    Deleted,
}

impl DeliveryStatus {
    /// 单调性比较使用的序号
    pub fn rank(&self) -> u8 {
        match self {
            DeliveryStatus::Failed => 0,
            DeliveryStatus::Progress => 1,
            DeliveryStatus::Sent => 2,
            DeliveryStatus::Delivered => 3,
            DeliveryStatus::Read => 4,
            DeliveryStatus::Deleted => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Progress => "progress",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Deleted => "deleted",
        }
    }

    /// 从存储字符串解析
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "failed" => Ok(DeliveryStatus::Failed),
            "progress" | "pending" => Ok(DeliveryStatus::Progress),
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "read" => Ok(DeliveryStatus::Read),
            "deleted" => Ok(DeliveryStatus::Deleted),
            _ => Err(format!("Invalid delivery status: {}", s)),
        }
    }

    /// 传输层数字状态码
    ///
    /// 0 ERROR, 1 PENDING, 2 SERVER_ACK, 3 DELIVERY_ACK, 4 READ, 5 PLAYED（按已读处理）
    pub fn from_transport_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(DeliveryStatus::Failed),
            1 => Some(DeliveryStatus::Progress),
            2 => Some(DeliveryStatus::Sent),
            3 => Some(DeliveryStatus::Delivered),
            4 | 5 => Some(DeliveryStatus::Read),
            _ => None,
        }
    }

    /// 传输层字符串状态名
    pub fn from_transport_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "ERROR" => Some(DeliveryStatus::Failed),
            "PENDING" => Some(DeliveryStatus::Progress),
            "SERVER_ACK" => Some(DeliveryStatus::Sent),
            "DELIVERY_ACK" => Some(DeliveryStatus::Delivered),
            "READ" | "PLAYED" => Some(DeliveryStatus::Read),
            _ => None,
        }
    }

    /// 是否对外发出
    pub fn is_emittable(&self) -> bool {
        !matches!(self, DeliveryStatus::Progress)
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Deleted)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_are_totally_ordered() {
        let ordered = [
            DeliveryStatus::Failed,
            DeliveryStatus::Progress,
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
            DeliveryStatus::Read,
            DeliveryStatus::Deleted,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn transport_codes_map_played_to_read() {
        assert_eq!(
            DeliveryStatus::from_transport_code(5),
            Some(DeliveryStatus::Read)
        );
        assert_eq!(
            DeliveryStatus::from_transport_name("DELIVERY_ACK"),
            Some(DeliveryStatus::Delivered)
        );
        assert_eq!(DeliveryStatus::from_transport_code(9), None);
    }

    #[test]
    fn string_round_trip() {
        for status in [DeliveryStatus::Sent, DeliveryStatus::Deleted] {
            assert_eq!(DeliveryStatus::from_str(status.as_str()), Ok(status));
        }
        assert!(DeliveryStatus::from_str("bogus").is_err());
    }
}
