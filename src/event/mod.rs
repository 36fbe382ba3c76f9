//! 传输层事件模型
//!
//! 传输层推送的是形状松散的 JSON 事件。这里用 serde 结构体在摄入边界接住它们，
//! 再由 [`classify`] 产出封闭的 [`EventKind`] 标签，下游只对标签做穷尽匹配。

mod classify;
mod content;
mod unwrap;

pub use classify::{EventKind, classify};
pub use content::{
    ButtonsResponse, ContactCard, ContactsArray, ContextInfo, DeviceSent, ExtendedText,
    ExternalAdReply, FutureProof, ListResponse, LocationMessage, MediaMessage, MessageContent,
    ProtocolMessage, ProtocolType, ReactionMessage, SingleSelectReply, TemplateButtonReply,
};
pub use unwrap::{MAX_UNWRAP_DEPTH, Unwrapped, unwrap};

use serde::{Deserialize, Serialize};

/// 消息桩类型：撤回
pub const STUB_REVOKE: i64 = 1;
/// 消息桩类型：密文（无法解密）
pub const STUB_CIPHERTEXT: i64 = 2;

/// 消息键
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageKey {
    pub remote_jid: String,
    pub from_me: bool,
    pub id: String,
    pub participant: Option<String>,
    /// 会话 JID 的另一身份空间形式（PN ↔ LID）
    pub remote_jid_alt: Option<String>,
    pub participant_alt: Option<String>,
    pub sender_pn: Option<String>,
    pub participant_pn: Option<String>,
    pub sender_lid: Option<String>,
}

/// 传输层时间戳：数字、字符串或 `{low, high}` 长整型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Seconds(i64),
    Text(String),
    Long {
        low: i64,
        #[serde(default)]
        high: i64,
    },
}

impl Timestamp {
    pub fn as_secs(&self) -> Option<i64> {
        match self {
            Timestamp::Seconds(secs) => Some(*secs),
            Timestamp::Text(text) => text.trim().parse().ok(),
            Timestamp::Long { low, high } => Some((high << 32) | (low & 0xffff_ffff)),
        }
    }
}

/// 传输层状态：数字码或名称
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransportStatus {
    Code(i64),
    Name(String),
}

/// `messages.update` 事件的更新部分
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageUpdate {
    pub status: Option<TransportStatus>,
    pub message: Option<MessageContent>,
    pub message_stub_type: Option<i64>,
}

/// 回执
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Receipt {
    pub user_jid: Option<String>,
    pub receipt_timestamp: Option<Timestamp>,
    pub read_timestamp: Option<Timestamp>,
    pub played_timestamp: Option<Timestamp>,
}

/// 联系人/资料更新
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactUpdate {
    pub id: String,
    pub notify: Option<String>,
    pub name: Option<String>,
    pub verified_name: Option<String>,
    pub lid: Option<String>,
    pub phone_number: Option<String>,
}

/// 群组元数据（随群消息一起到达时）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupMetadata {
    pub id: String,
    pub subject: Option<String>,
}

/// 单个传输层事件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportEvent {
    pub key: MessageKey,
    pub message: Option<MessageContent>,
    pub message_timestamp: Option<Timestamp>,
    pub push_name: Option<String>,
    pub message_stub_type: Option<i64>,
    pub message_stub_parameters: Vec<String>,
    pub update: Option<MessageUpdate>,
    pub receipt: Option<Receipt>,
    pub contact: Option<ContactUpdate>,
    pub group_metadata: Option<GroupMetadata>,
}

impl TransportEvent {
    pub fn chat_id(&self) -> &str {
        &self.key.remote_jid
    }

    pub fn message_id(&self) -> &str {
        &self.key.id
    }

    pub fn timestamp_secs(&self) -> Option<i64> {
        self.message_timestamp.as_ref().and_then(Timestamp::as_secs)
    }
}

/// 一次到达的事件：单条或历史同步批次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventBatch {
    Event(Box<TransportEvent>),
    History(Vec<TransportEvent>),
}

impl EventBatch {
    pub fn len(&self) -> usize {
        match self {
            EventBatch::Event(_) => 1,
            EventBatch::History(events) => events.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 带会话号码的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session: String,
    #[serde(flatten)]
    pub batch: EventBatch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_accept_every_wire_shape() {
        let parse = |value| serde_json::from_value::<Timestamp>(value).unwrap().as_secs();
        assert_eq!(parse(json!(1700000000)), Some(1700000000));
        assert_eq!(parse(json!("1700000000")), Some(1700000000));
        assert_eq!(
            parse(json!({ "low": 1700000000, "high": 0, "unsigned": true })),
            Some(1700000000)
        );
    }

    #[test]
    fn session_event_lines_deserialize() {
        let single: SessionEvent = serde_json::from_value(json!({
            "session": "5511900000000",
            "event": { "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "ABC" } }
        }))
        .unwrap();
        assert!(matches!(single.batch, EventBatch::Event(ref e) if e.key.id == "ABC"));

        let history: SessionEvent = serde_json::from_value(json!({
            "session": "5511900000000",
            "history": [ { "key": { "id": "A" } }, { "key": { "id": "B" } } ]
        }))
        .unwrap();
        assert_eq!(history.batch.len(), 2);
    }
}
