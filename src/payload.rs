//! Cloud API 兼容的 Webhook 载荷
//!
//! 对外的稳定 JSON 契约：每个信封只携带一条消息、一条状态或一组联系人更新。

use serde::{Deserialize, Serialize};

use crate::identity::JidKind;
use crate::status::DeliveryStatus;

pub const OBJECT_WHATSAPP_BUSINESS: &str = "whatsapp_business_account";
pub const MESSAGING_PRODUCT: &str = "whatsapp";
pub const FIELD_MESSAGES: &str = "messages";

/// 通用错误码（与 Cloud API 保持一致）
pub const GENERIC_ERROR_CODE: u32 = 1;

/// Webhook 信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    pub entry: Vec<PayloadEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadEntry {
    pub id: String,
    pub changes: Vec<PayloadChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadChange {
    pub value: ChangeValue,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeValue {
    pub messaging_product: String,
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<Contact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<Status>,
}

/// 会话号码信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub display_phone_number: String,
    pub phone_number_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub profile: Profile,
    pub wa_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
}

/// 消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    pub id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<MessageContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral: Option<Referral>,
}

/// 按类型区分的消息内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: TextBody },
    Image { image: MediaRef },
    Audio { audio: MediaRef },
    Video { video: MediaRef },
    Document { document: MediaRef },
    Sticker { sticker: MediaRef },
    Reaction { reaction: Reaction },
    Location { location: Location },
    Contacts { contacts: Vec<SharedContact> },
    Button { button: ButtonReply },
    Interactive { interactive: Interactive },
}

impl MessageBody {
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Text { .. } => "text",
            MessageBody::Image { .. } => "image",
            MessageBody::Audio { .. } => "audio",
            MessageBody::Video { .. } => "video",
            MessageBody::Document { .. } => "document",
            MessageBody::Sticker { .. } => "sticker",
            MessageBody::Reaction { .. } => "reaction",
            MessageBody::Location { .. } => "location",
            MessageBody::Contacts { .. } => "contacts",
            MessageBody::Button { .. } => "button",
            MessageBody::Interactive { .. } => "interactive",
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        MessageBody::Text {
            text: TextBody { body: body.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBody {
    pub body: String,
}

/// 媒体引用，`id` 指向媒体存储中的对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedContact {
    pub name: ContactName,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phones: Vec<ContactPhone>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactName {
    pub formatted_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactPhone {
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wa_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonReply {
    pub payload: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Interactive {
    ButtonReply { button_reply: InteractiveReply },
    ListReply { list_reply: InteractiveReply },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractiveReply {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// 引用/转发上下文
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forwarded: bool,
}

impl MessageContext {
    pub fn is_empty(&self) -> bool {
        self.from.is_none() && self.id.is_none() && !self.forwarded
    }
}

/// 广告来源
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Referral {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// 状态更新
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: String,
    pub recipient_id: String,
    pub status: DeliveryStatus,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<StatusError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusError {
    pub code: u32,
    pub title: String,
}

impl StatusError {
    pub fn generic(title: impl Into<String>) -> Self {
        Self {
            code: GENERIC_ERROR_CODE,
            title: title.into(),
        }
    }
}

impl WebhookPayload {
    fn wrap(phone: &str, value: ChangeValue) -> Self {
        Self {
            object: OBJECT_WHATSAPP_BUSINESS.to_string(),
            entry: vec![PayloadEntry {
                id: phone.to_string(),
                changes: vec![PayloadChange {
                    value,
                    field: FIELD_MESSAGES.to_string(),
                }],
            }],
        }
    }

    fn value(metadata: Metadata) -> ChangeValue {
        ChangeValue {
            messaging_product: MESSAGING_PRODUCT.to_string(),
            metadata,
            contacts: Vec::new(),
            messages: Vec::new(),
            statuses: Vec::new(),
        }
    }

    pub fn message(metadata: Metadata, contact: Option<Contact>, message: Message) -> Self {
        let phone = metadata.phone_number_id.clone();
        let mut value = Self::value(metadata);
        value.contacts = contact.into_iter().collect();
        value.messages = vec![message];
        Self::wrap(&phone, value)
    }

    pub fn status(metadata: Metadata, status: Status) -> Self {
        let phone = metadata.phone_number_id.clone();
        let mut value = Self::value(metadata);
        value.statuses = vec![status];
        Self::wrap(&phone, value)
    }

    pub fn contacts(metadata: Metadata, contacts: Vec<Contact>) -> Self {
        let phone = metadata.phone_number_id.clone();
        let mut value = Self::value(metadata);
        value.contacts = contacts;
        Self::wrap(&phone, value)
    }

    pub fn change_value(&self) -> Option<&ChangeValue> {
        self.entry
            .first()
            .and_then(|entry| entry.changes.first())
            .map(|change| &change.value)
    }

    pub fn change_value_mut(&mut self) -> Option<&mut ChangeValue> {
        self.entry
            .first_mut()
            .and_then(|entry| entry.changes.first_mut())
            .map(|change| &mut change.value)
    }

    pub fn message_ref(&self) -> Option<&Message> {
        self.change_value().and_then(|value| value.messages.first())
    }

    pub fn status_ref(&self) -> Option<&Status> {
        self.change_value().and_then(|value| value.statuses.first())
    }

    /// 复制信封并覆盖状态字段（用于补发中间状态）
    pub fn with_status(&self, status: DeliveryStatus) -> Self {
        let mut cloned = self.clone();
        if let Some(value) = cloned.change_value_mut() {
            for entry in value.statuses.iter_mut() {
                entry.status = status;
                if status != DeliveryStatus::Failed {
                    entry.errors.clear();
                }
            }
        }
        cloned
    }
}

/// 载荷种类，用于目标过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Message,
    Status,
    Contacts,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Message => "message",
            PayloadKind::Status => "status",
            PayloadKind::Contacts => "contacts",
        }
    }
}

/// 分发所需的改写前元数据
///
/// 过滤只读这里的字段，身份改写不会影响过滤结果。
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchMeta {
    /// 原始会话 JID
    pub chat_id: String,
    pub chat_kind: JidKind,
    /// 规范化后的对端（单聊为手机号，群组为群 JID）
    pub conversation: String,
    pub from_me: bool,
    pub kind: PayloadKind,
    /// 载荷中由设备身份解析而来的字段：(手机号形式, 设备 JID)
    pub device_forms: Vec<(String, String)>,
}

/// 规范化输出：载荷 + 分发元数据
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub payload: WebhookPayload,
    pub meta: DispatchMeta,
}

impl Envelope {
    pub fn with_status(&self, status: DeliveryStatus) -> Self {
        Self {
            payload: self.payload.with_status(status),
            meta: self.meta.clone(),
        }
    }
}
