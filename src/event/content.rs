//! 消息内容（protobuf 的 JSON 形式）

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 消息内容：同一时刻通常只有一个字段有值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageContent {
    pub conversation: Option<String>,
    pub extended_text_message: Option<ExtendedText>,
    pub image_message: Option<MediaMessage>,
    pub video_message: Option<MediaMessage>,
    pub audio_message: Option<MediaMessage>,
    pub document_message: Option<MediaMessage>,
    pub sticker_message: Option<MediaMessage>,
    pub location_message: Option<LocationMessage>,
    pub live_location_message: Option<LocationMessage>,
    pub contact_message: Option<ContactCard>,
    pub contacts_array_message: Option<ContactsArray>,
    pub reaction_message: Option<ReactionMessage>,
    pub protocol_message: Option<ProtocolMessage>,
    pub buttons_response_message: Option<ButtonsResponse>,
    pub template_button_reply_message: Option<TemplateButtonReply>,
    pub list_response_message: Option<ListResponse>,

    // 包装层
    pub edited_message: Option<FutureProof>,
    pub ephemeral_message: Option<FutureProof>,
    pub view_once_message: Option<FutureProof>,
    pub view_once_message_v2: Option<FutureProof>,
    pub view_once_message_v2_extension: Option<FutureProof>,
    pub document_with_caption_message: Option<FutureProof>,
    pub device_sent_message: Option<DeviceSent>,

    // 无业务含义的附属字段
    pub message_context_info: Option<Value>,
    pub sender_key_distribution_message: Option<Value>,

    /// 未识别的内容类型
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            conversation: Some(body.into()),
            ..Self::default()
        }
    }

    /// 所有已知字段都为空
    pub fn is_empty(&self) -> bool {
        self.other.is_empty() && *self == MessageContent {
            message_context_info: self.message_context_info.clone(),
            sender_key_distribution_message: self.sender_key_distribution_message.clone(),
            ..MessageContent::default()
        }
    }

    /// 第一个媒体字段及其类型名
    pub fn media(&self) -> Option<(&'static str, &MediaMessage)> {
        [
            ("image", self.image_message.as_ref()),
            ("video", self.video_message.as_ref()),
            ("audio", self.audio_message.as_ref()),
            ("document", self.document_message.as_ref()),
            ("sticker", self.sticker_message.as_ref()),
        ]
        .into_iter()
        .find_map(|(kind, media)| media.map(|media| (kind, media)))
    }

    /// 文本内容及其上下文
    pub fn context_info(&self) -> Option<&ContextInfo> {
        if let Some(text) = &self.extended_text_message {
            return text.context_info.as_ref();
        }
        if let Some((_, media)) = self.media() {
            return media.context_info.as_ref();
        }
        self.location_message
            .as_ref()
            .or(self.live_location_message.as_ref())
            .and_then(|location| location.context_info.as_ref())
            .or_else(|| {
                self.contact_message
                    .as_ref()
                    .and_then(|card| card.context_info.as_ref())
            })
            .or_else(|| {
                self.buttons_response_message
                    .as_ref()
                    .and_then(|reply| reply.context_info.as_ref())
            })
            .or_else(|| {
                self.list_response_message
                    .as_ref()
                    .and_then(|reply| reply.context_info.as_ref())
            })
    }

    /// 未识别字段名，用于诊断
    pub fn unknown_types(&self) -> Vec<&str> {
        self.other.keys().map(String::as_str).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtendedText {
    pub text: Option<String>,
    pub context_info: Option<ContextInfo>,
}

/// 引用、提及、转发与广告来源
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextInfo {
    pub stanza_id: Option<String>,
    pub participant: Option<String>,
    pub quoted_message: Option<Box<MessageContent>>,
    pub mentioned_jid: Vec<String>,
    pub is_forwarded: Option<bool>,
    pub forwarding_score: Option<u32>,
    pub external_ad_reply: Option<ExternalAdReply>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExternalAdReply {
    pub title: Option<String>,
    pub body: Option<String>,
    pub media_type: Option<Value>,
    pub thumbnail_url: Option<String>,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub source_url: Option<String>,
}

/// 媒体消息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaMessage {
    pub url: Option<String>,
    pub direct_path: Option<String>,
    pub media_key: Option<String>,
    pub mimetype: Option<String>,
    pub caption: Option<String>,
    pub file_name: Option<String>,
    pub file_sha256: Option<String>,
    pub seconds: Option<u32>,
    pub ptt: Option<bool>,
    pub context_info: Option<ContextInfo>,
}

impl MediaMessage {
    /// 是否仍持有可下载的二进制引用
    pub fn has_binary_reference(&self) -> bool {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());
        present(&self.url) || present(&self.direct_path)
    }

    pub fn caption_text(&self) -> Option<&str> {
        self.caption
            .as_deref()
            .map(str::trim)
            .filter(|caption| !caption.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationMessage {
    pub degrees_latitude: f64,
    pub degrees_longitude: f64,
    pub name: Option<String>,
    pub address: Option<String>,
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactCard {
    pub display_name: Option<String>,
    pub vcard: Option<String>,
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactsArray {
    pub display_name: Option<String>,
    pub contacts: Vec<ContactCard>,
}

/// 表情回应，`key` 指向被回应的消息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReactionMessage {
    pub key: super::MessageKey,
    pub text: Option<String>,
}

/// 协议消息类型：数字或名称
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProtocolType {
    Code(i64),
    Name(String),
}

impl ProtocolType {
    pub fn is_revoke(&self) -> bool {
        match self {
            ProtocolType::Code(code) => *code == 0,
            ProtocolType::Name(name) => name.eq_ignore_ascii_case("REVOKE"),
        }
    }

    pub fn is_edit(&self) -> bool {
        match self {
            ProtocolType::Code(code) => *code == 14,
            ProtocolType::Name(name) => name.eq_ignore_ascii_case("MESSAGE_EDIT"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolMessage {
    pub key: Option<super::MessageKey>,
    #[serde(rename = "type")]
    pub kind: Option<ProtocolType>,
    pub edited_message: Option<Box<MessageContent>>,
    /// 编辑发生的时间（毫秒）
    pub timestamp_ms: Option<super::Timestamp>,
}

/// 通用包装层（编辑、阅后即焚、一次性查看等）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FutureProof {
    pub message: Option<Box<MessageContent>>,
}

/// 本账号其他设备发出的消息副本
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSent {
    pub destination_jid: Option<String>,
    pub message: Option<Box<MessageContent>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ButtonsResponse {
    pub selected_button_id: Option<String>,
    pub selected_display_text: Option<String>,
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateButtonReply {
    pub selected_id: Option<String>,
    pub selected_display_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListResponse {
    pub title: Option<String>,
    pub description: Option<String>,
    pub single_select_reply: Option<SingleSelectReply>,
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SingleSelectReply {
    pub selected_row_id: Option<String>,
}
