use crate::status::DeliveryStatus;

use super::unwrap::unwrap;
use super::{STUB_CIPHERTEXT, STUB_REVOKE, TransportEvent, TransportStatus};

/// 事件种类（封闭标签）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// 携带内容的消息
    Content,
    /// 编辑，`target` 为原消息的提供方 ID
    Edit { target: String },
    /// 表情回应
    Reaction { target: String },
    /// 撤回
    Deletion { target: String },
    /// 消息状态更新
    StatusUpdate(DeliveryStatus),
    /// 送达/已读回执
    Receipt(DeliveryStatus),
    /// 无法解密的消息桩
    DecryptStub,
    /// 仅联系人资料变化
    ContactUpdate,
    /// 没有对外意义的事件
    Ignored(&'static str),
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Content => "content",
            EventKind::Edit { .. } => "edit",
            EventKind::Reaction { .. } => "reaction",
            EventKind::Deletion { .. } => "deletion",
            EventKind::StatusUpdate(_) => "status",
            EventKind::Receipt(_) => "receipt",
            EventKind::DecryptStub => "decrypt_stub",
            EventKind::ContactUpdate => "contact",
            EventKind::Ignored(_) => "ignored",
        }
    }

    /// 内容类事件经过去重窗口，状态类事件走对账器自身的单调检查
    pub fn is_content_bearing(&self) -> bool {
        matches!(
            self,
            EventKind::Content | EventKind::Edit { .. } | EventKind::Reaction { .. }
        )
    }
}

fn status_of(status: &TransportStatus) -> Option<DeliveryStatus> {
    match status {
        TransportStatus::Code(code) => DeliveryStatus::from_transport_code(*code),
        TransportStatus::Name(name) => DeliveryStatus::from_transport_name(name),
    }
}

/// 根据事件形状得到事件种类
pub fn classify(event: &TransportEvent) -> EventKind {
    if event.contact.is_some() {
        return EventKind::ContactUpdate;
    }

    if let Some(receipt) = &event.receipt {
        return if receipt.read_timestamp.is_some() || receipt.played_timestamp.is_some() {
            EventKind::Receipt(DeliveryStatus::Read)
        } else if receipt.receipt_timestamp.is_some() {
            EventKind::Receipt(DeliveryStatus::Delivered)
        } else {
            EventKind::Ignored("empty receipt")
        };
    }

    if let Some(update) = &event.update {
        // 携带新内容的更新按内容处理，状态字段视为过期的外层框架
        if let Some(message) = &update.message {
            return classify_content(event, message);
        }
        if update.message_stub_type == Some(STUB_REVOKE) {
            return EventKind::Deletion {
                target: event.key.id.clone(),
            };
        }
        return match update.status.as_ref().and_then(status_of) {
            Some(status) => EventKind::StatusUpdate(status),
            None => EventKind::Ignored("update without status"),
        };
    }

    match event.message_stub_type {
        Some(STUB_CIPHERTEXT) => return EventKind::DecryptStub,
        Some(STUB_REVOKE) => {
            return EventKind::Deletion {
                target: event.key.id.clone(),
            };
        }
        _ => {}
    }

    match &event.message {
        Some(message) => classify_content(event, message),
        None if event.message_stub_type.is_some() => EventKind::Ignored("stub"),
        None => EventKind::Ignored("no content"),
    }
}

fn classify_content(event: &TransportEvent, message: &super::MessageContent) -> EventKind {
    let unwrapped = unwrap(message);
    let content = &unwrapped.content;

    if let Some(protocol) = &content.protocol_message {
        let revoke = protocol.kind.as_ref().is_some_and(|kind| kind.is_revoke());
        let target = protocol.key.as_ref().map(|key| key.id.clone());
        return match (revoke, target) {
            (true, Some(target)) if !target.is_empty() => EventKind::Deletion { target },
            _ => EventKind::Ignored("protocol message"),
        };
    }

    if let Some(reaction) = &content.reaction_message {
        return EventKind::Reaction {
            target: reaction.key.id.clone(),
        };
    }

    if content.is_empty() {
        return EventKind::Ignored("empty content");
    }

    match unwrapped.edit_target {
        Some(target) => EventKind::Edit { target },
        // `messages.update` 里的编辑：键就是原消息
        None if event.update.is_some() => EventKind::Edit {
            target: event.key.id.clone(),
        },
        None => EventKind::Content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> TransportEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn text_message_is_content() {
        let e = event(json!({
            "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "A" },
            "message": { "conversation": "oi" }
        }));
        assert_eq!(classify(&e), EventKind::Content);
    }

    #[test]
    fn status_updates_and_receipts() {
        let update = event(json!({
            "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "A", "fromMe": true },
            "update": { "status": 3 }
        }));
        assert_eq!(
            classify(&update),
            EventKind::StatusUpdate(DeliveryStatus::Delivered)
        );

        let receipt = event(json!({
            "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "A", "fromMe": true },
            "receipt": { "userJid": "5511988887777@s.whatsapp.net", "readTimestamp": 1700000000 }
        }));
        assert_eq!(classify(&receipt), EventKind::Receipt(DeliveryStatus::Read));
    }

    #[test]
    fn stubs() {
        let cipher = event(json!({
            "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "A" },
            "messageStubType": 2
        }));
        assert_eq!(classify(&cipher), EventKind::DecryptStub);

        let other = event(json!({
            "key": { "remoteJid": "120363040000000000@g.us", "id": "B" },
            "messageStubType": 27
        }));
        assert_eq!(classify(&other), EventKind::Ignored("stub"));
    }

    #[test]
    fn revoke_inside_ephemeral_wrapper_is_deletion() {
        let e = event(json!({
            "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "R" },
            "message": { "ephemeralMessage": { "message": {
                "protocolMessage": { "type": 0, "key": { "id": "TARGET" } }
            } } }
        }));
        assert_eq!(
            classify(&e),
            EventKind::Deletion {
                target: "TARGET".into()
            }
        );
    }

    #[test]
    fn reaction_points_at_target() {
        let e = event(json!({
            "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "X" },
            "message": { "reactionMessage": { "key": { "id": "TARGET" }, "text": "👍" } }
        }));
        assert_eq!(
            classify(&e),
            EventKind::Reaction {
                target: "TARGET".into()
            }
        );
    }

    #[test]
    fn update_carrying_message_is_an_edit() {
        let e = event(json!({
            "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "ORIG" },
            "update": { "status": 4, "message": { "editedMessage": { "message": {
                "protocolMessage": { "type": 14, "key": { "id": "ORIG" },
                    "editedMessage": { "conversation": "fixed" } }
            } } } }
        }));
        assert_eq!(
            classify(&e),
            EventKind::Edit {
                target: "ORIG".into()
            }
        );
    }

    #[test]
    fn sender_key_only_content_is_ignored() {
        let e = event(json!({
            "key": { "remoteJid": "120363040000000000@g.us", "id": "A" },
            "message": { "senderKeyDistributionMessage": { "groupId": "x" } }
        }));
        assert_eq!(classify(&e), EventKind::Ignored("empty content"));
    }
}
