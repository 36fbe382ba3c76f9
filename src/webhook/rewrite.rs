//! 出站身份改写
//!
//! 群组 ID 不变；目标偏好手机号时把设备身份改写为已映射的手机号，否则保留设备身份形式。
//! 改写发生在所有过滤判断之后，只作用于载荷副本。

use crate::identity::{IdentityCache, JidKind, classify_jid};
use crate::payload::{DispatchMeta, WebhookPayload};

#[derive(Clone)]
pub struct IdentityRewriter {
    identity: IdentityCache,
}

impl IdentityRewriter {
    pub fn new(identity: IdentityCache) -> Self {
        Self { identity }
    }

    pub async fn rewrite(
        &self,
        session: &str,
        payload: &WebhookPayload,
        meta: &DispatchMeta,
        prefer_phone: bool,
    ) -> WebhookPayload {
        let mut out = payload.clone();
        for entry in out.entry.iter_mut() {
            for change in entry.changes.iter_mut() {
                let value = &mut change.value;
                for contact in value.contacts.iter_mut() {
                    contact.wa_id = self.rewrite_id(session, &contact.wa_id, meta, prefer_phone).await;
                }
                for message in value.messages.iter_mut() {
                    message.from = self.rewrite_id(session, &message.from, meta, prefer_phone).await;
                    if let Some(from) = message.context.as_mut().and_then(|c| c.from.as_mut()) {
                        *from = self.rewrite_id(session, from, meta, prefer_phone).await;
                    }
                }
                for status in value.statuses.iter_mut() {
                    status.recipient_id = self
                        .rewrite_id(session, &status.recipient_id, meta, prefer_phone)
                        .await;
                }
            }
        }
        out
    }

    async fn rewrite_id(
        &self,
        session: &str,
        value: &str,
        meta: &DispatchMeta,
        prefer_phone: bool,
    ) -> String {
        match classify_jid(value) {
            JidKind::Group | JidKind::Newsletter | JidKind::Broadcast => value.to_string(),
            JidKind::LinkedDevice if prefer_phone => self
                .identity
                .resolve_phone_for_device(session, value)
                .await
                .unwrap_or_else(|| value.to_string()),
            JidKind::LinkedDevice => value.to_string(),
            JidKind::Phone | JidKind::Unknown if !prefer_phone => meta
                .device_forms
                .iter()
                .find(|(phone, _)| phone == value)
                .map(|(_, device)| device.clone())
                .unwrap_or_else(|| value.to_string()),
            JidKind::Phone | JidKind::Unknown => value.to_string(),
        }
    }
}
