//! 事件规范化
//!
//! 把一个原始传输层事件转换为 Cloud API 形状的载荷（消息、状态或联系人更新之一），
//! 同时给出分发所需的改写前元数据。除了身份缓存和消息 ID 关联器之外没有其他副作用。
//!
//! 步骤：
//! 1. 分类事件（[`classify`]）
//! 2. 展开包装层（[`unwrap`]）
//! 3. 媒体失去二进制引用时降级为说明文字
//! 4. 解析对端身份：显式手机号字段 > 身份缓存 > 按传输层规则推导 > 原始会话 ID
//! 5. 通过关联器改写引用的消息 ID，首次见到的内容消息生成并绑定内部 ID
//! 6. 替换文本中的 @提及
//! 7. 入站解密失败桩等待重传；本机发出的解密失败桩给出说明文本
//! 8. 输出一个载荷，或在没有对外意义时输出 `None`

mod content;
mod mention;

pub use content::{Mapped, map_content, referral_from};
pub use mention::{NameBook, replace_mentions};

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::TenantConfig;
use crate::correlator::MessageIdCorrelator;
use crate::event::{ContextInfo, EventKind, TransportEvent, classify, unwrap};
use crate::identity::{
    IdentityCache, JidKind, STATUS_BROADCAST, canonical_lid, classify_jid, digits_of,
    is_lid_jid, is_phone_jid,
};
use crate::metrics::METRICS;
use crate::payload::{
    Contact, DispatchMeta, Envelope, Message, MessageBody, MessageContext, Metadata,
    PayloadKind, Profile, Reaction, Status, StatusError, WebhookPayload,
};
use crate::status::DeliveryStatus;

/// 传输层未给出原因时 failed 状态的标题
const STATUS_FAILED_TITLE: &str = "Failed to send message";

/// 规范化时需要的会话范围数据
#[derive(Debug, Clone, Copy)]
pub struct SessionScope<'a> {
    pub session: &'a str,
    pub tenant: &'a TenantConfig,
    pub names: &'a NameBook,
}

impl SessionScope<'_> {
    /// 会话自身的号码（纯数字）
    pub fn phone(&self) -> String {
        self.tenant
            .display_phone_number
            .as_deref()
            .map(digits_of)
            .filter(|digits| !digits.is_empty())
            .unwrap_or_else(|| digits_of(self.session))
    }

    fn metadata(&self) -> Metadata {
        let phone = self.phone();
        Metadata {
            display_phone_number: phone.clone(),
            phone_number_id: phone,
        }
    }
}

/// 需要经过状态对账的变化
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub message_id: String,
    pub status: DeliveryStatus,
}

/// 规范化输出
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    pub envelope: Envelope,
    pub status_change: Option<StatusChange>,
}

/// 解析后的参与方
#[derive(Debug, Clone, PartialEq)]
struct Party {
    /// 对外展示的身份（优先手机号）
    wa_id: String,
    /// 来源为设备身份时的规范 LID
    device: Option<String>,
}

impl Party {
    fn raw(id: &str) -> Self {
        Self {
            wa_id: id.trim().to_string(),
            device: None,
        }
    }
}

/// 会话级参与方
#[derive(Debug, Clone)]
struct Parties {
    chat_id: String,
    chat_kind: JidKind,
    /// 单聊对端，群组/频道时为会话 JID 本身
    conversation: Party,
    /// 实际发送者
    sender: Party,
}

impl Parties {
    fn is_group(&self) -> bool {
        self.chat_kind == JidKind::Group
    }

    fn device_forms(&self, extra: &[&Party]) -> Vec<(String, String)> {
        let mut forms: Vec<(String, String)> = [&self.conversation, &self.sender]
            .into_iter()
            .chain(extra.iter().copied())
            .filter_map(|party| {
                party
                    .device
                    .as_ref()
                    .filter(|device| **device != party.wa_id)
                    .map(|device| (party.wa_id.clone(), device.clone()))
            })
            .collect();
        forms.dedup();
        forms
    }
}

/// 事件规范化器
#[derive(Clone)]
pub struct Normalizer {
    identity: IdentityCache,
    correlator: MessageIdCorrelator,
}

impl Normalizer {
    pub fn new(identity: IdentityCache, correlator: MessageIdCorrelator) -> Self {
        Self {
            identity,
            correlator,
        }
    }

    pub fn identity(&self) -> &IdentityCache {
        &self.identity
    }

    pub fn correlator(&self) -> &MessageIdCorrelator {
        &self.correlator
    }

    /// `normalize(session, rawEvent, tenantConfig)`
    pub async fn normalize(
        &self,
        scope: &SessionScope<'_>,
        event: &TransportEvent,
    ) -> Option<NormalizedEvent> {
        let kind = classify(event);
        self.normalize_classified(scope, event, kind).await
    }

    /// 已分类事件的规范化
    pub async fn normalize_classified(
        &self,
        scope: &SessionScope<'_>,
        event: &TransportEvent,
        kind: EventKind,
    ) -> Option<NormalizedEvent> {
        if scope.tenant.ignore_broadcast_statuses && event.chat_id() == STATUS_BROADCAST {
            debug!(session = %scope.session, message_id = %event.message_id(), "broadcast status ignored");
            return None;
        }

        match kind.clone() {
            EventKind::Ignored(reason) => {
                debug!(session = %scope.session, message_id = %event.message_id(), reason = %reason, "event ignored");
                None
            }
            EventKind::ContactUpdate => self.contact_update(scope, event, kind).await,
            EventKind::DecryptStub => self.decrypt_stub(scope, event, kind).await,
            EventKind::StatusUpdate(status) | EventKind::Receipt(status) => {
                let target = event.key.id.clone();
                self.status_event(scope, event, kind, &target, status).await
            }
            EventKind::Deletion { target } => {
                self.status_event(scope, event, kind, &target, DeliveryStatus::Deleted)
                    .await
            }
            EventKind::Reaction { target } => {
                self.reaction(scope, event, kind, &target).await
            }
            EventKind::Content | EventKind::Edit { .. } => self.content(scope, event, kind).await,
        }
    }

    /// 入站消息重试耗尽后仍无法解密时合成的说明消息
    pub async fn decrypt_exhausted(
        &self,
        scope: &SessionScope<'_>,
        event: &TransportEvent,
    ) -> Option<NormalizedEvent> {
        if event.key.from_me {
            return None;
        }
        let parties = self.parties(scope, event, None).await;
        let id = self
            .correlator
            .bind_or_mint(scope.session, &event.key.id)
            .await;
        let body = MessageBody::text(scope.tenant.decrypt_exhausted_text.clone());
        Some(self.message_event(
            scope,
            event,
            EventKind::DecryptStub,
            &parties,
            id,
            body,
            None,
            None,
            &[],
        ))
    }

    async fn content(
        &self,
        scope: &SessionScope<'_>,
        event: &TransportEvent,
        kind: EventKind,
    ) -> Option<NormalizedEvent> {
        let raw = event
            .update
            .as_ref()
            .and_then(|update| update.message.as_ref())
            .or(event.message.as_ref())?;
        let unwrapped = unwrap(raw);
        if unwrapped.truncated {
            warn!(session = %scope.session, message_id = %event.message_id(), "unwrap depth exceeded");
        }
        let parties = self
            .parties(scope, event, unwrapped.device_sent_destination.as_deref())
            .await;

        // 编辑作为一条新消息发出，通过 context 指向原消息
        let edit_target = match &kind {
            EventKind::Edit { target } => Some(target.clone()),
            _ => None,
        };
        let id = match edit_target {
            Some(_) => MessageIdCorrelator::mint(),
            None => {
                self.correlator
                    .bind_or_mint(scope.session, &event.key.id)
                    .await
            }
        };

        let media_id = format!("{}/{}", scope.phone(), id);
        let body = match map_content(&media_id, &unwrapped.content) {
            Mapped::Body(body) => body,
            Mapped::Failed(title) => {
                warn!(
                    session = %scope.session,
                    message_id = %event.message_id(),
                    title = %title,
                    "content downgraded to failed status"
                );
                return Some(self.failed_status(scope, event, kind, &parties, id, title));
            }
        };

        let context_info = unwrapped.content.context_info();
        let body = self.with_mentions(scope, body, context_info).await;
        let (context, quoted) = self
            .context(scope, context_info, edit_target.as_deref())
            .await;
        let referral = context_info
            .and_then(|info| info.external_ad_reply.as_ref())
            .map(referral_from);
        let extra: Vec<&Party> = quoted.iter().collect();

        Some(self.message_event(
            scope, event, kind, &parties, id, body, context, referral, &extra,
        ))
    }

    async fn reaction(
        &self,
        scope: &SessionScope<'_>,
        event: &TransportEvent,
        kind: EventKind,
        target: &str,
    ) -> Option<NormalizedEvent> {
        let raw = event.message.as_ref()?;
        let unwrapped = unwrap(raw);
        let emoji = unwrapped
            .content
            .reaction_message
            .as_ref()
            .and_then(|reaction| reaction.text.clone())
            .unwrap_or_default();
        let parties = self.parties(scope, event, None).await;
        let id = self
            .correlator
            .bind_or_mint(scope.session, &event.key.id)
            .await;
        let message_id = self.correlator.rewrite(scope.session, target).await;
        let body = MessageBody::Reaction {
            reaction: Reaction { message_id, emoji },
        };
        Some(self.message_event(scope, event, kind, &parties, id, body, None, None, &[]))
    }

    async fn decrypt_stub(
        &self,
        scope: &SessionScope<'_>,
        event: &TransportEvent,
        kind: EventKind,
    ) -> Option<NormalizedEvent> {
        if !event.key.from_me {
            // 等待传输层重传真实内容
            debug!(session = %scope.session, message_id = %event.message_id(), "decrypt stub pending recovery");
            return None;
        }
        let parties = self.parties(scope, event, None).await;
        let id = self
            .correlator
            .bind_or_mint(scope.session, &event.key.id)
            .await;
        let body = MessageBody::text(scope.tenant.decrypt_failure_text.clone());
        Some(self.message_event(scope, event, kind, &parties, id, body, None, None, &[]))
    }

    async fn status_event(
        &self,
        scope: &SessionScope<'_>,
        event: &TransportEvent,
        kind: EventKind,
        target: &str,
        status: DeliveryStatus,
    ) -> Option<NormalizedEvent> {
        if target.is_empty() {
            return None;
        }
        let parties = self.parties(scope, event, None).await;
        let id = self.correlator.rewrite(scope.session, target).await;

        // 群回执的接收者是读者本人
        let reader = match (&event.receipt, parties.is_group()) {
            (Some(receipt), true) => match receipt.user_jid.as_deref() {
                Some(user) => Some(self.resolve_party(scope.session, user, &[]).await),
                None => None,
            },
            _ => None,
        };
        let recipient = reader.as_ref().unwrap_or(&parties.conversation);

        let timestamp = event
            .receipt
            .as_ref()
            .and_then(|receipt| {
                receipt
                    .read_timestamp
                    .as_ref()
                    .or(receipt.played_timestamp.as_ref())
                    .or(receipt.receipt_timestamp.as_ref())
            })
            .and_then(|ts| ts.as_secs())
            .or_else(|| event.timestamp_secs())
            .unwrap_or_else(|| Utc::now().timestamp());

        let errors = if status == DeliveryStatus::Failed {
            let title = if event.message_stub_parameters.is_empty() {
                STATUS_FAILED_TITLE.to_string()
            } else {
                event.message_stub_parameters.join(", ")
            };
            vec![StatusError::generic(title)]
        } else {
            Vec::new()
        };

        let payload = WebhookPayload::status(
            scope.metadata(),
            Status {
                id: id.clone(),
                recipient_id: recipient.wa_id.clone(),
                status,
                timestamp: timestamp.to_string(),
                errors,
            },
        );
        let extra: Vec<&Party> = reader.iter().collect();
        let meta = DispatchMeta {
            chat_id: parties.chat_id.clone(),
            chat_kind: parties.chat_kind,
            conversation: parties.conversation.wa_id.clone(),
            from_me: event.key.from_me,
            kind: PayloadKind::Status,
            device_forms: parties.device_forms(&extra),
        };

        Some(NormalizedEvent {
            kind,
            envelope: Envelope { payload, meta },
            status_change: Some(StatusChange {
                message_id: id,
                status,
            }),
        })
    }

    async fn contact_update(
        &self,
        scope: &SessionScope<'_>,
        event: &TransportEvent,
        kind: EventKind,
    ) -> Option<NormalizedEvent> {
        let contact = event.contact.as_ref()?;
        let primary = if contact.id.is_empty() {
            contact
                .phone_number
                .as_deref()
                .or(contact.lid.as_deref())
                .unwrap_or_default()
        } else {
            contact.id.as_str()
        };
        if primary.is_empty() {
            return None;
        }
        let party = self
            .resolve_party(
                scope.session,
                primary,
                &[contact.phone_number.as_deref(), contact.lid.as_deref()],
            )
            .await;

        let name = contact
            .notify
            .as_deref()
            .or(contact.name.as_deref())
            .or(contact.verified_name.as_deref());
        if let Some(name) = name {
            let mut ids = vec![party.wa_id.as_str()];
            ids.extend(party.device.as_deref());
            scope.names.remember(&ids, name);
        }
        let profile_name = name
            .map(str::to_string)
            .or_else(|| scope.names.lookup(&party.wa_id))
            .unwrap_or_else(|| party.wa_id.clone());

        let payload = WebhookPayload::contacts(
            scope.metadata(),
            vec![Contact {
                profile: Profile { name: profile_name },
                wa_id: party.wa_id.clone(),
                group_id: None,
                group_subject: None,
            }],
        );
        let device_forms = party
            .device
            .iter()
            .filter(|device| **device != party.wa_id)
            .map(|device| (party.wa_id.clone(), device.clone()))
            .collect();
        let meta = DispatchMeta {
            chat_id: primary.to_string(),
            chat_kind: classify_jid(primary),
            conversation: party.wa_id.clone(),
            from_me: false,
            kind: PayloadKind::Contacts,
            device_forms,
        };
        Some(NormalizedEvent {
            kind,
            envelope: Envelope { payload, meta },
            status_change: None,
        })
    }

    /// 内容无法映射时的 failed 状态
    fn failed_status(
        &self,
        scope: &SessionScope<'_>,
        event: &TransportEvent,
        kind: EventKind,
        parties: &Parties,
        id: String,
        title: String,
    ) -> NormalizedEvent {
        let timestamp = event
            .timestamp_secs()
            .unwrap_or_else(|| Utc::now().timestamp());
        let payload = WebhookPayload::status(
            scope.metadata(),
            Status {
                id: id.clone(),
                recipient_id: parties.conversation.wa_id.clone(),
                status: DeliveryStatus::Failed,
                timestamp: timestamp.to_string(),
                errors: vec![StatusError::generic(title)],
            },
        );
        NormalizedEvent {
            kind,
            envelope: Envelope {
                payload,
                meta: DispatchMeta {
                    chat_id: parties.chat_id.clone(),
                    chat_kind: parties.chat_kind,
                    conversation: parties.conversation.wa_id.clone(),
                    from_me: event.key.from_me,
                    kind: PayloadKind::Status,
                    device_forms: parties.device_forms(&[]),
                },
            },
            status_change: Some(StatusChange {
                message_id: id,
                status: DeliveryStatus::Failed,
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn message_event(
        &self,
        scope: &SessionScope<'_>,
        event: &TransportEvent,
        kind: EventKind,
        parties: &Parties,
        id: String,
        body: MessageBody,
        context: Option<MessageContext>,
        referral: Option<crate::payload::Referral>,
        extra: &[&Party],
    ) -> NormalizedEvent {
        let from_me = event.key.from_me;
        if !from_me {
            if let Some(push_name) = event.push_name.as_deref() {
                let mut ids = vec![parties.sender.wa_id.as_str()];
                ids.extend(parties.sender.device.as_deref());
                scope.names.remember(&ids, push_name);
            }
        }

        let from = match parties.chat_kind {
            JidKind::Newsletter | JidKind::Broadcast => parties.chat_id.clone(),
            _ if from_me => scope.phone(),
            _ => parties.sender.wa_id.clone(),
        };

        // 群组里联系人是发送者本人，单聊里是对端
        let contact_party = if parties.is_group() {
            &parties.sender
        } else {
            &parties.conversation
        };
        let profile_name = (!from_me)
            .then(|| event.push_name.clone())
            .flatten()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| scope.names.lookup(&contact_party.wa_id))
            .unwrap_or_else(|| contact_party.wa_id.clone());
        let contact = Contact {
            profile: Profile { name: profile_name },
            wa_id: contact_party.wa_id.clone(),
            group_id: parties.is_group().then(|| parties.chat_id.clone()),
            group_subject: parties
                .is_group()
                .then(|| {
                    event
                        .group_metadata
                        .as_ref()
                        .and_then(|meta| meta.subject.clone())
                })
                .flatten(),
        };

        let timestamp = event
            .timestamp_secs()
            .unwrap_or_else(|| Utc::now().timestamp());
        let message = Message {
            from,
            id,
            timestamp: timestamp.to_string(),
            body,
            context: context.filter(|context| !context.is_empty()),
            referral,
        };
        let payload = WebhookPayload::message(scope.metadata(), Some(contact), message);
        let meta = DispatchMeta {
            chat_id: parties.chat_id.clone(),
            chat_kind: parties.chat_kind,
            conversation: if parties.is_group() {
                parties.chat_id.clone()
            } else {
                parties.conversation.wa_id.clone()
            },
            from_me,
            kind: PayloadKind::Message,
            device_forms: parties.device_forms(extra),
        };

        NormalizedEvent {
            kind,
            envelope: Envelope { payload, meta },
            status_change: None,
        }
    }

    async fn with_mentions(
        &self,
        scope: &SessionScope<'_>,
        body: MessageBody,
        context_info: Option<&ContextInfo>,
    ) -> MessageBody {
        let Some(info) = context_info.filter(|info| !info.mentioned_jid.is_empty()) else {
            return body;
        };
        match body {
            MessageBody::Text { text } => {
                let replaced = replace_mentions(
                    &text.body,
                    &info.mentioned_jid,
                    scope.session,
                    scope.names,
                    &self.identity,
                )
                .await;
                MessageBody::text(replaced)
            }
            other => other,
        }
    }

    /// 引用、转发与编辑上下文；返回引用消息的发送者以便记录身份形式
    async fn context(
        &self,
        scope: &SessionScope<'_>,
        info: Option<&ContextInfo>,
        edit_target: Option<&str>,
    ) -> (Option<MessageContext>, Option<Party>) {
        let mut context = MessageContext::default();
        let mut quoted = None;

        if let Some(target) = edit_target {
            context.id = Some(self.correlator.rewrite(scope.session, target).await);
        }
        if let Some(info) = info {
            if context.id.is_none() {
                if let Some(stanza) = info.stanza_id.as_deref().filter(|id| !id.is_empty()) {
                    context.id = Some(self.correlator.rewrite(scope.session, stanza).await);
                    if let Some(participant) = info.participant.as_deref() {
                        let party = self.resolve_party(scope.session, participant, &[]).await;
                        context.from = Some(party.wa_id.clone());
                        quoted = Some(party);
                    }
                }
            }
            context.forwarded =
                info.is_forwarded.unwrap_or(false) || info.forwarding_score.unwrap_or(0) > 0;
        }

        ((!context.is_empty()).then_some(context), quoted)
    }

    async fn parties(
        &self,
        scope: &SessionScope<'_>,
        event: &TransportEvent,
        device_sent_destination: Option<&str>,
    ) -> Parties {
        let key = &event.key;
        let chat_id = device_sent_destination
            .filter(|_| key.from_me)
            .unwrap_or(key.remote_jid.as_str())
            .trim()
            .to_string();
        let chat_kind = classify_jid(&chat_id);

        let conversation = match chat_kind {
            JidKind::Phone | JidKind::LinkedDevice | JidKind::Unknown => {
                self.resolve_party(
                    scope.session,
                    &chat_id,
                    &[key.remote_jid_alt.as_deref(), key.sender_pn.as_deref()],
                )
                .await
            }
            JidKind::Group | JidKind::Newsletter | JidKind::Broadcast => Party::raw(&chat_id),
        };

        let sender = if key.from_me {
            Party::raw(&scope.phone())
        } else if matches!(chat_kind, JidKind::Group | JidKind::Broadcast) {
            match key.participant.as_deref().filter(|p| !p.is_empty()) {
                Some(participant) => {
                    self.resolve_party(
                        scope.session,
                        participant,
                        &[
                            key.participant_alt.as_deref(),
                            key.participant_pn.as_deref(),
                        ],
                    )
                    .await
                }
                None => conversation.clone(),
            }
        } else {
            conversation.clone()
        };

        Parties {
            chat_id,
            chat_kind,
            conversation,
            sender,
        }
    }

    /// 解析一个参与方的展示身份，顺带学习 PN ↔ LID 映射
    async fn resolve_party(
        &self,
        session: &str,
        primary: &str,
        alternates: &[Option<&str>],
    ) -> Party {
        let candidates: Vec<&str> = std::iter::once(primary)
            .chain(alternates.iter().flatten().copied())
            .map(str::trim)
            .filter(|candidate| !candidate.is_empty())
            .collect();
        let phone = candidates.iter().copied().find(|c| is_phone_jid(c));
        let device = candidates.iter().copied().find(|c| is_lid_jid(c));
        let normalizer = self.identity.normalizer();

        match (phone, device) {
            (Some(phone), device) => {
                if let Some(device) = device {
                    self.identity.record(session, phone, device).await;
                }
                Party {
                    wa_id: normalizer.resolve_identity(phone),
                    device: device.map(canonical_lid),
                }
            }
            (None, Some(device)) => {
                let (phone, derived) = self.identity.phone_or_derive(session, device).await;
                if derived {
                    debug!(session = %session, device = %device, phone = %phone, "phone derived from device identity");
                }
                Party {
                    wa_id: phone,
                    device: Some(canonical_lid(device)),
                }
            }
            (None, None) => {
                METRICS.identity_lookup("raw");
                Party::raw(primary)
            }
        }
    }
}

#[cfg(test)]
mod normalizer_tests;
