//! 会话事件流水线
//!
//! 去重 → 规范化 → 状态对账 → Webhook 分发。共享组件放在 [`BridgeCore`]，
//! 每个会话持有自己的 [`Pipeline`]（去重窗口、推送名簿、消息 ID 串行器）。

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::config::{BridgeAppConfig, TenantConfig};
use crate::correlator::MessageIdCorrelator;
use crate::dedup::DedupFilter;
use crate::error::Result;
use crate::event::{EventBatch, EventKind, TransportEvent, classify, unwrap};
use crate::identity::{IdentityCache, IdentityNormalizer};
use crate::metrics::METRICS;
use crate::normalizer::{NameBook, NormalizedEvent, Normalizer, SessionScope, StatusChange};
use crate::payload::Envelope;
use crate::status::{MessageSequencer, StatusReconciler, StatusStore};
use crate::store::{KeySpace, KvStore};
use crate::webhook::{DispatchOutcome, WebhookDispatcher};

/// 跨会话共享的组件
#[derive(Clone)]
pub struct BridgeCore {
    pub normalizer: Normalizer,
    pub reconciler: StatusReconciler,
    pub dispatcher: WebhookDispatcher,
    dedup_window: Duration,
    dedup_max_entries: usize,
}

impl BridgeCore {
    pub fn from_config(config: &BridgeAppConfig, store: Arc<dyn KvStore>) -> Result<Self> {
        let keys = KeySpace::new(config.store.key_prefix.clone());
        let identity = IdentityCache::new(
            store.clone(),
            config.store.key_prefix.clone(),
            Duration::from_secs(config.identity.ttl_seconds),
            IdentityNormalizer::from_names(config.identity.numbering_policies.as_slice()),
        );
        let correlator = MessageIdCorrelator::new(
            store.clone(),
            keys.clone(),
            Duration::from_secs(config.correlation.ttl_seconds),
        );
        let statuses = StatusStore::new(
            store.clone(),
            keys.clone(),
            Duration::from_secs(config.status.ttl_seconds),
        );
        let dispatcher =
            WebhookDispatcher::new(identity.clone(), store, keys, config.webhook.clone())?;

        Ok(Self {
            normalizer: Normalizer::new(identity, correlator),
            reconciler: StatusReconciler::new(statuses),
            dispatcher,
            dedup_window: Duration::from_millis(config.dedup.window_ms),
            dedup_max_entries: config.dedup.max_entries,
        })
    }

    pub fn pipeline(&self, session: impl Into<String>, tenant: TenantConfig) -> Pipeline {
        Pipeline {
            session: session.into(),
            tenant,
            dedup: DedupFilter::new(self.dedup_window, self.dedup_max_entries),
            names: NameBook::new(),
            sequencer: MessageSequencer::new(),
            core: self.clone(),
        }
    }
}

/// 一次批处理的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub duplicates: usize,
    pub ignored: usize,
    /// 交给分发器的载荷数（含补发）
    pub emitted: usize,
    /// 被目标过滤跳过的次数
    pub skipped: usize,
}

impl BatchReport {
    fn merge(&mut self, other: BatchReport) {
        self.received += other.received;
        self.duplicates += other.duplicates;
        self.ignored += other.ignored;
        self.emitted += other.emitted;
        self.skipped += other.skipped;
    }
}

/// 去重键，只有内容类事件才有
///
/// `messages.update` 里的编辑沿用原消息 ID，同一条消息可能被多次编辑，
/// 因此编辑键带上编辑时间；没有时间时用编辑后内容的指纹。
fn dedup_key(kind: &EventKind, event: &TransportEvent) -> Option<String> {
    if !kind.is_content_bearing() {
        return None;
    }
    match kind {
        EventKind::Edit { .. } => Some(format!("{}#edit:{}", event.key.id, edit_version(event))),
        _ => Some(event.key.id.clone()),
    }
}

fn edit_version(event: &TransportEvent) -> String {
    let content = event
        .update
        .as_ref()
        .and_then(|update| update.message.as_ref())
        .or(event.message.as_ref());
    let edited_at = content
        .and_then(|content| unwrap(content).edited_at_ms)
        .or_else(|| event.timestamp_secs().map(|secs| secs.saturating_mul(1000)));
    if let Some(at) = edited_at {
        return at.to_string();
    }
    let mut hasher = DefaultHasher::new();
    serde_json::to_string(&content)
        .unwrap_or_default()
        .hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// 单会话流水线
pub struct Pipeline {
    session: String,
    tenant: TenantConfig,
    core: BridgeCore,
    dedup: DedupFilter,
    names: NameBook,
    sequencer: MessageSequencer,
}

impl Pipeline {
    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn tenant(&self) -> &TenantConfig {
        &self.tenant
    }

    pub fn dedup(&self) -> &DedupFilter {
        &self.dedup
    }

    fn scope(&self) -> SessionScope<'_> {
        SessionScope {
            session: &self.session,
            tenant: &self.tenant,
            names: &self.names,
        }
    }

    #[instrument(skip_all, fields(session = %self.session, size = batch.len()))]
    pub async fn process(&self, batch: EventBatch) -> Result<BatchReport> {
        match batch {
            EventBatch::Event(event) => self.process_event(&event).await,
            EventBatch::History(events) => self.process_history(events).await,
        }
    }

    /// 单条事件：严格按到达顺序，处理完成后才返回
    pub async fn process_event(&self, event: &TransportEvent) -> Result<BatchReport> {
        let mut report = BatchReport {
            received: 1,
            ..BatchReport::default()
        };
        let kind = classify(event);
        METRICS.event(kind.as_str());

        let Some(key) = self.admit(&kind, event, &mut report) else {
            return Ok(report);
        };

        let normalized = self
            .core
            .normalizer
            .normalize_classified(&self.scope(), event, kind)
            .await;
        let result = self.emit(normalized, &mut report).await;
        self.release_on_failure(&result, event, key.as_deref());
        result.map(|()| report)
    }

    /// 历史同步批次：按消息 ID 唯一分波，波内并发规范化，随后按原顺序对账/分发
    async fn process_history(&self, events: Vec<TransportEvent>) -> Result<BatchReport> {
        let mut report = BatchReport {
            received: events.len(),
            ..BatchReport::default()
        };
        if self.tenant.ignore_history_messages {
            report.ignored = events.len();
            debug!(session = %self.session, count = events.len(), "history batch ignored");
            return Ok(report);
        }

        let mut first_error = None;
        for wave in history_waves(events) {
            let mut admitted = Vec::with_capacity(wave.len());
            for event in wave {
                let kind = classify(&event);
                METRICS.event(kind.as_str());
                if let Some(key) = self.admit(&kind, &event, &mut report) {
                    admitted.push((event, kind, key));
                }
            }

            let scope = self.scope();
            let normalized = join_all(admitted.iter().map(|(event, kind, _)| {
                self.core
                    .normalizer
                    .normalize_classified(&scope, event, kind.clone())
            }))
            .await;

            for ((event, _, key), normalized) in admitted.iter().zip(normalized) {
                let mut step = BatchReport::default();
                let result = self.emit(normalized, &mut step).await;
                self.release_on_failure(&result, event, key.as_deref());
                report.merge(step);
                if let Err(err) = result {
                    warn!(session = %self.session, message_id = %event.message_id(), error = %err, "history event dispatch failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        info!(
            session = %self.session,
            received = report.received,
            emitted = report.emitted,
            duplicates = report.duplicates,
            "history batch processed"
        );
        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// 入站消息在队列层重试耗尽后仍无法解密：发出说明消息
    #[instrument(skip_all, fields(session = %self.session, message_id = %event.message_id()))]
    pub async fn notify_decrypt_exhausted(&self, event: &TransportEvent) -> Result<BatchReport> {
        let mut report = BatchReport {
            received: 1,
            ..BatchReport::default()
        };
        let normalized = self
            .core
            .normalizer
            .decrypt_exhausted(&self.scope(), event)
            .await;
        self.emit(normalized, &mut report).await?;
        Ok(report)
    }

    /// 去重准入。返回 `None` 表示丢弃；`Some(key)` 中的键用于失败时释放
    fn admit(
        &self,
        kind: &EventKind,
        event: &TransportEvent,
        report: &mut BatchReport,
    ) -> Option<Option<String>> {
        let key = dedup_key(kind, event);
        if let Some(key) = &key {
            let now_ms = Utc::now().timestamp_millis();
            if !self.dedup.should_process(event.chat_id(), key, now_ms) {
                METRICS.events_deduplicated_total.inc();
                debug!(session = %self.session, message_id = %event.message_id(), "duplicate event dropped");
                report.duplicates += 1;
                return None;
            }
        }
        Some(key)
    }

    fn release_on_failure(&self, result: &Result<()>, event: &TransportEvent, key: Option<&str>) {
        if let (Err(_), Some(key)) = (result, key) {
            self.dedup.forget(event.chat_id(), key);
        }
    }

    async fn emit(
        &self,
        normalized: Option<NormalizedEvent>,
        report: &mut BatchReport,
    ) -> Result<()> {
        let Some(normalized) = normalized else {
            report.ignored += 1;
            return Ok(());
        };

        match normalized.status_change {
            Some(change) => {
                let message_id = change.message_id.clone();
                self.sequencer
                    .run(
                        &message_id,
                        self.reconcile_and_dispatch(change, normalized.envelope, report),
                    )
                    .await
            }
            None => self.dispatch(&normalized.envelope, report).await,
        }
    }

    /// 按计划逐步分发，每步成功后才持久化
    async fn reconcile_and_dispatch(
        &self,
        change: StatusChange,
        envelope: Envelope,
        report: &mut BatchReport,
    ) -> Result<()> {
        let plan = self
            .core
            .reconciler
            .reconcile(&self.session, &change.message_id, change.status, envelope)
            .await;

        for step in plan.steps {
            if let Some(envelope) = &step.emit {
                self.dispatch(envelope, report).await?;
                METRICS.status("emitted");
            }
            self.core
                .reconciler
                .commit(&self.session, &change.message_id, step.status)
                .await;
        }
        Ok(())
    }

    async fn dispatch(&self, envelope: &Envelope, report: &mut BatchReport) -> Result<()> {
        report.emitted += 1;
        if self.tenant.webhooks.is_empty() {
            debug!(session = %self.session, "no webhook destinations configured");
            return Ok(());
        }
        let outcomes = self
            .core
            .dispatcher
            .dispatch_all(&self.session, &self.tenant.webhooks, envelope)
            .await?;
        report.skipped += outcomes
            .iter()
            .filter(|outcome| matches!(outcome, DispatchOutcome::Skipped(_)))
            .count();
        Ok(())
    }
}

/// 切分为消息 ID 互不重复的波次，保持原有相对顺序
fn history_waves(events: Vec<TransportEvent>) -> Vec<Vec<TransportEvent>> {
    let mut waves: Vec<Vec<TransportEvent>> = Vec::new();
    for event in events {
        // 排在同 ID 事件所在的最后一个波次之后
        let index = waves
            .iter()
            .rposition(|wave| wave.iter().any(|seen| seen.key.id == event.key.id))
            .map_or(0, |last| last + 1);
        if index == waves.len() {
            waves.push(Vec::new());
        }
        waves[index].push(event);
    }
    waves
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> TransportEvent {
        let mut event = TransportEvent::default();
        event.key.id = id.to_string();
        event
    }

    fn ids(waves: &[Vec<TransportEvent>]) -> Vec<Vec<&str>> {
        waves
            .iter()
            .map(|wave| wave.iter().map(|e| e.key.id.as_str()).collect())
            .collect()
    }

    #[test]
    fn history_waves_keep_ids_unique_and_ordered() {
        let waves = history_waves(vec![
            event("a"),
            event("b"),
            event("a"),
            event("c"),
            event("a"),
            event("b"),
        ]);
        assert_eq!(
            ids(&waves),
            vec![vec!["a", "b", "c"], vec!["a", "b"], vec!["a"]]
        );
    }

    fn edit_update(id: &str, text: &str, edited_at_ms: Option<i64>) -> TransportEvent {
        let mut protocol = serde_json::json!({
            "type": "MESSAGE_EDIT",
            "key": { "id": id },
            "editedMessage": { "conversation": text }
        });
        if let Some(at) = edited_at_ms {
            protocol["timestampMs"] = at.into();
        }
        serde_json::from_value(serde_json::json!({
            "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": id },
            "update": { "message": { "editedMessage": { "message": { "protocolMessage": protocol } } } }
        }))
        .unwrap()
    }

    #[test]
    fn only_content_events_have_dedup_keys() {
        let event = event("3EB0");
        assert_eq!(dedup_key(&EventKind::Content, &event).as_deref(), Some("3EB0"));
        assert_eq!(
            dedup_key(&EventKind::Reaction { target: "X".into() }, &event).as_deref(),
            Some("3EB0")
        );
        assert_eq!(dedup_key(&EventKind::DecryptStub, &event), None);
        assert_eq!(
            dedup_key(&EventKind::StatusUpdate(crate::status::DeliveryStatus::Read), &event),
            None
        );
    }

    #[test]
    fn successive_edits_of_one_message_have_distinct_keys() {
        let kind = EventKind::Edit {
            target: "3EB0".into(),
        };
        let first = dedup_key(&kind, &edit_update("3EB0", "olá", Some(1_700_000_000_000)));
        let second = dedup_key(&kind, &edit_update("3EB0", "olá!", Some(1_700_000_005_000)));
        let redelivered = dedup_key(&kind, &edit_update("3EB0", "olá", Some(1_700_000_000_000)));
        assert_eq!(first.as_deref(), Some("3EB0#edit:1700000000000"));
        assert_ne!(first, second);
        assert_eq!(first, redelivered);

        // 没有编辑时间时按内容区分
        let a = dedup_key(&kind, &edit_update("3EB0", "um", None));
        let b = dedup_key(&kind, &edit_update("3EB0", "dois", None));
        assert_ne!(a, b);
        assert_eq!(a, dedup_key(&kind, &edit_update("3EB0", "um", None)));
        assert_ne!(a, dedup_key(&EventKind::Content, &event("3EB0")));
    }
}
