//! 状态对账
//!
//! 对比持久化状态与新观察到的状态，决定发出、抑制或补发中间状态。
//! 对账本身只做决策；持久化在分发交接成功之后由调用方通过 `commit` 完成，
//! 投递前崩溃不会让状态机错误地前进。

use tracing::debug;

use crate::metrics::METRICS;
use crate::payload::Envelope;

use super::{DeliveryStatus, StatusStore};

/// 对账结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// 正常推进
    Advance,
    /// 与已持久化状态相同
    Duplicate,
    /// 低于已持久化状态（乱序/过期）
    Stale,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Advance => "advance",
            ReconcileOutcome::Duplicate => "duplicate",
            ReconcileOutcome::Stale => "stale",
        }
    }
}

/// 单个步骤：先投递 `emit`（如有），成功后持久化 `status`
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileStep {
    pub status: DeliveryStatus,
    pub emit: Option<Envelope>,
    pub synthesized: bool,
}

/// 对账计划
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan {
    pub message_id: String,
    pub prior: Option<DeliveryStatus>,
    pub outcome: ReconcileOutcome,
    pub steps: Vec<ReconcileStep>,
}

impl ReconcilePlan {
    /// 需要发出的载荷，按顺序
    pub fn emitted(&self) -> impl Iterator<Item = &Envelope> {
        self.steps.iter().filter_map(|step| step.emit.as_ref())
    }

    /// 计划执行完毕后的持久化状态
    pub fn persist(&self) -> Option<DeliveryStatus> {
        self.steps.last().map(|step| step.status).or(self.prior)
    }
}

/// 状态对账器
#[derive(Clone)]
pub struct StatusReconciler {
    store: StatusStore,
}

impl StatusReconciler {
    pub fn new(store: StatusStore) -> Self {
        Self { store }
    }

    /// `reconcile(session, messageId, newStatus, payload)`
    pub async fn reconcile(
        &self,
        session: &str,
        message_id: &str,
        new_status: DeliveryStatus,
        envelope: Envelope,
    ) -> ReconcilePlan {
        let prior = self.store.get(session, message_id).await;
        let plan = plan(message_id, prior, new_status, envelope);

        METRICS.status(plan.outcome.as_str());
        if plan.steps.iter().any(|step| step.synthesized) {
            METRICS.status("backfilled");
        }
        debug!(
            session = %session,
            message_id = %message_id,
            prior = ?prior,
            status = %new_status,
            outcome = plan.outcome.as_str(),
            "status reconciled"
        );
        plan
    }

    /// 分发成功后持久化某一步的状态
    pub async fn commit(&self, session: &str, message_id: &str, status: DeliveryStatus) {
        self.store.put(session, message_id, status).await;
    }

    pub async fn persisted(&self, session: &str, message_id: &str) -> Option<DeliveryStatus> {
        self.store.get(session, message_id).await
    }
}

/// 纯决策函数
pub(crate) fn plan(
    message_id: &str,
    prior: Option<DeliveryStatus>,
    new_status: DeliveryStatus,
    envelope: Envelope,
) -> ReconcilePlan {
    let outcome = match (prior, new_status) {
        (None, _) => ReconcileOutcome::Advance,
        (Some(prior), new) if prior == new => ReconcileOutcome::Duplicate,
        // 覆盖路径：failed 可从任何非终态进入，deleted 可从任何状态进入
        (Some(prior), DeliveryStatus::Failed) if !prior.is_terminal() => ReconcileOutcome::Advance,
        (Some(_), DeliveryStatus::Deleted) => ReconcileOutcome::Advance,
        (Some(prior), new) if new.rank() < prior.rank() => ReconcileOutcome::Stale,
        (Some(_), _) => ReconcileOutcome::Advance,
    };

    let mut steps = Vec::new();
    if outcome == ReconcileOutcome::Advance {
        let prior_rank = prior.map(|status| status.rank());
        let delivered_rank = DeliveryStatus::Delivered.rank();
        let needs_backfill = new_status == DeliveryStatus::Read
            && prior_rank.is_none_or(|rank| rank < delivered_rank);
        if needs_backfill {
            steps.push(ReconcileStep {
                status: DeliveryStatus::Delivered,
                emit: Some(envelope.with_status(DeliveryStatus::Delivered)),
                synthesized: true,
            });
        }
        let emit = new_status.is_emittable().then_some(envelope);
        steps.push(ReconcileStep {
            status: new_status,
            emit,
            synthesized: false,
        });
    }

    ReconcilePlan {
        message_id: message_id.to_string(),
        prior,
        outcome,
        steps,
    }
}
