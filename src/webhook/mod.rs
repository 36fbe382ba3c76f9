//! Webhook 分发
//!
//! 每个目标依次经过：黑名单 → 类别过滤 → 出站拉黑副作用 → 限流 → 身份改写 → HTTP 投递。
//! 过滤只读取改写前的 [`DispatchMeta`]。分发器本身不重试，失败交给调用方（队列层）。

mod blacklist;
mod rate_limit;
mod rewrite;

pub use blacklist::Blacklist;
pub use rate_limit::RateLimiter;
pub use rewrite::IdentityRewriter;

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tracing::{debug, instrument, warn};

use crate::config::{WebhookDestination, WebhookSettings};
use crate::error::{BridgeError, Result};
use crate::identity::{IdentityCache, JidKind};
use crate::metrics::METRICS;
use crate::payload::{DispatchMeta, Envelope, PayloadKind, WebhookPayload};
use crate::store::{KeySpace, KvStore};

/// 单个目标的分发结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Blacklisted,
    Group,
    Newsletter,
    Outgoing,
    Update,
    Incoming,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Blacklisted => "blacklisted",
            SkipReason::Group => "group",
            SkipReason::Newsletter => "newsletter",
            SkipReason::Outgoing => "outgoing",
            SkipReason::Update => "update",
            SkipReason::Incoming => "incoming",
        }
    }
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    client: Client,
    blacklist: Blacklist,
    limiter: Arc<RateLimiter>,
    rewriter: IdentityRewriter,
    settings: WebhookSettings,
}

impl WebhookDispatcher {
    pub fn new(
        identity: IdentityCache,
        store: Arc<dyn KvStore>,
        keys: KeySpace,
        settings: WebhookSettings,
    ) -> Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|err| BridgeError::Configuration(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            blacklist: Blacklist::new(store, keys),
            limiter: Arc::new(RateLimiter::new()),
            rewriter: IdentityRewriter::new(identity),
            settings,
        })
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// `dispatch(session, destination, payload) -> success | throws`
    #[instrument(skip_all, fields(session = %session, destination = %destination.id, kind = %envelope.meta.kind.as_str()))]
    pub async fn dispatch(
        &self,
        session: &str,
        destination: &WebhookDestination,
        envelope: &Envelope,
    ) -> Result<DispatchOutcome> {
        let meta = &envelope.meta;

        if self
            .blacklist
            .contains(session, &destination.id, &meta.conversation)
            .await
        {
            return Ok(self.skipped(SkipReason::Blacklisted));
        }

        if let Some(reason) = category_filter(destination, meta) {
            return Ok(self.skipped(reason));
        }

        if meta.from_me
            && meta.kind == PayloadKind::Message
            && destination.add_to_blacklist_on_outgoing_ttl_seconds > 0
        {
            self.blacklist
                .add(
                    session,
                    &destination.id,
                    &meta.conversation,
                    Duration::from_secs(destination.add_to_blacklist_on_outgoing_ttl_seconds),
                )
                .await;
        }

        if let Some(limit) = &destination.rate_limit {
            let bucket = format!("{session}:{}", destination.id);
            if !self.limiter.try_acquire(&bucket, limit) {
                METRICS.delivery("rate_limited");
                warn!("destination rate limited");
                return Err(BridgeError::RateLimited(destination.id.clone()));
            }
        }

        let prefer_phone = destination
            .prefer_phone_number
            .unwrap_or(self.settings.prefer_phone_number);
        let body = self
            .rewriter
            .rewrite(session, &envelope.payload, meta, prefer_phone)
            .await;

        self.post(destination, &body).await?;
        Ok(DispatchOutcome::Delivered)
    }

    /// 依次分发到全部目标；全部尝试后返回第一个错误
    pub async fn dispatch_all(
        &self,
        session: &str,
        destinations: &[WebhookDestination],
        envelope: &Envelope,
    ) -> Result<Vec<DispatchOutcome>> {
        let mut outcomes = Vec::with_capacity(destinations.len());
        let mut first_error = None;
        for destination in destinations {
            match self.dispatch(session, destination, envelope).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(outcomes),
        }
    }

    async fn post(&self, destination: &WebhookDestination, body: &WebhookPayload) -> Result<()> {
        let timeout = Duration::from_millis(
            destination
                .timeout_ms
                .unwrap_or(self.settings.default_timeout_ms),
        );
        let started = Instant::now();
        let builder = build_headers(self.client.post(&destination.url), destination).timeout(timeout);

        let result = match builder.json(body).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(BridgeError::Delivery {
                destination: destination.id.clone(),
                reason: resp.status().to_string(),
            }),
            Err(err) if err.is_timeout() => Err(BridgeError::Timeout {
                operation: "webhook.post",
                elapsed: started.elapsed(),
            }),
            Err(err) => Err(BridgeError::Delivery {
                destination: destination.id.clone(),
                reason: err.to_string(),
            }),
        };

        METRICS
            .webhook_delivery_duration_seconds
            .observe(started.elapsed().as_secs_f64());
        match &result {
            Ok(()) => {
                METRICS.delivery("delivered");
                debug!(url = %destination.url, "webhook delivered");
            }
            Err(err) => {
                METRICS.delivery("failed");
                warn!(url = %destination.url, error = %err, "webhook delivery failed");
            }
        }
        result
    }

    fn skipped(&self, reason: SkipReason) -> DispatchOutcome {
        METRICS.delivery("skipped");
        debug!(reason = %reason.as_str(), "destination skipped");
        DispatchOutcome::Skipped(reason)
    }
}

/// 按目标的类别开关过滤，读取改写前的元数据
fn category_filter(destination: &WebhookDestination, meta: &DispatchMeta) -> Option<SkipReason> {
    if meta.chat_kind == JidKind::Group && !destination.send_group_messages {
        return Some(SkipReason::Group);
    }
    if meta.chat_kind == JidKind::Newsletter && !destination.send_newsletter_messages {
        return Some(SkipReason::Newsletter);
    }
    match meta.kind {
        PayloadKind::Status | PayloadKind::Contacts if !destination.send_update_messages => {
            Some(SkipReason::Update)
        }
        PayloadKind::Message if meta.from_me && !destination.send_outgoing_messages => {
            Some(SkipReason::Outgoing)
        }
        PayloadKind::Message if !meta.from_me && !destination.send_incoming_messages => {
            Some(SkipReason::Incoming)
        }
        _ => None,
    }
}

fn build_headers(
    request_builder: reqwest::RequestBuilder,
    destination: &WebhookDestination,
) -> reqwest::RequestBuilder {
    let mut builder = request_builder.header("content-type", "application/json");
    if let Some(token) = &destination.token {
        builder = builder.header(destination.header.as_str(), token.as_str());
    }
    builder
}
