//! # Prometheus 指标收集模块
//!
//! 为桥接核心各组件提供统一的 Prometheus 指标收集能力。

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 全局桥接指标实例
pub static METRICS: Lazy<BridgeMetrics> = Lazy::new(BridgeMetrics::new);

/// 桥接核心指标
pub struct BridgeMetrics {
    /// 按事件类型统计的接收事件数
    pub events_total: IntCounterVec,
    /// 去重丢弃的内容事件数
    pub events_deduplicated_total: IntCounter,
    /// 状态对账结果（emitted / duplicate / stale / backfilled / persisted）
    pub statuses_total: IntCounterVec,
    /// 身份缓存查询结果（hit / miss / derived / unavailable）
    pub identity_lookups_total: IntCounterVec,
    /// Webhook 投递结果（delivered / skipped / failed / rate_limited）
    pub webhook_deliveries_total: IntCounterVec,
    /// Webhook 投递耗时（秒）
    pub webhook_delivery_duration_seconds: Histogram,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        let events_total = IntCounterVec::new(
            Opts::new("bridge_events_total", "Total number of transport events received"),
            &["kind"],
        )
        .expect("Failed to create bridge_events_total metric");

        let events_deduplicated_total = IntCounter::new(
            "bridge_events_deduplicated_total",
            "Total number of content events dropped by the dedup window",
        )
        .expect("Failed to create bridge_events_deduplicated_total metric");

        let statuses_total = IntCounterVec::new(
            Opts::new(
                "bridge_statuses_total",
                "Delivery status reconciliation outcomes",
            ),
            &["outcome"],
        )
        .expect("Failed to create bridge_statuses_total metric");

        let identity_lookups_total = IntCounterVec::new(
            Opts::new(
                "bridge_identity_lookups_total",
                "Identity cache lookups by result",
            ),
            &["result"],
        )
        .expect("Failed to create bridge_identity_lookups_total metric");

        let webhook_deliveries_total = IntCounterVec::new(
            Opts::new(
                "bridge_webhook_deliveries_total",
                "Webhook dispatch attempts by outcome",
            ),
            &["outcome"],
        )
        .expect("Failed to create bridge_webhook_deliveries_total metric");

        let webhook_delivery_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "bridge_webhook_delivery_duration_seconds",
                "Webhook delivery duration in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )
        .expect("Failed to create bridge_webhook_delivery_duration_seconds metric");

        // 注册指标，忽略重复注册错误（测试中可能会重复创建）
        let _ = REGISTRY.register(Box::new(events_total.clone()));
        let _ = REGISTRY.register(Box::new(events_deduplicated_total.clone()));
        let _ = REGISTRY.register(Box::new(statuses_total.clone()));
        let _ = REGISTRY.register(Box::new(identity_lookups_total.clone()));
        let _ = REGISTRY.register(Box::new(webhook_deliveries_total.clone()));
        let _ = REGISTRY.register(Box::new(webhook_delivery_duration_seconds.clone()));

        Self {
            events_total,
            events_deduplicated_total,
            statuses_total,
            identity_lookups_total,
            webhook_deliveries_total,
            webhook_delivery_duration_seconds,
        }
    }

    pub fn event(&self, kind: &str) {
        self.events_total.with_label_values(&[kind]).inc();
    }

    pub fn status(&self, outcome: &str) {
        self.statuses_total.with_label_values(&[outcome]).inc();
    }

    pub fn identity_lookup(&self, result: &str) {
        self.identity_lookups_total.with_label_values(&[result]).inc();
    }

    pub fn delivery(&self, outcome: &str) {
        self.webhook_deliveries_total
            .with_label_values(&[outcome])
            .inc();
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 以 Prometheus 文本格式导出当前指标
pub fn gather_text() -> String {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
