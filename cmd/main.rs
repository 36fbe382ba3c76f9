//! # Flare Cloud Bridge 入口
//!
//! 从标准输入读取 JSON Lines 事件，按会话交给流水线处理。

use std::sync::Arc;

use anyhow::{Context, Result};
use flare_cloud_bridge::config::load_config;
use flare_cloud_bridge::metrics::gather_text;
use flare_cloud_bridge::store::build_store;
use flare_cloud_bridge::tracing::init_tracing_from_config;
use flare_cloud_bridge::transport::{EventSource, JsonLinesSource, SourceAction};
use flare_cloud_bridge::{BatchReport, BridgeCore, BridgeError, SessionRegistry};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FLARE_CONFIG").ok());
    let config = load_config(config_path.as_deref());
    init_tracing_from_config(Some(&config.logging));
    config.validate().context("invalid configuration")?;

    let store = build_store(config)
        .await
        .context("failed to build key-value store")?;
    let core = BridgeCore::from_config(config, store).context("failed to build bridge core")?;
    let registry = SessionRegistry::new(core, Arc::new(config.clone()));

    info!(
        service = %config.service.name,
        version = %config.service.version,
        backend = ?config.store.backend,
        "Starting flare-cloud-bridge"
    );

    // 读取循环只负责入队，结果在独立任务中等待，慢会话不会阻塞其他会话
    let mut source = JsonLinesSource::stdin();
    let mut replies = JoinSet::new();
    loop {
        let item = match source.next_item().await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(err @ BridgeError::MalformedContent(_)) => {
                warn!(error = %err, "skipping malformed input line");
                continue;
            }
            Err(err) => return Err(err).context("event source failed"),
        };

        let session = item.session.clone();
        let pending = match item.into_session_event() {
            Ok(event) => registry.enqueue(event).await,
            Err(control) => match control.action {
                SourceAction::DecryptExhausted(event) => {
                    registry.enqueue_decrypt_exhausted(&session, *event).await
                }
                SourceAction::Credentials(jid) => {
                    if let Err(err) = registry.verify_credentials(&session, &jid).await {
                        log_outcome(&session, Err(err));
                    }
                    continue;
                }
                SourceAction::Event(_) | SourceAction::History(_) => continue,
            },
        };

        match pending {
            Ok(pending) => {
                replies.spawn(async move {
                    let result = pending.wait().await;
                    log_outcome(&session, result);
                });
            }
            Err(err) => log_outcome(&session, Err(err)),
        }
        while replies.try_join_next().is_some() {}
    }

    while replies.join_next().await.is_some() {}
    info!(sessions = registry.active_sessions().len(), "input exhausted, shutting down");
    debug!(metrics = %gather_text(), "final metrics snapshot");
    Ok(())
}

fn log_outcome(session: &str, result: flare_cloud_bridge::Result<BatchReport>) {
    match result {
        Ok(report) => info!(
            session = %session,
            received = report.received,
            emitted = report.emitted,
            duplicates = report.duplicates,
            ignored = report.ignored,
            skipped = report.skipped,
            "event processed"
        ),
        Err(err) => error!(
            session = %session,
            error = %err,
            retryable = err.is_retryable(),
            "event failed"
        ),
    }
}
