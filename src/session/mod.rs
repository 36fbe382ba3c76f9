//! 租户会话注册表
//!
//! 每个会话一个工作任务，按到达顺序串行处理该会话的事件；不同会话完全并行。
//! 会话状态（去重窗口等）随工作任务创建和销毁。

mod notifier;

pub use notifier::{LoggingNotifier, NoticePriority, SessionNotice, SessionNotifier};

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::config::BridgeAppConfig;
use crate::error::{BridgeError, Result};
use crate::event::{EventBatch, SessionEvent, TransportEvent};
use crate::pipeline::{BatchReport, BridgeCore, Pipeline};

const DEFAULT_QUEUE_DEPTH: usize = 256;

type Reply = oneshot::Sender<Result<BatchReport>>;

enum Command {
    Process(EventBatch, Reply),
    DecryptExhausted(Box<TransportEvent>, Reply),
}

struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

pub struct SessionRegistry {
    core: BridgeCore,
    config: Arc<BridgeAppConfig>,
    notifier: Arc<dyn SessionNotifier>,
    sessions: DashMap<String, SessionHandle>,
    /// 被强制登出的会话，需显式 `open` 才能恢复
    closed: DashSet<String>,
    queue_depth: usize,
}

impl SessionRegistry {
    pub fn new(core: BridgeCore, config: Arc<BridgeAppConfig>) -> Self {
        Self::with_notifier(core, config, Arc::new(LoggingNotifier))
    }

    pub fn with_notifier(
        core: BridgeCore,
        config: Arc<BridgeAppConfig>,
        notifier: Arc<dyn SessionNotifier>,
    ) -> Self {
        Self {
            core,
            config,
            notifier,
            sessions: DashMap::new(),
            closed: DashSet::new(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }

    /// 启动会话工作任务（已存在时直接返回）
    pub fn open(&self, session: &str) -> Result<()> {
        self.closed.remove(session);
        self.sender(session).map(|_| ())
    }

    pub fn is_open(&self, session: &str) -> bool {
        self.sessions.contains_key(session)
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// 提交事件并等待该会话的工作任务处理完成
    pub async fn submit(&self, event: SessionEvent) -> Result<BatchReport> {
        self.enqueue(event).await?.wait().await
    }

    /// 只入队不等待结果；同一会话的事件按入队顺序处理
    pub async fn enqueue(&self, event: SessionEvent) -> Result<PendingReport> {
        let (reply, rx) = oneshot::channel();
        self.send(&event.session, Command::Process(event.batch, reply))
            .await?;
        Ok(PendingReport {
            session: event.session,
            rx,
        })
    }

    /// 队列层重试耗尽后调用，为无法解密的入站消息发出说明
    pub async fn notify_decrypt_exhausted(
        &self,
        session: &str,
        event: TransportEvent,
    ) -> Result<BatchReport> {
        self.enqueue_decrypt_exhausted(session, event)
            .await?
            .wait()
            .await
    }

    pub async fn enqueue_decrypt_exhausted(
        &self,
        session: &str,
        event: TransportEvent,
    ) -> Result<PendingReport> {
        let (reply, rx) = oneshot::channel();
        self.send(session, Command::DecryptExhausted(Box::new(event), reply))
            .await?;
        Ok(PendingReport {
            session: session.to_string(),
            rx,
        })
    }

    /// 登出：移除工作任务，已排队的事件处理完后任务退出
    pub fn logout(&self, session: &str) -> bool {
        let removed = self.sessions.remove(session).is_some();
        if removed {
            info!(session = %session, "session logged out");
        }
        removed
    }

    /// 校验会话凭证对应的号码与配置一致；不一致时强制登出并发出高优先级通知
    pub async fn verify_credentials(&self, session: &str, authenticated: &str) -> Result<()> {
        let normalizer = self.core.normalizer.identity().normalizer();
        let configured = normalizer.resolve_identity(session);
        let actual = normalizer.resolve_identity(authenticated);
        if configured == actual {
            return Ok(());
        }

        warn!(session = %session, configured = %configured, actual = %actual, "session identity mismatch");
        self.logout(session);
        self.closed.insert(session.to_string());
        self.notifier
            .notify(SessionNotice {
                session: session.to_string(),
                priority: NoticePriority::High,
                title: "Session credentials belong to a different number".to_string(),
                detail: format!("configured {configured}, authenticated as {actual}"),
            })
            .await;
        Err(BridgeError::IdentityMismatch { configured, actual })
    }

    fn sender(&self, session: &str) -> Result<mpsc::Sender<Command>> {
        if self.closed.contains(session) {
            return Err(BridgeError::SessionClosed(session.to_string()));
        }
        if let Some(handle) = self.sessions.get(session) {
            return Ok(handle.tx.clone());
        }

        let tenant = self
            .config
            .tenant_for(session)
            .map_err(|err| BridgeError::Configuration(format!("{err:#}")))?;
        let entry = self.sessions.entry(session.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.queue_depth);
            let pipeline = self.core.pipeline(session, tenant);
            tokio::spawn(run_worker(pipeline, rx));
            info!(session = %session, "session worker started");
            SessionHandle { tx }
        });
        Ok(entry.tx.clone())
    }

    async fn send(&self, session: &str, command: Command) -> Result<()> {
        let tx = self.sender(session)?;
        tx.send(command)
            .await
            .map_err(|_| BridgeError::SessionClosed(session.to_string()))
    }
}

/// 已入队事件的处理结果
#[derive(Debug)]
pub struct PendingReport {
    session: String,
    rx: oneshot::Receiver<Result<BatchReport>>,
}

impl PendingReport {
    pub fn session(&self) -> &str {
        &self.session
    }

    pub async fn wait(self) -> Result<BatchReport> {
        self.rx
            .await
            .map_err(|_| BridgeError::SessionClosed(self.session))?
    }
}

async fn run_worker(pipeline: Pipeline, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Process(batch, reply) => {
                let result = pipeline.process(batch).await;
                let _ = reply.send(result);
            }
            Command::DecryptExhausted(event, reply) => {
                let result = pipeline.notify_decrypt_exhausted(&event).await;
                let _ = reply.send(result);
            }
        }
    }
    info!(session = %pipeline.session(), "session worker stopped");
}
