//! Flare Cloud Bridge 公共库
//!
//! 把传输层事件规范化为 Cloud API 兼容的 Webhook 载荷：身份映射、消息 ID 关联、
//! 内容去重、投递状态对账与 Webhook 分发。

pub mod config;
pub mod correlator;
pub mod dedup;
pub mod error;
pub mod event;
pub mod identity;
pub mod metrics;
pub mod normalizer;
pub mod payload;
pub mod pipeline;
pub mod session;
pub mod status;
pub mod store;
pub mod tracing;
pub mod transport;
pub mod webhook;

pub use config::{BridgeAppConfig, TenantConfig, WebhookDestination, app_config, load_config};
pub use error::{BridgeError, ErrorKind, ErrorPolicy, Result};
pub use pipeline::{BatchReport, BridgeCore, Pipeline};
pub use session::{
    LoggingNotifier, PendingReport, SessionNotice, SessionNotifier, SessionRegistry,
};
pub use status::DeliveryStatus;
pub use transport::{EventSource, JsonLinesSource, SourceAction, SourceItem};
pub use webhook::{DispatchOutcome, WebhookDispatcher};
