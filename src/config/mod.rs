//! 桥接服务配置
//!
//! TOML 单文件或分层目录（`base.toml` + `shared/`、`sessions/`、`overrides/` 片段），
//! 之后叠加环境覆盖文件。租户配置由 `tenant_defaults` 与 `sessions.<号码>` 合并得到。

use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use toml::Value;
use tracing::warn;

mod manager;
pub use manager::ConfigManager;

/// 进程级配置，只初始化一次
static APP_CONFIG: OnceLock<BridgeAppConfig> = OnceLock::new();

/// 服务基础信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// 服务名称
    pub name: String,
    /// 服务版本
    pub version: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "flare-cloud-bridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    pub level: String,
    /// 输出格式：text | json
    pub format: String,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

/// Redis 连接池配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RedisPoolConfig {
    /// Redis 服务器地址
    pub url: String,
    /// 数据库编号
    #[serde(default)]
    pub database: Option<u32>,
}

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// 进程内存（单实例部署、测试）
    #[default]
    Memory,
    /// Redis（多进程共享）
    Redis,
}

/// 键值存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// 引用 `[redis.<profile>]`
    pub redis_profile: Option<String>,
    /// 单次存储调用超时（毫秒）
    pub op_timeout_ms: u64,
    /// 键前缀
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_profile: None,
            op_timeout_ms: 1_000,
            key_prefix: "bridge".to_string(),
        }
    }
}

/// 身份映射缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// 映射过期时间（秒）
    pub ttl_seconds: u64,
    /// 号码规则插件（按顺序执行）
    pub numbering_policies: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 7 * 24 * 3600,
            numbering_policies: vec!["br_ninth_digit".to_string()],
        }
    }
}

/// 消息 ID 关联配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub ttl_seconds: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 7 * 24 * 3600,
        }
    }
}

/// 投递状态持久化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// 与媒体保留期对齐
    pub ttl_seconds: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3 * 24 * 3600,
        }
    }
}

/// 去重窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub window_ms: u64,
    /// 超过该数量时触发清扫
    pub max_entries: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_ms: 7_000,
            max_entries: 50_000,
        }
    }
}

/// Webhook 全局配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    /// 是否优先以手机号形式展示身份（部署级默认值）
    pub prefer_phone_number: bool,
    /// 目标未配置超时时使用
    pub default_timeout_ms: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            prefer_phone_number: true,
            default_timeout_ms: 5_000,
        }
    }
}

/// 目标限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub per_seconds: u64,
}

/// 单个 Webhook 目标
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookDestination {
    pub id: String,
    pub url: String,
    /// 认证值，配置后随 `header` 一起发送
    pub token: Option<String>,
    pub header: String,
    pub timeout_ms: Option<u64>,
    pub send_group_messages: bool,
    pub send_newsletter_messages: bool,
    pub send_outgoing_messages: bool,
    pub send_update_messages: bool,
    pub send_incoming_messages: bool,
    /// 观察到本机发出的消息时，将对端加入黑名单的时长（秒），0 表示关闭
    pub add_to_blacklist_on_outgoing_ttl_seconds: u64,
    /// 覆盖 `webhook.prefer_phone_number`
    pub prefer_phone_number: Option<bool>,
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for WebhookDestination {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            url: String::new(),
            token: None,
            header: "Authorization".to_string(),
            timeout_ms: None,
            send_group_messages: true,
            send_newsletter_messages: false,
            send_outgoing_messages: true,
            send_update_messages: true,
            send_incoming_messages: true,
            add_to_blacklist_on_outgoing_ttl_seconds: 0,
            prefer_phone_number: None,
            rate_limit: None,
        }
    }
}

/// 租户会话配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    /// 对外展示的号码，缺省为会话号码
    pub display_phone_number: Option<String>,
    /// 忽略 status@broadcast（动态）消息
    pub ignore_broadcast_statuses: bool,
    /// 忽略历史同步批次
    pub ignore_history_messages: bool,
    /// 本机发送、本设备无法解密时展示的说明文本
    pub decrypt_failure_text: String,
    /// 入站消息重试耗尽后仍无法解密时发给终端用户的说明文本
    pub decrypt_exhausted_text: String,
    pub webhooks: Vec<WebhookDestination>,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            display_phone_number: None,
            ignore_broadcast_statuses: true,
            ignore_history_messages: false,
            decrypt_failure_text:
                "This message was sent from another device and could not be decrypted here. \
                 Open WhatsApp on your phone to read it."
                    .to_string(),
            decrypt_exhausted_text: "We could not read your last message, please send it again."
                .to_string(),
            webhooks: Vec::new(),
        }
    }
}

/// Flare Cloud Bridge 应用配置主结构体
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BridgeAppConfig {
    pub service: ServiceConfig,
    pub logging: LoggingConfig,
    /// Redis 配置映射
    pub redis: HashMap<String, RedisPoolConfig>,
    pub store: StoreConfig,
    pub identity: IdentityConfig,
    pub correlation: CorrelationConfig,
    pub status: StatusConfig,
    pub dedup: DedupConfig,
    pub webhook: WebhookSettings,
    /// 所有会话共享的默认租户配置
    pub tenant_defaults: TenantConfig,
    /// 按会话号码覆盖的租户配置片段
    pub sessions: HashMap<String, toml::Table>,
}

impl BridgeAppConfig {
    /// 获取 Redis 配置
    pub fn redis_profile(&self, name: &str) -> Option<&RedisPoolConfig> {
        self.redis.get(name)
    }

    /// 合并默认租户配置与会话覆盖，得到指定会话的租户配置
    pub fn tenant_for(&self, session: &str) -> Result<TenantConfig> {
        let Some(overrides) = self.sessions.get(session) else {
            return Ok(self.tenant_defaults.clone());
        };

        let mut merged = Value::try_from(&self.tenant_defaults)
            .context("unable to serialise tenant defaults")?;
        merge_value(&mut merged, Value::Table(overrides.clone()));
        merged
            .try_into()
            .with_context(|| format!("invalid tenant configuration for session {session}"))
    }

    /// 校验配置间引用与取值
    pub fn validate(&self) -> Result<()> {
        if self.dedup.window_ms == 0 {
            return Err(anyhow!("dedup.window_ms must be greater than zero"));
        }

        if self.store.backend == StoreBackend::Redis {
            let profile = self
                .store
                .redis_profile
                .as_deref()
                .ok_or_else(|| anyhow!("store.redis_profile is required for redis backend"))?;
            if self.redis_profile(profile).is_none() {
                return Err(anyhow!("store.redis_profile references unknown profile {profile}"));
            }
        }

        validate_destinations("tenant_defaults", &self.tenant_defaults.webhooks)?;
        for session in self.sessions.keys() {
            let tenant = self.tenant_for(session)?;
            validate_destinations(session, &tenant.webhooks)?;
        }

        Ok(())
    }
}

fn validate_destinations(scope: &str, destinations: &[WebhookDestination]) -> Result<()> {
    let mut seen = HashSet::new();
    for destination in destinations {
        if destination.url.trim().is_empty() {
            return Err(anyhow!(
                "webhook {} in {scope} has no url",
                destination.id
            ));
        }
        if !seen.insert(destination.id.as_str()) {
            return Err(anyhow!(
                "duplicate webhook id {} in {scope}",
                destination.id
            ));
        }
    }
    Ok(())
}

/// 目录布局中依次合并的片段子目录
const FRAGMENT_DIRS: [&str; 3] = ["shared", "sessions", "overrides"];

/// 加载进程级配置
///
/// 未指定路径时依次尝试 `config/` 与 `config.toml`，全部失败则使用默认值。
/// 随后叠加 `config/environments/{FLARE_ENV}.toml`。
pub fn load_config(path: Option<&str>) -> &'static BridgeAppConfig {
    APP_CONFIG.get_or_init(|| {
        let candidates = match path {
            Some(p) => vec![PathBuf::from(p)],
            None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
        };
        let mut cfg = candidates
            .iter()
            .find_map(|candidate| match load_config_from_path(candidate) {
                Ok(cfg) => Some(cfg),
                Err(err) => {
                    warn!(path = %candidate.display(), error = %format!("{err:#}"), "config source skipped");
                    None
                }
            })
            .unwrap_or_else(|| {
                warn!("no usable config source, using built-in defaults");
                BridgeAppConfig::default()
            });

        if let Err(err) = ConfigManager::load_environment_config(&mut cfg) {
            warn!(error = %format!("{err:#}"), "environment overlay skipped");
        }
        cfg
    })
}

/// 已加载的进程级配置
pub fn app_config() -> Option<&'static BridgeAppConfig> {
    APP_CONFIG.get()
}

/// 从单个文件或分层目录加载配置
pub fn load_config_from_path(path: &Path) -> Result<BridgeAppConfig> {
    if !path.exists() {
        bail!("config path {} not found", path.display());
    }
    let root = if path.is_dir() {
        read_layered(path)?
    } else {
        read_table(path)?
    };
    root.try_into()
        .with_context(|| format!("bridge config in {} does not match the schema", path.display()))
}

/// `base.toml` 打底，再按子目录、文件名顺序叠加片段
fn read_layered(dir: &Path) -> Result<Value> {
    let mut root = read_table(&dir.join("base.toml"))?;
    for sub in FRAGMENT_DIRS {
        for fragment in toml_files(&dir.join(sub))? {
            merge_value(&mut root, read_table(&fragment)?);
        }
    }
    Ok(root)
}

fn toml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("cannot list {}", dir.display()))? {
        let file = entry?.path();
        if file
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
        {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

fn read_table(path: &Path) -> Result<Value> {
    let text =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let value: Value =
        toml::from_str(&text).with_context(|| format!("{} is not valid TOML", path.display()))?;
    if !value.is_table() {
        bail!("{} must contain a TOML table", path.display());
    }
    Ok(value)
}

/// 表按键递归合并，其他类型（含数组）整体覆盖
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base), Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
