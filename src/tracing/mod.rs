//! 日志初始化
//!
//! `RUST_LOG` 优先于配置中的级别；`format = "json"` 时输出结构化 JSON。

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// 安装全局 fmt subscriber，重复调用（例如测试中）只记录一条 debug 日志
pub fn init_tracing_from_config(logging_config: Option<&LoggingConfig>) {
    let fallback = LoggingConfig::default();
    let config = logging_config.unwrap_or(&fallback);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file)
        .with_line_number(config.with_line_number);

    let installed = match config.format.to_ascii_lowercase().as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    if let Err(err) = installed {
        tracing::debug!(error = %err, "global subscriber already set");
    }
}
