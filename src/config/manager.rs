//! 按运行环境叠加配置

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use toml::Value;

use super::{BridgeAppConfig, merge_value};

/// 环境覆盖文件所在目录
const ENVIRONMENTS_DIR: &str = "config/environments";

pub struct ConfigManager;

impl ConfigManager {
    /// `FLARE_ENV`，缺省为 `development`
    pub fn get_environment() -> String {
        env::var("FLARE_ENV").unwrap_or_else(|_| "development".to_string())
    }

    pub fn environment_file(environment: &str) -> PathBuf {
        Path::new(ENVIRONMENTS_DIR).join(format!("{environment}.toml"))
    }

    /// 叠加 `config/environments/{FLARE_ENV}.toml`
    pub fn load_environment_config(base_config: &mut BridgeAppConfig) -> Result<()> {
        let path = Self::environment_file(&Self::get_environment());
        Self::apply_overlay_file(base_config, &path)
    }

    /// 文件不存在时什么也不做；合并失败时原配置保持不变
    pub fn apply_overlay_file(base_config: &mut BridgeAppConfig, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Ok(());
        }

        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read overlay {}", path.display()))?;
        let overlay: Value = toml::from_str(&text)
            .with_context(|| format!("overlay {} is not valid TOML", path.display()))?;

        let mut merged =
            Value::try_from(&*base_config).context("cannot serialise current config")?;
        merge_value(&mut merged, overlay);
        *base_config = merged
            .try_into()
            .with_context(|| format!("overlay {} breaks the config schema", path.display()))?;

        tracing::info!(path = %path.display(), "environment overlay applied");
        Ok(())
    }
}
