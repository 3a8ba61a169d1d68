//! 应用配置模块
//!
//! 所有配置保存在同一个 `config.json` 中，每个模块占一个键。读取失败时使用默认值，
//! 保存时只覆盖自己的键，保留文件中的其他内容。

use crate::core::engine::PlanConfig;
use crate::core::filter::{BatchMode, TransferAction, TransferDirection, DEFAULT_CONCURRENCY};
use crate::core::symlink::{SymlinkPolicy, SymlinkResolver, DEFAULT_MAX_DEPTH};
use crate::core::DEFAULT_CACHE_SIZE;
use crate::error::{Locale, Messages};
use crate::logging::LogConfig;
use crate::storage::share::DEFAULT_MIN_PASSWORD_LENGTH;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_FILE: &str = "config.json";

/// 默认配置目录
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("synctools"))
        .unwrap_or_else(|| PathBuf::from(".synctools"))
}

/// 读取 `config.json` 中的一个键，缺失或格式错误时返回 `None`
pub fn load_section<T: DeserializeOwned>(config_dir: &Path, key: &str) -> Option<T> {
    let content = fs::read_to_string(config_dir.join(CONFIG_FILE)).ok()?;
    let config = serde_json::from_str::<serde_json::Value>(&content).ok()?;
    let section = config.get(key)?;
    serde_json::from_value(section.clone())
        .inspect_err(|e| debug!("配置项 {} 无效，使用默认值: {}", key, e))
        .ok()
}

/// 写入 `config.json` 中的一个键
pub fn save_section<T: Serialize>(config_dir: &Path, key: &str, value: &T) -> io::Result<()> {
    fs::create_dir_all(config_dir)?;
    let config_file = config_dir.join(CONFIG_FILE);

    // 读取现有配置
    let mut config: serde_json::Value = if config_file.exists() {
        let content = fs::read_to_string(&config_file)?;
        serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };
    if !config.is_object() {
        config = serde_json::json!({});
    }

    config[key] = serde_json::to_value(value).map_err(io::Error::other)?;
    let content = serde_json::to_string_pretty(&config).map_err(io::Error::other)?;
    fs::write(&config_file, content)
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// 每个会话缓存的目录数上限
    #[serde(default = "default_cache_size")]
    pub size: usize,
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
        }
    }
}

impl CacheConfig {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "cache").unwrap_or_default()
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "cache", self)
    }
}

/// 传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferConfig {
    pub download_action: TransferAction,
    pub upload_action: TransferAction,
    pub symlinks: SymlinkPolicy,
    /// 并发判定数
    pub concurrency: usize,
    pub batch_mode: BatchMode,
    pub max_symlink_depth: usize,
    /// 排除规则（glob patterns）
    pub exclude_patterns: Vec<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_action: TransferAction::Skip,
            upload_action: TransferAction::Skip,
            symlinks: SymlinkPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            batch_mode: BatchMode::Continue,
            max_symlink_depth: DEFAULT_MAX_DEPTH,
            exclude_patterns: PlanConfig::default().exclude_patterns,
        }
    }
}

impl TransferConfig {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "transfer").unwrap_or_default()
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "transfer", self)
    }

    pub fn action(&self, direction: TransferDirection) -> TransferAction {
        match direction {
            TransferDirection::Download => self.download_action,
            TransferDirection::Upload => self.upload_action,
        }
    }

    pub fn symlink_resolver(&self) -> SymlinkResolver {
        SymlinkResolver::new(self.symlinks).with_max_depth(self.max_symlink_depth)
    }

    pub fn plan_config(&self) -> PlanConfig {
        PlanConfig {
            concurrency: self.concurrency.max(1),
            batch_mode: self.batch_mode,
            exclude_patterns: self.exclude_patterns.clone(),
        }
    }
}

/// 共享链接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareConfig {
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

fn default_min_password_length() -> usize {
    DEFAULT_MIN_PASSWORD_LENGTH
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            min_password_length: default_min_password_length(),
        }
    }
}

/// 全部配置
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub transfer: TransferConfig,
    pub share: ShareConfig,
    pub locale: Locale,
    pub log: LogConfig,
}

impl AppConfig {
    pub fn load(config_dir: &Path) -> Self {
        Self {
            cache: CacheConfig::load(config_dir),
            transfer: TransferConfig::load(config_dir),
            share: load_section(config_dir, "share").unwrap_or_default(),
            locale: load_section(config_dir, "locale").unwrap_or_default(),
            log: LogConfig::load(config_dir),
        }
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        self.cache.save(config_dir)?;
        self.transfer.save(config_dir)?;
        save_section(config_dir, "share", &self.share)?;
        save_section(config_dir, "locale", &self.locale)?;
        self.log.save(config_dir)
    }

    pub fn messages(&self) -> Messages {
        Messages::new(self.locale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path());
        assert_eq!(config.cache.size, DEFAULT_CACHE_SIZE);
        assert_eq!(config.transfer.download_action, TransferAction::Skip);
        assert_eq!(config.share.min_password_length, 10);
        assert_eq!(config.locale, Locale::ZhCn);
    }

    #[test]
    fn test_save_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"data_path": "/tmp/elsewhere", "cache": {"size": 5}}"#,
        )
        .unwrap();

        let mut config = AppConfig::load(dir.path());
        assert_eq!(config.cache.size, 5);
        config.transfer.download_action = TransferAction::Resume;
        config.transfer.symlinks = SymlinkPolicy::Follow;
        config.locale = Locale::En;
        config.save(dir.path()).unwrap();

        let reloaded = AppConfig::load(dir.path());
        assert_eq!(reloaded.transfer.download_action, TransferAction::Resume);
        assert_eq!(reloaded.transfer.symlinks, SymlinkPolicy::Follow);
        assert_eq!(reloaded.locale, Locale::En);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap()).unwrap();
        assert_eq!(raw["data_path"], "/tmp/elsewhere");
        assert_eq!(raw["transfer"]["downloadAction"], "resume");
        assert_eq!(raw["locale"], "en");
    }

    #[test]
    fn test_invalid_section_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"transfer": {"downloadAction": 42}, "share": {"minPasswordLength": 12}}"#,
        )
        .unwrap();
        let config = AppConfig::load(dir.path());
        assert_eq!(config.transfer.download_action, TransferAction::Skip);
        assert_eq!(config.share.min_password_length, 12);
        assert_eq!(config.transfer.plan_config().concurrency, DEFAULT_CONCURRENCY);
    }
}
