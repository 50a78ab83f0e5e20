//! 运行配置

use crate::auth::VerifyOptions;
use crate::error::{Error, Result};
use crate::predictor::PredictorConfig;
use std::path::PathBuf;

pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_MAX_AUTH_AGE: &str = "TMA_INIT_DATA_MAX_AGE";
pub const ENV_ALLOW_MISSING_USER: &str = "TMA_ALLOW_MISSING_USER";
pub const ENV_NAV_STORAGE_KEY: &str = "TMA_NAV_STORAGE_KEY";
pub const ENV_STORAGE_DIR: &str = "TMA_STORAGE_DIR";

/// 鉴权配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthConfig {
    /// bot token，为空表示未配置
    pub bot_token: Option<String>,
    pub verify: VerifyOptions,
}

/// 应用配置
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub auth: AuthConfig,
    pub predictor: PredictorConfig,
    /// 文件存储目录
    pub storage_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            predictor: PredictorConfig::default(),
            storage_dir: PathBuf::from(".tma"),
        }
    }
}

impl AppConfig {
    /// 从环境变量读取，未设置的项使用默认值
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.auth.bot_token = lookup(ENV_BOT_TOKEN)
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        if let Some(raw) = lookup(ENV_MAX_AUTH_AGE) {
            config.auth.verify.max_auth_age_secs = raw.trim().parse().map_err(|_| {
                Error::InvalidParam(format!("{} must be a number of seconds, got {:?}", ENV_MAX_AUTH_AGE, raw))
            })?;
        }

        if let Some(raw) = lookup(ENV_ALLOW_MISSING_USER) {
            config.auth.verify.allow_missing_user = parse_flag(ENV_ALLOW_MISSING_USER, &raw)?;
        }

        if let Some(key) = lookup(ENV_NAV_STORAGE_KEY).filter(|key| !key.is_empty()) {
            config.predictor.storage_key = key;
        }

        if let Some(dir) = lookup(ENV_STORAGE_DIR).filter(|dir| !dir.is_empty()) {
            config.storage_dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::InvalidParam(format!(
            "{} must be a boolean, got {:?}",
            name, other
        ))),
    }
}
