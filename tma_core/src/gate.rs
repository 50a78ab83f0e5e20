//! 请求鉴权入口
//!
//! 从请求头、请求体或查询参数中取出 initData 并校验，供 HTTP 中间件调用。
//! 状态码映射见 [`AuthError::http_status`]。

use crate::auth::InitDataVerifier;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::types::ParsedInitData;
use tracing::warn;
use url::form_urlencoded;

/// 携带 initData 的请求头
pub const INIT_DATA_HEADER: &str = "X-Telegram-Init-Data";
/// 请求体和查询参数中的字段名
pub const INIT_DATA_FIELD: &str = "initData";

/// initData 的来源，优先级：请求头 > 请求体 > 查询参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitDataSource {
    pub header: Option<String>,
    pub body: Option<String>,
    pub query: Option<String>,
}

impl InitDataSource {
    pub fn from_header(value: impl Into<String>) -> Self {
        Self {
            header: Some(value.into()),
            ..Self::default()
        }
    }

    /// 从原始查询串中取 `initData` 参数
    pub fn with_query_string(mut self, query_string: &str) -> Self {
        self.query = form_urlencoded::parse(query_string.trim_start_matches('?').as_bytes())
            .find(|(key, _)| key == INIT_DATA_FIELD)
            .map(|(_, value)| value.into_owned());
        self
    }

    pub fn with_body(mut self, value: impl Into<String>) -> Self {
        self.body = Some(value.into());
        self
    }

    fn pick(&self) -> Option<&str> {
        [&self.header, &self.body, &self.query]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|value| !value.is_empty())
    }
}

/// 鉴权入口
#[derive(Clone)]
pub struct AuthGate {
    bot_token: Option<String>,
    verifier: InitDataVerifier,
}

impl AuthGate {
    pub fn new(bot_token: Option<String>, verifier: InitDataVerifier) -> Self {
        Self {
            bot_token: bot_token.filter(|token| !token.is_empty()),
            verifier,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.bot_token.clone(), InitDataVerifier::new(config.verify))
    }

    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some()
    }

    /// 校验请求携带的 initData
    pub fn authenticate(&self, source: &InitDataSource) -> Result<ParsedInitData, AuthError> {
        let Some(token) = self.bot_token.as_deref() else {
            warn!("Telegram bot token is not configured, rejecting request");
            return Err(AuthError::BotNotConfigured);
        };
        let Some(payload) = source.pick() else {
            return Err(AuthError::MissingInitData);
        };

        self.verifier.try_verify(payload, token).map_err(|e| {
            warn!(
                "Rejected Telegram init data: {} ({})",
                e.code(),
                e.reason().map(|r| r.as_str()).unwrap_or("-")
            );
            e
        })
    }
}
