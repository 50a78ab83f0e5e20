//! Telegram WebApp initData 校验
//!
//! 校验流程：
//! 1. 按 `application/x-www-form-urlencoded` 解析 initData，取出 `hash`
//! 2. 其余字段按 key 字节序排序，拼成 `key=value` 并以 `\n` 连接（data-check-string）
//! 3. secret_key = HMAC-SHA256(key = "WebAppData", data = bot_token)
//! 4. 期望签名 = HMAC-SHA256(key = secret_key, data = data-check-string)
//! 5. 常量时间比较签名，然后检查 `auth_date` 时效和 `user` 字段
//!
//! 所有失败对外表现一致，具体原因只在 [`AuthError::reason`] 中保留。

use crate::clock::{Clock, SystemClock};
use crate::error::{AuthError, Error, RejectReason, Result};
use crate::security::constant_time_eq;
use crate::types::{ParsedInitData, TelegramUser};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::debug;
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

const WEB_APP_DATA: &[u8] = b"WebAppData";

/// 默认允许的 initData 最大时长（秒）
pub const DEFAULT_MAX_AUTH_AGE_SECS: u64 = 86_400;

/// 校验选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    /// `auth_date` 距今的最大秒数（含边界）
    pub max_auth_age_secs: u64,
    /// 是否允许缺少 `user` 字段
    pub allow_missing_user: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            max_auth_age_secs: DEFAULT_MAX_AUTH_AGE_SECS,
            allow_missing_user: false,
        }
    }
}

/// initData 校验器，不持有可变状态
#[derive(Clone)]
pub struct InitDataVerifier {
    clock: Arc<dyn Clock>,
    options: VerifyOptions,
}

impl Default for InitDataVerifier {
    fn default() -> Self {
        Self::new(VerifyOptions::default())
    }
}

impl InitDataVerifier {
    /// 使用系统时钟创建校验器
    pub fn new(options: VerifyOptions) -> Self {
        Self::with_clock(Arc::new(SystemClock), options)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, options: VerifyOptions) -> Self {
        Self { clock, options }
    }

    pub fn options(&self) -> &VerifyOptions {
        &self.options
    }

    /// 校验 initData，任何失败都返回 `None`
    pub fn verify(&self, payload: &str, bot_token: &str) -> Option<ParsedInitData> {
        self.try_verify(payload, bot_token).ok()
    }

    /// 校验 initData，失败时返回带错误码的 [`AuthError`]
    pub fn try_verify(
        &self,
        payload: &str,
        bot_token: &str,
    ) -> std::result::Result<ParsedInitData, AuthError> {
        if payload.is_empty() {
            return Err(AuthError::MissingInitData);
        }
        if bot_token.is_empty() {
            return Err(AuthError::BotNotConfigured);
        }

        let mut pairs = parse_pairs(payload);
        let mut hash = None;
        pairs.retain(|(key, value)| {
            if key == "hash" {
                if hash.is_none() {
                    hash = Some(value.clone());
                }
                false
            } else {
                true
            }
        });
        let hash = hash.ok_or(AuthError::InvalidAuth(RejectReason::MissingHash))?;

        let expected = compute_signature(&pairs, bot_token)
            .map_err(|_| AuthError::InvalidAuth(RejectReason::BadSignature))?;
        // 非法 hex 解码为空，与期望值比较必然失败
        let supplied = hex::decode(&hash).unwrap_or_default();
        if !constant_time_eq(&expected, &supplied) {
            return Err(AuthError::InvalidAuth(RejectReason::BadSignature));
        }

        let auth_date = field(&pairs, "auth_date")
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|date| *date > 0)
            .ok_or(AuthError::InvalidAuth(RejectReason::BadAuthDate))?;

        let age = self.clock.now_secs().saturating_sub(auth_date);
        if age > self.options.max_auth_age_secs {
            return Err(AuthError::InvalidAuth(RejectReason::Expired));
        }

        let user = match field(&pairs, "user") {
            Some(raw) => Some(
                serde_json::from_str::<TelegramUser>(raw)
                    .ok()
                    .filter(|user| user.id > 0)
                    .ok_or(AuthError::InvalidAuth(RejectReason::BadUser))?,
            ),
            None if self.options.allow_missing_user => None,
            None => return Err(AuthError::InvalidAuth(RejectReason::MissingUser)),
        };

        debug!(
            "Init data verified (user: {:?}, age: {}s)",
            user.as_ref().map(|u| u.id),
            age
        );

        Ok(ParsedInitData {
            user,
            auth_date,
            query_id: field(&pairs, "query_id").map(str::to_string),
            chat_type: field(&pairs, "chat_type").map(str::to_string),
            chat_instance: field(&pairs, "chat_instance").map(str::to_string),
            start_param: field(&pairs, "start_param").map(str::to_string),
            hash,
        })
    }
}

/// 使用系统时钟校验 initData
pub fn verify_init_data(
    payload: &str,
    bot_token: &str,
    options: &VerifyOptions,
) -> Option<ParsedInitData> {
    InitDataVerifier::new(*options).verify(payload, bot_token)
}

/// 构造 data-check-string，调用方需先去掉 `hash`
pub fn data_check_string(pairs: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = pairs.iter().collect();
    sorted.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
    sorted
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 由 bot token 派生签名密钥：HMAC-SHA256，密钥为常量 `WebAppData`，数据为 bot token
pub fn derive_secret_key(bot_token: &str) -> Result<[u8; 32]> {
    hmac_sha256(WEB_APP_DATA, bot_token.as_bytes())
}

/// 对字段签名并编码为 initData，已有的 `hash` 会被替换
pub fn sign_init_data(pairs: &[(String, String)], bot_token: &str) -> Result<String> {
    if bot_token.is_empty() {
        return Err(Error::InvalidParam("bot token is empty".to_string()));
    }
    let pairs: Vec<(String, String)> = pairs
        .iter()
        .filter(|(key, _)| key != "hash")
        .cloned()
        .collect();
    let signature = compute_signature(&pairs, bot_token)?;

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key, value);
    }
    serializer.append_pair("hash", &hex::encode(signature));
    Ok(serializer.finish())
}

fn compute_signature(pairs: &[(String, String)], bot_token: &str) -> Result<[u8; 32]> {
    let secret_key = derive_secret_key(bot_token)?;
    hmac_sha256(&secret_key, data_check_string(pairs).as_bytes())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| Error::Encoding(e.to_string()))?;
    mac.update(data);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}

fn parse_pairs(payload: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(payload.as_bytes())
        .into_owned()
        .collect()
}

fn field<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
