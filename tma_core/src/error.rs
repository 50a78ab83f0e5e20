//! 错误类型定义

use thiserror::Error;

/// 通用错误类型
#[derive(Debug, Error)]
pub enum Error {
    /// 参数错误
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// 编解码错误
    #[error("Encoding/Decoding error: {0}")]
    Encoding(String),

    /// 鉴权错误
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// 存储错误
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 结果类型
pub type Result<T> = std::result::Result<T, Error>;

/// 鉴权失败的内部原因，仅用于服务端日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingHash,
    BadSignature,
    BadAuthDate,
    Expired,
    MissingUser,
    BadUser,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingHash => "missing_hash",
            RejectReason::BadSignature => "bad_signature",
            RejectReason::BadAuthDate => "bad_auth_date",
            RejectReason::Expired => "expired",
            RejectReason::MissingUser => "missing_user",
            RejectReason::BadUser => "bad_user",
        }
    }
}

/// initData 鉴权错误
///
/// `InvalidAuth` 的 `Display` 对所有原因都相同，原因只能通过
/// [`AuthError::reason`] 取得。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// 未提供 initData
    #[error("Missing Telegram init data")]
    MissingInitData,

    /// 未配置 bot token
    #[error("Telegram bot is not configured")]
    BotNotConfigured,

    /// 校验失败
    #[error("Invalid Telegram authentication")]
    InvalidAuth(RejectReason),
}

impl AuthError {
    /// 对外错误码
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingInitData => "MISSING_INIT_DATA",
            AuthError::BotNotConfigured => "BOT_NOT_CONFIGURED",
            AuthError::InvalidAuth(_) => "INVALID_AUTH",
        }
    }

    /// 建议的 HTTP 状态码
    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::BotNotConfigured => 503,
            AuthError::MissingInitData | AuthError::InvalidAuth(_) => 401,
        }
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            AuthError::InvalidAuth(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// 键值存储错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO 错误
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 超出配额
    #[error("Storage quota exceeded ({used} of {limit} bytes)")]
    QuotaExceeded { used: usize, limit: usize },

    /// 存储不可用
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// 存储内容损坏
    #[error("Corrupt stored value under {key}: {message}")]
    Corrupt { key: String, message: String },
}
