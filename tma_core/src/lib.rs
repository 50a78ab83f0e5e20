//! Telegram Mini App 核心库
//!
//! 提供：
//! - Telegram WebApp initData 签名校验（HMAC-SHA256）
//! - 基于跳转频率和时间衰减的导航预测（用于预取）
//! - 可替换的键值存储后端

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod predictor;
pub mod security;
pub mod shared;
pub mod storage;
pub mod types;

pub use auth::{sign_init_data, verify_init_data, InitDataVerifier, VerifyOptions};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, AuthConfig};
pub use error::{AuthError, Error, RejectReason, Result, StorageError};
pub use gate::{AuthGate, InitDataSource};
pub use predictor::{NavigationPredictor, PredictorConfig, StorageErrorHook};
pub use shared::SharedPredictor;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use types::*;
