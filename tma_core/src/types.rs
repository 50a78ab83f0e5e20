//! 数据类型定义

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Telegram 用户信息（initData 中的 `user` 字段）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_premium: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allows_write_to_pm: Option<bool>,
    /// 其余字段原样保留
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TelegramUser {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            first_name: None,
            last_name: None,
            username: None,
            language_code: None,
            photo_url: None,
            is_premium: None,
            allows_write_to_pm: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// 校验通过的 initData
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedInitData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<TelegramUser>,
    pub auth_date: u64,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_param: Option<String>,
}

/// 一条导航记录，由 `(from, to)` 唯一确定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationPattern {
    pub from: String,
    pub to: String,
    /// 衰减后为小数
    pub count: f64,
    /// Unix 毫秒
    #[serde(rename = "lastVisit")]
    pub last_visit: u64,
}

/// 以来源位置分桶的导航表
pub type PatternTable = BTreeMap<String, Vec<NavigationPattern>>;

/// 预测器统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PredictorStats {
    #[serde(rename = "totalPatterns")]
    pub total_patterns: usize,
    #[serde(rename = "uniquePaths")]
    pub unique_paths: usize,
}
