//! 可注入的时钟

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const MILLIS_PER_DAY: u64 = 86_400_000;

/// 墙钟时间来源
pub trait Clock: Send + Sync {
    /// 当前 Unix 毫秒
    fn now_millis(&self) -> u64;

    /// 当前 Unix 秒
    fn now_secs(&self) -> u64 {
        self.now_millis() / 1000
    }
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        // 早于 1970 的系统时间按 0 处理
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// 手动推进的时钟，用于测试衰减和过期
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(secs * 1000)
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn advance_days(&self, days: u64) {
        self.advance(days * MILLIS_PER_DAY);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
