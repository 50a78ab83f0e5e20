//! 多任务共享的导航预测器
//!
//! 内部用 `RwLock` 保护导航表。历史数据在后台加载，加载完成前预测器照常
//! 工作（预测结果为空或只含新记录），加载完成后合并进内存表。

use crate::clock::Clock;
use crate::predictor::{read_table, NavigationPredictor, PredictorConfig};
use crate::storage::KeyValueStore;
use crate::types::PredictorStats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

/// 可在多个任务间克隆共享的预测器
#[derive(Clone)]
pub struct SharedPredictor {
    inner: Arc<RwLock<NavigationPredictor>>,
    ready: watch::Receiver<bool>,
    cleared: Arc<AtomicBool>,
}

impl SharedPredictor {
    /// 立即返回，并在后台加载历史数据。不在 tokio 运行时内时改为同步加载。
    pub fn open(
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: PredictorConfig,
    ) -> Self {
        Self::warm_up(NavigationPredictor::detached(storage, clock, config))
    }

    /// 对未加载的预测器启动后台加载，加载完成前不写存储
    pub fn warm_up(mut predictor: NavigationPredictor) -> Self {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No tokio runtime, loading navigation patterns synchronously");
            predictor.load_from_storage();
            return Self::from_loaded(predictor);
        };

        let storage = predictor.storage();
        let key = predictor.config().storage_key.clone();
        let inner = Arc::new(RwLock::new(predictor));
        let cleared = Arc::new(AtomicBool::new(false));
        let (tx, rx) = watch::channel(false);

        let task_inner = Arc::clone(&inner);
        let task_cleared = Arc::clone(&cleared);
        handle.spawn(async move {
            let loaded =
                tokio::task::spawn_blocking(move || read_table(storage.as_ref(), &key)).await;

            let mut predictor = task_inner.write().await;
            match loaded {
                // 加载完成前已经清空过，丢弃旧数据
                Ok(Ok(_)) if task_cleared.load(Ordering::SeqCst) => {
                    debug!("Predictor cleared before warm-up finished, dropping stored patterns");
                }
                Ok(Ok(table)) => {
                    predictor.merge(table);
                    debug!(
                        "Predictor warmed up with {} patterns",
                        predictor.stats().total_patterns
                    );
                }
                Ok(Err(e)) => predictor.abandon_load(Some(&e)),
                Err(e) => {
                    warn!("Navigation pattern load task failed: {}", e);
                    predictor.abandon_load(None);
                }
            }
            drop(predictor);
            let _ = tx.send(true);
        });

        Self {
            inner,
            ready: rx,
            cleared,
        }
    }

    /// 包装已加载的预测器
    pub fn from_loaded(predictor: NavigationPredictor) -> Self {
        let (_tx, rx) = watch::channel(true);
        Self {
            inner: Arc::new(RwLock::new(predictor)),
            ready: rx,
            cleared: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// 等待后台加载结束
    pub async fn ready(&self) {
        let mut rx = self.ready.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    pub async fn record_navigation(&self, from: &str, to: &str) {
        self.inner.write().await.record_navigation(from, to);
    }

    pub async fn set_current_path(&self, path: &str) {
        self.inner.write().await.set_current_path(path);
    }

    pub async fn current_path(&self) -> Option<String> {
        self.inner.read().await.current_path().map(str::to_string)
    }

    pub async fn predict(
        &self,
        current: &str,
        max_results: usize,
        min_confidence: f64,
    ) -> Vec<String> {
        self.inner
            .read()
            .await
            .predict(current, max_results, min_confidence)
    }

    pub async fn stats(&self) -> PredictorStats {
        self.inner.read().await.stats()
    }

    pub async fn clear(&self) {
        let mut predictor = self.inner.write().await;
        self.cleared.store(true, Ordering::SeqCst);
        predictor.clear();
    }
}
