//! 导航预测器
//!
//! 记录位置之间的跳转次数，按时间指数衰减旧数据，并根据当前位置给出
//! 按置信度排序的下一跳候选，供预取使用。
//!
//! 存储格式：`{ [from]: [{ from, to, count, lastVisit }] }`，整体序列化为一个
//! JSON 字符串写入 [`KeyValueStore`]。存储读写失败只交给错误回调，不向调用方传播。

use crate::clock::{Clock, MILLIS_PER_DAY};
use crate::error::StorageError;
use crate::storage::KeyValueStore;
use crate::types::{NavigationPattern, PatternTable, PredictorStats};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 存储错误回调
pub type StorageErrorHook = Arc<dyn Fn(&StorageError) + Send + Sync>;

/// 预测器配置
#[derive(Debug, Clone, PartialEq)]
pub struct PredictorConfig {
    /// 存储键
    pub storage_key: String,
    /// 每天的衰减系数
    pub decay_factor: f64,
    /// 低于该计数的记录被删除
    pub prune_threshold: f64,
    /// 序列化后的最大字节数
    pub max_storage_bytes: usize,
    /// 超过该天数未访问视为过期
    pub stale_after_days: u64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            storage_key: "nav-patterns".to_string(),
            decay_factor: 0.9,
            prune_threshold: 0.5,
            max_storage_bytes: 50 * 1024,
            stale_after_days: 7,
        }
    }
}

/// 导航预测器
pub struct NavigationPredictor {
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: PredictorConfig,
    patterns: PatternTable,
    current_path: Option<String>,
    on_storage_error: StorageErrorHook,
    /// 存储中的数据尚未读入前不写存储，避免覆盖历史
    loaded: bool,
}

impl NavigationPredictor {
    /// 创建预测器并同步加载已存储的数据
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: PredictorConfig,
    ) -> Self {
        let mut predictor = Self::detached(storage, clock, config);
        predictor.load_from_storage();
        predictor
    }

    /// 创建空预测器，不读取存储。在 [`load_from_storage`](Self::load_from_storage)
    /// 或 [`merge`](Self::merge) 之前只在内存中记录。
    pub fn detached(
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: PredictorConfig,
    ) -> Self {
        Self {
            storage,
            clock,
            config,
            patterns: PatternTable::new(),
            current_path: None,
            on_storage_error: default_hook(),
            loaded: false,
        }
    }

    pub fn with_error_hook(mut self, hook: StorageErrorHook) -> Self {
        self.on_storage_error = hook;
        self
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn storage(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.storage)
    }

    pub fn patterns(&self) -> &PatternTable {
        &self.patterns
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// 用存储中的数据替换内存表，读取失败或数据损坏时内存表为空
    pub fn load_from_storage(&mut self) {
        self.loaded = true;
        match read_table(self.storage.as_ref(), &self.config.storage_key) {
            Ok(table) => {
                self.patterns = table;
                info!(
                    "Loaded {} navigation patterns",
                    self.stats().total_patterns
                );
            }
            Err(e) => {
                self.patterns = PatternTable::new();
                (self.on_storage_error)(&e);
            }
        }
    }

    /// 记录一次 `from -> to` 跳转，自环忽略
    pub fn record_navigation(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }

        let now = self.clock.now_millis();
        let decay_factor = self.config.decay_factor;
        let threshold = self.config.prune_threshold;

        let bucket = self.patterns.entry(from.to_string()).or_default();
        match bucket.iter_mut().find(|p| p.to == to) {
            Some(pattern) => {
                pattern.count += 1.0;
                pattern.last_visit = now;
            }
            None => bucket.push(NavigationPattern {
                from: from.to_string(),
                to: to.to_string(),
                count: 1.0,
                last_visit: now,
            }),
        }

        for pattern in bucket.iter_mut() {
            pattern.count = decayed_count(decay_factor, pattern.count, pattern.last_visit, now);
        }
        bucket.retain(|p| p.count >= threshold);
        if bucket.is_empty() {
            self.patterns.remove(from);
        }

        debug!("Recorded navigation {} -> {}", from, to);
        self.persist();
    }

    /// 预测 `current` 之后最可能访问的位置
    ///
    /// 存储的计数在上次记录该来源时已衰减过，这里只补上此后经过的时间：
    /// 以桶内最近一次访问为起点统一衰减，低于删除阈值的记录不参与。
    /// 置信度相同时按目标位置字典序排列。
    pub fn predict(&self, current: &str, max_results: usize, min_confidence: f64) -> Vec<String> {
        if max_results == 0 {
            return Vec::new();
        }
        let Some(bucket) = self.patterns.get(current) else {
            return Vec::new();
        };

        let now = self.clock.now_millis();
        let min_confidence = if min_confidence.is_nan() {
            0.0
        } else {
            min_confidence.clamp(0.0, 1.0)
        };

        let bucket_visit = bucket.iter().map(|p| p.last_visit).max().unwrap_or(now);
        let factor = decayed_count(self.config.decay_factor, 1.0, bucket_visit, now);

        let effective: Vec<(&str, f64)> = bucket
            .iter()
            .map(|p| (p.to.as_str(), p.count * factor))
            .filter(|(_, count)| *count >= self.config.prune_threshold)
            .collect();

        let total: f64 = effective.iter().map(|(_, count)| count).sum();
        if total <= 0.0 {
            return Vec::new();
        }

        let mut ranked: Vec<(&str, f64)> = effective
            .into_iter()
            .map(|(to, count)| (to, count / total))
            .filter(|(_, confidence)| *confidence >= min_confidence)
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        ranked
            .into_iter()
            .take(max_results)
            .map(|(to, _)| to.to_string())
            .collect()
    }

    /// 更新当前位置，与上一个位置不同时记录一次跳转
    pub fn set_current_path(&mut self, path: &str) {
        if let Some(previous) = self.current_path.take() {
            if previous != path {
                self.record_navigation(&previous, path);
            }
        }
        self.current_path = Some(path.to_string());
    }

    pub fn current_path(&self) -> Option<&str> {
        self.current_path.as_deref()
    }

    /// 清空内存表和存储
    pub fn clear(&mut self) {
        self.patterns.clear();
        self.current_path = None;
        // 清空后内存表即为权威数据
        self.loaded = true;
        if let Err(e) = self.storage.remove(&self.config.storage_key) {
            (self.on_storage_error)(&e);
        }
        info!("Navigation patterns cleared");
    }

    pub fn stats(&self) -> PredictorStats {
        PredictorStats {
            total_patterns: self.patterns.values().map(Vec::len).sum(),
            unique_paths: self.patterns.len(),
        }
    }

    /// 合并延迟加载的数据：同一 `(from, to)` 计数相加，保留较新的访问时间
    pub fn merge(&mut self, loaded: PatternTable) {
        self.loaded = true;
        let had_local = !self.patterns.is_empty();
        for (from, patterns) in loaded {
            let bucket = self.patterns.entry(from).or_default();
            for pattern in patterns {
                match bucket.iter_mut().find(|p| p.to == pattern.to) {
                    Some(existing) => {
                        existing.count += pattern.count;
                        existing.last_visit = existing.last_visit.max(pattern.last_visit);
                    }
                    None => bucket.push(pattern),
                }
            }
        }
        // 只有加载前已记录过数据时，内存表才与存储不同
        if had_local {
            self.persist();
        }
    }

    /// 删除超过 `stale_after_days` 未访问的记录，返回删除条数
    pub fn prune_stale(&mut self) -> usize {
        let now = self.clock.now_millis();
        let max_age = self.config.stale_after_days.saturating_mul(MILLIS_PER_DAY);
        let mut removed = 0;
        for bucket in self.patterns.values_mut() {
            let before = bucket.len();
            bucket.retain(|p| now.saturating_sub(p.last_visit) <= max_age);
            removed += before - bucket.len();
        }
        self.patterns.retain(|_, bucket| !bucket.is_empty());
        removed
    }

    /// 后台加载失败时放弃历史数据，之后正常写存储
    pub(crate) fn abandon_load(&mut self, e: Option<&StorageError>) {
        self.loaded = true;
        if let Some(e) = e {
            (self.on_storage_error)(e);
        }
        if !self.patterns.is_empty() {
            self.persist();
        }
    }

    fn persist(&mut self) {
        if !self.loaded {
            return;
        }
        let serialized = match serde_json::to_string(&self.patterns) {
            Ok(serialized) => serialized,
            Err(e) => {
                (self.on_storage_error)(&StorageError::Corrupt {
                    key: self.config.storage_key.clone(),
                    message: e.to_string(),
                });
                return;
            }
        };

        if serialized.len() > self.config.max_storage_bytes {
            let removed = self.prune_stale();
            warn!(
                "Navigation patterns exceed {} bytes ({}), pruned {} stale entries",
                self.config.max_storage_bytes,
                serialized.len(),
                removed
            );
            return;
        }

        if let Err(e) = self.storage.set(&self.config.storage_key, &serialized) {
            (self.on_storage_error)(&e);
        }
    }
}

/// 读取并解析存储中的导航表，不存在时返回空表
pub fn read_table(storage: &dyn KeyValueStore, key: &str) -> Result<PatternTable, StorageError> {
    let Some(raw) = storage.get(key)? else {
        return Ok(PatternTable::new());
    };
    let mut table: PatternTable =
        serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;
    for bucket in table.values_mut() {
        bucket.retain(|p| p.count.is_finite() && p.count >= 0.0);
    }
    table.retain(|_, bucket| !bucket.is_empty());
    Ok(table)
}

fn decayed_count(decay_factor: f64, count: f64, last_visit: u64, now: u64) -> f64 {
    let days = now.saturating_sub(last_visit) as f64 / MILLIS_PER_DAY as f64;
    if days > 1.0 {
        count * decay_factor.powf(days)
    } else {
        count
    }
}

fn default_hook() -> StorageErrorHook {
    Arc::new(|e: &StorageError| warn!("Navigation pattern storage failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{MemoryStore, MockKeyValueStore};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    const T0: u64 = 1_700_000_000_000;

    fn setup() -> (NavigationPredictor, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let predictor =
            NavigationPredictor::new(store.clone(), clock.clone(), PredictorConfig::default());
        (predictor, store, clock)
    }

    fn counting_hook() -> (StorageErrorHook, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let hook: StorageErrorHook = Arc::new(move |_: &StorageError| {
            seen.fetch_add(1, AtomicOrdering::SeqCst);
        });
        (hook, calls)
    }

    #[test]
    fn test_learns_and_forgets() {
        let (mut predictor, _, clock) = setup();
        for _ in 0..5 {
            predictor.record_navigation("/a", "/b");
        }
        assert_eq!(predictor.predict("/a", 1, 0.1), vec!["/b".to_string()]);

        clock.advance_days(30);
        assert!(predictor.predict("/a", 1, 0.1).is_empty());
    }

    #[test]
    fn test_confidence_filtering_and_order() {
        let (mut predictor, _, _) = setup();
        for _ in 0..3 {
            predictor.record_navigation("/a", "/b");
        }
        predictor.record_navigation("/a", "/c");

        assert_eq!(predictor.predict("/a", 5, 0.5), vec!["/b".to_string()]);
        assert_eq!(
            predictor.predict("/a", 5, 0.0),
            vec!["/b".to_string(), "/c".to_string()]
        );
        assert_eq!(predictor.predict("/a", 1, 0.0), vec!["/b".to_string()]);
        assert!(predictor.predict("/a", 0, 0.0).is_empty());
    }

    #[test]
    fn test_ties_break_by_destination() {
        let (mut predictor, _, _) = setup();
        predictor.record_navigation("/", "/zeta");
        predictor.record_navigation("/", "/alpha");
        predictor.record_navigation("/", "/mid");
        assert_eq!(
            predictor.predict("/", 3, 0.0),
            vec!["/alpha".to_string(), "/mid".to_string(), "/zeta".to_string()]
        );
    }

    #[test]
    fn test_unknown_location_predicts_nothing() {
        let (predictor, _, _) = setup();
        assert!(predictor.predict("/nowhere", 3, 0.0).is_empty());
    }

    #[test]
    fn test_self_loop_is_noop() {
        let (mut predictor, store, _) = setup();
        predictor.record_navigation("/a", "/a");
        assert_eq!(predictor.stats(), PredictorStats::default());
        assert!(store.is_empty());
    }

    #[test]
    fn test_decay_prunes_sibling_patterns() {
        let (mut predictor, _, clock) = setup();
        predictor.record_navigation("/a", "/b");
        for _ in 0..5 {
            predictor.record_navigation("/a", "/c");
        }

        clock.advance_days(10);
        predictor.record_navigation("/a", "/d");

        // /b: 1 * 0.9^10 < 0.5，/c: 5 * 0.9^10 ≈ 1.74
        let bucket = &predictor.patterns()["/a"];
        let targets: Vec<&str> = bucket.iter().map(|p| p.to.as_str()).collect();
        assert_eq!(targets, vec!["/c", "/d"]);
        let c = bucket.iter().find(|p| p.to == "/c").unwrap();
        assert!((c.count - 5.0 * 0.9f64.powf(10.0)).abs() < 1e-9);
    }

    #[test]
    fn test_sibling_decay_is_not_applied_twice() {
        let (mut predictor, _, clock) = setup();
        for _ in 0..5 {
            predictor.record_navigation("/a", "/c");
        }
        clock.advance_days(10);
        predictor.record_navigation("/a", "/d");

        // 存储计数 /c ≈ 1.74，/d = 1.0
        assert_eq!(
            predictor.predict("/a", 2, 0.0),
            vec!["/c".to_string(), "/d".to_string()]
        );
    }

    #[test]
    fn test_decayed_sibling_above_threshold_is_predicted() {
        let (mut predictor, _, clock) = setup();
        predictor.record_navigation("/a", "/b");
        clock.advance_days(5);
        predictor.record_navigation("/a", "/c");

        let b = predictor.patterns()["/a"].iter().find(|p| p.to == "/b").unwrap();
        assert!(b.count >= 0.5 && b.count < 0.6);
        assert_eq!(
            predictor.predict("/a", 5, 0.0),
            vec!["/c".to_string(), "/b".to_string()]
        );
    }

    #[test]
    fn test_detached_predictor_does_not_overwrite_storage() {
        let store = Arc::new(MemoryStore::new());
        store.set("nav-patterns", r#"{"/":[{"from":"/","to":"/x","count":3.0,"lastVisit":0}]}"#).unwrap();
        let mut predictor = NavigationPredictor::detached(
            store.clone(),
            Arc::new(ManualClock::new(T0)),
            PredictorConfig::default(),
        );
        assert!(!predictor.is_loaded());
        predictor.record_navigation("/", "/y");
        assert!(store.get("nav-patterns").unwrap().unwrap().contains("\"/x\""));
        assert!(!store.get("nav-patterns").unwrap().unwrap().contains("/y"));

        let stored = read_table(store.as_ref(), "nav-patterns").unwrap();
        predictor.merge(stored);
        assert!(predictor.is_loaded());
        let raw = store.get("nav-patterns").unwrap().unwrap();
        assert!(raw.contains("/x") && raw.contains("/y"));
    }

    #[test]
    fn test_no_decay_within_a_day() {
        let (mut predictor, _, clock) = setup();
        predictor.record_navigation("/a", "/b");
        clock.advance(MILLIS_PER_DAY / 2);
        predictor.record_navigation("/a", "/c");
        let b = predictor.patterns()["/a"].iter().find(|p| p.to == "/b").unwrap();
        assert_eq!(b.count, 1.0);
    }

    #[test]
    fn test_set_current_path_records_transitions() {
        let (mut predictor, _, _) = setup();
        predictor.set_current_path("/");
        predictor.set_current_path("/");
        assert_eq!(predictor.stats().total_patterns, 0);

        predictor.set_current_path("/shop");
        predictor.set_current_path("/cart");
        assert_eq!(predictor.current_path(), Some("/cart"));
        assert_eq!(
            predictor.stats(),
            PredictorStats {
                total_patterns: 2,
                unique_paths: 2
            }
        );
        assert_eq!(predictor.predict("/", 1, 0.0), vec!["/shop".to_string()]);
    }

    #[test]
    fn test_persists_and_reloads() {
        let (mut predictor, store, clock) = setup();
        predictor.record_navigation("/", "/games");
        predictor.record_navigation("/", "/games");

        let raw = store.get("nav-patterns").unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["/"][0]["to"], "/games");
        assert_eq!(value["/"][0]["count"], 2.0);
        assert_eq!(value["/"][0]["lastVisit"], T0);

        let reloaded = NavigationPredictor::new(store, clock, PredictorConfig::default());
        assert_eq!(reloaded.predict("/", 3, 0.0), vec!["/games".to_string()]);
    }

    #[test]
    fn test_corrupt_storage_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        store.set("nav-patterns", "{not json").unwrap();
        let (hook, calls) = counting_hook();

        let mut predictor = NavigationPredictor::detached(
            store,
            Arc::new(ManualClock::new(T0)),
            PredictorConfig::default(),
        )
        .with_error_hook(hook);
        predictor.load_from_storage();

        assert_eq!(predictor.stats(), PredictorStats::default());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_storage_failures_are_absorbed() {
        let mut mock = MockKeyValueStore::new();
        mock.expect_get()
            .returning(|_| Err(StorageError::Unavailable("disabled".to_string())));
        mock.expect_set()
            .returning(|_, _| Err(StorageError::QuotaExceeded { used: 10, limit: 1 }));
        mock.expect_remove()
            .returning(|_| Err(StorageError::Unavailable("disabled".to_string())));
        let (hook, calls) = counting_hook();

        let mut predictor = NavigationPredictor::detached(
            Arc::new(mock),
            Arc::new(ManualClock::new(T0)),
            PredictorConfig::default(),
        )
        .with_error_hook(hook);
        predictor.load_from_storage();
        predictor.record_navigation("/a", "/b");
        assert_eq!(predictor.predict("/a", 1, 0.0), vec!["/b".to_string()]);
        predictor.clear();

        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(predictor.stats(), PredictorStats::default());
    }

    #[test]
    fn test_oversized_table_prunes_stale_and_skips_write() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let config = PredictorConfig {
            max_storage_bytes: 100,
            ..PredictorConfig::default()
        };
        let mut predictor = NavigationPredictor::new(store.clone(), clock.clone(), config);

        predictor.record_navigation("/a", "/b");
        let first = store.get("nav-patterns").unwrap().unwrap();

        clock.advance_days(8);
        predictor.record_navigation("/c", "/d");

        assert_eq!(store.get("nav-patterns").unwrap().unwrap(), first);
        assert!(predictor.patterns().get("/a").is_none());
        assert_eq!(predictor.stats().total_patterns, 1);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (mut predictor, store, _) = setup();
        predictor.set_current_path("/");
        predictor.set_current_path("/faq");
        predictor.clear();
        assert_eq!(predictor.stats(), PredictorStats::default());
        assert_eq!(predictor.current_path(), None);
        predictor.clear();
        assert_eq!(predictor.stats(), PredictorStats::default());
        assert_eq!(store.get("nav-patterns").unwrap(), None);
    }

    #[test]
    fn test_merge_combines_counts() {
        let (mut predictor, store, _) = setup();
        predictor.record_navigation("/", "/shop");

        let mut loaded = PatternTable::new();
        loaded.insert(
            "/".to_string(),
            vec![
                NavigationPattern {
                    from: "/".to_string(),
                    to: "/shop".to_string(),
                    count: 2.5,
                    last_visit: T0 - 1000,
                },
                NavigationPattern {
                    from: "/".to_string(),
                    to: "/blog".to_string(),
                    count: 1.0,
                    last_visit: T0 - 1000,
                },
            ],
        );
        predictor.merge(loaded);

        let shop = predictor.patterns()["/"].iter().find(|p| p.to == "/shop").unwrap();
        assert_eq!(shop.count, 3.5);
        assert_eq!(shop.last_visit, T0);
        assert_eq!(predictor.stats().total_patterns, 2);
        assert!(store.get("nav-patterns").unwrap().unwrap().contains("/blog"));
    }

    #[test]
    fn test_read_table_drops_invalid_counts() {
        let store = MemoryStore::new();
        store
            .set(
                "nav-patterns",
                r#"{"/":[{"from":"/","to":"/x","count":-1.0,"lastVisit":0}]}"#,
            )
            .unwrap();
        assert!(read_table(&store, "nav-patterns").unwrap().is_empty());
        assert!(read_table(&store, "missing").unwrap().is_empty());
    }
}
