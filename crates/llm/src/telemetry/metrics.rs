use std::{
    collections::{HashMap, VecDeque},
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// Bounded request history ring size.
const HISTORY_CAPACITY: usize = 1000;

/// Sliding window for the requests-per-minute figure.
const QPS_WINDOW: Duration = Duration::from_secs(60);

/// In-process request metrics: monotonic counters, per-model and per-account
/// breakdowns, a sliding per-minute window, and a bounded history ring.
pub(crate) struct MetricsService {
    inner: RwLock<MetricsInner>,
    dirty: AtomicBool,
}

#[derive(Default)]
struct MetricsInner {
    total: u64,
    success: u64,
    failure: u64,
    pool_errors: u64,
    pool_waits: u64,
    pool_wait_ms_total: u64,
    per_model: HashMap<String, OutcomeCounters>,
    per_account: HashMap<String, OutcomeCounters>,
    minute_window: VecDeque<Instant>,
    history: VecDeque<RequestRecord>,
}

/// Success/failure counters for one breakdown key.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct OutcomeCounters {
    pub requests: u64,
    pub success: u64,
    pub failure: u64,
}

impl OutcomeCounters {
    fn record(&mut self, success: bool) {
        self.requests += 1;
        if success {
            self.success += 1;
        } else {
            self.failure += 1;
        }
    }
}

/// One entry of the bounded request history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RequestRecord {
    pub timestamp: u64,
    pub model: String,
    pub account: String,
    pub duration_ms: u64,
    pub success: bool,
}

/// Serializable snapshot of the service, persisted across restarts.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct StatsSnapshot {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub pool_errors: u64,
    pub pool_waits: u64,
    pub pool_wait_ms_total: u64,
    /// Completed requests in the 60 s window before the snapshot was taken.
    /// Informational; not restored.
    #[serde(default)]
    pub requests_last_minute: usize,
    pub per_model: HashMap<String, OutcomeCounters>,
    pub per_account: HashMap<String, OutcomeCounters>,
    pub history: Vec<RequestRecord>,
}

impl MetricsService {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MetricsInner::default()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn record_request(&self, model: &str, account: &str, duration: Duration, success: bool) {
        let now = Instant::now();

        let mut inner = self.write();

        inner.total += 1;
        if success {
            inner.success += 1;
        } else {
            inner.failure += 1;
        }

        inner.per_model.entry(model.to_string()).or_default().record(success);
        inner
            .per_account
            .entry(account.to_string())
            .or_default()
            .record(success);

        inner.minute_window.push_back(now);
        while inner
            .minute_window
            .front()
            .is_some_and(|t| now.duration_since(*t) > QPS_WINDOW)
        {
            inner.minute_window.pop_front();
        }

        inner.history.push_back(RequestRecord {
            timestamp: unix_seconds(),
            model: model.to_string(),
            account: account.to_string(),
            duration_ms: duration.as_millis() as u64,
            success,
        });
        while inner.history.len() > HISTORY_CAPACITY {
            inner.history.pop_front();
        }

        drop(inner);
        self.dirty.store(true, Ordering::Release);
    }

    /// Records an account-pool wait that exceeded the reporting threshold.
    pub fn record_pool_wait(&self, waited: Duration) {
        let mut inner = self.write();
        inner.pool_waits += 1;
        inner.pool_wait_ms_total += waited.as_millis() as u64;
        drop(inner);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn record_pool_error(&self) {
        self.write().pool_errors += 1;
        self.dirty.store(true, Ordering::Release);
    }

    /// Completed requests within the last minute.
    pub fn requests_last_minute(&self) -> usize {
        let now = Instant::now();

        self.read()
            .minute_window
            .iter()
            .filter(|t| now.duration_since(**t) <= QPS_WINDOW)
            .count()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let requests_last_minute = self.requests_last_minute();
        let inner = self.read();

        StatsSnapshot {
            total: inner.total,
            success: inner.success,
            failure: inner.failure,
            pool_errors: inner.pool_errors,
            pool_waits: inner.pool_waits,
            pool_wait_ms_total: inner.pool_wait_ms_total,
            requests_last_minute,
            per_model: inner.per_model.clone(),
            per_account: inner.per_account.clone(),
            history: inner.history.iter().cloned().collect(),
        }
    }

    /// Restores counters from a persisted snapshot at boot. The per-minute
    /// window is intentionally not restored; it only describes the live
    /// process.
    pub fn restore(&self, snapshot: StatsSnapshot) {
        let mut inner = self.write();

        inner.total = snapshot.total;
        inner.success = snapshot.success;
        inner.failure = snapshot.failure;
        inner.pool_errors = snapshot.pool_errors;
        inner.pool_waits = snapshot.pool_waits;
        inner.pool_wait_ms_total = snapshot.pool_wait_ms_total;
        inner.per_model = snapshot.per_model;
        inner.per_account = snapshot.per_account;
        inner.history = snapshot.history.into_iter().collect();
        while inner.history.len() > HISTORY_CAPACITY {
            inner.history.pop_front();
        }
    }

    /// Returns and clears the dirty flag; the persister saves when it was set.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MetricsInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MetricsInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_and_breakdowns_accumulate() {
        let metrics = MetricsService::new();

        metrics.record_request("gpt-5", "lic-1", Duration::from_millis(120), true);
        metrics.record_request("gpt-5", "lic-2", Duration::from_millis(80), false);
        metrics.record_request("claude", "lic-1", Duration::from_millis(50), true);

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.success, 2);
        assert_eq!(snapshot.failure, 1);
        assert_eq!(snapshot.per_model["gpt-5"].requests, 2);
        assert_eq!(snapshot.per_model["gpt-5"].failure, 1);
        assert_eq!(snapshot.per_account["lic-1"].success, 2);
        assert_eq!(snapshot.history.len(), 3);
        assert_eq!(metrics.requests_last_minute(), 3);
    }

    #[test]
    fn history_ring_is_bounded() {
        let metrics = MetricsService::new();

        for n in 0..(HISTORY_CAPACITY + 10) {
            metrics.record_request("m", "a", Duration::from_millis(n as u64), true);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.history.len(), HISTORY_CAPACITY);
        // The oldest records were evicted.
        assert_eq!(snapshot.history[0].duration_ms, 10);
    }

    #[test]
    fn dirty_flag_is_set_and_cleared() {
        let metrics = MetricsService::new();
        assert!(!metrics.take_dirty());

        metrics.record_request("m", "a", Duration::from_millis(1), true);
        assert!(metrics.take_dirty());
        assert!(!metrics.take_dirty());
    }

    #[test]
    fn restore_round_trips_counters() {
        let metrics = MetricsService::new();
        metrics.record_request("m", "a", Duration::from_millis(1), true);
        metrics.record_pool_error();

        let snapshot = metrics.snapshot();

        let restored = MetricsService::new();
        restored.restore(snapshot.clone());

        let restored_snapshot = restored.snapshot();
        assert_eq!(restored_snapshot.total, snapshot.total);
        assert_eq!(restored_snapshot.pool_errors, 1);
        assert_eq!(restored_snapshot.history.len(), 1);
    }
}
