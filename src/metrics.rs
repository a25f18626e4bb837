use std::fmt::Write as _;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct Metrics {
    // Store
    pub store_queries_total: AtomicU64,
    pub store_retries_total: AtomicU64,
    pub store_timeouts_total: AtomicU64,
    pub slow_queries_total: AtomicU64,

    // Cache
    pub cache_hits_total: AtomicU64,
    pub cache_misses_total: AtomicU64,

    // Population
    pub populate_fetches_total: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            store_queries_total: AtomicU64::new(0),
            store_retries_total: AtomicU64::new(0),
            store_timeouts_total: AtomicU64::new(0),
            slow_queries_total: AtomicU64::new(0),
            cache_hits_total: AtomicU64::new(0),
            cache_misses_total: AtomicU64::new(0),
            populate_fetches_total: AtomicU64::new(0),
        }
    }
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::default)
}

pub(crate) fn record_store_query() {
    metrics().store_queries_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_store_retry() {
    metrics().store_retries_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_store_timeout() {
    metrics().store_timeouts_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_slow_query() {
    metrics().slow_queries_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_cache_hit() {
    metrics().cache_hits_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_cache_miss() {
    metrics().cache_misses_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_populate_fetch() {
    metrics().populate_fetches_total.fetch_add(1, Ordering::Relaxed);
}

pub fn render_prometheus() -> String {
    let m = metrics();
    let mut s = String::new();
    let _ = writeln!(
        s,
        "# TYPE store_queries_total counter\nstore_queries_total {}",
        m.store_queries_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE store_retries_total counter\nstore_retries_total {}",
        m.store_retries_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE store_timeouts_total counter\nstore_timeouts_total {}",
        m.store_timeouts_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE slow_queries_total counter\nslow_queries_total {}",
        m.slow_queries_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE cache_hits_total counter\ncache_hits_total {}",
        m.cache_hits_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE cache_misses_total counter\ncache_misses_total {}",
        m.cache_misses_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE populate_fetches_total counter\npopulate_fetches_total {}",
        m.populate_fetches_total.load(Ordering::Relaxed)
    );
    s
}
