use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_errors: AtomicU64,
    background_completed: AtomicU64,
    background_failed: AtomicU64,
    background_dropped: AtomicU64,
    search_fallbacks: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_error(&self) {
        self.cache_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_completed(&self) {
        self.background_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_failed(&self) {
        self.background_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_dropped(&self) {
        self.background_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_search_fallback(&self) {
        self.search_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn cache_errors(&self) -> u64 {
        self.cache_errors.load(Ordering::Relaxed)
    }

    pub fn background_completed(&self) -> u64 {
        self.background_completed.load(Ordering::Relaxed)
    }

    pub fn background_failed(&self) -> u64 {
        self.background_failed.load(Ordering::Relaxed)
    }

    pub fn background_dropped(&self) -> u64 {
        self.background_dropped.load(Ordering::Relaxed)
    }

    pub fn search_fallbacks(&self) -> u64 {
        self.search_fallbacks.load(Ordering::Relaxed)
    }

    /// Emits every counter as one structured log line.
    pub fn log_summary(&self) {
        tracing::info!(
            cache_hits = self.cache_hits(),
            cache_misses = self.cache_misses(),
            cache_errors = self.cache_errors(),
            background_completed = self.background_completed(),
            background_failed = self.background_failed(),
            background_dropped = self.background_dropped(),
            search_fallbacks = self.search_fallbacks(),
            "metrics summary"
        );
    }
}
