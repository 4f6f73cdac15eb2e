//! Prometheus metrics for the cache and the fetch coordinator.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::cache::CacheStats;

/// How a `request` call was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupResult {
    /// Served from the cache.
    Hit,
    /// Attached to a fetch that was already in flight.
    Joined,
    /// Started a new fetch.
    Miss,
}

impl LookupResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupResult::Hit => "hit",
            LookupResult::Joined => "joined",
            LookupResult::Miss => "miss",
        }
    }
}

/// How a fetch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    Failure,
    Aborted,
}

impl FetchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchOutcome::Success => "success",
            FetchOutcome::Failure => "failure",
            FetchOutcome::Aborted => "aborted",
        }
    }
}

/// Cache and coordinator metrics. Cloning shares the underlying collectors.
#[derive(Clone)]
pub struct CacheMetrics {
    lookups: IntCounterVec,
    fetches: IntCounterVec,
    cancellations: IntCounter,
    evictions: IntCounter,
    resident_entries: IntGauge,
    resident_cost: IntGauge,
    in_flight: IntGauge,
}

impl CacheMetrics {
    /// Create the collectors without registering them anywhere.
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            lookups: IntCounterVec::new(
                Opts::new("asset_cache_lookups_total", "Get-or-fetch calls by result"),
                &["result"],
            )?,
            fetches: IntCounterVec::new(
                Opts::new("asset_cache_fetches_total", "Completed fetches by outcome"),
                &["outcome"],
            )?,
            cancellations: IntCounter::new(
                "asset_cache_cancellations_total",
                "Waiters that withdrew before their fetch resolved",
            )?,
            evictions: IntCounter::new(
                "asset_cache_evictions_total",
                "Entries evicted to stay within budget",
            )?,
            resident_entries: IntGauge::new(
                "asset_cache_resident_entries",
                "Entries currently resident",
            )?,
            resident_cost: IntGauge::new(
                "asset_cache_resident_cost",
                "Summed cost of resident entries",
            )?,
            in_flight: IntGauge::new("asset_cache_in_flight", "Fetches currently in flight")?,
        })
    }

    /// Create the collectors and register them with `registry`.
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = Self::new()?;
        registry.register(Box::new(metrics.lookups.clone()))?;
        registry.register(Box::new(metrics.fetches.clone()))?;
        registry.register(Box::new(metrics.cancellations.clone()))?;
        registry.register(Box::new(metrics.evictions.clone()))?;
        registry.register(Box::new(metrics.resident_entries.clone()))?;
        registry.register(Box::new(metrics.resident_cost.clone()))?;
        registry.register(Box::new(metrics.in_flight.clone()))?;
        Ok(metrics)
    }

    pub fn record_lookup(&self, result: LookupResult) {
        self.lookups.with_label_values(&[result.as_str()]).inc();
    }

    pub fn record_fetch(&self, outcome: FetchOutcome) {
        self.fetches.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn record_cancellation(&self) {
        self.cancellations.inc();
    }

    pub fn record_evictions(&self, count: usize) {
        self.evictions.inc_by(count as u64);
    }

    /// Refresh the residency gauges from a stats snapshot.
    pub fn observe(&self, stats: &CacheStats, in_flight: usize) {
        self.resident_entries.set(stats.entry_count as i64);
        self.resident_cost.set(stats.total_cost as i64);
        self.in_flight.set(in_flight as i64);
    }

    pub fn lookups(&self, result: LookupResult) -> u64 {
        self.lookups.with_label_values(&[result.as_str()]).get()
    }

    pub fn fetches(&self, outcome: FetchOutcome) -> u64 {
        self.fetches.with_label_values(&[outcome.as_str()]).get()
    }

    pub fn cancellations(&self) -> u64 {
        self.cancellations.get()
    }
}

/// Render every metric in `registry` in the Prometheus text format.
pub fn render(registry: &Registry) -> anyhow::Result<String> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_render() {
        let registry = Registry::new();
        let metrics = CacheMetrics::register(&registry).unwrap();

        metrics.record_lookup(LookupResult::Hit);
        metrics.record_lookup(LookupResult::Hit);
        metrics.record_fetch(FetchOutcome::Failure);

        assert_eq!(metrics.lookups(LookupResult::Hit), 2);
        assert_eq!(metrics.fetches(FetchOutcome::Failure), 1);

        let text = render(&registry).unwrap();
        assert!(text.contains("asset_cache_lookups_total{result=\"hit\"} 2"));
    }

    #[test]
    fn test_double_register_fails() {
        let registry = Registry::new();
        CacheMetrics::register(&registry).unwrap();
        assert!(CacheMetrics::register(&registry).is_err());
    }
}
