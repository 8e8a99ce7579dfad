// Copyright (C) 2026 Ryan Daum <ryan.daum@gmail.com>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Performance/Metrics (spec §4.17, C17): sampled counters and histograms
//! plus a narrow introspection interface (spec §6). Recording goes through
//! the real `metrics` crate macros, the same facade the teacher wraps with
//! its own `metrics_macros::increment_counter!` (see e.g.
//! `web-host/src/host/ws_host.rs`); this crate additionally keeps its own
//! lightweight atomic tallies so a snapshot can be read back in-process
//! without standing up a Prometheus exporter.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use mudcore_broker::CircuitState;
use serde::Serialize;

/// A running count/sum/max over some sampled quantity (latency in ms,
/// fan-out recipient count, queue depth — unit is caller-defined).
#[derive(Debug, Default, Serialize)]
pub struct SampledStats {
    pub count: u64,
    pub sum: u64,
    pub max: u64,
}

impl SampledStats {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct MetricsSnapshot {
    pub connections_open: i64,
    pub events_published: std::collections::HashMap<String, u64>,
    pub broadcast_fanout: SampledStats,
    pub delivery_latency: SampledStats,
    pub queue_depth: SampledStats,
    pub breaker_transitions: u64,
    pub dlq_size: i64,
    pub mute_cache_hits: u64,
    pub mute_cache_misses: u64,
}

/// Narrow read-side interface (spec §6 "Introspection"); the gateway wires
/// an optional `/metrics`-style JSON dump over this.
pub trait MetricsReader: Send + Sync {
    fn snapshot(&self) -> MetricsSnapshot;
}

struct Inner {
    connections_open: AtomicI64,
    events_published: papaya::HashMap<String, AtomicU64>,
    fanout_count: AtomicU64,
    fanout_sum: AtomicU64,
    fanout_max: AtomicU64,
    delivery_count: AtomicU64,
    delivery_sum_ms: AtomicU64,
    delivery_max_ms: AtomicU64,
    queue_depth_count: AtomicU64,
    queue_depth_sum: AtomicU64,
    queue_depth_max: AtomicU64,
    breaker_transitions: AtomicU64,
    dlq_size: AtomicI64,
    mute_cache_hits: AtomicU64,
    mute_cache_misses: AtomicU64,
}

impl Inner {
    fn new() -> Self {
        Self {
            connections_open: AtomicI64::new(0),
            events_published: papaya::HashMap::new(),
            fanout_count: AtomicU64::new(0),
            fanout_sum: AtomicU64::new(0),
            fanout_max: AtomicU64::new(0),
            delivery_count: AtomicU64::new(0),
            delivery_sum_ms: AtomicU64::new(0),
            delivery_max_ms: AtomicU64::new(0),
            queue_depth_count: AtomicU64::new(0),
            queue_depth_sum: AtomicU64::new(0),
            queue_depth_max: AtomicU64::new(0),
            breaker_transitions: AtomicU64::new(0),
            dlq_size: AtomicI64::new(0),
            mute_cache_hits: AtomicU64::new(0),
            mute_cache_misses: AtomicU64::new(0),
        }
    }
}

fn bump_max(cell: &AtomicU64, value: u64) {
    let mut current = cell.load(Ordering::Relaxed);
    while value > current {
        match cell.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

/// Owns every counter/histogram named in spec §4.17. One instance per
/// process, shared via `Arc` across the components that record into it.
pub struct MudMetrics {
    inner: Inner,
}

impl MudMetrics {
    pub fn new() -> Self {
        Self { inner: Inner::new() }
    }

    pub fn record_connection_opened(&self) {
        self.inner.connections_open.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("mudcore.connections.opened").increment(1);
        metrics::gauge!("mudcore.connections.open").increment(1.0);
    }

    pub fn record_connection_closed(&self) {
        self.inner.connections_open.fetch_sub(1, Ordering::Relaxed);
        metrics::counter!("mudcore.connections.closed").increment(1);
        metrics::gauge!("mudcore.connections.open").decrement(1.0);
    }

    pub fn record_event_published(&self, event_tag: &str) {
        {
            let guard = self.inner.events_published.guard();
            if let Some(counter) = self.inner.events_published.get(event_tag, &guard) {
                counter.fetch_add(1, Ordering::Relaxed);
            } else {
                let fresh = AtomicU64::new(1);
                if let Err(e) = self.inner.events_published.try_insert(event_tag.to_string(), fresh, &guard) {
                    e.current.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        metrics::counter!("mudcore.events.published", "event_type" => event_tag.to_string()).increment(1);
    }

    pub fn record_broadcast_fanout(&self, recipients: usize) {
        self.inner.fanout_count.fetch_add(1, Ordering::Relaxed);
        self.inner.fanout_sum.fetch_add(recipients as u64, Ordering::Relaxed);
        bump_max(&self.inner.fanout_max, recipients as u64);
        metrics::histogram!("mudcore.broadcast.fanout").record(recipients as f64);
    }

    pub fn record_delivery_latency(&self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        self.inner.delivery_count.fetch_add(1, Ordering::Relaxed);
        self.inner.delivery_sum_ms.fetch_add(ms, Ordering::Relaxed);
        bump_max(&self.inner.delivery_max_ms, ms);
        metrics::histogram!("mudcore.delivery.latency_ms").record(ms as f64);
    }

    pub fn record_queue_depth(&self, depth: usize) {
        self.inner.queue_depth_count.fetch_add(1, Ordering::Relaxed);
        self.inner.queue_depth_sum.fetch_add(depth as u64, Ordering::Relaxed);
        bump_max(&self.inner.queue_depth_max, depth as u64);
        metrics::histogram!("mudcore.queue.depth").record(depth as f64);
    }

    pub fn record_breaker_transition(&self, from: CircuitState, to: CircuitState) {
        self.inner.breaker_transitions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "mudcore.breaker.transitions",
            "from" => format!("{from:?}"),
            "to" => format!("{to:?}")
        )
        .increment(1);
        tracing::info!(from = ?from, to = ?to, "breaker transition");
    }

    pub fn record_dlq_size(&self, size: usize) {
        self.inner.dlq_size.store(size as i64, Ordering::Relaxed);
        metrics::gauge!("mudcore.dlq.size").set(size as f64);
    }

    pub fn record_mute_cache_hit(&self, hit: bool) {
        if hit {
            self.inner.mute_cache_hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("mudcore.mute_cache.hits").increment(1);
        } else {
            self.inner.mute_cache_misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("mudcore.mute_cache.misses").increment(1);
        }
    }
}

impl Default for MudMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsReader for MudMetrics {
    fn snapshot(&self) -> MetricsSnapshot {
        let events_published = {
            let guard = self.inner.events_published.guard();
            self.inner
                .events_published
                .iter(&guard)
                .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
                .collect()
        };

        MetricsSnapshot {
            connections_open: self.inner.connections_open.load(Ordering::Relaxed),
            events_published,
            broadcast_fanout: SampledStats {
                count: self.inner.fanout_count.load(Ordering::Relaxed),
                sum: self.inner.fanout_sum.load(Ordering::Relaxed),
                max: self.inner.fanout_max.load(Ordering::Relaxed),
            },
            delivery_latency: SampledStats {
                count: self.inner.delivery_count.load(Ordering::Relaxed),
                sum: self.inner.delivery_sum_ms.load(Ordering::Relaxed),
                max: self.inner.delivery_max_ms.load(Ordering::Relaxed),
            },
            queue_depth: SampledStats {
                count: self.inner.queue_depth_count.load(Ordering::Relaxed),
                sum: self.inner.queue_depth_sum.load(Ordering::Relaxed),
                max: self.inner.queue_depth_max.load(Ordering::Relaxed),
            },
            breaker_transitions: self.inner.breaker_transitions.load(Ordering::Relaxed),
            dlq_size: self.inner.dlq_size.load(Ordering::Relaxed),
            mute_cache_hits: self.inner.mute_cache_hits.load(Ordering::Relaxed),
            mute_cache_misses: self.inner.mute_cache_misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connections_gauge_tracks_open_and_close() {
        let metrics = MudMetrics::new();
        metrics.record_connection_opened();
        metrics.record_connection_opened();
        metrics.record_connection_closed();
        assert_eq!(metrics.snapshot().connections_open, 1);
    }

    #[test]
    fn event_counts_are_tallied_per_tag() {
        let metrics = MudMetrics::new();
        metrics.record_event_published("chat_message");
        metrics.record_event_published("chat_message");
        metrics.record_event_published("whisper");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_published.get("chat_message"), Some(&2));
        assert_eq!(snapshot.events_published.get("whisper"), Some(&1));
    }

    #[test]
    fn fanout_histogram_tracks_max_and_mean() {
        let metrics = MudMetrics::new();
        metrics.record_broadcast_fanout(3);
        metrics.record_broadcast_fanout(9);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.broadcast_fanout.max, 9);
        assert_eq!(snapshot.broadcast_fanout.mean(), 6.0);
    }

    #[test]
    fn mute_cache_hit_rate_is_observable() {
        let metrics = MudMetrics::new();
        metrics.record_mute_cache_hit(true);
        metrics.record_mute_cache_hit(true);
        metrics.record_mute_cache_hit(false);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.mute_cache_hits, 2);
        assert_eq!(snapshot.mute_cache_misses, 1);
    }
}
