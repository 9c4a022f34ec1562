//! In-process counters exposed on the metrics endpoint.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    ticks: AtomicU64,
    tick_faults: AtomicU64,
    matches_started: AtomicU64,
    matches_settled: AtomicU64,
    matches_refunded: AtomicU64,
    kills: AtomicU64,
    ws_connections: AtomicU64,
    ws_disconnects: AtomicU64,
    ws_send_errors: AtomicU64,
    ws_lagged: AtomicU64,
    inputs_dropped: AtomicU64,
    inputs_rejected: AtomicU64,
    contention_retries: AtomicU64,
    integrity_alerts: AtomicU64,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub tick_faults: u64,
    pub matches_started: u64,
    pub matches_settled: u64,
    pub matches_refunded: u64,
    pub kills: u64,
    pub ws_connections: u64,
    pub ws_disconnects: u64,
    pub ws_send_errors: u64,
    pub ws_lagged: u64,
    pub inputs_dropped: u64,
    pub inputs_rejected: u64,
    pub contention_retries: u64,
    pub integrity_alerts: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            tick_faults: self.tick_faults.load(Ordering::Relaxed),
            matches_started: self.matches_started.load(Ordering::Relaxed),
            matches_settled: self.matches_settled.load(Ordering::Relaxed),
            matches_refunded: self.matches_refunded.load(Ordering::Relaxed),
            kills: self.kills.load(Ordering::Relaxed),
            ws_connections: self.ws_connections.load(Ordering::Relaxed),
            ws_disconnects: self.ws_disconnects.load(Ordering::Relaxed),
            ws_send_errors: self.ws_send_errors.load(Ordering::Relaxed),
            ws_lagged: self.ws_lagged.load(Ordering::Relaxed),
            inputs_dropped: self.inputs_dropped.load(Ordering::Relaxed),
            inputs_rejected: self.inputs_rejected.load(Ordering::Relaxed),
            contention_retries: self.contention_retries.load(Ordering::Relaxed),
            integrity_alerts: self.integrity_alerts.load(Ordering::Relaxed),
        }
    }

    pub fn inc_ticks(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tick_faults(&self) {
        self.tick_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_matches_started(&self) {
        self.matches_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_matches_settled(&self) {
        self.matches_settled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_matches_refunded(&self) {
        self.matches_refunded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_kills(&self, count: u64) {
        self.kills.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_ws_connections(&self) {
        self.ws_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ws_disconnects(&self) {
        self.ws_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ws_send_errors(&self) {
        self.ws_send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_ws_lagged(&self, skipped: u64) {
        self.ws_lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn inc_inputs_dropped(&self) {
        self.inputs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_inputs_rejected(&self) {
        self.inputs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_contention_retries(&self) {
        self.contention_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_integrity_alerts(&self) {
        self.integrity_alerts.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_land_in_snapshot() {
        let metrics = Metrics::default();
        metrics.inc_ticks();
        metrics.inc_ticks();
        metrics.add_kills(3);
        metrics.inc_integrity_alerts();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.ticks, 2);
        assert_eq!(snapshot.kills, 3);
        assert_eq!(snapshot.integrity_alerts, 1);
        assert_eq!(snapshot.matches_settled, 0);
    }
}
