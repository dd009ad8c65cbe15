use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::types::ScanStatistics;

#[derive(Default)]
struct Counters {
    scans_started: AtomicU64,
    scans_completed: AtomicU64,
    scans_failed: AtomicU64,
    scans_cancelled: AtomicU64,
    platforms_scanned: AtomicU64,
    roms_scanned: AtomicU64,
    roms_identified: AtomicU64,
    firmware_scanned: AtomicU64,
}

/// Process-wide scan counters. Cloning shares the same counters.
#[derive(Clone)]
pub struct Metrics {
    counters: Arc<Counters>,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self { counters: Arc::new(Counters::default()), start_time: Instant::now() }
    }

    pub fn inc_scans_started(&self) {
        self.counters.scans_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scans_completed(&self) {
        self.counters.scans_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scans_failed(&self) {
        self.counters.scans_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scans_cancelled(&self) {
        self.counters.scans_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds the totals of a finished scan into the item counters.
    pub fn add_statistics(&self, stats: &ScanStatistics) {
        let c = &self.counters;
        c.platforms_scanned.fetch_add(stats.scanned_platforms, Ordering::Relaxed);
        c.roms_scanned.fetch_add(stats.scanned_roms, Ordering::Relaxed);
        c.roms_identified.fetch_add(stats.identified_roms, Ordering::Relaxed);
        c.firmware_scanned.fetch_add(stats.scanned_firmware, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        MetricsSnapshot {
            scans_started: c.scans_started.load(Ordering::Relaxed),
            scans_completed: c.scans_completed.load(Ordering::Relaxed),
            scans_failed: c.scans_failed.load(Ordering::Relaxed),
            scans_cancelled: c.scans_cancelled.load(Ordering::Relaxed),
            platforms_scanned: c.platforms_scanned.load(Ordering::Relaxed),
            roms_scanned: c.roms_scanned.load(Ordering::Relaxed),
            roms_identified: c.roms_identified.load(Ordering::Relaxed),
            firmware_scanned: c.firmware_scanned.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub scans_started: u64,
    pub scans_completed: u64,
    pub scans_failed: u64,
    pub scans_cancelled: u64,
    pub platforms_scanned: u64,
    pub roms_scanned: u64,
    pub roms_identified: u64,
    pub firmware_scanned: u64,
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    /// `(name, help, type, value)` rows for the Prometheus exposition.
    pub fn families(&self) -> [(&'static str, &'static str, &'static str, u64); 9] {
        [
            ("scans_started", "Total scans started", "counter", self.scans_started),
            ("scans_completed", "Total scans completed", "counter", self.scans_completed),
            ("scans_failed", "Total scans failed or timed out", "counter", self.scans_failed),
            ("scans_cancelled", "Total scans stopped by a user", "counter", self.scans_cancelled),
            ("platforms_scanned", "Platforms scanned", "counter", self.platforms_scanned),
            ("roms_scanned", "Roms scanned", "counter", self.roms_scanned),
            ("roms_identified", "Roms with at least one provider match", "counter", self.roms_identified),
            ("firmware_scanned", "Firmware files scanned", "counter", self.firmware_scanned),
            ("uptime_seconds", "Uptime seconds", "gauge", self.uptime_seconds),
        ]
    }
}
