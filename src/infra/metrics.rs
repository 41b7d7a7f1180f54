//! Lock-free metrics collection and periodic reporting
//!
//! The control loop records into atomics; the reporter task, the MQTT
//! metrics publisher and the Prometheus endpoint read them concurrently.
//! `report()` consumes the periodic window and belongs to the log and MQTT
//! reporters. Scrapes use `snapshot()`, which only reads the cumulative
//! histogram so it stays monotonic no matter who else reports.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only and must never feed back into gate decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential cycle latency buckets (microseconds)
/// Buckets: ≤250, ≤500, ≤1000, ≤2000, ≤4000, ≤8000, ≤16000, ≤32000, ≤64000, ≤128000, >128000
const BUCKET_BOUNDS: [u64; 10] = [250, 500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000];
const NUM_BUCKETS: usize = 11;

/// Gate state values for the Prometheus gauge
pub const GATE_STATE_CLOSED: u64 = 0;
pub const GATE_STATE_CLOSING_PENDING: u64 = 1;
pub const GATE_STATE_OPEN: u64 = 2;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].load(Ordering::Relaxed))
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket reports 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [250, 500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000, 256000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Control cycles completed (monotonic)
    cycles_total: AtomicU64,
    /// Cycles since last report (reset on report)
    cycles_since_report: AtomicU64,
    /// Sum of cycle durations in microseconds (reset on report)
    cycle_latency_sum_us: AtomicU64,
    /// Longest cycle in microseconds (reset on report)
    cycle_latency_max_us: AtomicU64,
    /// Cycle duration histogram (reset on report)
    cycle_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Cycle duration histogram since startup (never reset)
    cycle_latency_buckets_total: [AtomicU64; NUM_BUCKETS],
    /// Sum of all cycle durations since startup in microseconds
    cycle_latency_total_us: AtomicU64,
    /// Cycles that took longer than the configured period
    cycle_overruns: AtomicU64,
    access_granted: AtomicU64,
    access_denied: AtomicU64,
    /// Credentials presented while the gate was busy
    credentials_ignored: AtomicU64,
    passages_confirmed: AtomicU64,
    /// Closes after confirmed passage and grace period
    gate_closes: AtomicU64,
    /// Closes forced by the max-open guard
    forced_closes: AtomicU64,
    no_echo_readings: AtomicU64,
    /// Spot reads that were missing or out of range
    sensor_faults: AtomicU64,
    credential_read_errors: AtomicU64,
    actuator_errors: AtomicU64,
    display_errors: AtomicU64,
    /// Telemetry messages dropped because the egress channel was full
    telemetry_dropped: AtomicU64,
    acl_updates: AtomicU64,
    available_spots: AtomicU64,
    total_spots: AtomicU64,
    gate_state: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            cycles_since_report: AtomicU64::new(0),
            cycle_latency_sum_us: AtomicU64::new(0),
            cycle_latency_max_us: AtomicU64::new(0),
            cycle_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            cycle_latency_buckets_total: std::array::from_fn(|_| AtomicU64::new(0)),
            cycle_latency_total_us: AtomicU64::new(0),
            cycle_overruns: AtomicU64::new(0),
            access_granted: AtomicU64::new(0),
            access_denied: AtomicU64::new(0),
            credentials_ignored: AtomicU64::new(0),
            passages_confirmed: AtomicU64::new(0),
            gate_closes: AtomicU64::new(0),
            forced_closes: AtomicU64::new(0),
            no_echo_readings: AtomicU64::new(0),
            sensor_faults: AtomicU64::new(0),
            credential_read_errors: AtomicU64::new(0),
            actuator_errors: AtomicU64::new(0),
            display_errors: AtomicU64::new(0),
            telemetry_dropped: AtomicU64::new(0),
            acl_updates: AtomicU64::new(0),
            available_spots: AtomicU64::new(0),
            total_spots: AtomicU64::new(0),
            gate_state: AtomicU64::new(GATE_STATE_CLOSED),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
            started_at: Instant::now(),
        }
    }

    /// Record a completed control cycle with its duration
    #[inline]
    pub fn record_cycle(&self, latency_us: u64) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycles_since_report.fetch_add(1, Ordering::Relaxed);
        self.cycle_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.cycle_latency_total_us.fetch_add(latency_us, Ordering::Relaxed);
        let bucket = bucket_index(latency_us);
        self.cycle_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.cycle_latency_buckets_total[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.cycle_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_cycle_overrun(&self) {
        self.cycle_overruns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_access(&self, granted: bool) {
        if granted {
            self.access_granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.access_denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_credential_ignored(&self) {
        self.credentials_ignored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_passage(&self) {
        self.passages_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gate_close(&self, forced: bool) {
        if forced {
            self.forced_closes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.gate_closes.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_no_echo(&self) {
        self.no_echo_readings.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sensor_faults(&self, count: u64) {
        self.sensor_faults.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_credential_read_error(&self) {
        self.credential_read_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_actuator_error(&self) {
        self.actuator_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_display_error(&self) {
        self.display_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_telemetry_dropped(&self) {
        self.telemetry_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_acl_update(&self) {
        self.acl_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the latest occupancy gauges
    #[inline]
    pub fn set_occupancy(&self, available: usize, total: usize) {
        self.available_spots.store(available as u64, Ordering::Relaxed);
        self.total_spots.store(total as u64, Ordering::Relaxed);
    }

    /// Set gate state gauge (0=closed, 1=closing_pending, 2=open)
    #[inline]
    pub fn set_gate_state(&self, state: u64) {
        self.gate_state.store(state, Ordering::Relaxed);
    }

    #[inline]
    pub fn cycles_total(&self) -> u64 {
        self.cycles_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn forced_closes(&self) -> u64 {
        self.forced_closes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn telemetry_dropped(&self) -> u64 {
        self.telemetry_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sensor_faults(&self) -> u64 {
        self.sensor_faults.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn gate_state(&self) -> u64 {
        self.gate_state.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let cycles_count = self.cycles_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.cycle_latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.cycle_latency_max_us.swap(0, Ordering::Relaxed);
        let cycle_lat_buckets = swap_buckets(&self.cycle_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let cycles_per_sec = if elapsed.as_secs_f64() > 0.0 {
            cycles_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        self.summarize(cycle_lat_buckets, latency_sum, cycles_count, max_latency, cycles_per_sec)
    }

    /// Cumulative view since startup; resets nothing
    pub fn snapshot(&self) -> MetricsSummary {
        let cycles_total = self.cycles_total.load(Ordering::Relaxed);
        let uptime = self.started_at.elapsed().as_secs_f64();
        let cycles_per_sec = if uptime > 0.0 { cycles_total as f64 / uptime } else { 0.0 };

        self.summarize(
            load_buckets(&self.cycle_latency_buckets_total),
            self.cycle_latency_total_us.load(Ordering::Relaxed),
            cycles_total,
            self.cycle_latency_max_us.load(Ordering::Relaxed),
            cycles_per_sec,
        )
    }

    fn summarize(
        &self,
        cycle_lat_buckets: [u64; NUM_BUCKETS],
        latency_sum: u64,
        cycles_count: u64,
        max_latency: u64,
        cycles_per_sec: f64,
    ) -> MetricsSummary {
        let avg_latency = if cycles_count > 0 { latency_sum / cycles_count } else { 0 };

        MetricsSummary {
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycles_per_sec,
            cycle_sum_us: latency_sum,
            cycle_avg_us: avg_latency,
            cycle_max_us: max_latency,
            cycle_p50_us: percentile_from_buckets(&cycle_lat_buckets, 0.50),
            cycle_p99_us: percentile_from_buckets(&cycle_lat_buckets, 0.99),
            cycle_lat_buckets,
            cycle_overruns: self.cycle_overruns.load(Ordering::Relaxed),
            access_granted: self.access_granted.load(Ordering::Relaxed),
            access_denied: self.access_denied.load(Ordering::Relaxed),
            credentials_ignored: self.credentials_ignored.load(Ordering::Relaxed),
            passages_confirmed: self.passages_confirmed.load(Ordering::Relaxed),
            gate_closes: self.gate_closes.load(Ordering::Relaxed),
            forced_closes: self.forced_closes.load(Ordering::Relaxed),
            no_echo_readings: self.no_echo_readings.load(Ordering::Relaxed),
            sensor_faults: self.sensor_faults.load(Ordering::Relaxed),
            credential_read_errors: self.credential_read_errors.load(Ordering::Relaxed),
            actuator_errors: self.actuator_errors.load(Ordering::Relaxed),
            display_errors: self.display_errors.load(Ordering::Relaxed),
            telemetry_dropped: self.telemetry_dropped.load(Ordering::Relaxed),
            acl_updates: self.acl_updates.load(Ordering::Relaxed),
            available_spots: self.available_spots.load(Ordering::Relaxed),
            total_spots: self.total_spots.load(Ordering::Relaxed),
            gate_state: self.gate_state.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for egress)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub cycles_total: u64,
    pub cycles_per_sec: f64,
    pub cycle_sum_us: u64,
    pub cycle_avg_us: u64,
    pub cycle_max_us: u64,
    pub cycle_p50_us: u64,
    pub cycle_p99_us: u64,
    /// Bounds: ≤250, ≤500, ≤1000, ... ≤128000, >128000 µs
    pub cycle_lat_buckets: [u64; NUM_BUCKETS],
    pub cycle_overruns: u64,
    pub access_granted: u64,
    pub access_denied: u64,
    pub credentials_ignored: u64,
    pub passages_confirmed: u64,
    pub gate_closes: u64,
    pub forced_closes: u64,
    pub no_echo_readings: u64,
    pub sensor_faults: u64,
    pub credential_read_errors: u64,
    pub actuator_errors: u64,
    pub display_errors: u64,
    pub telemetry_dropped: u64,
    pub acl_updates: u64,
    pub available_spots: u64,
    pub total_spots: u64,
    /// 0=closed, 1=closing_pending, 2=open
    pub gate_state: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            cycles_total = %self.cycles_total,
            cycles_per_sec = format!("{:.2}", self.cycles_per_sec),
            cycle_avg_us = %self.cycle_avg_us,
            cycle_max_us = %self.cycle_max_us,
            cycle_p99_us = %self.cycle_p99_us,
            overruns = %self.cycle_overruns,
            granted = %self.access_granted,
            denied = %self.access_denied,
            passages = %self.passages_confirmed,
            forced_closes = %self.forced_closes,
            sensor_faults = %self.sensor_faults,
            available = %self.available_spots,
            total = %self.total_spots,
            "metrics"
        );
    }
}
