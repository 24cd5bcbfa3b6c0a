//! Sync layer counters with a Prometheus text renderer
//!
//! The demo binary serves them on http://localhost:9091/metrics when the
//! `metrics_server` feature is enabled.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::position::interpolation::TickSummary;

/// Rolling window for tick time percentiles
const TICK_HISTORY: usize = 1000;

#[derive(Debug)]
pub struct SyncMetrics {
    // Locks
    pub locks_held: AtomicU64,
    pub lock_requests: AtomicU64,
    pub lock_denials: AtomicU64,
    pub forced_takeovers: AtomicU64,
    pub lock_releases: AtomicU64,

    // Snapshots
    pub snapshots_sent: AtomicU64,
    pub snapshots_accepted: AtomicU64,
    pub snapshots_rejected: AtomicU64,
    pub snapshots_evicted: AtomicU64,

    // Interpolation
    pub vessels_tracked: AtomicU64,
    pub segments_completed: AtomicU64,
    pub starved_ticks: AtomicU64,
    pub apply_anomalies: AtomicU64,
    pub apply_defects: AtomicU64,
    pub vessels_dropped: AtomicU64,

    // Tick timing (microseconds)
    pub tick_count: AtomicU64,
    pub tick_time_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,

    start_time: Instant,
    tick_history: RwLock<VecDeque<u64>>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            locks_held: AtomicU64::new(0),
            lock_requests: AtomicU64::new(0),
            lock_denials: AtomicU64::new(0),
            forced_takeovers: AtomicU64::new(0),
            lock_releases: AtomicU64::new(0),
            snapshots_sent: AtomicU64::new(0),
            snapshots_accepted: AtomicU64::new(0),
            snapshots_rejected: AtomicU64::new(0),
            snapshots_evicted: AtomicU64::new(0),
            vessels_tracked: AtomicU64::new(0),
            segments_completed: AtomicU64::new(0),
            starved_ticks: AtomicU64::new(0),
            apply_anomalies: AtomicU64::new(0),
            apply_defects: AtomicU64::new(0),
            vessels_dropped: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
        }
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one interpolation tick into the counters
    pub fn record_interpolation(&self, summary: &TickSummary, tracked: usize) {
        self.segments_completed
            .fetch_add(summary.finished as u64, Ordering::Relaxed);
        self.starved_ticks.fetch_add(summary.starved as u64, Ordering::Relaxed);
        self.apply_anomalies
            .fetch_add(summary.anomalies as u64, Ordering::Relaxed);
        self.apply_defects.fetch_add(summary.defects as u64, Ordering::Relaxed);
        self.vessels_dropped
            .fetch_add(summary.removed.len() as u64, Ordering::Relaxed);
        self.vessels_tracked.store(tracked as u64, Ordering::Relaxed);
    }

    /// Record a session tick duration and refresh the p99
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;
            self.tick_time_p99_us
                .store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("vessel_sync_locks_held", "Locks held by the local player", "gauge",
            self.locks_held.load(Ordering::Relaxed));
        metric!("vessel_sync_lock_requests_total", "Lock acquire requests sent", "counter",
            self.lock_requests.load(Ordering::Relaxed));
        metric!("vessel_sync_lock_denials_total", "Lock requests denied", "counter",
            self.lock_denials.load(Ordering::Relaxed));
        metric!("vessel_sync_forced_takeovers_total", "Forced lock reacquisitions sent", "counter",
            self.forced_takeovers.load(Ordering::Relaxed));
        metric!("vessel_sync_lock_releases_total", "Lock releases sent", "counter",
            self.lock_releases.load(Ordering::Relaxed));

        metric!("vessel_sync_snapshots_sent_total", "Position snapshots sent", "counter",
            self.snapshots_sent.load(Ordering::Relaxed));
        metric!("vessel_sync_snapshots_accepted_total", "Position snapshots queued", "counter",
            self.snapshots_accepted.load(Ordering::Relaxed));
        metric!("vessel_sync_snapshots_rejected_total", "Stale, duplicate or overflowing snapshots", "counter",
            self.snapshots_rejected.load(Ordering::Relaxed));
        metric!("vessel_sync_snapshots_evicted_total", "Snapshots dropped by queue bound", "counter",
            self.snapshots_evicted.load(Ordering::Relaxed));

        metric!("vessel_sync_vessels_tracked", "Vessels with an interpolation state", "gauge",
            self.vessels_tracked.load(Ordering::Relaxed));
        metric!("vessel_sync_segments_completed_total", "Interpolation segments completed", "counter",
            self.segments_completed.load(Ordering::Relaxed));
        metric!("vessel_sync_starved_ticks_total", "Vessel ticks with an empty queue", "counter",
            self.starved_ticks.load(Ordering::Relaxed));
        metric!("vessel_sync_apply_anomalies_total", "Recoverable apply failures", "counter",
            self.apply_anomalies.load(Ordering::Relaxed));
        metric!("vessel_sync_apply_defects_total", "Apply failures from broken invariants", "counter",
            self.apply_defects.load(Ordering::Relaxed));
        metric!("vessel_sync_vessels_dropped_total", "Vessels removed from tracking", "counter",
            self.vessels_dropped.load(Ordering::Relaxed));

        metric!("vessel_sync_tick_count", "Session ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("vessel_sync_tick_time_microseconds", "Last session tick time", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("vessel_sync_tick_time_p99_microseconds", "99th percentile session tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("vessel_sync_uptime_seconds", "Uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serve `/metrics` and `/health` over plain HTTP/1.1
#[cfg(feature = "metrics_server")]
pub async fn start_metrics_server(metrics: std::sync::Arc<SyncMetrics>, port: u16) -> anyhow::Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tracing::{debug, info};

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = if request.starts_with("GET /metrics") {
                        let body = metrics.to_prometheus();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /health") {
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK"
                            .to_string()
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
