//! Traffic monitor.
//!
//! While a session is running, a background task polls the relay's counters
//! once a second and republishes them as a formatted reading for whatever
//! status surface is watching. A failed read just skips that tick; only
//! leaving the running state stops the monitor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::debug;

use sudotun_net::{RelayProcess, TrafficSnapshot};

/// One published traffic sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficReading {
    pub snapshot: TrafficSnapshot,
    /// Human-readable one-liner for status surfaces.
    pub summary: String,
}

impl TrafficReading {
    pub fn new(snapshot: TrafficSnapshot) -> Self {
        Self {
            summary: format_summary(&snapshot),
            snapshot,
        }
    }
}

/// Spawn the polling task.
///
/// The task exits on its own once `running` turns false or its sender goes
/// away; the controller also aborts the returned handle on every exit path
/// from the running state so cancellation never depends on timing.
pub(crate) fn spawn(
    relay: Arc<dyn RelayProcess>,
    mut running: watch::Receiver<bool>,
    readings: Arc<watch::Sender<Option<TrafficReading>>>,
    period: Duration,
) -> AbortHandle {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !*running.borrow() {
                        break;
                    }
                    match relay.traffic_stats().await {
                        Some(snapshot) => {
                            let _ = readings.send(Some(TrafficReading::new(snapshot)));
                        }
                        None => debug!("relay returned no traffic sample this tick"),
                    }
                }
                changed = running.changed() => {
                    if changed.is_err() || !*running.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("traffic monitor stopped");
    });
    task.abort_handle()
}

/// Format a counter set for display.
pub fn format_summary(snapshot: &TrafficSnapshot) -> String {
    format!(
        "direct ↑{} ↓{} | proxy ↑{} ↓{}",
        format_bytes(snapshot.direct_tx),
        format_bytes(snapshot.direct_rx),
        format_bytes(snapshot.proxy_tx),
        format_bytes(snapshot.proxy_rx),
    )
}

/// Human-readable byte magnitude: integer bytes, one decimal above that.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}{}", UNITS[unit])
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}
