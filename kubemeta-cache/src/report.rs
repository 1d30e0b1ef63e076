//! Periodic stats dump.
//!
//! Every interval the task refreshes the cache size gauges and logs the
//! counter snapshot at info level, until shutdown is signalled.

use std::sync::Arc;
use std::time::Duration;

use kubemeta_core::Stats;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::store::MetadataStore;

/// Emit one report. Returns the rendered line.
pub async fn report_once(store: &MetadataStore, stats: &Stats) -> String {
    store.report_sizes(stats).await;
    let line = stats.to_string();
    tracing::info!(target: "kubemeta::stats", "{}", line);
    line
}

/// Background task reporting stats every `period`.
///
/// Returns the number of reports emitted.
pub async fn stats_report_task(
    store: Arc<MetadataStore>,
    stats: Arc<Stats>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    tracing::info!(interval_secs = period.as_secs(), "Stats reporter started");

    let mut reports = 0u64;
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                report_once(&store, &stats).await;
                reports += 1;
            }
        }
    }

    tracing::info!(reports, "Stats reporter stopped");
    reports
}
