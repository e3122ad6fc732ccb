//! `--json`: print one snapshot per UI refresh interval instead of drawing.

use std::io::Write;
use std::time::Duration;

use sshtop_engine::SupervisorHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// Write `ticks` snapshot lines (or forever) to `out`, one JSON object per line.
pub async fn run<W: Write>(
    engine: &SupervisorHandle,
    every: Duration,
    ticks: Option<u64>,
    mut out: W,
) -> anyhow::Result<()> {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut written = 0u64;
    while ticks.map_or(true, |limit| written < limit) {
        ticker.tick().await;
        let snapshot = engine.snapshot();
        serde_json::to_writer(&mut out, &snapshot)?;
        writeln!(out)?;
        out.flush()?;
        written += 1;
        debug!(line = written, targets = snapshot.targets.len(), "snapshot written");
    }
    Ok(())
}
