//! Periodic session maintenance.
//!
//! A single long-lived task drives expiry sweeps and queue promotion.
//! Ticks, reload notifications, and shutdown are processed strictly
//! serially; a tick is never preempted mid-promotion.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::Config;
use crate::engine::AdmissionEngine;
use crate::lifecycle::Shutdown;

pub fn spawn(
    engine: Arc<AdmissionEngine>,
    config: Arc<Config>,
    shutdown: &Shutdown,
) -> JoinHandle<()> {
    let mut done = shutdown.subscribe();
    let mut reloads = config.subscribe_reload();

    tokio::spawn(async move {
        let mut ticker = new_ticker(config.dynamic().session_refresh_interval);
        loop {
            tokio::select! {
                _ = done.recv() => return,
                _ = ticker.tick() => engine.promote_queued(),
                notified = reloads.recv() => {
                    if notified.is_none() {
                        return;
                    }
                    // Restart the timer with the possibly-updated period.
                    ticker = new_ticker(config.dynamic().session_refresh_interval);
                }
            }
        }
    })
}

fn new_ticker(period: Duration) -> Interval {
    // First tick one full period from now, not immediately.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    ticker
}
