//! Periodic tick driver.

use crate::router::RouterEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Spawn the tick driver: post a [`RouterEvent::Tick`] every `period`
/// until the router's queue closes.
///
/// Best effort only. The event queue serializes the actual
/// `execute_tick` call, a stalled queue delays ticks, and missed
/// periods are not replayed.
pub(crate) fn spawn(tx: mpsc::UnboundedSender<RouterEvent>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval's first tick completes immediately; the first
        // scheduler tick belongs one full period after startup.
        timer.tick().await;

        loop {
            timer.tick().await;
            if tx.send(RouterEvent::Tick).is_err() {
                debug!("router queue closed; tick driver stopping");
                break;
            }
        }
    })
}
