//! ==============================================================================
//! refresh.rs - timer-driven refresh trigger
//! ==============================================================================
//!
//! emits a tick on a fixed interval, independent of how long any one render
//! takes. missed ticks are skipped rather than bursted. stopping means dropping
//! the ticker: the task is aborted and nothing re-arms it.
//!
//! ==============================================================================

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct RefreshTicker {
    rx: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl RefreshTicker {
    /// first tick fires immediately
    pub fn start(interval: Duration) -> Self {
        let (tx, rx) = watch::channel(0u64);
        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut cycle = 0u64;
            loop {
                timer.tick().await;
                cycle += 1;
                if tx.send(cycle).is_err() {
                    break;
                }
            }
        });
        Self { rx, task }
    }

    /// waits for the next tick and returns its cycle number; None once stopped
    pub async fn tick(&mut self) -> Option<u64> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

impl Drop for RefreshTicker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval() {
        let mut ticker = RefreshTicker::start(Duration::from_secs(30));
        assert_eq!(ticker.tick().await, Some(1));

        let started = tokio::time::Instant::now();
        assert_eq!(ticker.tick().await, Some(2));
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stops_the_timer() {
        let ticker = RefreshTicker::start(Duration::from_secs(1));
        let mut observer = ticker.rx.clone();
        drop(ticker);
        tokio::time::advance(Duration::from_secs(5)).await;
        // at most the immediate first tick got through before the abort
        let mut seen = 0;
        while observer.changed().await.is_ok() {
            seen += 1;
            assert!(seen <= 1);
        }
    }
}
