use crate::domain::ports::{Clock, Ticker};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Real timers backed by `tokio::time`.
///
/// Under a paused test runtime (`#[tokio::test(start_paused = true)]`) this
/// follows the virtual clock, which is how the timing scenarios are tested.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn ticker(&self, period: Duration) -> Box<dyn Ticker> {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        // A slow status check delays the next tick instead of bunching ticks up.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Box::new(IntervalTicker { interval })
    }
}

struct IntervalTicker {
    interval: Interval,
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// A clock that only ticks when told to.
///
/// Every ticker created from it yields exactly one tick per `advance` step
/// taken after its creation, regardless of its period.
#[derive(Debug, Clone)]
pub struct ManualClock {
    ticks: Arc<watch::Sender<u64>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { ticks: Arc::new(tx) }
    }

    /// Releases `steps` ticks to every live ticker.
    pub fn advance(&self, steps: u64) {
        self.ticks.send_modify(|count| *count += steps);
    }

    /// Total number of steps taken so far.
    pub fn elapsed_ticks(&self) -> u64 {
        *self.ticks.borrow()
    }
}

impl Clock for ManualClock {
    fn ticker(&self, _period: Duration) -> Box<dyn Ticker> {
        let rx = self.ticks.subscribe();
        let seen = *rx.borrow();
        Box::new(ManualTicker { rx, seen })
    }
}

struct ManualTicker {
    rx: watch::Receiver<u64>,
    seen: u64,
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) {
        loop {
            let current = *self.rx.borrow_and_update();
            if current > self.seen {
                self.seen += 1;
                return;
            }
            if self.rx.changed().await.is_err() {
                // Clock dropped: no tick will ever come.
                std::future::pending::<()>().await;
            }
        }
    }
}
