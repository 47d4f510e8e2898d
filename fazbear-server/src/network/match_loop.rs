//! Match Loop
//!
//! Fixed-rate driver for a running match. Tick `n` is scheduled at
//! `start + n * period` rather than "previous tick + period", so a slow
//! tick doesn't push every later tick back.
//!
//! The loop knows nothing about lobbies: it calls a tick closure until the
//! closure breaks or the stop signal fires.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Deadline schedule for a fixed tick rate.
#[derive(Debug, Clone)]
pub struct TickSchedule {
    start: Instant,
    tick_rate: u32,
    ticks: u64,
}

impl TickSchedule {
    /// Schedule starting at `start`; tick 1 is due one period later.
    pub fn new(start: Instant, tick_rate: u32) -> Self {
        Self {
            start,
            tick_rate: tick_rate.max(1),
            ticks: 0,
        }
    }

    /// When tick `n` is due.
    pub fn deadline(&self, n: u64) -> Instant {
        let nanos = n as u128 * 1_000_000_000 / self.tick_rate as u128;
        self.start + Duration::from_nanos(nanos as u64)
    }

    /// Claim the next tick and return its deadline.
    pub fn advance(&mut self) -> Instant {
        self.ticks += 1;
        self.deadline(self.ticks)
    }

    /// Ticks claimed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Time between ticks.
    pub fn period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.tick_rate as u64)
    }
}

/// Run `on_tick` at `tick_rate` Hz until it breaks or `stop` fires.
///
/// A dropped stop sender counts as a stop.
pub async fn run<F, Fut>(tick_rate: u32, mut stop: watch::Receiver<bool>, mut on_tick: F)
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = ControlFlow<()>>,
{
    let mut schedule = TickSchedule::new(Instant::now(), tick_rate);

    loop {
        if *stop.borrow() {
            break;
        }

        let deadline = schedule.advance();
        let late = Instant::now().saturating_duration_since(deadline);
        if late > schedule.period() * 5 {
            warn!(tick = schedule.ticks(), late_ms = late.as_millis() as u64, "Match loop falling behind");
        }

        tokio::select! {
            _ = sleep_until(deadline) => {}
            _ = stop.changed() => break,
        }

        if on_tick(schedule.ticks()).await.is_break() {
            break;
        }
    }

    debug!(ticks = schedule.ticks(), "Match loop exited");
}

/// Spawn [`run`] on the tokio runtime.
pub fn spawn<F, Fut>(tick_rate: u32, stop: watch::Receiver<bool>, on_tick: F) -> JoinHandle<()>
where
    F: FnMut(u64) -> Fut + Send + 'static,
    Fut: Future<Output = ControlFlow<()>> + Send + 'static,
{
    tokio::spawn(run(tick_rate, stop, on_tick))
}
