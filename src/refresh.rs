//! Periodic re-issue of the last query for live-updating sources.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a tick asks the owner to do.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// Background ticker driving refreshes through the normal query pipeline.
///
/// Ticks never overlap a previous refresh on their own; each tick submits a
/// new generation and the sequencer supersedes whatever is still running.
#[derive(Debug)]
pub struct RefreshScheduler {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl RefreshScheduler {
    /// Spawns the ticker on `runtime`. The first tick fires one `period` after
    /// spawning.
    pub fn spawn<F>(runtime: &Handle, period: Duration, on_tick: F) -> Self
    where
        F: FnMut() -> TickControl + Send + 'static,
    {
        let stop = CancellationToken::new();
        let handle = runtime.spawn(run_refresh_loop(period, stop.clone(), on_tick));
        Self { stop, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.stop.is_cancelled() && !self.handle.is_finished()
    }

    /// Stops ticking. No tick starts after this returns.
    pub fn stop(&self) {
        self.stop.cancel();
        self.handle.abort();
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_refresh_loop<F>(period: Duration, stop: CancellationToken, mut on_tick: F)
where
    F: FnMut() -> TickControl + Send + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if stop.is_cancelled() {
            break;
        }

        debug!(period_ms = period.as_millis() as u64, "refresh tick");
        if on_tick() == TickControl::Stop {
            break;
        }
    }

    debug!("refresh scheduler stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_tick(
        counter: &Arc<AtomicUsize>,
    ) -> impl FnMut() -> TickControl + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TickControl::Continue
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_at_fixed_period() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let period = Duration::from_secs(10);
        let scheduler = RefreshScheduler::spawn(&Handle::current(), period, counting_tick(&ticks));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_ticks() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let period = Duration::from_secs(1);
        let scheduler = RefreshScheduler::spawn(&Handle::current(), period, counting_tick(&ticks));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        scheduler.stop();
        let seen = ticks.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_can_stop_the_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let period = Duration::from_secs(1);
        let _scheduler = RefreshScheduler::spawn(&Handle::current(), period, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TickControl::Stop
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
