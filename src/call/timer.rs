//! Call duration timer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// One-second counter started when a call connects
///
/// The first tick fires one second after start. Dropping the timer stops it.
pub struct DurationTimer {
    handle: JoinHandle<()>,
    seconds: Arc<AtomicU64>,
}

impl DurationTimer {
    /// Start counting from 0, calling `on_tick` with the new count every second
    pub fn start<F>(on_tick: F) -> Self
    where
        F: Fn(u64) + Send + 'static,
    {
        let seconds = Arc::new(AtomicU64::new(0));
        let counter = seconds.clone();

        let handle = tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                on_tick(value);
            }
        });

        Self { handle, seconds }
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.seconds.load(Ordering::SeqCst)
    }

    /// Cancel the interval and return the final count
    pub fn stop(&self) -> u64 {
        self.handle.abort();
        self.elapsed_secs()
    }
}

impl Drop for DurationTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Format seconds as `MM:SS` (minutes keep growing past 99)
pub fn format_duration(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
