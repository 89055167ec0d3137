//! Shared polling clock.
//!
//! One wall-clock-aligned scheduler replaces per-widget timers: ticks fire at
//! multiples of the interval since the Unix epoch, so independently started
//! consumers converge on the same refresh cycle and their requests collapse
//! into the short-TTL response cache.

use chrono::Utc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// One cycle of the shared polling clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Deadline divided by the interval; monotonic and identical for every
    /// subscriber, used as the stale-response guard downstream
    pub seq: u64,
    /// Wall-clock time the tick fired at (ms since epoch)
    pub at_ms: i64,
}

pub struct PollingClock {
    interval: Duration,
    tx: broadcast::Sender<Tick>,
    task: Option<JoinHandle<()>>,
}

/// Next wall-aligned deadline strictly after `now_ms`
pub fn next_deadline_ms(now_ms: i64, interval_ms: i64) -> i64 {
    (now_ms / interval_ms + 1) * interval_ms
}

impl PollingClock {
    pub fn new(interval: Duration) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            interval,
            tx,
            task: None,
        }
    }

    /// Subscribe to future ticks. Dropping the receiver unsubscribes;
    /// ticks carry no payload, subscribers pull fresh data themselves.
    pub fn subscribe(&self) -> broadcast::Receiver<Tick> {
        self.tx.subscribe()
    }

    /// Start emitting ticks. Idempotent per clock instance.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let tx = self.tx.clone();
        let interval_ms = self.interval.as_millis() as i64;

        self.task = Some(tokio::spawn(async move {
            loop {
                let now_ms = Utc::now().timestamp_millis();
                let deadline = next_deadline_ms(now_ms, interval_ms);
                tokio::time::sleep(Duration::from_millis((deadline - now_ms) as u64)).await;

                let tick = Tick {
                    seq: (deadline / interval_ms) as u64,
                    at_ms: deadline,
                };
                debug!(seq = tick.seq, "polling clock tick");
                // No receivers is fine, widgets come and go
                let _ = tx.send(tick);
            }
        }));
    }
}

impl Drop for PollingClock {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
