//! Periodic query scheduler.
//!
//! `schedule` fires its query immediately and then on every interval tick,
//! for as long as the returned [`PollTicket`] lives. Ticks are fire-and-
//! forget: each issuance runs as its own task, so a slow response never
//! delays the next tick and overlapping requests are accepted. A failed tick
//! is logged, counted and swallowed; only successful results reach the
//! caller's channel. Cancelling the ticket aborts the scheduler loop, which
//! owns the only receiver in-flight requests can reach, so a completion that
//! arrives after cancellation is discarded at the closed channel.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// First-class cancellation for one recurring query. Dropping the ticket
/// cancels too; `cancel` just makes the intent explicit at call sites.
pub struct PollTicket {
    name: &'static str,
    task: Option<JoinHandle<()>>,
}

impl PollTicket {
    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(query = self.name, "poll ticket cancelled");
        }
    }
}

impl Drop for PollTicket {
    fn drop(&mut self) {
        self.abort();
    }
}

fn inflight_cap() -> usize {
    std::env::var("VANTAGE_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(256)
}

/// Issue `make(seq)` now and then every `interval`, forwarding successful
/// results into `results`. `seq` starts at 1 and increments per tick; it is
/// the ordering token consumers use to reject stale completions.
pub fn schedule<F, Fut, T>(
    name: &'static str,
    interval: Duration,
    mut make: F,
    results: mpsc::Sender<T>,
) -> PollTicket
where
    F: FnMut(u64) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let (raw_tx, mut raw_rx) = mpsc::channel::<T>(inflight_cap());
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut seq: u64 = 0;
        info!(query = name, interval_ms = interval.as_millis() as u64, "periodic query scheduled");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    seq += 1;
                    let fut = make(seq);
                    let raw_tx = raw_tx.clone();
                    tokio::spawn(async move {
                        match fut.await {
                            Ok(v) => {
                                let _ = raw_tx.send(v).await;
                            }
                            Err(e) => {
                                // Self-healing: next tick retries regardless.
                                debug!(query = name, error = %e, "tick failed; retrying next interval");
                                counter!("poll_tick_failures_total", 1u64, "query" => name);
                            }
                        }
                    });
                }
                maybe = raw_rx.recv() => {
                    // raw_tx is held by this loop, so recv never yields None.
                    if let Some(v) = maybe {
                        if results.send(v).await.is_err() {
                            debug!(query = name, "result channel closed; stopping poll");
                            break;
                        }
                    }
                }
            }
        }
    });
    PollTicket { name, task: Some(task) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn fires_immediately_then_on_interval() {
        let (tx, mut rx) = mpsc::channel::<u64>(16);
        let _ticket = schedule("t", Duration::from_millis(30), |seq| async move { Ok(seq) }, tx);
        let first = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("first tick fires without waiting an interval")
            .expect("result delivered");
        assert_eq!(first, 1);
        let second = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("second tick follows")
            .expect("result delivered");
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn failed_ticks_are_swallowed_and_do_not_stop_the_loop() {
        let (tx, mut rx) = mpsc::channel::<u64>(16);
        let _ticket = schedule(
            "flaky",
            Duration::from_millis(10),
            |seq| async move {
                if seq % 2 == 1 {
                    anyhow::bail!("tick {} down", seq)
                }
                Ok(seq)
            },
            tx,
        );
        let mut got = Vec::new();
        while got.len() < 3 {
            let v = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("loop keeps producing despite failures")
                .expect("result");
            got.push(v);
        }
        assert!(got.iter().all(|v| v % 2 == 0), "only successful ticks delivered: {got:?}");
    }

    #[tokio::test]
    async fn slow_tick_does_not_delay_the_next() {
        let (tx, mut rx) = mpsc::channel::<u64>(16);
        let _ticket = schedule(
            "slow-first",
            Duration::from_millis(20),
            |seq| async move {
                if seq == 1 {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Ok(seq)
            },
            tx,
        );
        // Tick 2 must complete while tick 1 is still sleeping.
        let v = tokio::time::timeout(Duration::from_millis(300), rx.recv())
            .await
            .expect("tick 2 overlaps tick 1")
            .expect("result");
        assert_eq!(v, 2);
    }

    #[tokio::test]
    async fn cancel_freezes_handler_invocations() {
        let count = Arc::new(AtomicU64::new(0));
        let (tx, mut rx) = mpsc::channel::<u64>(64);
        let counter = Arc::clone(&count);
        let drain = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let ticket = schedule("frozen", Duration::from_millis(10), |seq| async move { Ok(seq) }, tx);
        tokio::time::sleep(Duration::from_millis(60)).await;
        ticket.cancel();
        // Let any would-be stragglers play out, then verify the count froze.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let frozen = count.load(Ordering::SeqCst);
        assert!(frozen >= 1, "some ticks should have landed before cancel");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), frozen, "no delivery after cancel");
        drain.abort();
    }

    #[tokio::test]
    async fn cancel_before_first_interval_means_zero_deliveries_afterwards() {
        let (tx, mut rx) = mpsc::channel::<u64>(16);
        let ticket = schedule(
            "never-lands",
            Duration::from_millis(10),
            |seq| async move {
                // Response slower than the cancellation below.
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(seq)
            },
            tx,
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        ticket.cancel();
        // The in-flight responses complete after cancel and must be discarded.
        let res = tokio::time::timeout(Duration::from_millis(250), rx.recv()).await;
        assert!(matches!(res, Ok(None)), "channel closes without deliveries, got {res:?}");
    }
}
