//! Session renewal loop
//!
//! [`every`] runs a job on a fixed schedule until cancelled. The job is
//! spawned on each tick rather than awaited, so a slow or failing job never
//! shifts later ticks. [`SignalingPoller`] uses it to renew the session and
//! hand every offer in the renewal response to the negotiator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::signaling::negotiator::Negotiator;
use crate::signaling::relay::RelayApi;
use crate::signaling::session::Session;

/// Default renewal period
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Shorter periods, including zero, are raised to this.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Cancels a periodic task.
///
/// Once [`cancel`](Self::cancel) returns, no further tick fires. Jobs
/// already spawned by earlier ticks keep running. Dropping the handle
/// cancels as well.
#[derive(Debug)]
pub struct PollerHandle {
    token: CancellationToken,
}

impl PollerHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Run `job` at `interval, 2 * interval, ...` from now until cancelled.
///
/// `interval` is raised to [`MIN_INTERVAL`] if shorter.
pub fn every<F, Fut>(interval: Duration, job: F) -> PollerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    every_until(CancellationToken::new(), interval, job)
}

/// Like [`every`], stopping when `token` is cancelled.
pub fn every_until<F, Fut>(
    token: CancellationToken,
    interval: Duration,
    mut job: F,
) -> PollerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let interval = interval.max(MIN_INTERVAL);
    let stop = token.clone();
    let first_tick = Instant::now() + interval;
    tokio::spawn(async move {
        let mut ticker = interval_at(first_tick, interval);
        // A stalled runtime must not produce a burst of catch-up ticks
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if stop.is_cancelled() {
                        break;
                    }
                    tokio::spawn(job());
                }
            }
        }
        log::debug!("Periodic task stopped");
    });

    PollerHandle { token }
}

/// Keeps a session alive and feeds pending offers to the negotiator.
pub struct SignalingPoller {
    relay: Arc<dyn RelayApi>,
    negotiator: Arc<Negotiator>,
}

impl SignalingPoller {
    pub fn new(relay: Arc<dyn RelayApi>, negotiator: Arc<Negotiator>) -> Self {
        Self { relay, negotiator }
    }

    /// Start renewing `session` every `interval`.
    pub fn start(&self, session: Arc<Session>, interval: Duration) -> PollerHandle {
        log::info!(
            "Renewing session {} every {:?}",
            session.short_slug,
            interval
        );

        let token = CancellationToken::new();
        let stop = token.clone();
        let relay = self.relay.clone();
        let negotiator = self.negotiator.clone();

        every_until(token, interval, move || {
            renew_once(
                relay.clone(),
                negotiator.clone(),
                session.clone(),
                stop.clone(),
            )
        })
    }
}

/// One tick: renew, then dispatch each offer to its own negotiation task.
async fn renew_once(
    relay: Arc<dyn RelayApi>,
    negotiator: Arc<Negotiator>,
    session: Arc<Session>,
    stop: CancellationToken,
) {
    let renewed = match relay.renew(&session.short_slug, &session.secret).await {
        Ok(renewed) => renewed,
        Err(e) => {
            log::warn!("Session renewal failed, retrying next tick: {}", e);
            return;
        }
    };

    if stop.is_cancelled() {
        log::debug!(
            "Poller cancelled during renewal, ignoring {} offer(s)",
            renewed.offers.len()
        );
        return;
    }

    if !renewed.offers.is_empty() {
        log::debug!("Renewal returned {} offer(s)", renewed.offers.len());
    }
    for (offer_id, offer) in renewed.offers {
        negotiator.dispatch(session.clone(), offer_id, offer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_every_fires_on_schedule() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handle = every(Duration::from_secs(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Nothing at t=0
        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_jobs_do_not_delay_ticks() {
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        let _handle = every(Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(started.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_future_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handle = every(Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        handle.cancel();
        assert!(handle.is_cancelled());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_raised_to_minimum() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handle = every(Duration::ZERO, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 5, "expected ticks every millisecond, got {}", ticks);
        assert!(!handle.is_cancelled());

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stopped_at = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handle = every(Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        drop(handle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
