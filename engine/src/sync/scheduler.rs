//! Serialized action/poll scheduler
//!
//! Each domain owns one [`Scheduler`] with two single-slot queues: user actions
//! and background polls. Starting an action cancels the pending poll; the last
//! action to finish schedules a zero-delay poll so its effect is read back from
//! the station. Session transitions cancel both queues.
//!
//! Cancellation is epoch based. A poll that has not reached the network yet is
//! aborted; one that is already waiting on the station is left to finish and its
//! result is dropped when its epoch no longer matches.

use crate::error::{ApiError, SyncError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What to do after a poll completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Poll again after [`Domain::next_delay`]
    Reschedule,
    /// Stop polling until the next action or session change
    Stop,
}

/// Scheduler bookkeeping handed to [`Domain::publish`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activity {
    pub connected: bool,
    pub pending_actions: usize,
    /// First poll since connecting has not completed yet
    pub initial_sync: bool,
}

impl Activity {
    pub fn busy(&self) -> bool {
        self.pending_actions > 0 || self.initial_sync
    }
}

/// One class of remote records with its own fetch and reconcile rules.
///
/// Every method except [`Domain::fetch`] is called with the scheduler lock
/// held and must not call back into the scheduler.
#[async_trait]
pub trait Domain: Send + Sync + 'static {
    type Snapshot: Send + 'static;

    fn name(&self) -> &'static str;

    /// Fetch a full snapshot from the station
    async fn fetch(&self) -> Result<Self::Snapshot, ApiError>;

    /// Reconcile a fresh snapshot into the cache
    fn apply(&self, snapshot: Self::Snapshot) -> Result<PollOutcome, SyncError>;

    /// A poll failed; never surfaced to the user
    fn poll_failed(&self, _error: &SyncError) -> PollOutcome {
        PollOutcome::Reschedule
    }

    /// Delay before the next regular poll
    fn next_delay(&self) -> Duration;

    fn poll_enabled(&self) -> bool {
        true
    }

    /// Whether the first poll after connecting should count as busy
    fn initial_sync_pending(&self) -> bool {
        false
    }

    fn action_completed(&self, _result: &Result<Value, SyncError>) {}

    fn connected(&self) {}

    fn disconnected(&self) {}

    /// Publish the domain's state for the current activity
    fn publish(&self, _activity: Activity) {}
}

struct PollTask {
    handle: JoinHandle<()>,
    /// Set once the poll holds the slot and is about to hit the network
    in_flight: Arc<AtomicBool>,
}

struct Inner {
    connected: bool,
    session_epoch: u64,
    poll_epoch: u64,
    pending_actions: usize,
    initial_sync: bool,
    poll: Option<PollTask>,
}

struct Shared<D> {
    domain: Arc<D>,
    inner: Mutex<Inner>,
    action_slot: tokio::sync::Mutex<()>,
    poll_slot: tokio::sync::Mutex<()>,
}

/// Action and poll queues of one domain
pub struct Scheduler<D: Domain> {
    shared: Arc<Shared<D>>,
}

impl<D: Domain> Clone for Scheduler<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: Domain> Scheduler<D> {
    pub fn new(domain: Arc<D>) -> Self {
        Self {
            shared: Arc::new(Shared {
                domain,
                inner: Mutex::new(Inner {
                    connected: false,
                    session_epoch: 0,
                    poll_epoch: 0,
                    pending_actions: 0,
                    initial_sync: false,
                    poll: None,
                }),
                action_slot: tokio::sync::Mutex::new(()),
                poll_slot: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn domain(&self) -> &Arc<D> {
        &self.shared.domain
    }

    pub fn is_connected(&self) -> bool {
        self.shared.inner.lock().connected
    }

    pub fn activity(&self) -> Activity {
        activity(&self.shared.inner.lock())
    }

    /// Restart or stop both queues after a session transition
    pub fn session_changed(&self, connected: bool) {
        let domain = &self.shared.domain;
        let mut inner = self.shared.inner.lock();

        self.cancel_poll(&mut inner);
        inner.session_epoch += 1;
        inner.pending_actions = 0;
        inner.connected = connected;

        if connected {
            inner.initial_sync = domain.initial_sync_pending();
            domain.connected();
            domain.publish(activity(&inner));
            info!("{}: session connected, starting sync", domain.name());
            self.schedule_poll(&mut inner, Duration::ZERO);
        } else {
            inner.initial_sync = false;
            domain.disconnected();
            domain.publish(activity(&inner));
            info!("{}: session closed, queues cancelled", domain.name());
        }
    }

    /// Poll now unless an action is pending
    pub fn refresh(&self) {
        let mut inner = self.shared.inner.lock();
        self.schedule_poll(&mut inner, Duration::ZERO);
    }

    /// Run a user action on the action queue.
    ///
    /// Rejected without running `work` when not connected. Actions queued
    /// behind a session change fail with [`SyncError::Cancelled`].
    pub async fn run_action<F, Fut>(&self, work: F) -> Result<Value, SyncError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        let epoch = {
            let mut inner = self.shared.inner.lock();
            if !inner.connected {
                return Err(SyncError::NotConnected);
            }
            self.cancel_poll(&mut inner);
            inner.pending_actions += 1;
            self.shared.domain.publish(activity(&inner));
            inner.session_epoch
        };

        // Runs detached so the bookkeeping completes even if the caller goes away
        let this = self.clone();
        let finished = Arc::new(AtomicBool::new(false));
        let done = Arc::clone(&finished);
        let task = tokio::spawn(async move {
            let _slot = this.shared.action_slot.lock().await;
            if this.shared.inner.lock().session_epoch != epoch {
                return Err(SyncError::Cancelled);
            }

            let result = work().await.map_err(SyncError::from);
            done.store(true, Ordering::SeqCst);
            this.finish_action(epoch, &result);
            result
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!("{}: action aborted: {}", self.shared.domain.name(), e);
                let result = Err(SyncError::Cancelled);
                if !finished.load(Ordering::SeqCst) {
                    self.finish_action(epoch, &result);
                }
                result
            }
        }
    }

    fn finish_action(&self, epoch: u64, result: &Result<Value, SyncError>) {
        let domain = &self.shared.domain;
        let mut inner = self.shared.inner.lock();
        if inner.session_epoch != epoch {
            debug!("{}: action finished after session change", domain.name());
            return;
        }

        inner.pending_actions = inner.pending_actions.saturating_sub(1);
        domain.action_completed(result);
        domain.publish(activity(&inner));

        if inner.pending_actions == 0 {
            self.schedule_poll(&mut inner, Duration::ZERO);
        }
    }

    fn cancel_poll(&self, inner: &mut Inner) {
        inner.poll_epoch += 1;
        if let Some(poll) = inner.poll.take() {
            if !poll.in_flight.load(Ordering::SeqCst) {
                poll.handle.abort();
            }
        }
    }

    fn schedule_poll(&self, inner: &mut Inner, delay: Duration) {
        let domain = &self.shared.domain;
        if !inner.connected || inner.pending_actions > 0 || !domain.poll_enabled() {
            return;
        }

        self.cancel_poll(inner);
        let epoch = inner.poll_epoch;
        let in_flight = Arc::new(AtomicBool::new(false));

        debug!("{}: next poll in {:?}", domain.name(), delay);
        let handle = tokio::spawn(self.clone().poll(epoch, delay, Arc::clone(&in_flight)));
        inner.poll = Some(PollTask { handle, in_flight });
    }

    async fn poll(self, epoch: u64, delay: Duration, in_flight: Arc<AtomicBool>) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let _slot = self.shared.poll_slot.lock().await;
        {
            let inner = self.shared.inner.lock();
            if inner.poll_epoch != epoch {
                return;
            }
            in_flight.store(true, Ordering::SeqCst);
        }

        let domain = &self.shared.domain;
        let fetched = domain.fetch().await;

        let mut inner = self.shared.inner.lock();
        if inner.poll_epoch != epoch {
            debug!("{}: dropping result of cancelled poll", domain.name());
            return;
        }
        inner.poll = None;

        let outcome = match fetched
            .map_err(SyncError::from)
            .and_then(|snapshot| domain.apply(snapshot))
        {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_malformed() {
                    warn!("{}: skipping malformed snapshot: {}", domain.name(), e);
                } else {
                    debug!("{}: poll failed: {}", domain.name(), e);
                }
                domain.poll_failed(&e)
            }
        };

        inner.initial_sync = false;
        domain.publish(activity(&inner));

        if outcome == PollOutcome::Reschedule {
            let delay = domain.next_delay();
            self.schedule_poll(&mut inner, delay);
        }
    }
}

fn activity(inner: &Inner) -> Activity {
    Activity {
        connected: inner.connected,
        pending_actions: inner.pending_actions,
        initial_sync: inner.initial_sync,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Counts fetches; each fetch waits for `release` when gated
    struct CountingDomain {
        fetches: AtomicUsize,
        applied: AtomicUsize,
        gate: Option<Arc<Notify>>,
        published: Mutex<Vec<Activity>>,
    }

    impl CountingDomain {
        fn new(gate: Option<Arc<Notify>>) -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicUsize::new(0),
                applied: AtomicUsize::new(0),
                gate,
                published: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Domain for CountingDomain {
        type Snapshot = usize;

        fn name(&self) -> &'static str {
            "counting"
        }

        async fn fetch(&self) -> Result<usize, ApiError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(n)
        }

        fn apply(&self, _snapshot: usize) -> Result<PollOutcome, SyncError> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(PollOutcome::Reschedule)
        }

        fn next_delay(&self) -> Duration {
            Duration::from_secs(10)
        }

        fn publish(&self, activity: Activity) {
            self.published.lock().push(activity);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_connect_then_on_interval() {
        let counter = CountingDomain::new(None);
        let scheduler = Scheduler::new(Arc::clone(&counter));

        scheduler.session_changed(true);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(counter.fetches.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(counter.applied.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_polling() {
        let counter = CountingDomain::new(None);
        let scheduler = Scheduler::new(Arc::clone(&counter));

        scheduler.session_changed(true);
        tokio::time::sleep(Duration::from_millis(1)).await;
        scheduler.session_changed(false);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.fetches.load(Ordering::SeqCst), 1);
        assert!(!counter.published.lock().last().unwrap().connected);
    }

    #[tokio::test]
    async fn action_rejected_while_disconnected() {
        let counter = CountingDomain::new(None);
        let scheduler = Scheduler::new(counter);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let result = scheduler
            .run_action(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(Value::Null)
            })
            .await;

        assert!(matches!(result, Err(SyncError::NotConnected)));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_action_still_releases_the_queue() {
        let counter = CountingDomain::new(None);
        let scheduler = Scheduler::new(Arc::clone(&counter));
        scheduler.session_changed(true);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let result = scheduler
            .run_action(|| async {
                if true {
                    panic!("action failed hard");
                }
                Ok(Value::Null)
            })
            .await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(scheduler.activity().pending_actions, 0);
        assert!(!scheduler.activity().busy());
        assert_eq!(counter.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_poll_result_is_dropped_after_action() {
        let gate = Arc::new(Notify::new());
        let counter = CountingDomain::new(Some(Arc::clone(&gate)));
        let scheduler = Scheduler::new(Arc::clone(&counter));

        scheduler.session_changed(true);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(counter.fetches.load(Ordering::SeqCst), 1);

        scheduler.run_action(|| async { Ok(Value::Null) }).await.unwrap();

        // The stale poll returns now; only the confirmatory poll may apply
        gate.notify_waiters();
        tokio::time::sleep(Duration::from_millis(1)).await;
        gate.notify_waiters();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(counter.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(counter.applied.load(Ordering::SeqCst), 1);
    }
}
