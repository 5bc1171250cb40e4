// ── Timer set ──
//
// Every delayed or periodic job the engine schedules (token expiry,
// keepalive resubscribe, periodic refresh, re-login) is registered here
// so that logout can cancel all of them at once. Keyed timers replace
// any earlier timer with the same key.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub struct TimerSet {
    parent: CancellationToken,
    group: Mutex<CancellationToken>,
    keyed: DashMap<String, CancellationToken>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TimerSet {
    /// Timers are children of `parent`: cancelling it stops them too.
    pub fn new(parent: CancellationToken) -> Self {
        let group = parent.child_token();
        Self {
            parent,
            group: Mutex::new(group),
            keyed: DashMap::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Run `job` once after `delay`.
    pub fn spawn_after<F>(&self, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.group_token().child_token();
        self.spawn_with(token, delay, job);
    }

    /// Run `tick` every `period`, first run one period from now.
    pub fn spawn_interval<F, Fut>(&self, period: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.group_token().child_token();
        self.spawn_interval_with(token, period, tick);
    }

    /// Like [`spawn_interval`](Self::spawn_interval), replacing any
    /// running timer registered under `key`.
    pub fn spawn_keyed_interval<F, Fut>(&self, key: &str, period: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.group_token().child_token();
        if let Some(previous) = self.keyed.insert(key.to_owned(), token.clone()) {
            previous.cancel();
        }
        self.spawn_interval_with(token, period, tick);
    }

    /// Cancel the keyed timer, if any.
    pub fn cancel_key(&self, key: &str) -> bool {
        match self.keyed.remove(key) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.keyed.contains_key(key)
    }

    /// Cancel every pending timer. The set stays usable afterwards.
    pub fn clear(&self) {
        let fresh = self.parent.child_token();
        let old = std::mem::replace(&mut *self.group.lock().expect("timer lock poisoned"), fresh);
        old.cancel();
        self.keyed.clear();
        self.handles.lock().expect("timer lock poisoned").clear();
        trace!("timers cleared");
    }

    /// Timers registered and not yet finished.
    pub fn len(&self) -> usize {
        let mut handles = self.handles.lock().expect("timer lock poisoned");
        handles.retain(|h| !h.is_finished());
        handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn group_token(&self) -> CancellationToken {
        self.group.lock().expect("timer lock poisoned").clone()
    }

    fn spawn_with<F>(&self, token: CancellationToken, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => job.await,
            }
        });
        self.track(handle);
    }

    fn spawn_interval_with<F, Fut>(&self, token: CancellationToken, period: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // A slow tick pushes the schedule back instead of bursting.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        tokio::select! {
                            biased;
                            () = token.cancelled() => break,
                            () = tick() => {}
                        }
                    }
                }
            }
        });
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock().expect("timer lock poisoned");
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }
}
