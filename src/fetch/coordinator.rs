//! Deduplicating fetch coordinator.
//!
//! The coordinator sits in front of a [`CostCache`] and resolves keys either
//! from memory or by running a caller-supplied fetch function. For any key at
//! most one fetch is in flight: the first caller that misses the cache starts
//! it, later callers attach to it as waiters, and the result is fanned out to
//! every waiter still attached when it resolves.
//!
//! ```text
//!  no request --(miss)--> pending --(ok)----> succeeded --> no request (value cached)
//!                         pending --(error)-> failed ----> no request (cache untouched)
//!                         pending --(waiter cancels)--> pending
//! ```
//!
//! Cache, in-flight table and waiter lists share one lock. Results are sent
//! through one-shot channels while that lock is held, so a waiter that has
//! cancelled never observes a result afterwards and a caller arriving after a
//! successful fetch always hits the cache.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{ready, Context, Poll};
use std::time::Instant;

use anyhow::anyhow;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheKey, CacheStats, CostCache, Weigher};
use crate::fetch::error::FetchError;
use crate::metrics::{CacheMetrics, FetchOutcome, LookupResult};

type FetchResult<V> = Result<V, FetchError>;

/// What happens to an in-flight fetch once its last waiter cancels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Let the fetch finish and populate the cache for future callers.
    #[default]
    ContinueFetch,
    /// Forget the request and abort the fetch task.
    ///
    /// The abort is only scheduled: the fetch future is dropped the next time
    /// the runtime gets to the task, so a caller arriving right after the last
    /// waiter left may start a new fetch while the old one is still winding
    /// down. A value the old fetch produces in that window is still cached.
    AbortWhenUnobserved,
}

/// Optional knobs for [`FetchCoordinator::with_options`].
#[derive(Clone, Default)]
pub struct CoordinatorOptions {
    pub cancel_policy: CancelPolicy,
    pub metrics: Option<CacheMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Pending,
    Succeeded,
    Failed,
}

struct Waiter<V> {
    id: u64,
    tx: oneshot::Sender<FetchResult<V>>,
}

/// The single live fetch for one key.
struct FetchRequest<V> {
    /// Distinguishes this request from later ones for the same key.
    id: u64,
    state: RequestState,
    /// Attached waiters in arrival order.
    waiters: Vec<Waiter<V>>,
    started: Instant,
    /// Only recorded under [`CancelPolicy::AbortWhenUnobserved`].
    abort: Option<AbortHandle>,
}

struct State<V> {
    cache: CostCache<V>,
    in_flight: HashMap<CacheKey, FetchRequest<V>>,
    next_id: u64,
}

impl<V> State<V> {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Remove the in-flight request for `key`, but only if it is request `id`.
    fn take_request(&mut self, key: &CacheKey, id: u64) -> Option<FetchRequest<V>> {
        match self.in_flight.get(key) {
            Some(request) if request.id == id => self.in_flight.remove(key),
            _ => None,
        }
    }
}

struct Shared<V> {
    state: Mutex<State<V>>,
    weigher: Box<dyn Weigher<V>>,
    cancel_policy: CancelPolicy,
    metrics: Option<CacheMetrics>,
}

impl<V> Shared<V> {
    fn observe(&self, state: &State<V>) {
        if let Some(metrics) = &self.metrics {
            metrics.observe(&state.cache.stats(), state.in_flight.len());
        }
    }

    fn record_lookup(&self, result: LookupResult) {
        if let Some(metrics) = &self.metrics {
            metrics.record_lookup(result);
        }
    }

    fn record_fetch(&self, outcome: FetchOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_fetch(outcome);
        }
    }

    /// Deliver a failure to every waiter of request `id` and discard it.
    fn resolve_err(&self, key: &CacheKey, id: u64, err: FetchError, outcome: FetchOutcome) {
        let mut state = self.state.lock();
        let Some(mut request) = state.take_request(key, id) else {
            return;
        };
        request.state = RequestState::Failed;

        let waiters = request.waiters.len();
        for waiter in request.waiters.drain(..) {
            let _ = waiter.tx.send(Err(err.clone()));
        }
        self.record_fetch(outcome);
        self.observe(&state);
        drop(state);

        warn!(
            key = %key,
            waiters,
            state = ?request.state,
            elapsed_ms = request.started.elapsed().as_millis() as u64,
            error = %err,
            "Fetch failed"
        );
    }

    /// Detach waiter `waiter_id` from the in-flight request for `key`.
    ///
    /// The waiter is sent [`FetchError::Cancelled`]. Returns `false` if the
    /// waiter was no longer attached, i.e. its request already resolved.
    fn withdraw(&self, key: &CacheKey, waiter_id: u64) -> bool {
        let mut state = self.state.lock();
        let Some(request) = state.in_flight.get_mut(key) else {
            return false;
        };
        let Some(pos) = request.waiters.iter().position(|w| w.id == waiter_id) else {
            return false;
        };

        let waiter = request.waiters.remove(pos);
        let _ = waiter.tx.send(Err(FetchError::Cancelled));
        if let Some(metrics) = &self.metrics {
            metrics.record_cancellation();
        }

        let remaining = request.waiters.len();
        debug!(key = %key, waiter = waiter_id, remaining, "Waiter cancelled");

        if remaining == 0 {
            match self.cancel_policy {
                CancelPolicy::ContinueFetch => {
                    debug!(key = %key, "No waiters left, fetch continues to populate the cache");
                }
                CancelPolicy::AbortWhenUnobserved => {
                    if let Some(request) = state.in_flight.remove(key) {
                        if let Some(handle) = request.abort {
                            handle.abort();
                        }
                        self.record_fetch(FetchOutcome::Aborted);
                        info!(key = %key, "Aborted fetch with no remaining waiters");
                    }
                }
            }
        }
        self.observe(&state);
        true
    }
}

impl<V: Clone + 'static> Shared<V> {
    /// Cache `value`, hand it to every waiter of request `id` and discard it.
    fn resolve_ok(&self, key: &CacheKey, id: u64, value: V) {
        let cost = self.weigher.weigh(&value);
        let mut state = self.state.lock();

        let evicted = state.cache.put(key.clone(), value.clone(), cost);
        if let Some(metrics) = &self.metrics {
            metrics.record_evictions(evicted.len());
        }

        let Some(mut request) = state.take_request(key, id) else {
            // Aborted after the value arrived; the cache still keeps it.
            self.observe(&state);
            return;
        };
        request.state = RequestState::Succeeded;

        let waiters = request.waiters.len();
        for waiter in request.waiters.drain(..) {
            let _ = waiter.tx.send(Ok(value.clone()));
        }
        self.record_fetch(FetchOutcome::Success);
        self.observe(&state);
        drop(state);

        info!(
            key = %key,
            cost,
            waiters,
            evicted = evicted.len(),
            state = ?request.state,
            elapsed_ms = request.started.elapsed().as_millis() as u64,
            "Fetch succeeded"
        );
    }
}

/// Resolves the request it was created for when the fetch task finishes.
///
/// If the task is torn down without reporting (panic, runtime shutdown,
/// abort), dropping the guard fails the request so the key is not left
/// pending forever.
struct InFlightGuard<V> {
    shared: Arc<Shared<V>>,
    key: CacheKey,
    request_id: u64,
    done: bool,
}

impl<V: Clone + 'static> InFlightGuard<V> {
    fn complete(mut self, result: anyhow::Result<V>) {
        self.done = true;
        match result {
            Ok(value) => self.shared.resolve_ok(&self.key, self.request_id, value),
            Err(err) => self.shared.resolve_err(
                &self.key,
                self.request_id,
                FetchError::failed(err),
                FetchOutcome::Failure,
            ),
        }
    }
}

impl<V> Drop for InFlightGuard<V> {
    fn drop(&mut self) {
        if !self.done {
            self.shared.resolve_err(
                &self.key,
                self.request_id,
                FetchError::failed(anyhow!("fetch task aborted")),
                FetchOutcome::Aborted,
            );
        }
    }
}

/// Get-or-fetch front end over a shared [`CostCache`].
///
/// Cloning is cheap and every clone shares the same cache and in-flight
/// table, so one coordinator built at startup can be handed to every caller.
pub struct FetchCoordinator<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for FetchCoordinator<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> std::fmt::Debug for FetchCoordinator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("FetchCoordinator")
            .field("cache", &state.cache)
            .field("in_flight", &state.in_flight.len())
            .field("cancel_policy", &self.shared.cancel_policy)
            .finish()
    }
}

impl<V: Clone + Send + 'static> FetchCoordinator<V> {
    /// Create a coordinator that owns `cache` and prices values with `weigher`.
    pub fn new(cache: CostCache<V>, weigher: impl Weigher<V>) -> Self {
        Self::with_options(cache, weigher, CoordinatorOptions::default())
    }

    pub fn with_options(
        cache: CostCache<V>,
        weigher: impl Weigher<V>,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    cache,
                    in_flight: HashMap::new(),
                    next_id: 0,
                }),
                weigher: Box::new(weigher),
                cancel_policy: options.cancel_policy,
                metrics: options.metrics,
            }),
        }
    }

    /// Resolve `key` from the cache, or through `fetch`.
    ///
    /// A cache hit returns [`Lookup::Cached`] without suspending and without
    /// calling `fetch`. Otherwise the caller is attached to the in-flight
    /// request for `key`, creating it and spawning `fetch(key)` on the tokio
    /// runtime if there is none. `fetch` is dropped uncalled when another
    /// fetch for the key is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn request<F, Fut>(&self, key: CacheKey, fetch: F) -> Lookup<V>
    where
        F: FnOnce(CacheKey) -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let (waiter_id, request_id) = {
            let mut state = self.shared.state.lock();

            let cached = state.cache.get(&key).cloned();
            if let Some(value) = cached {
                drop(state);
                self.shared.record_lookup(LookupResult::Hit);
                trace!(key = %key, "Cache hit");
                return Lookup::Cached(value);
            }

            let waiter_id = state.next_id();
            if let Some(request) = state.in_flight.get_mut(&key) {
                request.waiters.push(Waiter { id: waiter_id, tx });
                debug!(key = %key, waiters = request.waiters.len(), "Joined in-flight fetch");
                drop(state);
                self.shared.record_lookup(LookupResult::Joined);
                return Lookup::Pending(self.pending(key, waiter_id, rx, true));
            }

            let request_id = state.next_id();
            state.in_flight.insert(
                key.clone(),
                FetchRequest {
                    id: request_id,
                    state: RequestState::Pending,
                    waiters: vec![Waiter { id: waiter_id, tx }],
                    started: Instant::now(),
                    abort: None,
                },
            );
            self.shared.observe(&state);
            (waiter_id, request_id)
        };

        self.shared.record_lookup(LookupResult::Miss);
        info!(key = %key, "Cache miss, starting fetch");

        let guard = InFlightGuard {
            shared: Arc::clone(&self.shared),
            key: key.clone(),
            request_id,
            done: false,
        };
        let fut = fetch(key.clone());
        let task = tokio::spawn(async move {
            let result = fut.await;
            guard.complete(result);
        });

        if self.shared.cancel_policy == CancelPolicy::AbortWhenUnobserved {
            let mut state = self.shared.state.lock();
            if let Some(request) = state.in_flight.get_mut(&key) {
                if request.id == request_id {
                    request.abort = Some(task.abort_handle());
                }
            }
        }

        Lookup::Pending(self.pending(key, waiter_id, rx, false))
    }

    fn pending(
        &self,
        key: CacheKey,
        waiter_id: u64,
        rx: oneshot::Receiver<FetchResult<V>>,
        joined: bool,
    ) -> PendingFetch<V> {
        PendingFetch {
            key,
            waiter_id,
            joined,
            rx,
            shared: Arc::downgrade(&self.shared),
            finished: false,
        }
    }

    /// Cache-only lookup. Never starts a fetch.
    pub fn get_cached(&self, key: &CacheKey) -> Option<V> {
        self.shared.state.lock().cache.get(key).cloned()
    }

    /// Insert a value directly, bypassing any fetch.
    pub fn insert(&self, key: CacheKey, value: V) {
        let cost = self.shared.weigher.weigh(&value);
        let mut state = self.shared.state.lock();
        let evicted = state.cache.put(key, value, cost);
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_evictions(evicted.len());
        }
        self.shared.observe(&state);
    }
}

impl<V> FetchCoordinator<V> {
    /// Drop the cached value for `key`. In-flight fetches are not affected.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut state = self.shared.state.lock();
        let removed = state.cache.invalidate(key).is_some();
        self.shared.observe(&state);
        removed
    }

    /// Number of waiters attached to the in-flight fetch for `key`, if any.
    pub fn in_flight_waiters(&self, key: &CacheKey) -> Option<usize> {
        self.shared
            .state
            .lock()
            .in_flight
            .get(key)
            .map(|request| request.waiters.len())
    }

    /// Number of keys with a fetch in flight.
    pub fn in_flight_count(&self) -> usize {
        self.shared.state.lock().in_flight.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.shared.state.lock().cache.stats()
    }

    pub fn cancel_policy(&self) -> CancelPolicy {
        self.shared.cancel_policy
    }
}

/// Outcome of [`FetchCoordinator::request`].
pub enum Lookup<V> {
    /// Resident in the cache; available synchronously.
    Cached(V),
    /// Waiting on an in-flight fetch.
    Pending(PendingFetch<V>),
}

impl<V> Lookup<V> {
    /// Whether the value was available without waiting. Callers use this to
    /// decide whether to show a placeholder.
    pub fn is_cached(&self) -> bool {
        matches!(self, Lookup::Cached(_))
    }

    pub fn lookup_result(&self) -> LookupResult {
        match self {
            Lookup::Cached(_) => LookupResult::Hit,
            Lookup::Pending(pending) if pending.joined() => LookupResult::Joined,
            Lookup::Pending(_) => LookupResult::Miss,
        }
    }

    pub fn cancel_handle(&self) -> Option<CancelHandle<V>> {
        match self {
            Lookup::Cached(_) => None,
            Lookup::Pending(pending) => Some(pending.cancel_handle()),
        }
    }

    /// Wait for the value.
    pub async fn resolve(self) -> Result<V, FetchError> {
        match self {
            Lookup::Cached(value) => Ok(value),
            Lookup::Pending(pending) => pending.await,
        }
    }
}

/// A caller's interest in an in-flight fetch.
///
/// Resolves to the fetched value, the fetch error, or
/// [`FetchError::Cancelled`] if this waiter was cancelled. Dropping it before
/// it resolves withdraws the waiter; the fetch itself is governed by the
/// coordinator's [`CancelPolicy`].
pub struct PendingFetch<V> {
    key: CacheKey,
    waiter_id: u64,
    joined: bool,
    rx: oneshot::Receiver<FetchResult<V>>,
    shared: Weak<Shared<V>>,
    finished: bool,
}

impl<V> PendingFetch<V> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Whether this waiter attached to a fetch another caller started.
    pub fn joined(&self) -> bool {
        self.joined
    }

    pub fn cancel_handle(&self) -> CancelHandle<V> {
        CancelHandle {
            key: self.key.clone(),
            waiter_id: self.waiter_id,
            shared: Weak::clone(&self.shared),
        }
    }

    /// Withdraw this waiter. Returns `false` if the fetch already resolved.
    pub fn cancel(mut self) -> bool {
        self.finished = true;
        match self.shared.upgrade() {
            Some(shared) => shared.withdraw(&self.key, self.waiter_id),
            None => false,
        }
    }
}

impl<V> Unpin for PendingFetch<V> {}

impl<V> Future for PendingFetch<V> {
    type Output = Result<V, FetchError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let result = ready!(Pin::new(&mut this.rx).poll(cx));
        this.finished = true;
        Poll::Ready(result.unwrap_or_else(|_| {
            Err(FetchError::failed(anyhow!("fetch dropped without a result")))
        }))
    }
}

impl<V> Drop for PendingFetch<V> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.withdraw(&self.key, self.waiter_id);
        }
    }
}

/// Cancels one waiter from anywhere, e.g. from the task that owns the view
/// which asked for the value.
pub struct CancelHandle<V> {
    key: CacheKey,
    waiter_id: u64,
    shared: Weak<Shared<V>>,
}

impl<V> Clone for CancelHandle<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            waiter_id: self.waiter_id,
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<V> CancelHandle<V> {
    /// Withdraw the waiter. Returns `false` if it was no longer attached.
    pub fn cancel(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.withdraw(&self.key, self.waiter_id),
            None => false,
        }
    }
}
