use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use arc_swap::ArcSwap;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use crate::error::{FetchError, FetchResult};
use crate::fetchers::fetcher::Fetcher;
use crate::options::{RefetchPolicy, ResourceOptions};

/// Visible state of an [`AsyncResource`].
#[derive(Debug)]
pub struct ResourceState<T> {
    /// Last successfully fetched value
    pub data: Option<Arc<T>>,
    /// An attempt for the current dependencies is outstanding
    pub loading: bool,
    /// Error of the most recently settled attempt, if it failed
    pub error: Option<FetchError>,
}

// Manual impl: cloning never requires `T: Clone`, data is shared.
impl<T> Clone for ResourceState<T> {
    fn clone(&self) -> Self {
        ResourceState {
            data: self.data.clone(),
            loading: self.loading,
            error: self.error.clone(),
        }
    }
}

impl<T> ResourceState<T> {
    /// Nothing fetched yet, first attempt in flight
    pub fn initial() -> Self {
        ResourceState {
            data: None,
            loading: true,
            error: None,
        }
    }

    /// Nothing fetched and nothing in flight
    pub fn idle() -> Self {
        ResourceState {
            data: None,
            loading: false,
            error: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        !self.loading
    }

    /// Safe condition for rendering an error: not loading and an error is present.
    pub fn has_error(&self) -> bool {
        !self.loading && self.error.is_some()
    }

    fn begin(&self, policy: RefetchPolicy) -> Self {
        match policy {
            RefetchPolicy::RetainStale => ResourceState {
                data: self.data.clone(),
                loading: true,
                error: self.error.clone(),
            },
            RefetchPolicy::ClearOnRefetch => Self::initial(),
        }
    }

    fn settle(&self, outcome: FetchResult<T>, options: &ResourceOptions) -> Self {
        match outcome {
            Ok(data) => ResourceState {
                data: Some(Arc::new(data)),
                loading: false,
                error: None,
            },
            Err(error) => ResourceState {
                data: if options.keep_data_on_error { self.data.clone() } else { None },
                loading: false,
                error: Some(error),
            },
        }
    }
}

/// What happened to a settled attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Applied,
    Superseded,
    TornDown,
}

struct Tracker<D> {
    deps: D,
    generation: u64,
    in_flight: Vec<(u64, AbortHandle)>,
    torn_down: bool,
}

struct Shared<D, T, F> {
    fetcher: F,
    options: ResourceOptions,
    tracker: Mutex<Tracker<D>>,
    state: ArcSwap<ResourceState<T>>,
    version: watch::Sender<u64>,
    closed: watch::Sender<bool>,
}

impl<D, T, F> Shared<D, T, F>
where
    D: Clone + PartialEq + Send + Sync + 'static,
    T: Send + Sync + 'static,
    F: Fetcher<D, T>,
{
    fn tracker(&self) -> MutexGuard<'_, Tracker<D>> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Callers hold the tracker lock, so publishes are ordered by generation.
    fn publish(&self, next: ResourceState<T>) {
        self.state.store(Arc::new(next));
        self.version.send_modify(|version| *version += 1);
    }

    /// Start a new generation for the current dependencies.
    /// Returns the driver task, or `None` when nothing was spawned.
    fn dispatch(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut tracker = self.tracker();
        if tracker.torn_down {
            return None;
        }
        tracker.generation += 1;
        let generation = tracker.generation;

        if self.options.abort_superseded {
            for (_, attempt) in tracker.in_flight.drain(..) {
                attempt.abort();
            }
        }

        if !self.fetcher.ready(&tracker.deps) {
            #[cfg(feature = "tracing")]
            tracing::trace!(generation, "dependencies not ready, resource idle");
            self.publish(ResourceState::idle());
            return None;
        }

        let deps = tracker.deps.clone();
        self.publish(self.state.load().begin(self.options.refetch_policy));
        drop(tracker);

        #[cfg(feature = "tracing")]
        tracing::trace!(generation, "dispatching fetch");

        // The fetcher is called inside the task so a panic before its future exists is caught too
        let fetching = Arc::clone(self);
        let attempt = tokio::spawn(async move { fetching.fetcher.fetch(&deps).await });

        let mut tracker = self.tracker();
        if tracker.torn_down || (self.options.abort_superseded && tracker.generation != generation) {
            attempt.abort();
        } else {
            tracker.in_flight.push((generation, attempt.abort_handle()));
        }
        drop(tracker);

        let shared = Arc::clone(self);
        Some(tokio::spawn(async move {
            let outcome = match attempt.await {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => Err(FetchError::from_panic(err.into_panic())),
                Err(_) => {
                    shared.forget(generation);
                    return;
                }
            };
            shared.settle(generation, outcome);
        }))
    }

    fn settle(&self, generation: u64, outcome: FetchResult<T>) -> Settlement {
        let mut tracker = self.tracker();
        tracker.in_flight.retain(|(g, _)| *g != generation);

        if tracker.torn_down {
            #[cfg(feature = "tracing")]
            tracing::trace!(generation, "resource torn down, dropping result");
            return Settlement::TornDown;
        }
        if tracker.generation != generation {
            #[cfg(feature = "tracing")]
            tracing::trace!(generation, latest = tracker.generation, "superseded result discarded");
            return Settlement::Superseded;
        }

        #[cfg(feature = "tracing")]
        match &outcome {
            Ok(_) => tracing::debug!(generation, "fetch settled"),
            Err(error) => tracing::debug!(generation, %error, "fetch settled with error"),
        }

        let next = self.state.load().settle(outcome, &self.options);
        self.publish(next);
        Settlement::Applied
    }

    fn forget(&self, generation: u64) {
        self.tracker().in_flight.retain(|(g, _)| *g != generation);
    }

    fn teardown(&self) {
        let mut tracker = self.tracker();
        if tracker.torn_down {
            return;
        }
        tracker.torn_down = true;
        for (_, attempt) in tracker.in_flight.drain(..) {
            attempt.abort();
        }
        self.closed.send_replace(true);
        #[cfg(feature = "tracing")]
        tracing::trace!(generation = tracker.generation, "resource torn down");
    }
}

/// Result of an asynchronous fetch that follows its dependency values.
///
/// The resource dispatches its fetcher once when observed and again whenever
/// [`set_dependencies`](AsyncResource::set_dependencies) sees different values or
/// [`refetch`](AsyncResource::refetch) is called. Every dispatch gets a new generation, and only
/// the latest generation may write the visible state. Results of older attempts are dropped
/// silently no matter when they arrive.
///
/// The resource is owned by one consumer. Dropping it (or calling
/// [`teardown`](AsyncResource::teardown)) stops all writes and aborts in-flight attempts.
///
/// Requires a Tokio runtime: attempts run as spawned tasks.
///
/// ```rust,ignore
/// let deals = AsyncResource::observe(Some(athlete_id), required(|id: &u64| load_deals(*id)));
/// deals.watch().settled().await;
/// ```
pub struct AsyncResource<D, T, F>
where
    D: Clone + PartialEq + Send + Sync + 'static,
    T: Send + Sync + 'static,
    F: Fetcher<D, T>,
{
    shared: Arc<Shared<D, T, F>>,
}

impl<D, T, F> AsyncResource<D, T, F>
where
    D: Clone + PartialEq + Send + Sync + 'static,
    T: Send + Sync + 'static,
    F: Fetcher<D, T>,
{
    /// Observe `fetcher` for `deps` with default [`ResourceOptions`].
    pub fn observe(deps: D, fetcher: F) -> Self {
        Self::observe_with(deps, fetcher, ResourceOptions::default())
    }

    pub fn observe_with(deps: D, fetcher: F, options: ResourceOptions) -> Self {
        let (version, _) = watch::channel(0);
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            fetcher,
            options,
            tracker: Mutex::new(Tracker {
                deps,
                generation: 0,
                in_flight: Vec::new(),
                torn_down: false,
            }),
            state: ArcSwap::from_pointee(ResourceState::initial()),
            version,
            closed,
        });
        // Detached: settlement is observed through the state, not the handle
        let _ = shared.dispatch();
        AsyncResource { shared }
    }

    /// Replace the dependency values. A new attempt starts only if they differ from the
    /// values of the last dispatch; returns whether one did.
    pub fn set_dependencies(&self, deps: D) -> bool {
        {
            let mut tracker = self.shared.tracker();
            if tracker.torn_down || tracker.deps == deps {
                return false;
            }
            tracker.deps = deps;
        }
        #[cfg(feature = "tracing")]
        tracing::trace!("dependencies changed");
        let _ = self.shared.dispatch();
        true
    }

    /// Run the fetcher again for the current dependencies.
    ///
    /// Resolves once this attempt's result was applied, or discarded because a newer attempt
    /// superseded it or the resource was torn down.
    pub fn refetch(&self) -> impl Future<Output = ()> + Send + 'static {
        let driver = self.shared.dispatch();
        async move {
            if let Some(driver) = driver {
                // Cancellation only happens on teardown, nothing left to report then
                let _ = driver.await;
            }
        }
    }

    /// Snapshot of the visible state.
    pub fn state(&self) -> Arc<ResourceState<T>> {
        self.shared.state.load_full()
    }

    pub fn data(&self) -> Option<Arc<T>> {
        self.shared.state.load().data.clone()
    }

    pub fn loading(&self) -> bool {
        self.shared.state.load().loading
    }

    pub fn error(&self) -> Option<FetchError> {
        self.shared.state.load().error.clone()
    }

    /// Dependency values of the last dispatch.
    pub fn dependencies(&self) -> D {
        self.shared.tracker().deps.clone()
    }

    /// Follow state changes.
    pub fn watch(&self) -> ResourceWatcher<T> {
        let shared: Arc<dyn StateSource<T>> = self.shared.clone();
        ResourceWatcher {
            source: Arc::downgrade(&shared),
            version: self.shared.version.subscribe(),
        }
    }

    /// Stop the resource: abort in-flight attempts and ignore anything that still settles.
    pub fn teardown(self) {
        drop(self)
    }

    pub(crate) fn downgrade(&self) -> WeakResource<D, T, F> {
        WeakResource {
            shared: Arc::downgrade(&self.shared),
            closed: self.shared.closed.subscribe(),
        }
    }

    #[cfg(test)]
    fn generation(&self) -> u64 {
        self.shared.tracker().generation
    }
}

impl<D, T, F> Drop for AsyncResource<D, T, F>
where
    D: Clone + PartialEq + Send + Sync + 'static,
    T: Send + Sync + 'static,
    F: Fetcher<D, T>,
{
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

impl<D, T, F> Debug for AsyncResource<D, T, F>
where
    D: Clone + PartialEq + Send + Sync + Debug + 'static,
    T: Send + Sync + Debug + 'static,
    F: Fetcher<D, T>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncResource")
            .field("dependencies", &self.shared.tracker().deps)
            .field("state", &self.state())
            .finish()
    }
}

/// Weak handle used by background helpers so they never keep a resource alive.
pub(crate) struct WeakResource<D, T, F> {
    shared: Weak<Shared<D, T, F>>,
    closed: watch::Receiver<bool>,
}

impl<D, T, F> WeakResource<D, T, F>
where
    D: Clone + PartialEq + Send + Sync + 'static,
    T: Send + Sync + 'static,
    F: Fetcher<D, T>,
{
    /// Dispatch a refetch if the resource is still alive. Returns `false` once it is gone or torn down.
    pub(crate) fn refetch(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        if shared.tracker().torn_down {
            return false;
        }
        let _ = shared.dispatch();
        true
    }

    /// Resolves once the resource is torn down or dropped.
    pub(crate) fn torn_down(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut closed = self.closed.clone();
        async move {
            // Err means the resource is already gone
            let _ = closed.wait_for(|closed| *closed).await;
        }
    }
}

trait StateSource<T>: Send + Sync {
    fn snapshot(&self) -> Arc<ResourceState<T>>;
}

impl<D, T, F> StateSource<T> for Shared<D, T, F>
where
    D: Send + Sync,
    T: Send + Sync,
    F: Send + Sync,
{
    fn snapshot(&self) -> Arc<ResourceState<T>> {
        self.state.load_full()
    }
}

/// Receives a fresh snapshot every time the resource's visible state changes.
pub struct ResourceWatcher<T> {
    source: Weak<dyn StateSource<T>>,
    version: watch::Receiver<u64>,
}

impl<T> ResourceWatcher<T> {
    /// Current snapshot, `None` once the resource is gone.
    pub fn current(&self) -> Option<Arc<ResourceState<T>>> {
        self.source.upgrade().map(|source| source.snapshot())
    }

    /// Wait for the next change. Returns `None` once the resource is gone.
    pub async fn changed(&mut self) -> Option<Arc<ResourceState<T>>> {
        self.version.changed().await.ok()?;
        self.current()
    }

    /// Wait until no attempt is outstanding and return that state.
    pub async fn settled(&mut self) -> Option<Arc<ResourceState<T>>> {
        loop {
            let _ = self.version.borrow_and_update();
            let state = self.current()?;
            if state.is_settled() {
                return Some(state);
            }
            self.version.changed().await.ok()?;
        }
    }
}
