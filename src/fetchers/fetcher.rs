use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use crate::error::{FetchError, FetchResult};
use crate::options::FetchConfig;

/// Fetch operation behind an [`AsyncResource`](crate::resource::AsyncResource).
///
/// Every call to [`Fetcher::fetch`] is one independent attempt. The returned future is spawned,
/// so it must own everything it needs. Failures are reported through [`FetchResult`], never by
/// panicking; a panic is still caught and turned into [`FetchError::Panicked`].
///
/// Any `Fn(&D) -> impl Future<Output = FetchResult<T>>` closure is a fetcher.
/// An operation that does not care about the dependency values simply ignores its argument.
pub trait Fetcher<D, T>: Send + Sync + 'static {
    /// Start one attempt for the given dependency values
    fn fetch(&self, deps: &D) -> impl Future<Output = FetchResult<T>> + Send + 'static;

    /// Whether `deps` are complete enough to fetch at all.
    /// When this returns `false` the resource settles to an empty, not-loading state without calling [`Fetcher::fetch`].
    fn ready(&self, _deps: &D) -> bool {
        true
    }
}

impl<D, T, F, Fut> Fetcher<D, T> for F
where
    F: Fn(&D) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<T>> + Send + 'static,
{
    fn fetch(&self, deps: &D) -> impl Future<Output = FetchResult<T>> + Send + 'static {
        self(deps)
    }
}

/// Fetcher for an `Option<K>` dependency that only runs once the value is present.
/// See [`required`].
#[derive(Debug, Clone)]
pub struct Required<F>(F);

/// Gate `fetcher` on a required dependency: `None` means "not known yet, don't fetch".
pub fn required<F>(fetcher: F) -> Required<F> {
    Required(fetcher)
}

impl<K, T, F: Fetcher<K, T>> Fetcher<Option<K>, T> for Required<F> {
    fn fetch(&self, deps: &Option<K>) -> impl Future<Output = FetchResult<T>> + Send + 'static {
        let live = deps.as_ref().map(|key| self.0.fetch(key));
        async move {
            match live {
                Some(live) => live.await,
                None => Err(FetchError::msg("required dependency is missing")),
            }
        }
    }

    fn ready(&self, deps: &Option<K>) -> bool {
        deps.as_ref().is_some_and(|key| self.0.ready(key))
    }
}

/// Adapter for operations that return their own error type. See [`fallible`].
#[derive(Debug, Clone)]
pub struct Fallible<F>(F);

/// Wrap a closure returning `Result<T, E>` so that `E` lands in [`FetchError::Operation`].
pub fn fallible<F>(operation: F) -> Fallible<F> {
    Fallible(operation)
}

impl<D, T, E, F, Fut> Fetcher<D, T> for Fallible<F>
where
    F: Fn(&D) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Error + Send + Sync + 'static,
{
    fn fetch(&self, deps: &D) -> impl Future<Output = FetchResult<T>> + Send + 'static {
        let attempt = (self.0)(deps);
        async move { attempt.await.map_err(FetchError::new) }
    }
}

/// Fetcher that serves a fixture while [`FetchConfig::demo_mode`] is on. See [`demo`].
#[derive(Debug)]
pub struct Demo<F, T> {
    config: FetchConfig,
    fixture: Arc<T>,
    live: F,
}

/// Serve `fixture` instead of calling `live` when `config` says so.
pub fn demo<F, T>(config: FetchConfig, fixture: T, live: F) -> Demo<F, T> {
    Demo {
        config,
        fixture: Arc::new(fixture),
        live,
    }
}

impl<D, T, F> Fetcher<D, T> for Demo<F, T>
where
    T: Clone + Send + Sync + 'static,
    F: Fetcher<D, T>,
{
    fn fetch(&self, deps: &D) -> impl Future<Output = FetchResult<T>> + Send + 'static {
        let live = (!self.config.demo_mode).then(|| self.live.fetch(deps));
        let fixture = Arc::clone(&self.fixture);
        async move {
            match live {
                Some(live) => live.await,
                None => Ok(T::clone(&fixture)),
            }
        }
    }

    fn ready(&self, deps: &D) -> bool {
        self.live.ready(deps)
    }
}
