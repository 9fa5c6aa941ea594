use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use crate::fetchers::fetcher::Fetcher;
use crate::resource::AsyncResource;

const DEFAULT_CAPACITY: usize = 64;

/// A stream of events for one topic.
///
/// Implement this for a vendor's realtime channel to keep its SDK out of the rest of the code.
pub trait EventStream<E>: Send + 'static {
    /// Next event, or `None` once the stream is closed or unsubscribed.
    fn next_event(&mut self) -> impl Future<Output = Option<E>> + Send;
}

struct HubInner<E> {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<E>>>,
}

impl<E> HubInner<E> {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<E>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process publish/subscribe hub keyed by topic name.
///
/// Slow subscribers that fall more than `capacity` events behind skip the gap.
pub struct Hub<E> {
    inner: Arc<HubInner<E>>,
}

impl<E> Clone for Hub<E> {
    fn clone(&self) -> Self {
        Hub {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Clone + Send + 'static> Default for Hub<E> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl<E: Clone + Send + 'static> Hub<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "hub capacity must be positive");
        Hub {
            inner: Arc::new(HubInner {
                capacity,
                topics: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self, topic: impl Into<String>) -> Subscription<E> {
        let topic = topic.into();
        let receiver = self
            .inner
            .topics()
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe();

        #[cfg(feature = "tracing")]
        tracing::debug!(topic = %topic, "subscribed");

        Subscription {
            topic,
            receiver: Some(receiver),
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every current subscriber of `topic`. Returns how many were reached.
    pub fn publish(&self, topic: &str, event: E) -> usize {
        match self.inner.topics().get(topic) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Topics that currently have at least one subscriber.
    pub fn topics(&self) -> Vec<String> {
        self.inner.topics().keys().cloned().collect()
    }
}

/// One subscriber's view of a topic. Dropping it unsubscribes.
pub struct Subscription<E> {
    topic: String,
    receiver: Option<broadcast::Receiver<E>>,
    hub: Weak<HubInner<E>>,
}

impl<E: Clone + Send + 'static> Subscription<E> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next event. `None` after unsubscribing or when the hub is gone.
    pub async fn recv(&mut self) -> Option<E> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(topic = %self.topic, skipped, "subscriber lagged, events skipped");
                    #[cfg(not(feature = "tracing"))]
                    let _ = skipped;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {
        drop(self)
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if self.receiver.take().is_none() {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            let mut topics = hub.topics();
            if topics.get(&self.topic).is_some_and(|sender| sender.receiver_count() == 0) {
                topics.remove(&self.topic);
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(topic = %self.topic, "unsubscribed");
    }
}

impl<E: Clone + Send + 'static> EventStream<E> for Subscription<E> {
    fn next_event(&mut self) -> impl Future<Output = Option<E>> + Send {
        self.recv()
    }
}

impl<D, T, F> AsyncResource<D, T, F>
where
    D: Clone + PartialEq + Send + Sync + 'static,
    T: Send + Sync + 'static,
    F: Fetcher<D, T>,
{
    /// Refetch every time `events` yields.
    ///
    /// The task holds no strong reference to the resource. It ends, dropping `events`, when the
    /// stream closes or the resource is torn down.
    pub fn refetch_on<E, S>(&self, mut events: S) -> JoinHandle<()>
    where
        E: Send + 'static,
        S: EventStream<E>,
    {
        let resource = self.downgrade();
        tokio::spawn(async move {
            let torn_down = resource.torn_down();
            tokio::pin!(torn_down);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut torn_down => break,
                    event = events.next_event() => {
                        if event.is_none() || !resource.refetch() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
