use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use rstest::rstest;
use tokio::sync::oneshot;
use tokio::time::sleep;
use fetch_resource::error::{FetchError, FetchResult};
use fetch_resource::fetchers::fetcher::{demo, fallible, required};
use fetch_resource::options::{FetchConfig, RefetchPolicy, ResourceOptions};
use fetch_resource::resource::AsyncResource;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Deal {
    id: u32,
    brand: String,
}

fn deal(id: u32) -> Deal {
    Deal {
        id,
        brand: format!("brand-{id}"),
    }
}

#[derive(Clone, Default)]
struct Calls(Arc<AtomicUsize>);

impl Calls {
    fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

async fn explode() -> FetchResult<Vec<Deal>> {
    panic!("database exploded")
}

#[tokio::test(start_paused = true)]
async fn starts_loading_with_nothing() {
    let resource = AsyncResource::observe((), |_: &()| async {
        sleep(Duration::from_millis(50)).await;
        Ok::<_, FetchError>(deal(1))
    });

    let state = resource.state();
    assert!(state.data.is_none());
    assert!(state.loading);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn successful_fetch_settles_with_data() {
    let resource = AsyncResource::observe(7u32, |id: &u32| {
        let id = *id;
        async move { Ok::<_, FetchError>(deal(id)) }
    });

    let state = resource.watch().settled().await.unwrap();
    assert_eq!(state.data.as_deref(), Some(&deal(7)));
    assert!(!state.loading);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn failed_fetch_settles_with_error() {
    let resource = AsyncResource::observe((), |_: &()| async {
        Err::<Deal, _>(FetchError::msg("campaign lookup failed"))
    });

    let state = resource.watch().settled().await.unwrap();
    assert!(!state.loading);
    assert!(state.has_error());
    assert_eq!(state.error.as_ref().unwrap().to_string(), "campaign lookup failed");
    assert!(state.data.is_none());
}

#[tokio::test]
async fn panicking_fetch_becomes_error() {
    let resource = AsyncResource::observe((), |_: &()| explode());

    let state = resource.watch().settled().await.unwrap();
    let error = state.error.clone().unwrap();
    assert!(error.is_panic());
    assert_eq!(error.to_string(), "database exploded");
    assert!(state.data.is_none());
    assert!(!state.loading);
}

#[tokio::test]
async fn fetcher_panicking_before_its_future_becomes_error() {
    let resource = AsyncResource::observe(0u32, |id: &u32| {
        let id = *id;
        if id == 13 {
            panic!("no deal with id 13");
        }
        async move { Ok::<_, FetchError>(deal(id)) }
    });
    let mut watcher = resource.watch();
    watcher.settled().await;

    assert!(resource.set_dependencies(13));
    let state = watcher.settled().await.unwrap();
    let error = state.error.clone().unwrap();
    assert!(error.is_panic());
    assert_eq!(error.to_string(), "no deal with id 13");
    assert_eq!(state.data.as_deref(), Some(&deal(0)));
    assert!(!state.loading);

    resource.refetch().await;
    assert!(resource.error().unwrap().is_panic());
    assert!(!resource.loading());
}

#[tokio::test]
async fn operation_errors_are_kept_verbatim() {
    let resource = AsyncResource::observe(
        "missing".to_string(),
        fallible(|path: &String| {
            let path = path.clone();
            async move { std::fs::read_to_string(path) }
        }),
    );

    let state = resource.watch().settled().await.unwrap();
    let error = state.error.clone().unwrap();
    assert!(error.downcast_ref::<std::io::Error>().is_some());
}

#[tokio::test]
async fn dependency_change_refetches() {
    let calls = Calls::default();
    let counter = calls.clone();
    let resource = AsyncResource::observe("a", move |x: &&'static str| {
        counter.hit();
        let x = *x;
        async move { Ok::<_, FetchError>(format!("result for {x}")) }
    });
    let mut watcher = resource.watch();
    watcher.settled().await;

    assert!(resource.set_dependencies("b"));
    let state = watcher.settled().await.unwrap();

    assert!(calls.count() >= 2);
    assert_eq!(state.data.as_deref().map(String::as_str), Some("result for b"));
    assert_eq!(resource.dependencies(), "b");
}

#[tokio::test(start_paused = true)]
async fn slow_superseded_fetch_is_discarded() {
    let resource = AsyncResource::observe("a", |x: &&'static str| {
        let x = *x;
        async move {
            if x == "a" {
                sleep(Duration::from_millis(100)).await;
                Ok::<_, FetchError>("first")
            } else {
                sleep(Duration::from_millis(10)).await;
                Ok("second")
            }
        }
    });
    let mut watcher = resource.watch();

    sleep(Duration::from_millis(5)).await;
    assert!(resource.set_dependencies("b"));

    let state = watcher.settled().await.unwrap();
    assert_eq!(state.data.as_deref(), Some(&"second"));

    // Generation 1 lands well after generation 2
    sleep(Duration::from_millis(200)).await;
    let state = resource.state();
    assert_eq!(state.data.as_deref(), Some(&"second"));
    assert!(!state.loading);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn out_of_order_resolution_never_overwrites() {
    let gates: Arc<Mutex<Vec<oneshot::Sender<String>>>> = Arc::default();
    let registry = Arc::clone(&gates);
    let resource = AsyncResource::observe(1u32, move |_: &u32| {
        let (tx, rx) = oneshot::channel();
        registry.lock().unwrap().push(tx);
        async move { rx.await.map_err(FetchError::new) }
    });
    let mut watcher = resource.watch();

    assert!(resource.set_dependencies(2));
    let mut senders: Vec<_> = gates.lock().unwrap().drain(..).collect();
    assert_eq!(senders.len(), 2);
    let first = senders.remove(0);
    let second = senders.remove(0);

    second.send("second".to_string()).unwrap();
    let state = watcher.settled().await.unwrap();
    assert_eq!(state.data.as_deref().map(String::as_str), Some("second"));

    first.send("first".to_string()).unwrap();
    tokio::task::yield_now().await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(resource.data().as_deref().map(String::as_str), Some("second"));
    assert!(!resource.loading());
}

#[tokio::test]
async fn refetch_runs_exactly_once_per_call() {
    let calls = Calls::default();
    let counter = calls.clone();
    let resource = AsyncResource::observe((), move |_: &()| {
        counter.hit();
        let n = counter.count();
        async move { Ok::<_, FetchError>(n) }
    });
    resource.watch().settled().await;
    assert_eq!(calls.count(), 1);

    resource.refetch().await;
    assert_eq!(calls.count(), 2);
    assert_eq!(resource.data().as_deref(), Some(&2));

    resource.refetch().await;
    assert_eq!(calls.count(), 3);
    assert_eq!(resource.data().as_deref(), Some(&3));
}

#[tokio::test(start_paused = true)]
async fn rapid_refetches_apply_only_the_last() {
    let calls = Calls::default();
    let counter = calls.clone();
    let resource = AsyncResource::observe((), move |_: &()| {
        counter.hit();
        let n = counter.count();
        async move {
            // earlier attempts take longer
            sleep(Duration::from_millis(100 / n as u64)).await;
            Ok::<_, FetchError>(n)
        }
    });

    let first = resource.refetch();
    let second = resource.refetch();
    let third = resource.refetch();
    tokio::join!(first, second, third);
    sleep(Duration::from_millis(200)).await;

    assert_eq!(calls.count(), 4);
    assert_eq!(resource.data().as_deref(), Some(&4));
}

#[rstest]
#[case(vec![1, 2], vec![1, 2], false)]
#[case(vec![1, 2], vec![2, 1], true)]
#[case(vec![1, 2], vec![1, 2, 3], true)]
#[case(vec![], vec![], false)]
#[tokio::test]
async fn refetches_only_when_dependencies_differ(
    #[case] initial: Vec<u32>,
    #[case] next: Vec<u32>,
    #[case] refetches: bool,
) {
    let calls = Calls::default();
    let counter = calls.clone();
    let resource = AsyncResource::observe(initial, move |deps: &Vec<u32>| {
        counter.hit();
        let sum: u32 = deps.iter().sum();
        async move { Ok::<_, FetchError>(sum) }
    });
    resource.watch().settled().await;

    assert_eq!(resource.set_dependencies(next), refetches);
    resource.watch().settled().await;
    assert_eq!(calls.count(), if refetches { 2 } else { 1 });
}

#[tokio::test]
async fn missing_required_id_waits_without_fetching() {
    let calls = Calls::default();
    let counter = calls.clone();
    let resource = AsyncResource::observe(
        None,
        required(move |id: &u32| {
            counter.hit();
            let id = *id;
            async move { Ok::<_, FetchError>(deal(id)) }
        }),
    );

    let state = resource.state();
    assert!(state.data.is_none());
    assert!(!state.loading);
    assert!(state.error.is_none());
    assert_eq!(calls.count(), 0);

    let mut watcher = resource.watch();
    assert!(resource.set_dependencies(Some(3)));
    assert!(resource.loading());
    let state = watcher.settled().await.unwrap();
    assert_eq!(state.data.as_deref(), Some(&deal(3)));
    assert_eq!(calls.count(), 1);

    assert!(resource.set_dependencies(None));
    let state = resource.state();
    assert!(state.data.is_none());
    assert!(!state.loading);
    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn refetch_keeps_stale_data_by_default() {
    let (tx, rx) = oneshot::channel::<()>();
    let gate = Arc::new(Mutex::new(Some(rx)));
    let calls = Calls::default();
    let counter = calls.clone();
    let resource = AsyncResource::observe((), move |_: &()| {
        counter.hit();
        // only the refetch waits for the test
        let rx = if counter.count() > 1 { gate.lock().unwrap().take() } else { None };
        async move {
            match rx {
                None => Ok::<_, FetchError>("first"),
                Some(rx) => {
                    let _ = rx.await;
                    Ok("second")
                }
            }
        }
    });
    resource.watch().settled().await;
    assert_eq!(resource.data().as_deref(), Some(&"first"));

    let pending = resource.refetch();
    let state = resource.state();
    assert!(state.loading);
    assert_eq!(state.data.as_deref(), Some(&"first"));
    assert!(state.error.is_none());

    let _ = tx.send(());
    pending.await;
    assert_eq!(resource.data().as_deref(), Some(&"second"));
    assert!(!resource.loading());
}

#[tokio::test(start_paused = true)]
async fn clear_on_refetch_blanks_previous_data() {
    let resource = AsyncResource::observe_with(
        (),
        |_: &()| async {
            sleep(Duration::from_millis(10)).await;
            Ok::<_, FetchError>(deal(1))
        },
        ResourceOptions::default().refetch_policy(RefetchPolicy::ClearOnRefetch),
    );
    resource.watch().settled().await;
    assert!(resource.data().is_some());

    let pending = resource.refetch();
    assert!(resource.loading());
    assert!(resource.data().is_none());
    pending.await;
    assert_eq!(resource.data().as_deref(), Some(&deal(1)));
}

#[tokio::test]
async fn error_after_success_keeps_last_data() {
    let calls = Calls::default();
    let counter = calls.clone();
    let resource = AsyncResource::observe((), move |_: &()| {
        counter.hit();
        let n = counter.count();
        async move {
            if n == 1 {
                Ok(deal(1))
            } else {
                Err(FetchError::msg("offline"))
            }
        }
    });
    resource.watch().settled().await;
    resource.refetch().await;

    let state = resource.state();
    assert!(state.has_error());
    assert_eq!(state.data.as_deref(), Some(&deal(1)));

    // no automatic retry
    tokio::task::yield_now().await;
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn teardown_stops_all_writes() {
    let (tx, rx) = oneshot::channel::<u32>();
    let gate = Mutex::new(Some(rx));
    let resource = AsyncResource::observe((), move |_: &()| {
        let rx = gate.lock().unwrap().take();
        async move {
            match rx {
                Some(rx) => rx.await.map_err(FetchError::new),
                None => Err(FetchError::msg("gate already used")),
            }
        }
    });
    let mut watcher = resource.watch();

    resource.teardown();
    let _ = tx.send(42);

    assert!(watcher.changed().await.is_none());
    assert!(watcher.current().is_none());
}

#[tokio::test]
async fn demo_config_serves_fixture() {
    let calls = Calls::default();
    let counter = calls.clone();
    let live = move |_: &()| {
        counter.hit();
        async { Ok::<_, FetchError>(vec![deal(99)]) }
    };
    let resource = AsyncResource::observe(
        (),
        demo(FetchConfig { demo_mode: true }, vec![deal(1), deal(2)], live),
    );

    let state = resource.watch().settled().await.unwrap();
    assert_eq!(state.data.as_deref(), Some(&vec![deal(1), deal(2)]));
    assert_eq!(calls.count(), 0);
}
