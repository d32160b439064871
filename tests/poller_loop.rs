//! Poll cycle behaviour against a scripted source: bounded history, failure
//! handling, the in-flight guard, teardown and persistence.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use poolwatch::error::FetchError;
use poolwatch::feed::price::PriceSample;
use poolwatch::notify::{ToastLevel, Toasts};
use poolwatch::poller::{PollOutcome, Poller, PollerOptions, RenderState, SampleSource};
use poolwatch::storage::{keys, KvStore};

struct ScriptedSource {
    calls: Arc<AtomicUsize>,
    script: Mutex<VecDeque<Option<f64>>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedSource {
    fn new(script: Vec<Option<f64>>) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            script: Mutex::new(script.into()),
            gate: None,
        }
    }

    fn gated(script: Vec<Option<f64>>, gate: Arc<Semaphore>) -> Self {
        Self { gate: Some(gate), ..Self::new(script) }
    }
}

#[async_trait]
impl SampleSource for ScriptedSource {
    type Sample = PriceSample;

    fn name(&self) -> &'static str {
        "price"
    }

    fn metric(sample: &PriceSample) -> f64 {
        sample.price
    }

    async fn fetch(&self) -> Result<PriceSample, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        let next = self.script.lock().unwrap().pop_front().flatten();
        match next {
            Some(price) => Ok(PriceSample { price, change_24h: 0.0, timestamp: Utc::now() }),
            None => Err(FetchError::Malformed("scripted failure".into())),
        }
    }
}

type Renders = Arc<Mutex<Vec<RenderState<PriceSample>>>>;

struct Rig {
    poller: Poller<ScriptedSource>,
    calls: Arc<AtomicUsize>,
    renders: Renders,
    toasts: Arc<Toasts>,
}

fn rig(source: ScriptedSource, store: Arc<KvStore>, capacity: usize, interval: Duration) -> Rig {
    let calls = Arc::clone(&source.calls);
    let renders: Renders = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&renders);
    let toasts = Arc::new(Toasts::new(10));
    let poller = Poller::new(
        source,
        PollerOptions {
            interval,
            capacity,
            storage_key: keys::PRICE_HISTORY.to_string(),
        },
        store,
        Arc::new(move |state| sink.lock().unwrap().push(state)),
        Arc::clone(&toasts),
    );
    Rig { poller, calls, renders, toasts }
}

fn memory_store() -> Arc<KvStore> {
    Arc::new(KvStore::open_in_memory().unwrap())
}

fn prices(poller: &Poller<ScriptedSource>) -> Vec<f64> {
    poller.history().iter().map(|s| s.price).collect()
}

async fn wait_in_flight(poller: &Poller<ScriptedSource>) {
    while !poller.is_in_flight() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn history_is_bounded_and_ordered() {
    let mut rng = rand::thread_rng();
    let values: Vec<f64> = (0..40).map(|_| rng.gen_range(10_000.0..90_000.0)).collect();
    let r = rig(
        ScriptedSource::new(values.iter().copied().map(Some).collect()),
        memory_store(),
        7,
        Duration::from_secs(60),
    );

    for (i, _) in values.iter().enumerate() {
        assert!(matches!(r.poller.poll_once().await, PollOutcome::Updated));
        let got = prices(&r.poller);
        assert!(got.len() <= 7);
        let start = (i + 1).saturating_sub(7);
        assert_eq!(got, values[start..=i].to_vec());
    }
}

#[tokio::test]
async fn failed_fetch_keeps_history() {
    let r = rig(
        ScriptedSource::new(vec![Some(1.0), Some(2.0), Some(3.0), None]),
        memory_store(),
        100,
        Duration::from_secs(60),
    );
    for _ in 0..3 {
        r.poller.poll_once().await;
    }
    let renders_before = r.renders.lock().unwrap().len();

    let outcome = r.poller.poll_once().await;
    assert!(matches!(outcome, PollOutcome::Failed(FetchError::Malformed(_))));
    assert_eq!(prices(&r.poller), vec![1.0, 2.0, 3.0]);
    // Stale data stays on screen: no re-render on failure with cached data.
    assert_eq!(r.renders.lock().unwrap().len(), renders_before);
    assert!(r.toasts.snapshot().iter().any(|t| t.level == ToastLevel::Error));
}

#[tokio::test]
async fn first_failure_renders_unavailable() {
    let r = rig(ScriptedSource::new(vec![None]), memory_store(), 100, Duration::from_secs(60));
    assert!(matches!(r.poller.poll_once().await, PollOutcome::Failed(_)));
    let renders = r.renders.lock().unwrap();
    assert_eq!(renders.len(), 1);
    match &renders[0] {
        RenderState::Unavailable { message } => assert!(message.contains("scripted failure")),
        other => panic!("expected unavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn overlapping_polls_make_one_call() {
    let gate = Arc::new(Semaphore::new(0));
    let r = rig(
        ScriptedSource::gated(vec![Some(42.0), Some(43.0)], Arc::clone(&gate)),
        memory_store(),
        100,
        Duration::from_secs(60),
    );

    let first = {
        let poller = r.poller.clone();
        tokio::spawn(async move { poller.poll_once().await })
    };
    wait_in_flight(&r.poller).await;

    for _ in 0..3 {
        assert!(matches!(r.poller.poll_once().await, PollOutcome::Skipped));
    }

    gate.add_permits(1);
    assert!(matches!(first.await.unwrap(), PollOutcome::Updated));
    assert_eq!(r.calls.load(Ordering::SeqCst), 1);
    assert_eq!(prices(&r.poller), vec![42.0]);
    assert!(!r.poller.is_in_flight());
}

#[tokio::test]
async fn late_result_after_stop_is_discarded() {
    let gate = Arc::new(Semaphore::new(0));
    let r = rig(
        ScriptedSource::gated(vec![Some(42.0)], Arc::clone(&gate)),
        memory_store(),
        100,
        Duration::from_secs(60),
    );

    let pending = {
        let poller = r.poller.clone();
        tokio::spawn(async move { poller.poll_once().await })
    };
    wait_in_flight(&r.poller).await;
    r.poller.stop();
    gate.add_permits(1);

    assert!(matches!(pending.await.unwrap(), PollOutcome::Discarded));
    assert!(r.poller.history().is_empty());
    assert!(r.renders.lock().unwrap().is_empty());
    assert!(matches!(r.poller.poll_once().await, PollOutcome::Stopped));
    assert_eq!(r.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("poolwatch.sqlite");
    let path = path.to_str().unwrap();

    {
        let store = Arc::new(KvStore::open(path).unwrap());
        let r = rig(
            ScriptedSource::new(vec![Some(1.0), Some(2.0), Some(3.0)]),
            store,
            100,
            Duration::from_secs(60),
        );
        for _ in 0..3 {
            r.poller.poll_once().await;
        }
    }

    let reopened = rig(
        ScriptedSource::new(vec![]),
        Arc::new(KvStore::open(path).unwrap()),
        100,
        Duration::from_secs(60),
    );
    assert_eq!(prices(&reopened.poller), vec![1.0, 2.0, 3.0]);

    // A smaller capacity keeps the newest entries.
    let smaller = rig(
        ScriptedSource::new(vec![]),
        Arc::new(KvStore::open(path).unwrap()),
        2,
        Duration::from_secs(60),
    );
    assert_eq!(prices(&smaller.poller), vec![2.0, 3.0]);
}

#[tokio::test]
async fn corrupt_history_starts_empty() {
    let store = memory_store();
    store.put_raw(keys::PRICE_HISTORY, "[{\"price\": oops").unwrap();
    let r = rig(ScriptedSource::new(vec![Some(5.0)]), Arc::clone(&store), 100, Duration::from_secs(60));
    assert!(r.poller.history().is_empty());
    assert!(r.toasts.snapshot().iter().any(|t| t.level == ToastLevel::Warn));

    r.poller.poll_once().await;
    let saved: Vec<PriceSample> = store.get_json(keys::PRICE_HISTORY).unwrap().unwrap();
    assert_eq!(saved.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn timer_keeps_polling_through_failures_until_teardown() {
    let r = rig(
        ScriptedSource::new(vec![None, Some(1.0), Some(2.0), Some(3.0), Some(4.0)]),
        memory_store(),
        100,
        Duration::from_secs(10),
    );
    let handle = r.poller.start();

    // Ticks at 0s, 10s and 20s.
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(r.calls.load(Ordering::SeqCst), 3);
    assert_eq!(prices(&r.poller), vec![1.0, 2.0]);

    handle.teardown();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(r.calls.load(Ordering::SeqCst), 3);
    assert!(r.poller.is_stopped());
}

#[tokio::test]
async fn reopened_history_is_bit_exact() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("poolwatch.sqlite");
    let path = path.to_str().unwrap();

    let mut rng = rand::thread_rng();
    let values: Vec<f64> = (0..50).map(|_| rng.gen::<f64>() * 100_000.0).collect();
    {
        let r = rig(
            ScriptedSource::new(values.iter().copied().map(Some).collect()),
            Arc::new(KvStore::open(path).unwrap()),
            100,
            Duration::from_secs(60),
        );
        for _ in 0..values.len() {
            r.poller.poll_once().await;
        }
    }

    let before: Vec<PriceSample> = {
        let r = rig(ScriptedSource::new(vec![]), Arc::new(KvStore::open(path).unwrap()), 100, Duration::from_secs(60));
        r.poller.history()
    };
    assert_eq!(before.iter().map(|s| s.price).collect::<Vec<_>>(), values);

    // A second restart must not drift either.
    let again = rig(ScriptedSource::new(vec![]), Arc::new(KvStore::open(path).unwrap()), 100, Duration::from_secs(60));
    assert_eq!(again.poller.history(), before);
}

#[tokio::test]
async fn failed_save_still_updates_and_warns() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("poolwatch.sqlite");
    let store = Arc::new(KvStore::open(path.to_str().unwrap()).unwrap());
    let r = rig(ScriptedSource::new(vec![Some(10.0), Some(11.0)]), store, 100, Duration::from_secs(60));
    r.poller.poll_once().await;

    rusqlite::Connection::open(&path).unwrap().execute_batch("DROP TABLE kv").unwrap();

    assert!(matches!(r.poller.poll_once().await, PollOutcome::Updated));
    assert_eq!(prices(&r.poller), vec![10.0, 11.0]);
    match r.renders.lock().unwrap().last() {
        Some(RenderState::Ready { latest, history }) => {
            assert_eq!(latest.price, 11.0);
            assert_eq!(history.len(), 2);
        }
        other => panic!("expected ready render, got {:?}", other),
    }
    assert!(r.toasts.snapshot().iter().any(|t| t.level == ToastLevel::Warn));
}

#[tokio::test(start_paused = true)]
async fn teardown_mid_fetch_releases_guard() {
    let gate = Arc::new(Semaphore::new(0));
    let r = rig(
        ScriptedSource::gated(vec![Some(1.0)], Arc::clone(&gate)),
        memory_store(),
        100,
        Duration::from_secs(60),
    );
    let handle = r.poller.start();
    wait_in_flight(&r.poller).await;

    handle.teardown();
    for _ in 0..10 {
        if !r.poller.is_in_flight() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(!r.poller.is_in_flight());

    // The aborted fetch never completes, so nothing lands.
    gate.add_permits(1);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(r.poller.history().is_empty());
    assert_eq!(r.calls.load(Ordering::SeqCst), 1);
}
