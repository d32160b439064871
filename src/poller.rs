//! Timer-driven fetch loop with a bounded, persisted history.
//!
//! A `Poller` owns one feed. Each cycle fetches a sample, appends it to the
//! history, writes the whole history to the store under the poller's key and
//! hands the new state to the render callback. Failures leave the history
//! untouched. At most one fetch is in flight per poller; overlapping calls are
//! dropped, not queued. After teardown any fetch that completes is discarded.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::FetchError;
use crate::history::{BoundedHistory, StoredHistory};
use crate::logging::{self, obj, v_num, v_str, Domain};
use crate::notify::{ToastLevel, Toasts};
use crate::stats::{self, SeriesStats};
use crate::storage::KvStore;

#[async_trait]
pub trait SampleSource: Send + Sync + 'static {
    type Sample: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// Value the trend and range statistics are computed over.
    fn metric(sample: &Self::Sample) -> f64;

    async fn fetch(&self) -> Result<Self::Sample, FetchError>;
}

#[derive(Debug, Clone)]
pub enum RenderState<S> {
    Ready { latest: S, history: Vec<S> },
    /// No sample has ever been fetched and the last attempt failed.
    Unavailable { message: String },
}

pub type RenderFn<S> = Arc<dyn Fn(RenderState<S>) + Send + Sync>;

#[derive(Debug)]
pub enum PollOutcome {
    Updated,
    /// Another fetch was already in flight.
    Skipped,
    Failed(FetchError),
    /// The fetch completed after teardown; its result was dropped.
    Discarded,
    Stopped,
}

impl PollOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollOutcome::Updated => "updated",
            PollOutcome::Skipped => "skipped",
            PollOutcome::Failed(_) => "failed",
            PollOutcome::Discarded => "discarded",
            PollOutcome::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub interval: Duration,
    pub capacity: usize,
    pub storage_key: String,
}

struct Inner<Src: SampleSource> {
    source: Src,
    opts: PollerOptions,
    store: Arc<KvStore>,
    history: Mutex<BoundedHistory<Src::Sample>>,
    in_flight: AtomicBool,
    stopped: Arc<AtomicBool>,
    render: RenderFn<Src::Sample>,
    toasts: Arc<Toasts>,
}

pub struct Poller<Src: SampleSource> {
    inner: Arc<Inner<Src>>,
}

impl<Src: SampleSource> Clone for Poller<Src> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

/// Clears the in-flight flag when the cycle ends or its future is dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<Src: SampleSource> Poller<Src> {
    pub fn new(
        source: Src,
        opts: PollerOptions,
        store: Arc<KvStore>,
        render: RenderFn<Src::Sample>,
        toasts: Arc<Toasts>,
    ) -> Self {
        let history = load_history::<Src::Sample>(&store, &opts, source.name(), &toasts);
        logging::info(
            Domain::Poller,
            "poller_created",
            obj(&[
                ("feed", v_str(source.name())),
                ("key", v_str(&opts.storage_key)),
                ("restored", v_num(history.len() as f64)),
                ("capacity", v_num(history.capacity() as f64)),
                ("interval_secs", v_num(opts.interval.as_secs_f64())),
            ]),
        );
        Self {
            inner: Arc::new(Inner {
                source,
                opts,
                store,
                history: Mutex::new(history),
                in_flight: AtomicBool::new(false),
                stopped: Arc::new(AtomicBool::new(false)),
                render,
                toasts,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.source.name()
    }

    pub fn interval(&self) -> Duration {
        self.inner.opts.interval
    }

    fn lock_history(&self) -> MutexGuard<'_, BoundedHistory<Src::Sample>> {
        self.inner.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn latest(&self) -> Option<Src::Sample> {
        self.lock_history().latest().cloned()
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<Src::Sample> {
        self.lock_history().to_vec()
    }

    pub fn stats(&self) -> SeriesStats {
        let values = self.lock_history().values(Src::metric);
        stats::summarize(&values)
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Marks the poller torn down. Fetches still in flight are discarded when they land.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::AcqRel) {
            logging::info(Domain::Poller, "poller_stopped", obj(&[("feed", v_str(self.name()))]));
        }
    }

    fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(&self.inner.in_flight))
    }

    /// Re-renders from the current history; no-op when empty.
    pub fn render_current(&self) {
        let snapshot = self.history();
        if let Some(latest) = snapshot.last().cloned() {
            (self.inner.render)(RenderState::Ready { latest, history: snapshot });
        }
    }

    pub async fn poll_once(&self) -> PollOutcome {
        if self.is_stopped() {
            return PollOutcome::Stopped;
        }
        let Some(_guard) = self.try_begin() else {
            logging::debug(Domain::Poller, "poll_skipped", obj(&[("feed", v_str(self.name()))]));
            return PollOutcome::Skipped;
        };

        let result = self.inner.source.fetch().await;

        if self.is_stopped() {
            logging::info(
                Domain::Poller,
                "late_result_discarded",
                obj(&[("feed", v_str(self.name())), ("ok", serde_json::Value::Bool(result.is_ok()))]),
            );
            return PollOutcome::Discarded;
        }

        match result {
            Ok(sample) => self.apply(sample),
            Err(err) => self.fail(err),
        }
    }

    fn apply(&self, sample: Src::Sample) -> PollOutcome {
        let snapshot = {
            let mut history = self.lock_history();
            history.push(sample.clone());
            history.to_vec()
        };

        if let Err(err) = self.inner.store.put_json(&self.inner.opts.storage_key, &snapshot) {
            logging::error(
                Domain::Storage,
                "persist_failed",
                obj(&[
                    ("feed", v_str(self.name())),
                    ("key", v_str(&self.inner.opts.storage_key)),
                    ("msg", v_str(&err.to_string())),
                ]),
            );
            self.inner
                .toasts
                .push(ToastLevel::Warn, format!("could not save {} history: {}", self.name(), err));
        }

        logging::debug(
            Domain::Poller,
            "poll_updated",
            obj(&[
                ("feed", v_str(self.name())),
                ("value", v_num(Src::metric(&sample))),
                ("len", v_num(snapshot.len() as f64)),
            ]),
        );
        (self.inner.render)(RenderState::Ready { latest: sample, history: snapshot });
        PollOutcome::Updated
    }

    fn fail(&self, err: FetchError) -> PollOutcome {
        let no_data = self.lock_history().is_empty();
        logging::warn(
            Domain::Feed,
            "poll_failed",
            obj(&[
                ("feed", v_str(self.name())),
                ("kind", v_str(err.kind())),
                ("msg", v_str(&err.to_string())),
                ("has_cached", serde_json::Value::Bool(!no_data)),
            ]),
        );
        self.inner
            .toasts
            .push(ToastLevel::Error, format!("{} update failed: {}", self.name(), err));
        if no_data {
            (self.inner.render)(RenderState::Unavailable { message: err.to_string() });
        }
        PollOutcome::Failed(err)
    }

    /// Spawns the timer task. The first cycle runs immediately.
    pub fn start(&self) -> PollerHandle {
        let poller = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poller.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if poller.is_stopped() {
                    break;
                }
                let outcome = poller.poll_once().await;
                logging::debug(
                    Domain::Poller,
                    "tick",
                    obj(&[("feed", v_str(poller.name())), ("outcome", v_str(outcome.as_str()))]),
                );
            }
        });
        logging::info(Domain::Poller, "poller_started", obj(&[("feed", v_str(self.name()))]));
        PollerHandle {
            feed: self.name(),
            task,
            stopped: Arc::clone(&self.inner.stopped),
        }
    }
}

fn load_history<S: DeserializeOwned>(
    store: &KvStore,
    opts: &PollerOptions,
    feed: &str,
    toasts: &Toasts,
) -> BoundedHistory<S> {
    match store.get_json::<StoredHistory<S>>(&opts.storage_key) {
        Ok(Some(StoredHistory(items))) => BoundedHistory::from_vec(opts.capacity, items),
        Ok(None) => BoundedHistory::new(opts.capacity),
        Err(err) => {
            logging::warn(
                Domain::Storage,
                "history_load_failed",
                obj(&[("feed", v_str(feed)), ("msg", v_str(&err.to_string()))]),
            );
            toasts.push(ToastLevel::Warn, format!("discarded unreadable {} history", feed));
            BoundedHistory::new(opts.capacity)
        }
    }
}

/// Handle to a running poller timer. Dropping it does not stop the timer.
#[derive(Debug)]
pub struct PollerHandle {
    feed: &'static str,
    task: JoinHandle<()>,
    stopped: Arc<AtomicBool>,
}

impl PollerHandle {
    pub fn feed(&self) -> &'static str {
        self.feed
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the timer and marks the poller stopped.
    pub fn teardown(self) {
        self.stopped.store(true, Ordering::Release);
        self.task.abort();
        logging::info(Domain::Poller, "poller_teardown", obj(&[("feed", v_str(self.feed))]));
    }
}
