use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::future::OptionFuture;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::Config;
use crate::error::{ExportError, SettingsError, WorkerError};
use crate::export;
use crate::feed::pool::{PoolFeed, PoolSample};
use crate::feed::price::{PriceFeed, PriceSample};
use crate::feed::http_client;
use crate::logging::{self, obj, v_num, v_str, Domain};
use crate::notify::Toasts;
use crate::poller::{PollOutcome, Poller, PollerHandle, PollerOptions, RenderState, SampleSource};
use crate::settings::{self, SettingValue, SettingsStore};
use crate::stats::SeriesStats;
use crate::storage::{keys, KvStore};
use crate::view::{self, DashboardView, ViewInput};
use crate::workers::WorkerUrls;

/// Receives every freshly built view.
pub type ViewSink = Arc<dyn Fn(&DashboardView) + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Latest render state per card plus what the view needs to rebuild itself.
struct Screen {
    price: Mutex<Option<RenderState<PriceSample>>>,
    pool: Mutex<Option<RenderState<PoolSample>>>,
    pool_enabled: bool,
    settings: Arc<SettingsStore>,
    workers: Arc<WorkerUrls>,
    toasts: Arc<Toasts>,
    sink: ViewSink,
}

impl Screen {
    fn view(&self) -> DashboardView {
        let price = lock(&self.price).clone();
        let pool = lock(&self.pool).clone();
        let prefs = self.settings.snapshot();
        let urls = self.workers.all();
        let toasts = self.toasts.snapshot();
        view::build(&ViewInput {
            price: price.as_ref(),
            pool: pool.as_ref(),
            pool_enabled: self.pool_enabled,
            settings: &prefs,
            worker_urls: &urls,
            toasts: &toasts,
            now: Utc::now(),
        })
    }

    fn redraw(&self) {
        let view = self.view();
        logging::debug(
            Domain::Render,
            "redraw",
            obj(&[("toasts", v_num(view.toasts.len() as f64))]),
        );
        (self.sink)(&view);
    }
}

#[derive(Debug)]
pub struct FetchReport {
    pub price: PollOutcome,
    pub pool: Option<PollOutcome>,
}

/// Running timers for every feed.
#[derive(Debug)]
pub struct DashboardHandle {
    pollers: Vec<PollerHandle>,
}

impl DashboardHandle {
    pub fn feeds(&self) -> Vec<&'static str> {
        self.pollers.iter().map(|h| h.feed()).collect()
    }

    pub fn teardown(self) {
        for handle in self.pollers {
            handle.teardown();
        }
    }
}

/// Service object tying the feeds, persisted preferences and view together.
/// Built once at startup and shared by reference.
pub struct Dashboard<P = PriceFeed, Q = PoolFeed>
where
    P: SampleSource<Sample = PriceSample>,
    Q: SampleSource<Sample = PoolSample>,
{
    config: Config,
    store: Arc<KvStore>,
    settings: Arc<SettingsStore>,
    workers: Arc<WorkerUrls>,
    toasts: Arc<Toasts>,
    price: Poller<P>,
    pool: Option<Poller<Q>>,
    screen: Arc<Screen>,
}

impl Dashboard<PriceFeed, PoolFeed> {
    pub fn from_config(config: Config, store: Arc<KvStore>, sink: ViewSink) -> Result<Self> {
        let client = http_client(config.http_timeout()).context("building http client")?;
        let price = PriceFeed::new(client.clone(), &config.price_api_base)
            .with_context(|| format!("invalid PRICE_API_BASE {:?}", config.price_api_base))?;
        let pool = config.pool_stats_url.clone().map(|url| PoolFeed::new(client, url));
        Ok(Self::with_sources(config, store, price, pool, sink))
    }
}

impl<P, Q> Dashboard<P, Q>
where
    P: SampleSource<Sample = PriceSample>,
    Q: SampleSource<Sample = PoolSample>,
{
    pub fn with_sources(config: Config, store: Arc<KvStore>, price: P, pool: Option<Q>, sink: ViewSink) -> Self {
        let settings = Arc::new(SettingsStore::load(Arc::clone(&store)));
        let workers = Arc::new(WorkerUrls::load(Arc::clone(&store)));
        let toasts = Arc::new(Toasts::new(config.toast_cap));
        toasts.set_enabled(settings.get_bool(settings::NOTIFICATIONS));

        let screen = Arc::new(Screen {
            price: Mutex::new(None),
            pool: Mutex::new(None),
            pool_enabled: pool.is_some(),
            settings: Arc::clone(&settings),
            workers: Arc::clone(&workers),
            toasts: Arc::clone(&toasts),
            sink,
        });

        let price_render = {
            let screen = Arc::clone(&screen);
            Arc::new(move |state: RenderState<PriceSample>| {
                *lock(&screen.price) = Some(state);
                screen.redraw();
            })
        };
        let price = Poller::new(
            price,
            PollerOptions {
                interval: config.price_interval(),
                capacity: config.history_cap,
                storage_key: keys::PRICE_HISTORY.to_string(),
            },
            Arc::clone(&store),
            price_render,
            Arc::clone(&toasts),
        );

        let pool = pool.map(|source| {
            let screen = Arc::clone(&screen);
            let render = Arc::new(move |state: RenderState<PoolSample>| {
                *lock(&screen.pool) = Some(state);
                screen.redraw();
            });
            Poller::new(
                source,
                PollerOptions {
                    interval: config.pool_interval(),
                    capacity: config.history_cap,
                    storage_key: keys::POOL_HISTORY.to_string(),
                },
                Arc::clone(&store),
                render,
                Arc::clone(&toasts),
            )
        });

        // Show cached data right away.
        price.render_current();
        if let Some(pool) = &pool {
            pool.render_current();
        }

        Self {
            config,
            store,
            settings,
            workers,
            toasts,
            price,
            pool,
            screen,
        }
    }

    pub fn start(&self) -> DashboardHandle {
        let mut pollers = vec![self.price.start()];
        if let Some(pool) = &self.pool {
            pollers.push(pool.start());
        }
        logging::info(
            Domain::System,
            "dashboard_started",
            obj(&[("feeds", v_num(pollers.len() as f64))]),
        );
        DashboardHandle { pollers }
    }

    /// Polls every feed once, concurrently. Feeds already fetching report `Skipped`.
    pub async fn fetch_now(&self) -> FetchReport {
        let pool: OptionFuture<_> = self.pool.as_ref().map(|p| p.poll_once()).into();
        let (price, pool) = tokio::join!(self.price.poll_once(), pool);
        logging::info(
            Domain::Poller,
            "fetch_now",
            obj(&[
                ("price", v_str(price.as_str())),
                ("pool", v_str(pool.as_ref().map(|o| o.as_str()).unwrap_or("disabled"))),
            ]),
        );
        FetchReport { price, pool }
    }

    pub fn current_price(&self) -> Option<PriceSample> {
        self.price.latest()
    }

    pub fn price_history(&self) -> Vec<PriceSample> {
        self.price.history()
    }

    pub fn price_stats(&self) -> SeriesStats {
        self.price.stats()
    }

    pub fn current_pool(&self) -> Option<PoolSample> {
        self.pool.as_ref().and_then(|p| p.latest())
    }

    pub fn pool_history(&self) -> Vec<PoolSample> {
        self.pool.as_ref().map(|p| p.history()).unwrap_or_default()
    }

    pub fn pool_stats(&self) -> Option<SeriesStats> {
        self.pool.as_ref().map(|p| p.stats())
    }

    pub fn view(&self) -> DashboardView {
        self.screen.view()
    }

    pub fn redraw(&self) {
        self.screen.redraw();
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn workers(&self) -> &WorkerUrls {
        &self.workers
    }

    pub fn toasts(&self) -> &Toasts {
        &self.toasts
    }

    pub fn set_setting(&self, key: &str, value: impl Into<SettingValue>) -> Result<(), SettingsError> {
        self.settings.set(key, value)?;
        if key == settings::NOTIFICATIONS {
            self.toasts.set_enabled(self.settings.get_bool(settings::NOTIFICATIONS));
        }
        self.redraw();
        Ok(())
    }

    pub fn set_worker_url(&self, worker: &str, url: &str) -> Result<String, WorkerError> {
        let name = self.workers.set(worker, url)?;
        self.redraw();
        Ok(name)
    }

    /// Writes every persisted record to a timestamped JSON file in the configured export dir.
    pub fn export_all(&self) -> Result<PathBuf, ExportError> {
        self.export_to(&self.config.export_dir)
    }

    pub fn export_to(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        export::export_all(&self.store, dir, Utc::now())
    }
}
