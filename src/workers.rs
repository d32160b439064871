use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use url::Url;

use crate::error::WorkerError;
use crate::logging::{self, obj, v_str, Domain};
use crate::storage::{keys, KvStore};

/// Strips the `<payout address>.` prefix pool software puts in front of worker names.
pub fn clean_worker_name(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.split_once('.') {
        Some((_, rest)) if !rest.trim().is_empty() => rest.trim().to_string(),
        _ => trimmed.to_string(),
    }
}

fn validate_url(url: &str) -> Result<(), WorkerError> {
    let invalid = |reason: String| WorkerError::InvalidUrl { url: url.to_string(), reason };
    let parsed = Url::parse(url.trim()).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme {other}"))),
    }
}

/// Per-worker links (miner web UI, monitoring page), keyed by cleaned worker name.
pub struct WorkerUrls {
    store: Arc<KvStore>,
    urls: Mutex<BTreeMap<String, String>>,
}

impl WorkerUrls {
    pub fn load(store: Arc<KvStore>) -> Self {
        let urls = match store.get_json::<BTreeMap<String, String>>(keys::WORKER_URLS) {
            Ok(saved) => saved.unwrap_or_default(),
            Err(err) => {
                logging::warn(
                    Domain::Storage,
                    "worker_urls_load_failed",
                    obj(&[("msg", v_str(&err.to_string()))]),
                );
                BTreeMap::new()
            }
        };
        Self { store, urls: Mutex::new(urls) }
    }

    fn urls(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.urls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, raw_name: &str, url: &str) -> Result<String, WorkerError> {
        let name = clean_worker_name(raw_name);
        if name.is_empty() {
            return Err(WorkerError::EmptyName);
        }
        validate_url(url)?;
        {
            let mut urls = self.urls();
            let mut next = urls.clone();
            next.insert(name.clone(), url.trim().to_string());
            self.store.put_json(keys::WORKER_URLS, &next)?;
            *urls = next;
        }
        logging::info(Domain::System, "worker_url_set", obj(&[("worker", v_str(&name))]));
        Ok(name)
    }

    /// Looks up by raw or cleaned name.
    pub fn get(&self, name: &str) -> Option<String> {
        self.urls().get(&clean_worker_name(name)).cloned()
    }

    pub fn remove(&self, name: &str) -> Result<bool, WorkerError> {
        let name = clean_worker_name(name);
        let mut urls = self.urls();
        if !urls.contains_key(&name) {
            return Ok(false);
        }
        let mut next = urls.clone();
        next.remove(&name);
        self.store.put_json(keys::WORKER_URLS, &next)?;
        *urls = next;
        Ok(true)
    }

    pub fn all(&self) -> BTreeMap<String, String> {
        self.urls().clone()
    }
}
