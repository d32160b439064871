use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{SettingsError, StorageError};
use crate::logging::{self, obj, v_str, Domain};
use crate::storage::{keys, KvStore};

pub const SHOW_PRICE: &str = "show_price";
pub const SHOW_POOL: &str = "show_pool";
pub const SHOW_WORKERS: &str = "show_workers";
pub const NOTIFICATIONS: &str = "notifications";
pub const HASHRATE_UNIT: &str = "hashrate_unit";
pub const CURRENCY_SYMBOL: &str = "currency_symbol";

pub const HASHRATE_UNITS: [&str; 8] = ["auto", "H", "K", "M", "G", "T", "P", "E"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Text(String),
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Text(v.to_string())
    }
}

pub type SettingsMap = BTreeMap<String, SettingValue>;

pub fn defaults() -> SettingsMap {
    let mut map = SettingsMap::new();
    map.insert(SHOW_PRICE.into(), true.into());
    map.insert(SHOW_POOL.into(), true.into());
    map.insert(SHOW_WORKERS.into(), true.into());
    map.insert(NOTIFICATIONS.into(), true.into());
    map.insert(HASHRATE_UNIT.into(), "auto".into());
    map.insert(CURRENCY_SYMBOL.into(), "$".into());
    map
}

fn validate(key: &str, value: &SettingValue) -> Result<(), SettingsError> {
    let invalid = || SettingsError::InvalidValue {
        key: key.to_string(),
        value: match value {
            SettingValue::Bool(b) => b.to_string(),
            SettingValue::Text(s) => s.clone(),
        },
    };
    // Known keys must keep the type of their default.
    match (defaults().get(key), value) {
        (Some(SettingValue::Bool(_)), SettingValue::Text(_)) | (Some(SettingValue::Text(_)), SettingValue::Bool(_)) => {
            return Err(invalid())
        }
        _ => {}
    }
    if key == HASHRATE_UNIT {
        match value {
            SettingValue::Text(unit) if HASHRATE_UNITS.contains(&unit.as_str()) => {}
            _ => return Err(invalid()),
        }
    }
    Ok(())
}

/// User preferences, persisted wholesale on every change.
pub struct SettingsStore {
    store: Arc<KvStore>,
    values: Mutex<SettingsMap>,
}

impl SettingsStore {
    /// Loads persisted settings over the defaults. An unreadable record falls back to defaults.
    pub fn load(store: Arc<KvStore>) -> Self {
        let mut values = defaults();
        match store.get_json::<SettingsMap>(keys::SETTINGS) {
            Ok(Some(saved)) => values.extend(saved),
            Ok(None) => {}
            Err(err) => logging::warn(
                Domain::Storage,
                "settings_load_failed",
                obj(&[("msg", v_str(&err.to_string()))]),
            ),
        }
        Self { store, values: Mutex::new(values) }
    }

    fn values(&self) -> MutexGuard<'_, SettingsMap> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<SettingValue> {
        self.values().get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.get(key), Some(SettingValue::Bool(true)))
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(SettingValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// The change is applied in memory only once the whole map has been written.
    pub fn set(&self, key: &str, value: impl Into<SettingValue>) -> Result<(), SettingsError> {
        let value = value.into();
        validate(key, &value)?;
        {
            let mut values = self.values();
            let mut next = values.clone();
            next.insert(key.to_string(), value);
            self.persist(&next)?;
            *values = next;
        }
        logging::info(Domain::System, "setting_changed", obj(&[("key", v_str(key))]));
        Ok(())
    }

    pub fn reset(&self) -> Result<(), SettingsError> {
        let mut values = self.values();
        let next = defaults();
        self.persist(&next)?;
        *values = next;
        Ok(())
    }

    pub fn snapshot(&self) -> SettingsMap {
        self.values().clone()
    }

    fn persist(&self, map: &SettingsMap) -> Result<(), StorageError> {
        self.store.put_json(keys::SETTINGS, map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> (Arc<KvStore>, SettingsStore) {
        let store = Arc::new(KvStore::open_in_memory().unwrap());
        let settings = SettingsStore::load(Arc::clone(&store));
        (store, settings)
    }

    #[test]
    fn test_defaults_applied() {
        let (_, settings) = fresh();
        assert!(settings.get_bool(SHOW_PRICE));
        assert_eq!(settings.get_str(HASHRATE_UNIT).as_deref(), Some("auto"));
        assert_eq!(settings.get_str(CURRENCY_SYMBOL).as_deref(), Some("$"));
    }

    #[test]
    fn test_set_persists_whole_map() {
        let (store, settings) = fresh();
        settings.set(SHOW_WORKERS, false).unwrap();
        let saved: SettingsMap = store.get_json(keys::SETTINGS).unwrap().unwrap();
        assert_eq!(saved.get(SHOW_WORKERS), Some(&SettingValue::Bool(false)));
        assert_eq!(saved.get(SHOW_PRICE), Some(&SettingValue::Bool(true)));
        assert_eq!(saved.len(), defaults().len());

        let reloaded = SettingsStore::load(store);
        assert!(!reloaded.get_bool(SHOW_WORKERS));
    }

    #[test]
    fn test_rejects_bad_values() {
        let (_, settings) = fresh();
        assert!(settings.set(HASHRATE_UNIT, "bogus").is_err());
        assert!(settings.set(SHOW_PRICE, "yes").is_err());
        settings.set(HASHRATE_UNIT, "T").unwrap();
        assert_eq!(settings.get_str(HASHRATE_UNIT).as_deref(), Some("T"));
    }

    #[test]
    fn test_unknown_keys_kept_and_reset() {
        let (store, settings) = fresh();
        settings.set("theme", "dark").unwrap();
        assert_eq!(settings.get_str("theme").as_deref(), Some("dark"));
        settings.reset().unwrap();
        assert_eq!(settings.get("theme"), None);
        let saved: SettingsMap = store.get_json(keys::SETTINGS).unwrap().unwrap();
        assert_eq!(saved, defaults());
    }

    #[test]
    fn test_failed_write_leaves_values_unchanged() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.sqlite");
        let store = Arc::new(KvStore::open(path.to_str().unwrap()).unwrap());
        let settings = SettingsStore::load(store);
        settings.set(CURRENCY_SYMBOL, "€").unwrap();

        rusqlite::Connection::open(&path).unwrap().execute_batch("DROP TABLE kv").unwrap();

        assert!(matches!(settings.set(SHOW_PRICE, false), Err(SettingsError::Storage(_))));
        assert!(settings.get_bool(SHOW_PRICE));
        assert!(settings.reset().is_err());
        assert_eq!(settings.get_str(CURRENCY_SYMBOL).as_deref(), Some("€"));
    }

    #[test]
    fn test_corrupt_record_falls_back() {
        let store = Arc::new(KvStore::open_in_memory().unwrap());
        store.put_raw(keys::SETTINGS, "[1,2").unwrap();
        let settings = SettingsStore::load(store);
        assert_eq!(settings.snapshot(), defaults());
    }
}
