//! Export every persisted record to a JSON file.
//!
//! Usage: poolwatch-export [DIR]
//! DIR defaults to EXPORT_DIR.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;

use poolwatch::config::Config;
use poolwatch::export;
use poolwatch::storage::KvStore;

fn main() -> Result<()> {
    let cfg = Config::from_env();
    let dir = std::env::args().nth(1).map(PathBuf::from).unwrap_or(cfg.export_dir);
    let store = KvStore::open(&cfg.store_path).with_context(|| format!("opening store {}", cfg.store_path))?;
    let path = export::export_all(&store, &dir, Utc::now())?;
    println!("{}", path.display());
    Ok(())
}
