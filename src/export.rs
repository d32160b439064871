use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::ExportError;
use crate::logging::{self, obj, v_num, v_str, Domain};
use crate::storage::KvStore;

pub const FORMAT_VERSION: u32 = 1;

/// Everything in the store, one JSON value per key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBundle {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub entries: BTreeMap<String, Value>,
    /// Hex SHA-256 of the serialized `entries`.
    pub sha256: String,
}

impl ExportBundle {
    pub fn verify(&self) -> bool {
        entries_digest(&self.entries).map(|d| d == self.sha256).unwrap_or(false)
    }
}

pub fn entries_digest(entries: &BTreeMap<String, Value>) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(entries)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

pub fn collect(store: &KvStore, now: DateTime<Utc>) -> Result<ExportBundle, ExportError> {
    let mut entries = BTreeMap::new();
    for (key, raw) in store.entries()? {
        // Unparsable values are exported verbatim as strings.
        let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
        entries.insert(key, value);
    }
    let sha256 = entries_digest(&entries)?;
    Ok(ExportBundle {
        format_version: FORMAT_VERSION,
        exported_at: now,
        entries,
        sha256,
    })
}

pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("poolwatch-export-{}.json", now.format("%Y%m%d-%H%M%S"))
}

/// Creates a fresh export file in `dir`. An existing export from the same
/// second gets a `-1`, `-2`, ... suffix rather than being overwritten.
fn create_export_file(dir: &Path, now: DateTime<Utc>) -> io::Result<(PathBuf, File)> {
    let base = export_file_name(now);
    let stem = base.trim_end_matches(".json");
    for n in 0u32..1000 {
        let name = if n == 0 { base.clone() } else { format!("{}-{}.json", stem, n) };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::new(io::ErrorKind::AlreadyExists, "no free export file name"))
}

/// Writes the bundle into `dir` and returns the file path.
pub fn export_all(store: &KvStore, dir: &Path, now: DateTime<Utc>) -> Result<PathBuf, ExportError> {
    let bundle = collect(store, now)?;
    create_dir_all(dir)?;
    let (path, file) = create_export_file(dir, now)?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, &bundle)?;
    out.write_all(b"\n")?;
    out.flush()?;
    logging::info(
        Domain::Export,
        "export_written",
        obj(&[
            ("path", v_str(&path.to_string_lossy())),
            ("entries", v_num(bundle.entries.len() as f64)),
            ("sha256", v_str(&bundle.sha256)),
        ]),
    );
    Ok(path)
}
