//! Pool statistics feed for ckpool-style user endpoints.
//!
//! Hashrates arrive either as plain numbers (H/s) or as strings with an SI
//! suffix such as `"12.5T"`. Everything is normalized to H/s.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use super::get_text;
use crate::error::FetchError;
use crate::poller::SampleSource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStat {
    pub name: String,
    pub hashrate_1m: f64,
    pub hashrate_5m: f64,
    pub last_share: Option<DateTime<Utc>>,
    pub shares: f64,
    pub best_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSample {
    pub timestamp: DateTime<Utc>,
    pub hashrate_1m: f64,
    pub hashrate_5m: f64,
    pub hashrate_1h: f64,
    pub hashrate_1d: f64,
    pub workers: u32,
    pub shares: f64,
    pub best_share: f64,
    pub last_share: Option<DateTime<Utc>>,
    #[serde(default)]
    pub worker_stats: Vec<WorkerStat>,
}

/// SI multipliers used by pool software for hashrate strings.
const SUFFIXES: [(char, f64); 7] = [
    ('K', 1e3),
    ('M', 1e6),
    ('G', 1e9),
    ('T', 1e12),
    ('P', 1e15),
    ('E', 1e18),
    ('Z', 1e21),
];

/// Parses `"12.5T"`, `"980G"`, `"1.2 PH/s"` or `"42"` into H/s.
pub fn parse_hashrate(raw: &str) -> Option<f64> {
    let mut s = raw.trim();
    for unit in ["H/s", "h/s", "H", "h"] {
        if let Some(stripped) = s.strip_suffix(unit) {
            s = stripped.trim_end();
            break;
        }
    }
    let (number, multiplier) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let upper = c.to_ascii_uppercase();
            let (_, mult) = SUFFIXES.iter().find(|(sfx, _)| *sfx == upper)?;
            (s[..s.len() - 1].trim_end(), *mult)
        }
        _ => (s, 1.0),
    };
    let value: f64 = number.parse().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value * multiplier)
    } else {
        None
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrText {
    Num(f64),
    Text(String),
}

fn de_hashrate<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match NumOrText::deserialize(d)? {
        NumOrText::Num(n) => Ok(n),
        NumOrText::Text(s) => parse_hashrate(&s).ok_or_else(|| D::Error::custom(format!("invalid hashrate {s:?}"))),
    }
}

fn de_number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match NumOrText::deserialize(d)? {
        NumOrText::Num(n) => Ok(n),
        NumOrText::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid number {s:?}"))),
    }
}

fn unix_secs(secs: u64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(i64::try_from(secs).ok()?, 0)
}

// ckpool response types
#[derive(Deserialize, Debug, Default)]
struct RawWorker {
    #[serde(default)]
    workername: String,
    #[serde(default, deserialize_with = "de_hashrate")]
    hashrate1m: f64,
    #[serde(default, deserialize_with = "de_hashrate")]
    hashrate5m: f64,
    #[serde(default)]
    lastshare: u64,
    #[serde(default, deserialize_with = "de_number")]
    shares: f64,
    #[serde(default, deserialize_with = "de_number")]
    bestshare: f64,
}

#[derive(Deserialize, Debug, Default)]
struct RawPoolStats {
    #[serde(default, deserialize_with = "de_hashrate")]
    hashrate1m: f64,
    #[serde(default, deserialize_with = "de_hashrate")]
    hashrate5m: f64,
    #[serde(default, deserialize_with = "de_hashrate")]
    hashrate1hr: f64,
    #[serde(default, deserialize_with = "de_hashrate")]
    hashrate1d: f64,
    #[serde(default)]
    workers: u32,
    #[serde(default, deserialize_with = "de_number")]
    shares: f64,
    #[serde(default, deserialize_with = "de_number")]
    bestshare: f64,
    #[serde(default)]
    lastshare: u64,
    #[serde(default)]
    worker: Vec<RawWorker>,
}

pub fn parse_pool_response(body: &str, now: DateTime<Utc>) -> Result<PoolSample, FetchError> {
    let raw: RawPoolStats = serde_json::from_str(body)?;
    let worker_stats = raw
        .worker
        .into_iter()
        .map(|w| WorkerStat {
            name: w.workername,
            hashrate_1m: w.hashrate1m,
            hashrate_5m: w.hashrate5m,
            last_share: unix_secs(w.lastshare),
            shares: w.shares,
            best_share: w.bestshare,
        })
        .collect::<Vec<_>>();
    Ok(PoolSample {
        timestamp: now,
        hashrate_1m: raw.hashrate1m,
        hashrate_5m: raw.hashrate5m,
        hashrate_1h: raw.hashrate1hr,
        hashrate_1d: raw.hashrate1d,
        workers: if raw.workers == 0 { worker_stats.len() as u32 } else { raw.workers },
        shares: raw.shares,
        best_share: raw.bestshare,
        last_share: unix_secs(raw.lastshare),
        worker_stats,
    })
}

pub struct PoolFeed {
    client: Client,
    url: String,
}

impl PoolFeed {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl SampleSource for PoolFeed {
    type Sample = PoolSample;

    fn name(&self) -> &'static str {
        "pool"
    }

    fn metric(sample: &PoolSample) -> f64 {
        sample.hashrate_5m
    }

    async fn fetch(&self) -> Result<PoolSample, FetchError> {
        let body = get_text(&self.client, &self.url).await?;
        parse_pool_response(&body, Utc::now())
    }
}
