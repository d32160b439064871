//! Dashboard view model.
//!
//! `build` maps the latest render states, settings and worker links to a
//! `DashboardView`. It does no I/O. `render_text` lays the view out for a
//! terminal.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::feed::pool::PoolSample;
use crate::feed::price::PriceSample;
use crate::notify::{Toast, ToastLevel};
use crate::poller::RenderState;
use crate::settings::{self, SettingValue, SettingsMap};
use crate::stats::{self, Trend};
use crate::workers::clean_worker_name;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Card<T> {
    Hidden,
    Loading,
    Unavailable { message: String },
    Ready(T),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceCard {
    pub price: String,
    pub change_24h: String,
    pub change_positive: bool,
    pub trend: Trend,
    pub high: Option<String>,
    pub low: Option<String>,
    pub samples: usize,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolCard {
    pub hashrate_1m: String,
    pub hashrate_5m: String,
    pub hashrate_1h: String,
    pub hashrate_1d: String,
    pub workers: u32,
    pub shares: String,
    pub best_share: String,
    pub last_share: String,
    pub trend: Trend,
    pub high: Option<String>,
    pub low: Option<String>,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerRow {
    pub name: String,
    pub hashrate_5m: String,
    pub last_share: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub generated_at: DateTime<Utc>,
    pub price: Card<PriceCard>,
    pub pool: Card<PoolCard>,
    pub workers: Vec<WorkerRow>,
    pub toasts: Vec<String>,
}

pub struct ViewInput<'a> {
    pub price: Option<&'a RenderState<PriceSample>>,
    pub pool: Option<&'a RenderState<PoolSample>>,
    pub pool_enabled: bool,
    pub settings: &'a SettingsMap,
    pub worker_urls: &'a BTreeMap<String, String>,
    pub toasts: &'a [Toast],
    pub now: DateTime<Utc>,
}

fn flag(settings: &SettingsMap, key: &str) -> bool {
    !matches!(settings.get(key), Some(SettingValue::Bool(false)))
}

fn text<'a>(settings: &'a SettingsMap, key: &str, fallback: &'a str) -> &'a str {
    match settings.get(key) {
        Some(SettingValue::Text(s)) => s.as_str(),
        _ => fallback,
    }
}

pub fn build(input: &ViewInput<'_>) -> DashboardView {
    let prefs = input.settings;
    let currency = text(prefs, settings::CURRENCY_SYMBOL, "$");
    let unit = text(prefs, settings::HASHRATE_UNIT, "auto");

    let price = if !flag(prefs, settings::SHOW_PRICE) {
        Card::Hidden
    } else {
        card(input.price, |latest, history| price_card(latest, history, currency))
    };

    let pool = if !input.pool_enabled || !flag(prefs, settings::SHOW_POOL) {
        Card::Hidden
    } else {
        card(input.pool, |latest, history| pool_card(latest, history, unit, input.now))
    };

    let workers = match input.pool {
        Some(RenderState::Ready { latest, .. }) if input.pool_enabled && flag(prefs, settings::SHOW_WORKERS) => {
            worker_rows(latest, input.worker_urls, unit, input.now)
        }
        _ => Vec::new(),
    };

    let toasts = input
        .toasts
        .iter()
        .map(|t| {
            let tag = match t.level {
                ToastLevel::Info => "info",
                ToastLevel::Warn => "warn",
                ToastLevel::Error => "error",
            };
            format!("[{}] {} {}", tag, t.at.format("%H:%M:%S"), t.message)
        })
        .collect();

    DashboardView {
        generated_at: input.now,
        price,
        pool,
        workers,
        toasts,
    }
}

fn card<S, T>(state: Option<&RenderState<S>>, ready: impl FnOnce(&S, &[S]) -> T) -> Card<T> {
    match state {
        None => Card::Loading,
        Some(RenderState::Unavailable { message }) => Card::Unavailable { message: message.clone() },
        Some(RenderState::Ready { latest, history }) => Card::Ready(ready(latest, history.as_slice())),
    }
}

fn price_card(latest: &PriceSample, history: &[PriceSample], currency: &str) -> PriceCard {
    let values: Vec<f64> = history.iter().map(|s| s.price).collect();
    let summary = stats::summarize(&values);
    PriceCard {
        price: format_money(latest.price, currency),
        change_24h: format!("{:+.2}%", latest.change_24h),
        change_positive: latest.change_24h >= 0.0,
        trend: summary.trend,
        high: summary.extrema.map(|e| format_money(e.max, currency)),
        low: summary.extrema.map(|e| format_money(e.min, currency)),
        samples: summary.samples,
        updated_at: latest.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    }
}

fn pool_card(latest: &PoolSample, history: &[PoolSample], unit: &str, now: DateTime<Utc>) -> PoolCard {
    let values: Vec<f64> = history.iter().map(|s| s.hashrate_5m).collect();
    let summary = stats::summarize(&values);
    PoolCard {
        hashrate_1m: format_hashrate(latest.hashrate_1m, unit),
        hashrate_5m: format_hashrate(latest.hashrate_5m, unit),
        hashrate_1h: format_hashrate(latest.hashrate_1h, unit),
        hashrate_1d: format_hashrate(latest.hashrate_1d, unit),
        workers: latest.workers,
        shares: format_compact(latest.shares),
        best_share: format_compact(latest.best_share),
        last_share: format_age(latest.last_share, now),
        trend: summary.trend,
        high: summary.extrema.map(|e| format_hashrate(e.max, unit)),
        low: summary.extrema.map(|e| format_hashrate(e.min, unit)),
        samples: summary.samples,
    }
}

fn worker_rows(
    latest: &PoolSample,
    urls: &BTreeMap<String, String>,
    unit: &str,
    now: DateTime<Utc>,
) -> Vec<WorkerRow> {
    latest
        .worker_stats
        .iter()
        .map(|w| {
            let name = clean_worker_name(&w.name);
            WorkerRow {
                url: urls.get(&name).cloned(),
                hashrate_5m: format_hashrate(w.hashrate_5m, unit),
                last_share: format_age(w.last_share, now),
                name,
            }
        })
        .collect()
}

// =============================================================================
// Formatting
// =============================================================================

const HASHRATE_STEPS: [(&str, f64); 7] = [
    ("H", 1.0),
    ("K", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

pub fn format_hashrate(hs: f64, unit: &str) -> String {
    let step = HASHRATE_STEPS
        .iter()
        .find(|(u, _)| *u == unit)
        .copied()
        .unwrap_or_else(|| {
            HASHRATE_STEPS
                .iter()
                .rev()
                .find(|(_, m)| hs >= *m)
                .copied()
                .unwrap_or(HASHRATE_STEPS[0])
        });
    let (prefix, mult) = step;
    let prefix = if prefix == "H" { "" } else { prefix };
    format!("{:.2} {}H/s", hs / mult, prefix)
}

pub fn format_money(value: f64, currency: &str) -> String {
    let sign = if value < 0.0 { "-" } else { "" };
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{}{}{}.{:02}", sign, currency, grouped, cents % 100)
}

pub fn format_compact(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1e12 {
        format!("{:.2}T", value / 1e12)
    } else if abs >= 1e9 {
        format!("{:.2}B", value / 1e9)
    } else if abs >= 1e6 {
        format!("{:.2}M", value / 1e6)
    } else if abs >= 1e3 {
        format!("{:.2}K", value / 1e3)
    } else {
        format!("{:.0}", value)
    }
}

pub fn format_age(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(at) = at else {
        return "never".to_string();
    };
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{}s ago", secs),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

// =============================================================================
// Text layout
// =============================================================================

fn extrema_line(high: &Option<String>, low: &Option<String>) -> String {
    match (high, low) {
        (Some(h), Some(l)) => format!("20-pt high {}  low {}", h, l),
        _ => "20-pt high -  low -".to_string(),
    }
}

pub fn render_text(view: &DashboardView) -> String {
    let mut out = String::new();
    out.push_str(&format!("poolwatch  {}\n", view.generated_at.format("%Y-%m-%d %H:%M:%S UTC")));
    out.push_str(&"-".repeat(60));
    out.push('\n');

    match &view.price {
        Card::Hidden => {}
        Card::Loading => out.push_str("BTC/USD   loading...\n"),
        Card::Unavailable { message } => out.push_str(&format!("BTC/USD   unavailable: {}\n", message)),
        Card::Ready(p) => {
            out.push_str(&format!(
                "BTC/USD   {}  {} (24h)  {} {}\n",
                p.price,
                p.change_24h,
                p.trend.arrow(),
                p.trend.as_str()
            ));
            out.push_str(&format!("          {}  [{} samples]\n", extrema_line(&p.high, &p.low), p.samples));
        }
    }

    match &view.pool {
        Card::Hidden => {}
        Card::Loading => out.push_str("Pool      loading...\n"),
        Card::Unavailable { message } => out.push_str(&format!("Pool      unavailable: {}\n", message)),
        Card::Ready(p) => {
            out.push_str(&format!(
                "Pool      1m {}  5m {}  1h {}  1d {}  {} {}\n",
                p.hashrate_1m,
                p.hashrate_5m,
                p.hashrate_1h,
                p.hashrate_1d,
                p.trend.arrow(),
                p.trend.as_str()
            ));
            out.push_str(&format!(
                "          workers {}  shares {}  best {}  last share {}\n",
                p.workers, p.shares, p.best_share, p.last_share
            ));
            out.push_str(&format!("          {}  [{} samples]\n", extrema_line(&p.high, &p.low), p.samples));
        }
    }

    if !view.workers.is_empty() {
        out.push('\n');
        out.push_str(&format!("{:<20} {:>14} {:>12}  {}\n", "worker", "5m", "last share", "link"));
        for w in &view.workers {
            out.push_str(&format!(
                "{:<20} {:>14} {:>12}  {}\n",
                w.name,
                w.hashrate_5m,
                w.last_share,
                w.url.as_deref().unwrap_or("-")
            ));
        }
    }

    if !view.toasts.is_empty() {
        out.push('\n');
        for t in &view.toasts {
            out.push_str(t);
            out.push('\n');
        }
    }
    out
}
