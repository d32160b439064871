use anyhow::Result;
use std::io::Write;
use std::sync::Arc;

use poolwatch::config::Config;
use poolwatch::dashboard::{Dashboard, ViewSink};
use poolwatch::logging::{self, obj, v_num, v_str, Domain};
use poolwatch::storage::KvStore;
use poolwatch::view::{render_text, DashboardView};

fn usage() -> &'static str {
    "usage: poolwatch [--once] [--export]\n\n\
     --once    fetch every feed once, print the dashboard and exit\n\
     --export  write all persisted data to EXPORT_DIR and exit\n"
}

/// Redraws the whole terminal on every view. One-shot modes draw nothing until the end.
fn terminal_sink(live: bool) -> ViewSink {
    if !live {
        return Arc::new(|_: &DashboardView| {});
    }
    Arc::new(|view: &DashboardView| {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "\x1B[2J\x1B[H{}", render_text(view));
        let _ = out.flush();
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", usage());
        return Ok(());
    }
    let once = args.iter().any(|a| a == "--once");
    let export_only = args.iter().any(|a| a == "--export");

    let cfg = Config::from_env();
    logging::info(
        Domain::System,
        "startup",
        obj(&[
            ("run_id", v_str(&logging::run_id())),
            ("store", v_str(&cfg.store_path)),
            ("pool_feed", serde_json::Value::Bool(cfg.pool_stats_url.is_some())),
            ("price_poll_secs", v_num(cfg.price_poll_secs as f64)),
            ("pool_poll_secs", v_num(cfg.pool_poll_secs as f64)),
            ("history_cap", v_num(cfg.history_cap as f64)),
        ]),
    );

    let store = Arc::new(KvStore::open(&cfg.store_path)?);

    let dashboard = Dashboard::from_config(cfg, store, terminal_sink(!once && !export_only))?;

    if export_only {
        let path = dashboard.export_all()?;
        println!("{}", path.display());
        return Ok(());
    }

    if once {
        let report = dashboard.fetch_now().await;
        print!("{}", render_text(&dashboard.view()));
        logging::info(
            Domain::System,
            "once_done",
            obj(&[
                ("price", v_str(report.price.as_str())),
                ("pool", v_str(report.pool.as_ref().map(|o| o.as_str()).unwrap_or("disabled"))),
            ]),
        );
        return Ok(());
    }

    let handle = dashboard.start();
    tokio::signal::ctrl_c().await?;
    handle.teardown();
    logging::info(Domain::System, "shutdown", obj(&[]));
    Ok(())
}
