use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::config::load_setting;
use common::{AccountData, Config, ContractData, TickData};
use engine::{ScriptEngine, SETTING_FILENAME};
use paper::{PaperFeed, PaperHost};

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let script_path = match std::env::args().nth(1).or(cfg.script_path) {
        Some(path) => path,
        None => {
            eprintln!("usage: scriptbot <script.lua>   (or set SCRIPT_PATH)");
            std::process::exit(2);
        }
    };

    // ── Simulated host engine ─────────────────────────────────────────────────
    let host = Arc::new(PaperHost::new("PAPER"));
    host.seed_contract(ContractData {
        symbol: "IF2303".into(),
        exchange: "CFFEX".into(),
        name: "IF2303 index future".into(),
        size: 300.0,
        price_tick: 0.2,
        gateway_name: "PAPER".into(),
    });
    host.update_tick(TickData {
        symbol: "IF2303".into(),
        exchange: "CFFEX".into(),
        datetime: chrono::Utc::now(),
        last_price: 4000.0,
        volume: 0.0,
        bid_price: 3999.8,
        bid_volume: 12.0,
        ask_price: 4000.2,
        ask_volume: 9.0,
        gateway_name: "PAPER".into(),
    });
    host.seed_account(AccountData {
        accountid: "USD".into(),
        balance: 1_000_000.0,
        frozen: 0.0,
        gateway_name: "PAPER".into(),
    });

    let feed = Arc::new(PaperFeed::new());
    if let Some(start) = NaiveDate::from_ymd_opt(2023, 1, 1) {
        feed.seed_daily_history("IF2303", "CFFEX", start, 90, 4000.0);
    }

    // ── Script engine ─────────────────────────────────────────────────────────
    let engine = ScriptEngine::new(host, feed);

    // Console listener for the log-event channel.
    let mut log_rx = engine.subscribe_logs();
    tokio::spawn(async move {
        while let Ok(record) = log_rx.recv().await {
            println!(
                "{}\t[{}] {}",
                record.time.format("%H:%M:%S"),
                record.source,
                record.msg
            );
        }
    });

    let setting_path = cfg.setting_dir.join(SETTING_FILENAME);
    match load_setting(&setting_path) {
        Ok(Some(settings)) => engine.connect_gateway(&settings, "PAPER"),
        Ok(None) => {}
        Err(e) => info!(error = %e, "settings file ignored"),
    }

    engine.init();
    engine.start_script(&script_path);

    info!("Script running. Press Ctrl-C to stop.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        info!(error = %e, "shutdown signal unavailable, stopping");
    }

    engine.stop_script();
    info!("Bye.");
}
