// =============================================================================
// Meridian Options Engine — Main Entry Point
// =============================================================================
//
// Composition root: loads configuration, opens the store, wires the provider
// adapters, and drives the background jobs (scan loop, price poll, session
// bookends, orphan guard, expiry sweep) until Ctrl-C.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analysis;
mod analytics;
mod backtest;
mod broker;
mod config;
mod errors;
mod indicators;
mod lifecycle;
mod macro_signals;
mod market_hours;
mod monitor;
mod occ;
mod providers;
mod rate_limit;
mod regime;
mod retry;
mod scanner;
mod sentiment;
mod store;
mod types;
mod vault;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::monitor::MonitorService;
use crate::providers::batch::BatchFetcher;
use crate::providers::finnhub::FinnhubClient;
use crate::providers::fmp::FmpClient;
use crate::providers::orats::OratsClient;
use crate::regime::RegimeDetector;
use crate::scanner::{ScanOutcome, ScanRequest, Scanner};
use crate::store::{Db, UserSettings};
use crate::types::{OptionType, Strategy};
use crate::vault::Vault;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Meridian Options Engine — starting up");
    let config = Config::from_env();
    if config.debug {
        info!("debug diagnostics enabled");
    }

    // ── 2. Store & vault ─────────────────────────────────────────────────
    let db = Db::open(&config.database_path)?;
    let vault = match Vault::from_env() {
        Ok(v) => Some(Arc::new(v)),
        Err(e) => {
            // Fatal only once encryption is actually needed; scanning and
            // simulated fills work without it.
            warn!(error = %e, "vault unavailable — broker credentials cannot be used");
            None
        }
    };

    // ── 3. Provider adapters ─────────────────────────────────────────────
    let orats = Arc::new(OratsClient::new(
        config.orats_api_key.clone().unwrap_or_default(),
    ));
    let finnhub = Arc::new(FinnhubClient::new(
        config.finnhub_api_key.clone().unwrap_or_default(),
    ));
    let fmp = Arc::new(FmpClient::new(
        config.fmp_api_key.clone().unwrap_or_default(),
    ));
    let regime = Arc::new(RegimeDetector::new());

    // ── 4. Bootstrap settings for the default user ───────────────────────
    let username = std::env::var("MERIDIAN_USER").unwrap_or_else(|_| "meridian".to_string());
    if let Some(vault) = &vault {
        if let Err(e) = bootstrap_settings(&db, vault, &config, &username).await {
            warn!(error = %e, "settings bootstrap failed");
        }
    }

    // ── 5. Scanner ───────────────────────────────────────────────────────
    let scanner = Arc::new(Scanner::new(
        orats.clone(),
        finnhub.clone(),
        fmp.clone(),
        regime.clone(),
    ));

    let watchlist: Vec<String> = std::env::var("MERIDIAN_WATCHLIST")
        .unwrap_or_else(|_| "SPY,AAPL,MSFT,NVDA,QQQ".to_string())
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    let strategy = std::env::var("MERIDIAN_STRATEGY")
        .ok()
        .and_then(|s| Strategy::parse(&s))
        .unwrap_or(Strategy::Leap);
    info!(watchlist = ?watchlist, strategy = %strategy, user = %username, "scan configuration");

    // ── 6. Stop signal ───────────────────────────────────────────────────
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    // ── 7. Scheduler jobs ────────────────────────────────────────────────
    let service = Arc::new(MonitorService::new(
        db.clone(),
        orats.clone(),
        regime.clone(),
        vault.clone(),
        stop_rx.clone(),
    ));

    let poll_service = service.clone();
    let poll_every = tokio::time::Duration::from_secs(config.poll_interval_secs);
    tokio::spawn(async move { poll_service.run_price_poll(poll_every).await });

    let bookend_service = service.clone();
    tokio::spawn(async move { bookend_service.run_bookends().await });

    let orphan_service = service.clone();
    let orphan_every = tokio::time::Duration::from_secs(config.orphan_interval_secs);
    tokio::spawn(async move { orphan_service.run_orphan_guard(orphan_every).await });

    let expiry_service = service.clone();
    tokio::spawn(async move {
        expiry_service
            .run_expiry_sweep(tokio::time::Duration::from_secs(600))
            .await
    });

    // ── 8. Periodic scan loop ────────────────────────────────────────────
    let scan_db = db.clone();
    let scan_orats = orats.clone();
    let scan_user = username.clone();
    let mut scan_stop = stop_rx.clone();
    tokio::spawn(async move {
        let batch = BatchFetcher::new(8, 100);
        let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(900));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = scan_stop.changed() => {}
            }
            if *scan_stop.borrow() {
                break;
            }
            if !scan_orats.is_configured() {
                continue;
            }

            // Pre-fetch chains with bounded fan-out, then run the pipeline.
            let chains = batch
                .fetch_map(&watchlist, "chains", |t| {
                    let orats = scan_orats.clone();
                    async move { orats.get_option_chain(&t).await.map(Some) }
                })
                .await;

            let scope = scan_db.with_user(&scan_user);
            for symbol in &watchlist {
                let request = ScanRequest {
                    ticker: symbol.clone(),
                    strategy,
                    direction: OptionType::Call,
                    strict_mode: false,
                    pre_fetched_chain: chains.get(symbol).cloned(),
                };
                match scanner.scan_ticker(Some(&scope), &request).await {
                    ScanOutcome::Report(report) => {
                        if let Some(best) = report.opportunities.first() {
                            info!(
                                ticker = %report.ticker,
                                score = best.opportunity_score,
                                strike = best.strike_price,
                                expiry = %best.expiration_date,
                                premium = best.premium,
                                "top opportunity"
                            );
                        } else {
                            info!(ticker = %report.ticker, "scan produced no opportunities");
                        }
                    }
                    ScanOutcome::Gate(verdict) => {
                        info!(ticker = %symbol, verdict = %verdict, "scan gated");
                    }
                }
            }
        }
    });

    // ── 9. Optional one-shot backtest ────────────────────────────────────
    if let Ok(bt_ticker) = std::env::var("MERIDIAN_BACKTEST") {
        if orats.is_configured() && !bt_ticker.trim().is_empty() {
            match orats.get_history(&bt_ticker, 1000).await {
                Ok(history) if !history.is_empty() => {
                    let rules = backtest::BacktestRules::for_strategy(strategy);
                    let result = backtest::backtest_ticker(&history, strategy, &rules);
                    info!(
                        ticker = %result.ticker,
                        trades = result.total_trades,
                        win_rate = result.win_rate,
                        total_pnl_pct = result.total_pnl_pct,
                        max_drawdown_pct = result.max_drawdown_pct,
                        profit_factor = result.profit_factor,
                        "backtest result"
                    );
                }
                Ok(_) => warn!(ticker = %bt_ticker, "backtest skipped — no history"),
                Err(e) => warn!(ticker = %bt_ticker, error = %e, "backtest history fetch failed"),
            }
        }
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 10. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — draining jobs");
    if stop_tx.send(true).is_err() {
        error!("stop signal had no receivers");
    }
    // Give in-flight iterations a moment to finish before the pool closes.
    tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;

    // Session recap for the default user.
    let scope = db.with_user(&username);
    match analytics::summary_stats(&scope).await {
        Ok(stats) if stats.total_trades > 0 => {
            let drawdown = analytics::max_drawdown(&scope).await.unwrap_or(0.0);
            info!(
                trades = stats.total_trades,
                win_rate = stats.win_rate,
                total_pnl = stats.total_pnl,
                profit_factor = stats.profit_factor,
                max_drawdown = drawdown,
                "session recap"
            );
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "session recap failed"),
    }

    info!("Meridian shut down complete.");
    Ok(())
}

/// Seed per-user settings from bootstrap environment credentials when the
/// user has none yet. Tokens are encrypted before they touch the database.
async fn bootstrap_settings(
    db: &Db,
    vault: &Vault,
    config: &Config,
    username: &str,
) -> anyhow::Result<()> {
    let scope = db.with_user(username);
    if scope.get_settings().await?.is_some() {
        return Ok(());
    }
    let (Some(token), Some(account_id)) =
        (&config.tradier_access_token, &config.tradier_account_id)
    else {
        return Ok(());
    };

    let mut settings = UserSettings::defaults(username);
    settings.sandbox_token_enc = Some(vault.encrypt(token));
    settings.broker_account_id = Some(account_id.clone());
    scope.upsert_settings(&settings).await?;
    info!(user = username, "bootstrap settings created (sandbox)");
    Ok(())
}
