// =============================================================================
// Backtester — synthetic historical simulation for single-leg strategies
// =============================================================================
//
// A deliberately simplified model over daily closes: entries at fixed
// intervals per strategy, an ATM premium estimated as a fraction of the
// underlying, and option P&L proxied through a constant delta. Exits follow
// the strategy's profit-target / stop-loss / max-hold rules. The output is a
// research summary, not an execution-quality simulation.
// =============================================================================

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::types::{PriceHistory, Strategy};

/// Delta proxy used to translate underlying moves into option P&L.
const DELTA_PROXY: f64 = 0.55;

/// Per-strategy simulation rules.
#[derive(Debug, Clone, Copy)]
pub struct BacktestRules {
    pub profit_target_pct: f64,
    pub stop_loss_pct: f64,
    pub max_hold_days: i64,
    /// Days between simulated entries.
    pub entry_interval_days: i64,
    /// ATM premium as a fraction of the underlying price.
    pub premium_fraction: f64,
}

impl BacktestRules {
    pub fn for_strategy(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Leap => Self {
                profit_target_pct: 50.0,
                stop_loss_pct: -30.0,
                max_hold_days: 180,
                entry_interval_days: 30,
                premium_fraction: 0.12,
            },
            Strategy::Weekly => Self {
                profit_target_pct: 30.0,
                stop_loss_pct: -40.0,
                max_hold_days: 7,
                entry_interval_days: 7,
                premium_fraction: 0.03,
            },
            Strategy::ZeroDte => Self {
                profit_target_pct: 20.0,
                stop_loss_pct: -50.0,
                max_hold_days: 1,
                entry_interval_days: 1,
                premium_fraction: 0.01,
            },
        }
    }
}

/// One simulated trade.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestTrade {
    pub ticker: String,
    pub strategy: Strategy,
    pub entry_date: NaiveDate,
    /// Premium paid per share.
    pub entry_premium: f64,
    pub strike: f64,
    pub exit_date: NaiveDate,
    /// One of: profit_target, stop_loss, time_stop.
    pub exit_reason: &'static str,
    pub pnl_pct: f64,
    pub pnl_dollar: f64,
}

/// Aggregate result of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BacktestResult {
    pub ticker: String,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub total_pnl_pct: f64,
    pub profit_factor: f64,
    pub max_drawdown_pct: f64,
    pub trades: Vec<BacktestTrade>,
}

/// Simulate one ticker's history under the given strategy rules.
///
/// `history` must be ascending daily candles (datetime in epoch millis).
pub fn backtest_ticker(
    history: &PriceHistory,
    strategy: Strategy,
    rules: &BacktestRules,
) -> BacktestResult {
    let candles = &history.candles;
    let mut trades: Vec<BacktestTrade> = Vec::new();

    let dates: Vec<NaiveDate> = candles
        .iter()
        .filter_map(|c| {
            chrono::DateTime::from_timestamp_millis(c.datetime).map(|dt| dt.date_naive())
        })
        .collect();
    if dates.len() != candles.len() || candles.is_empty() {
        return BacktestResult {
            ticker: history.symbol.clone(),
            ..Default::default()
        };
    }

    let mut entry_idx = 0usize;
    while entry_idx < candles.len() {
        let entry_price = candles[entry_idx].close;
        let entry_date = dates[entry_idx];
        if entry_price <= 0.0 {
            entry_idx += 1;
            continue;
        }
        let entry_premium = entry_price * rules.premium_fraction;

        // Walk forward until a rule fires or the hold window ends.
        let mut exit: Option<(usize, f64, &'static str)> = None;
        for (offset, candle) in candles.iter().enumerate().skip(entry_idx + 1) {
            let held_days = (dates[offset] - entry_date).num_days();
            let move_pct = (candle.close - entry_price) / entry_price * 100.0;
            // Delta-proxied option P&L on the premium.
            let option_pnl_pct = move_pct * DELTA_PROXY / rules.premium_fraction;

            if option_pnl_pct >= rules.profit_target_pct {
                exit = Some((offset, option_pnl_pct, "profit_target"));
                break;
            }
            if option_pnl_pct <= rules.stop_loss_pct {
                exit = Some((offset, option_pnl_pct, "stop_loss"));
                break;
            }
            if held_days >= rules.max_hold_days {
                exit = Some((offset, option_pnl_pct, "time_stop"));
                break;
            }
        }

        let Some((exit_idx, pnl_pct, reason)) = exit else {
            // Ran out of history mid-position; drop the open stub.
            break;
        };

        trades.push(BacktestTrade {
            ticker: history.symbol.clone(),
            strategy,
            entry_date,
            entry_premium: (entry_premium * 100.0).round() / 100.0,
            strike: (entry_price * 100.0).round() / 100.0,
            exit_date: dates[exit_idx],
            exit_reason: reason,
            pnl_pct: (pnl_pct * 100.0).round() / 100.0,
            pnl_dollar: (pnl_pct / 100.0 * entry_premium * 100.0 * 100.0).round() / 100.0,
        });

        // Next entry: at least the configured interval past this entry.
        let next_date = entry_date + chrono::Duration::days(rules.entry_interval_days);
        entry_idx = match dates[entry_idx..].iter().position(|d| *d >= next_date) {
            Some(pos) => entry_idx + pos,
            None => break,
        };
    }

    summarize(history.symbol.clone(), trades)
}

fn summarize(ticker: String, trades: Vec<BacktestTrade>) -> BacktestResult {
    let total = trades.len();
    if total == 0 {
        return BacktestResult {
            ticker,
            ..Default::default()
        };
    }

    let wins: Vec<f64> = trades
        .iter()
        .filter(|t| t.pnl_pct > 0.0)
        .map(|t| t.pnl_pct)
        .collect();
    let losses: Vec<f64> = trades
        .iter()
        .filter(|t| t.pnl_pct <= 0.0)
        .map(|t| t.pnl_pct)
        .collect();

    let gross_wins: f64 = wins.iter().sum();
    let gross_losses: f64 = losses.iter().sum::<f64>().abs();

    // Sequential drawdown over cumulative P&L percent.
    let mut cumulative = 0.0_f64;
    let mut peak = 0.0_f64;
    let mut max_drawdown = 0.0_f64;
    for t in &trades {
        cumulative += t.pnl_pct;
        peak = peak.max(cumulative);
        max_drawdown = max_drawdown.min(cumulative - peak);
    }

    let result = BacktestResult {
        ticker,
        total_trades: total,
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        win_rate: wins.len() as f64 / total as f64 * 100.0,
        avg_win_pct: if wins.is_empty() {
            0.0
        } else {
            gross_wins / wins.len() as f64
        },
        avg_loss_pct: if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f64>() / losses.len() as f64
        },
        total_pnl_pct: trades.iter().map(|t| t.pnl_pct).sum(),
        profit_factor: if gross_losses > 0.0 {
            (gross_wins / gross_losses * 100.0).round() / 100.0
        } else {
            0.0
        },
        max_drawdown_pct: max_drawdown,
        trades,
    };

    info!(
        ticker = %result.ticker,
        trades = result.total_trades,
        win_rate = result.win_rate,
        total_pnl_pct = result.total_pnl_pct,
        "backtest complete"
    );
    result
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candle;

    fn history(closes: &[f64]) -> PriceHistory {
        let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        PriceHistory {
            symbol: "TEST".into(),
            candles: closes
                .iter()
                .enumerate()
                .map(|(i, &close)| {
                    let date = base + chrono::Duration::days(i as i64);
                    Candle {
                        datetime: date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis(),
                        open: close,
                        high: close,
                        low: close,
                        close,
                        volume: 1_000_000.0,
                    }
                })
                .collect(),
        }
    }

    #[test]
    fn empty_history_yields_empty_result() {
        let h = history(&[]);
        let rules = BacktestRules::for_strategy(Strategy::Leap);
        let result = backtest_ticker(&h, Strategy::Leap, &rules);
        assert_eq!(result.total_trades, 0);
    }

    #[test]
    fn steady_rally_hits_profit_targets() {
        // +1% per day: with the weekly rules (3% premium, 0.55 delta) the
        // +30% option target needs ~1.6% of underlying move — day two.
        let closes: Vec<f64> = (0..120).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        let h = history(&closes);
        let rules = BacktestRules::for_strategy(Strategy::Weekly);
        let result = backtest_ticker(&h, Strategy::Weekly, &rules);

        assert!(result.total_trades > 0);
        assert_eq!(result.losing_trades, 0);
        assert!((result.win_rate - 100.0).abs() < 1e-9);
        assert!(result
            .trades
            .iter()
            .all(|t| t.exit_reason == "profit_target"));
        assert!(result.total_pnl_pct > 0.0);
    }

    #[test]
    fn steady_decline_hits_stops() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 * 0.99_f64.powi(i)).collect();
        let h = history(&closes);
        let rules = BacktestRules::for_strategy(Strategy::Weekly);
        let result = backtest_ticker(&h, Strategy::Weekly, &rules);

        assert!(result.total_trades > 0);
        assert_eq!(result.winning_trades, 0);
        assert!(result.trades.iter().all(|t| t.exit_reason == "stop_loss"));
        assert!(result.max_drawdown_pct < 0.0);
    }

    #[test]
    fn flat_tape_exits_on_time() {
        let closes = vec![100.0; 60];
        let h = history(&closes);
        let rules = BacktestRules::for_strategy(Strategy::Weekly);
        let result = backtest_ticker(&h, Strategy::Weekly, &rules);

        assert!(result.total_trades > 0);
        assert!(result.trades.iter().all(|t| t.exit_reason == "time_stop"));
        assert!(result.total_pnl_pct.abs() < 1e-9);
    }

    #[test]
    fn entries_respect_the_interval() {
        let closes = vec![100.0; 90];
        let h = history(&closes);
        let rules = BacktestRules::for_strategy(Strategy::Leap);
        let result = backtest_ticker(&h, Strategy::Leap, &rules);

        for pair in result.trades.windows(2) {
            let gap = (pair[1].entry_date - pair[0].entry_date).num_days();
            assert!(gap >= rules.entry_interval_days, "entry gap {gap}");
        }
    }

    #[test]
    fn per_strategy_rules_differ() {
        let leap = BacktestRules::for_strategy(Strategy::Leap);
        let zero = BacktestRules::for_strategy(Strategy::ZeroDte);
        assert!(leap.max_hold_days > zero.max_hold_days);
        assert!(leap.premium_fraction > zero.premium_fraction);
        assert!(zero.stop_loss_pct < leap.stop_loss_pct);
    }
}
