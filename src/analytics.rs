// =============================================================================
// Analytics — summary, equity curve, drawdown, attribution over closed trades
// =============================================================================
//
// All queries run under the caller's user scope and consider only completed
// outcomes (CLOSED or EXPIRED rows with a realized P&L).
// =============================================================================

use rusqlite::params;
use serde::Serialize;

use crate::errors::StoreError;
use crate::store::UserScope;

/// Aggregate performance over all completed trades.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummaryStats {
    pub total_trades: i64,
    pub wins: i64,
    pub losses: i64,
    /// Percent of completed trades with non-negative P&L.
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// Gross profit over gross loss (0 when no losses).
    pub profit_factor: f64,
    /// Expected P&L per trade: win_rate*avg_win - loss_rate*avg_loss.
    pub expectancy: f64,
}

/// One point of the realized equity curve.
#[derive(Debug, Clone, Serialize)]
pub struct EquityPoint {
    pub closed_at: String,
    pub realized_pnl: f64,
    pub cumulative_pnl: f64,
}

/// Per-ticker or per-strategy attribution bucket.
#[derive(Debug, Clone, Serialize)]
pub struct AttributionBucket {
    pub key: String,
    pub trades: i64,
    pub wins: i64,
    pub total_pnl: f64,
}

/// Monthly realized P&L bucket.
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyPnl {
    /// "YYYY-MM".
    pub month: String,
    pub trades: i64,
    pub total_pnl: f64,
}

const COMPLETED: &str = "status IN ('CLOSED','EXPIRED') AND realized_pnl IS NOT NULL";

/// Summary statistics for the scope's completed trades.
pub async fn summary_stats(scope: &UserScope) -> Result<SummaryStats, StoreError> {
    let conn = scope.conn.lock().await;
    let sql = format!(
        "SELECT
            COUNT(*),
            SUM(CASE WHEN realized_pnl >= 0 THEN 1 ELSE 0 END),
            SUM(CASE WHEN realized_pnl < 0 THEN 1 ELSE 0 END),
            COALESCE(SUM(realized_pnl), 0),
            COALESCE(SUM(CASE WHEN realized_pnl >= 0 THEN realized_pnl ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN realized_pnl < 0 THEN -realized_pnl ELSE 0 END), 0)
         FROM paper_trades WHERE username = ?1 AND {COMPLETED}"
    );
    let (total, wins, losses, total_pnl, gross_profit, gross_loss): (
        i64,
        Option<i64>,
        Option<i64>,
        f64,
        f64,
        f64,
    ) = conn.query_row(&sql, params![scope.username()], |row| {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    })?;

    let wins = wins.unwrap_or(0);
    let losses = losses.unwrap_or(0);
    if total == 0 {
        return Ok(SummaryStats::default());
    }

    let win_rate = wins as f64 / total as f64 * 100.0;
    let avg_win = if wins > 0 { gross_profit / wins as f64 } else { 0.0 };
    let avg_loss = if losses > 0 { gross_loss / losses as f64 } else { 0.0 };
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else {
        0.0
    };
    let loss_rate = 1.0 - win_rate / 100.0;
    let expectancy = (win_rate / 100.0) * avg_win - loss_rate * avg_loss;

    Ok(SummaryStats {
        total_trades: total,
        wins,
        losses,
        win_rate,
        total_pnl,
        avg_win,
        avg_loss,
        profit_factor,
        expectancy,
    })
}

/// Cumulative realized P&L ordered by close time.
pub async fn equity_curve(scope: &UserScope) -> Result<Vec<EquityPoint>, StoreError> {
    let conn = scope.conn.lock().await;
    let sql = format!(
        "SELECT closed_at, realized_pnl FROM paper_trades
         WHERE username = ?1 AND {COMPLETED} AND closed_at IS NOT NULL
         ORDER BY closed_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![scope.username()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;

    let mut cumulative = 0.0;
    let mut curve = Vec::new();
    for row in rows {
        let (closed_at, pnl) = row?;
        cumulative += pnl;
        curve.push(EquityPoint {
            closed_at,
            realized_pnl: pnl,
            cumulative_pnl: cumulative,
        });
    }
    Ok(curve)
}

/// Worst peak-to-trough move of the equity curve (non-positive).
pub async fn max_drawdown(scope: &UserScope) -> Result<f64, StoreError> {
    let curve = equity_curve(scope).await?;
    let mut peak = 0.0_f64;
    let mut worst = 0.0_f64;
    for point in &curve {
        peak = peak.max(point.cumulative_pnl);
        worst = worst.min(point.cumulative_pnl - peak);
    }
    Ok(worst)
}

async fn attribution(
    scope: &UserScope,
    key_expr: &str,
) -> Result<Vec<AttributionBucket>, StoreError> {
    let conn = scope.conn.lock().await;
    let sql = format!(
        "SELECT {key_expr} AS k,
                COUNT(*),
                SUM(CASE WHEN realized_pnl >= 0 THEN 1 ELSE 0 END),
                COALESCE(SUM(realized_pnl), 0)
         FROM paper_trades
         WHERE username = ?1 AND {COMPLETED}
         GROUP BY k ORDER BY SUM(realized_pnl) DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![scope.username()], |row| {
        Ok(AttributionBucket {
            key: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            trades: row.get(1)?,
            wins: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            total_pnl: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Per-ticker performance attribution.
pub async fn ticker_breakdown(scope: &UserScope) -> Result<Vec<AttributionBucket>, StoreError> {
    attribution(scope, "ticker").await
}

/// Per-strategy performance attribution.
pub async fn strategy_breakdown(scope: &UserScope) -> Result<Vec<AttributionBucket>, StoreError> {
    attribution(scope, "COALESCE(strategy, 'UNKNOWN')").await
}

/// Realized P&L bucketed by close month.
pub async fn monthly_pnl(scope: &UserScope) -> Result<Vec<MonthlyPnl>, StoreError> {
    let conn = scope.conn.lock().await;
    let sql = format!(
        "SELECT strftime('%Y-%m', closed_at) AS month,
                COUNT(*),
                COALESCE(SUM(realized_pnl), 0)
         FROM paper_trades
         WHERE username = ?1 AND {COMPLETED} AND closed_at IS NOT NULL
         GROUP BY month ORDER BY month"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![scope.username()], |row| {
        Ok(MonthlyPnl {
            month: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            trades: row.get(1)?,
            total_pnl: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::trades::{NewTrade, TradeStatus, TradeUpdate};
    use crate::store::Db;

    /// Seed a completed trade directly through the store layer.
    async fn seed_closed(scope: &UserScope, ticker: &str, strategy: &str, pnl: f64) {
        let mut new = NewTrade::sample(ticker);
        new.strategy = Some(strategy.to_string());
        let trade = scope.insert_trade(&new, "test").await.unwrap();
        let update = TradeUpdate {
            status: Some(TradeStatus::Closed),
            exit_price: Some(new.entry_price + pnl / 100.0),
            realized_pnl: Some(pnl),
            close_reason: Some("test".to_string()),
            set_closed_at: true,
            ..Default::default()
        };
        scope
            .transition_with_audit(
                trade.id,
                1,
                &update,
                Some(TradeStatus::Pending),
                TradeStatus::Closed,
                "test",
                serde_json::Value::Null,
            )
            .await
            .unwrap();
    }

    async fn seeded_db() -> (Db, UserScope) {
        let db = Db::open_in_memory().unwrap();
        let scope = db.with_user("alice");
        // 3 wins (+300, +450, +300), 2 losses (-375, -375): totals +1050/-750.
        seed_closed(&scope, "AAPL", "LEAP", 300.0).await;
        seed_closed(&scope, "AAPL", "LEAP", 450.0).await;
        seed_closed(&scope, "MSFT", "WEEKLY", 300.0).await;
        seed_closed(&scope, "MSFT", "LEAP", -375.0).await;
        seed_closed(&scope, "NVDA", "WEEKLY", -375.0).await;
        (db, scope)
    }

    #[tokio::test]
    async fn summary_reference_numbers() {
        let (_db, scope) = seeded_db().await;
        let stats = summary_stats(&scope).await.unwrap();
        assert_eq!(stats.total_trades, 5);
        assert_eq!(stats.wins, 3);
        assert_eq!(stats.losses, 2);
        assert!((stats.win_rate - 60.0).abs() < 1e-9);
        assert!((stats.total_pnl - 300.0).abs() < 1e-9);
        // Profit factor 1050 / 750 = 1.4.
        assert!((stats.profit_factor - 1.4).abs() < 1e-9);
        // Expectancy: 0.6*350 - 0.4*375 = 60.
        assert!((stats.expectancy - 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_scope_is_all_zero() {
        let db = Db::open_in_memory().unwrap();
        let scope = db.with_user("nobody");
        let stats = summary_stats(&scope).await.unwrap();
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert!(equity_curve(&scope).await.unwrap().is_empty());
        assert_eq!(max_drawdown(&scope).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn equity_curve_accumulates() {
        let (_db, scope) = seeded_db().await;
        let curve = equity_curve(&scope).await.unwrap();
        assert_eq!(curve.len(), 5);
        let last = curve.last().unwrap();
        assert!((last.cumulative_pnl - 300.0).abs() < 1e-9);
        // Monotone accumulation of the individual legs.
        let sum: f64 = curve.iter().map(|p| p.realized_pnl).sum();
        assert!((sum - 300.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn drawdown_is_peak_to_trough() {
        let (_db, scope) = seeded_db().await;
        // Curve: 300, 750, 1050, 675, 300 — peak 1050, trough 300.
        let dd = max_drawdown(&scope).await.unwrap();
        assert!((dd - (-750.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn attribution_buckets() {
        let (_db, scope) = seeded_db().await;

        let by_ticker = ticker_breakdown(&scope).await.unwrap();
        let aapl = by_ticker.iter().find(|b| b.key == "AAPL").unwrap();
        assert_eq!(aapl.trades, 2);
        assert_eq!(aapl.wins, 2);
        assert!((aapl.total_pnl - 750.0).abs() < 1e-9);

        let by_strategy = strategy_breakdown(&scope).await.unwrap();
        let leap = by_strategy.iter().find(|b| b.key == "LEAP").unwrap();
        assert_eq!(leap.trades, 3);
        assert!((leap.total_pnl - 375.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn monthly_buckets_current_month() {
        let (_db, scope) = seeded_db().await;
        let months = monthly_pnl(&scope).await.unwrap();
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].trades, 5);
        assert!((months[0].total_pnl - 300.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn analytics_respect_user_isolation() {
        let (db, _alice) = seeded_db().await;
        let bob = db.with_user("bob");
        assert_eq!(summary_stats(&bob).await.unwrap().total_trades, 0);
        assert!(ticker_breakdown(&bob).await.unwrap().is_empty());
    }
}
