// =============================================================================
// Trade rows — status enum, inserts, optimistic versioned updates, audit
// =============================================================================
//
// Every mutation here is scoped by the owning username (see store module
// docs) and bumps the version column by exactly one. The status-changing
// primitive writes its audit row in the same transaction: either both land
// or neither does.
// =============================================================================

use chrono::NaiveDate;
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::UserScope;
use crate::errors::StoreError;
use crate::types::{BrokerMode, OptionType, TradeContext, TradeDirection};

/// Lifecycle status of a paper trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeStatus {
    Pending,
    Open,
    PartiallyFilled,
    Closing,
    Closed,
    Expired,
    Canceled,
}

impl TradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Open => "OPEN",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
            Self::Expired => "EXPIRED",
            Self::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "OPEN" => Some(Self::Open),
            "PARTIALLY_FILLED" => Some(Self::PartiallyFilled),
            "CLOSING" => Some(Self::Closing),
            "CLOSED" => Some(Self::Closed),
            "EXPIRED" => Some(Self::Expired),
            "CANCELED" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Expired | Self::Canceled)
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted trade.
#[derive(Debug, Clone)]
pub struct TradeRow {
    pub id: i64,
    pub username: String,
    pub idempotency_key: Option<String>,
    pub ticker: String,
    pub option_type: OptionType,
    pub strike: f64,
    pub expiry: NaiveDate,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub qty: i64,
    pub sl_price: Option<f64>,
    pub tp_price: Option<f64>,
    pub strategy: Option<String>,
    pub current_price: Option<f64>,
    pub unrealized_pnl: Option<f64>,
    pub status: TradeStatus,
    pub exit_price: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub close_reason: Option<String>,
    pub context: TradeContext,
    pub broker_mode: BrokerMode,
    pub broker_order_id: Option<String>,
    pub broker_sl_order_id: Option<String>,
    pub broker_tp_order_id: Option<String>,
    pub broker_fill_price: Option<f64>,
    pub broker_fill_time: Option<String>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
    pub closed_at: Option<String>,
}

/// Insert payload for a new trade (created in PENDING, version 1).
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub ticker: String,
    pub option_type: OptionType,
    pub strike: f64,
    pub expiry: NaiveDate,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub qty: i64,
    pub sl_price: Option<f64>,
    pub tp_price: Option<f64>,
    pub strategy: Option<String>,
    pub broker_mode: BrokerMode,
    pub idempotency_key: Option<String>,
    pub context: TradeContext,
    pub broker_order_id: Option<String>,
}

impl NewTrade {
    /// Minimal valid payload for tests.
    #[cfg(test)]
    pub fn sample(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            option_type: OptionType::Call,
            strike: 150.0,
            expiry: NaiveDate::from_ymd_opt(2026, 6, 20).unwrap(),
            direction: TradeDirection::Buy,
            entry_price: 5.0,
            qty: 1,
            sl_price: None,
            tp_price: None,
            strategy: Some("LEAP".to_string()),
            broker_mode: BrokerMode::TradierSandbox,
            idempotency_key: None,
            context: TradeContext::default(),
            broker_order_id: None,
        }
    }
}

/// Partial update applied under optimistic locking. `None` leaves a column
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct TradeUpdate {
    pub status: Option<TradeStatus>,
    pub current_price: Option<f64>,
    pub unrealized_pnl: Option<f64>,
    pub exit_price: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub close_reason: Option<String>,
    pub set_closed_at: bool,
    pub broker_order_id: Option<String>,
    pub broker_sl_order_id: Option<String>,
    pub broker_tp_order_id: Option<String>,
    pub broker_fill_price: Option<f64>,
    pub set_broker_fill_time: bool,
    /// Null out both bracket leg ids (orphan guard after cancellation).
    pub clear_bracket_order_ids: bool,
}

/// One audit-trail row.
#[derive(Debug, Clone)]
pub struct TransitionRow {
    pub id: i64,
    pub trade_id: i64,
    pub from_status: Option<TradeStatus>,
    pub to_status: TradeStatus,
    pub trigger: String,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

const TRADE_COLUMNS: &str = "id, username, idempotency_key, ticker, option_type, strike, expiry,
    direction, entry_price, qty, sl_price, tp_price, strategy, current_price,
    unrealized_pnl, status, exit_price, realized_pnl, close_reason,
    trade_context, broker_mode, broker_order_id, broker_sl_order_id,
    broker_tp_order_id, broker_fill_price, broker_fill_time, version,
    created_at, updated_at, closed_at";

fn conversion_err(detail: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        detail.into(),
    )
}

fn map_trade(row: &Row<'_>) -> rusqlite::Result<TradeRow> {
    let option_type_raw: String = row.get(4)?;
    let expiry_raw: String = row.get(6)?;
    let direction_raw: String = row.get(7)?;
    let status_raw: String = row.get(15)?;
    let context_raw: String = row.get(19)?;
    let broker_mode_raw: String = row.get(20)?;

    Ok(TradeRow {
        id: row.get(0)?,
        username: row.get(1)?,
        idempotency_key: row.get(2)?,
        ticker: row.get(3)?,
        option_type: OptionType::parse(&option_type_raw)
            .ok_or_else(|| conversion_err(format!("option_type {option_type_raw}")))?,
        strike: row.get(5)?,
        expiry: NaiveDate::parse_from_str(&expiry_raw, "%Y-%m-%d")
            .map_err(|e| conversion_err(format!("expiry {expiry_raw}: {e}")))?,
        direction: if direction_raw == "SELL" {
            TradeDirection::Sell
        } else {
            TradeDirection::Buy
        },
        entry_price: row.get(8)?,
        qty: row.get(9)?,
        sl_price: row.get(10)?,
        tp_price: row.get(11)?,
        strategy: row.get(12)?,
        current_price: row.get(13)?,
        unrealized_pnl: row.get(14)?,
        status: TradeStatus::parse(&status_raw)
            .ok_or_else(|| conversion_err(format!("status {status_raw}")))?,
        exit_price: row.get(16)?,
        realized_pnl: row.get(17)?,
        close_reason: row.get(18)?,
        context: serde_json::from_str(&context_raw).unwrap_or_default(),
        broker_mode: BrokerMode::parse(&broker_mode_raw),
        broker_order_id: row.get(21)?,
        broker_sl_order_id: row.get(22)?,
        broker_tp_order_id: row.get(23)?,
        broker_fill_price: row.get(24)?,
        broker_fill_time: row.get(25)?,
        version: row.get(26)?,
        created_at: row.get(27)?,
        updated_at: row.get(28)?,
        closed_at: row.get(29)?,
    })
}

impl UserScope {
    /// Insert a new trade in PENDING at version 1, writing the creation
    /// audit row (NULL -> PENDING) in the same transaction. A duplicate
    /// idempotency key surfaces as a constraint violation (the caller
    /// resolves it to the original row).
    pub async fn insert_trade(
        &self,
        new: &NewTrade,
        trigger: &str,
    ) -> Result<TradeRow, StoreError> {
        let context_json = serde_json::to_string(&new.context)
            .map_err(|e| StoreError::Constraint(format!("trade_context: {e}")))?;

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let result = tx.execute(
            "INSERT INTO paper_trades (
                username, idempotency_key, ticker, option_type, strike, expiry,
                direction, entry_price, qty, sl_price, tp_price, strategy,
                trade_context, broker_mode, broker_order_id
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                self.username,
                new.idempotency_key,
                new.ticker.to_uppercase(),
                new.option_type.to_string(),
                new.strike,
                new.expiry.format("%Y-%m-%d").to_string(),
                new.direction.to_string(),
                new.entry_price,
                new.qty,
                new.sl_price,
                new.tp_price,
                new.strategy,
                context_json,
                new.broker_mode.to_string(),
                new.broker_order_id,
            ],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, msg))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::Constraint(
                    msg.unwrap_or_else(|| "constraint violation".to_string()),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO state_transitions (trade_id, from_status, to_status, trigger, metadata_json)
             VALUES (?1, NULL, 'PENDING', ?2, '{}')",
            params![id, trigger],
        )?;

        let row = tx.query_row(
            &format!("SELECT {TRADE_COLUMNS} FROM paper_trades WHERE id = ?1 AND username = ?2"),
            params![id, self.username],
            map_trade,
        )?;
        tx.commit()?;
        debug!(trade_id = id, ticker = %row.ticker, "trade inserted");
        Ok(row)
    }

    /// Fetch one of this user's trades.
    pub async fn get_trade(&self, trade_id: i64) -> Result<TradeRow, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {TRADE_COLUMNS} FROM paper_trades WHERE id = ?1 AND username = ?2"),
            params![trade_id, self.username],
            map_trade,
        )
        .optional()?
        .ok_or_else(|| {
            StoreError::NotFound(format!("trade {trade_id} for user {}", self.username))
        })
    }

    /// The trade previously created with this idempotency key, if any.
    pub async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<TradeRow>, StoreError> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {TRADE_COLUMNS} FROM paper_trades
                     WHERE idempotency_key = ?1 AND username = ?2"
                ),
                params![key, self.username],
                map_trade,
            )
            .optional()?)
    }

    /// This user's trades in any of the given statuses, oldest first.
    pub async fn list_by_status(
        &self,
        statuses: &[TradeStatus],
    ) -> Result<Vec<TradeRow>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = statuses
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT {TRADE_COLUMNS} FROM paper_trades
             WHERE username = ?1 AND status IN ({placeholders})
             ORDER BY id"
        );

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(self.username.clone())];
        for s in statuses {
            values.push(Box::new(s.as_str()));
        }
        let rows = stmt.query_map(params_from_iter(values.iter().map(|v| v.as_ref())), map_trade)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Non-terminal trades.
    pub async fn list_active(&self) -> Result<Vec<TradeRow>, StoreError> {
        self.list_by_status(&[
            TradeStatus::Pending,
            TradeStatus::Open,
            TradeStatus::PartiallyFilled,
            TradeStatus::Closing,
        ])
        .await
    }

    /// Apply a non-status update under optimistic locking. The version bumps
    /// by exactly one; a version mismatch leaves the row untouched.
    pub async fn update_versioned(
        &self,
        trade_id: i64,
        expected_version: i64,
        update: &TradeUpdate,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let new_version =
            apply_versioned_update(&tx, &self.username, trade_id, expected_version, update)?;
        tx.commit()?;
        Ok(new_version)
    }

    /// Status transition + audit row, atomically.
    ///
    /// The row update and the `state_transitions` insert share one database
    /// transaction: a losing writer gets `ConcurrentModification` and the
    /// audit trail records nothing.
    #[allow(clippy::too_many_arguments)]
    pub async fn transition_with_audit(
        &self,
        trade_id: i64,
        expected_version: i64,
        update: &TradeUpdate,
        from: Option<TradeStatus>,
        to: TradeStatus,
        trigger: &str,
        metadata: serde_json::Value,
    ) -> Result<TradeRow, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        apply_versioned_update(&tx, &self.username, trade_id, expected_version, update)?;

        tx.execute(
            "INSERT INTO state_transitions (trade_id, from_status, to_status, trigger, metadata_json)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                trade_id,
                from.map(|s| s.as_str()),
                to.as_str(),
                trigger,
                metadata.to_string(),
            ],
        )?;

        let row = tx.query_row(
            &format!("SELECT {TRADE_COLUMNS} FROM paper_trades WHERE id = ?1 AND username = ?2"),
            params![trade_id, self.username],
            map_trade,
        )?;
        tx.commit()?;

        debug!(
            trade_id,
            from = ?from.map(|s| s.as_str()),
            to = %to,
            trigger,
            version = row.version,
            "transition recorded"
        );
        Ok(row)
    }

    /// Audit rows for one trade, in creation order.
    pub async fn transitions_for(&self, trade_id: i64) -> Result<Vec<TransitionRow>, StoreError> {
        let conn = self.conn.lock().await;
        // Ownership via the trade row itself.
        let owned: Option<i64> = conn
            .query_row(
                "SELECT id FROM paper_trades WHERE id = ?1 AND username = ?2",
                params![trade_id, self.username],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare(
            "SELECT id, trade_id, from_status, to_status, trigger, metadata_json, created_at
             FROM state_transitions WHERE trade_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![trade_id], |row| {
            let from_raw: Option<String> = row.get(2)?;
            let to_raw: String = row.get(3)?;
            let metadata_raw: String = row.get(5)?;
            Ok(TransitionRow {
                id: row.get(0)?,
                trade_id: row.get(1)?,
                from_status: from_raw.and_then(|s| TradeStatus::parse(&s)),
                to_status: TradeStatus::parse(&to_raw)
                    .ok_or_else(|| conversion_err(format!("to_status {to_raw}")))?,
                trigger: row.get(4)?,
                metadata: serde_json::from_str(&metadata_raw)
                    .unwrap_or(serde_json::Value::Null),
                created_at: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Shared body of the optimistic update: bump version, set columns, verify
/// exactly one row changed.
fn apply_versioned_update(
    tx: &rusqlite::Transaction<'_>,
    username: &str,
    trade_id: i64,
    expected_version: i64,
    update: &TradeUpdate,
) -> Result<i64, StoreError> {
    let mut sets: Vec<String> =
        vec!["version = version + 1".into(), "updated_at = datetime('now')".into()];
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    let mut push = |sets: &mut Vec<String>, values: &mut Vec<Box<dyn ToSql>>, col: &str, v: Box<dyn ToSql>| {
        values.push(v);
        sets.push(format!("{col} = ?{}", values.len()));
    };

    if let Some(status) = update.status {
        push(&mut sets, &mut values, "status", Box::new(status.as_str()));
    }
    if let Some(v) = update.current_price {
        push(&mut sets, &mut values, "current_price", Box::new(v));
    }
    if let Some(v) = update.unrealized_pnl {
        push(&mut sets, &mut values, "unrealized_pnl", Box::new(v));
    }
    if let Some(v) = update.exit_price {
        push(&mut sets, &mut values, "exit_price", Box::new(v));
    }
    if let Some(v) = update.realized_pnl {
        push(&mut sets, &mut values, "realized_pnl", Box::new(v));
    }
    if let Some(v) = &update.close_reason {
        push(&mut sets, &mut values, "close_reason", Box::new(v.clone()));
    }
    if update.set_closed_at {
        sets.push("closed_at = datetime('now')".into());
    }
    if let Some(v) = &update.broker_order_id {
        push(&mut sets, &mut values, "broker_order_id", Box::new(v.clone()));
    }
    if let Some(v) = &update.broker_sl_order_id {
        push(&mut sets, &mut values, "broker_sl_order_id", Box::new(v.clone()));
    }
    if let Some(v) = &update.broker_tp_order_id {
        push(&mut sets, &mut values, "broker_tp_order_id", Box::new(v.clone()));
    }
    if let Some(v) = update.broker_fill_price {
        push(&mut sets, &mut values, "broker_fill_price", Box::new(v));
    }
    if update.set_broker_fill_time {
        sets.push("broker_fill_time = datetime('now')".into());
    }
    if update.clear_bracket_order_ids {
        sets.push("broker_sl_order_id = NULL".into());
        sets.push("broker_tp_order_id = NULL".into());
    }

    let id_idx = values.len() + 1;
    let version_idx = values.len() + 2;
    let user_idx = values.len() + 3;
    let sql = format!(
        "UPDATE paper_trades SET {} WHERE id = ?{id_idx} AND version = ?{version_idx} AND username = ?{user_idx}",
        sets.join(", ")
    );
    values.push(Box::new(trade_id));
    values.push(Box::new(expected_version));
    values.push(Box::new(username.to_string()));

    let changed = tx.execute(&sql, params_from_iter(values.iter().map(|v| v.as_ref())))?;
    if changed == 1 {
        return Ok(expected_version + 1);
    }

    // Zero rows: distinguish a missing/foreign row from a version conflict.
    let exists: Option<i64> = tx
        .query_row(
            "SELECT version FROM paper_trades WHERE id = ?1 AND username = ?2",
            params![trade_id, username],
            |row| row.get(0),
        )
        .optional()?;
    match exists {
        None => Err(StoreError::NotFound(format!(
            "trade {trade_id} for user {username}"
        ))),
        Some(_) => Err(StoreError::ConcurrentModification {
            trade_id,
            expected_version,
        }),
    }
}
