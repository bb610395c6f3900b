// =============================================================================
// Lifecycle Engine — finite state machine over trade status
// =============================================================================
//
// States:   PENDING, OPEN, PARTIALLY_FILLED, CLOSING, CLOSED, EXPIRED,
//           CANCELED (initial PENDING; terminal CLOSED/EXPIRED/CANCELED).
//
// Permitted transitions:
//   PENDING          -> OPEN | CANCELED
//   OPEN             -> PARTIALLY_FILLED | CLOSING | EXPIRED | CANCELED
//   PARTIALLY_FILLED -> OPEN | CLOSING | EXPIRED | CANCELED
//   CLOSING          -> CLOSED | OPEN | CANCELED
//
// Every transition is an optimistic versioned update plus its audit row in
// one transaction; losers of a version race get ConcurrentModification and
// the row (and audit trail) are untouched. Creation with an idempotency key
// is replay-safe: the original trade is returned and no second broker order
// is implied.
// =============================================================================

use serde_json::json;
use tracing::{info, warn};

use crate::errors::StoreError;
use crate::store::trades::{NewTrade, TradeRow, TradeStatus, TradeUpdate};
use crate::store::UserScope;
use crate::types::TradeDirection;

/// Whether the state machine permits `from -> to`.
pub fn transition_allowed(from: TradeStatus, to: TradeStatus) -> bool {
    use TradeStatus::*;
    match (from, to) {
        (Pending, Open) | (Pending, Canceled) => true,
        (Open, PartiallyFilled) | (Open, Closing) | (Open, Expired) | (Open, Canceled) => true,
        (PartiallyFilled, Open)
        | (PartiallyFilled, Closing)
        | (PartiallyFilled, Expired)
        | (PartiallyFilled, Canceled) => true,
        (Closing, Closed) | (Closing, Open) | (Closing, Canceled) => true,
        _ => false,
    }
}

/// Realized P&L for a full close: per-share move x quantity x 100 shares per
/// contract, sign-flipped for short positions.
pub fn realized_pnl(direction: TradeDirection, entry: f64, exit: f64, qty: i64) -> f64 {
    let per_share = match direction {
        TradeDirection::Buy => exit - entry,
        TradeDirection::Sell => entry - exit,
    };
    per_share * qty as f64 * 100.0
}

/// The trade lifecycle engine. Stateless; every call operates under the
/// caller's user scope.
pub struct LifecycleEngine;

impl LifecycleEngine {
    /// Create a trade in PENDING.
    ///
    /// Idempotency: when the request carries a key that already exists for
    /// this user, the original trade is returned untouched — the caller must
    /// not place another broker order.
    pub async fn create(scope: &UserScope, new: &NewTrade) -> Result<TradeRow, StoreError> {
        if let Some(key) = &new.idempotency_key {
            if let Some(existing) = scope.find_by_idempotency_key(key).await? {
                info!(
                    trade_id = existing.id,
                    key = %key,
                    "idempotent create replayed — returning original trade"
                );
                return Ok(existing);
            }
        }

        match scope.insert_trade(new, "trade_created").await {
            Ok(row) => Ok(row),
            // Insert race on the key: another writer created it first.
            Err(StoreError::Constraint(msg)) => {
                if let Some(key) = &new.idempotency_key {
                    if let Some(existing) = scope.find_by_idempotency_key(key).await? {
                        warn!(key = %key, "idempotency race — returning winner's trade");
                        return Ok(existing);
                    }
                }
                Err(StoreError::Constraint(msg))
            }
            Err(e) => Err(e),
        }
    }

    /// Generic guarded transition.
    async fn transition(
        scope: &UserScope,
        trade: &TradeRow,
        to: TradeStatus,
        update: TradeUpdate,
        trigger: &str,
        metadata: serde_json::Value,
    ) -> Result<TradeRow, StoreError> {
        if !transition_allowed(trade.status, to) {
            return Err(StoreError::InvalidTransition(format!(
                "{} -> {} (trade {})",
                trade.status, to, trade.id
            )));
        }
        let mut update = update;
        update.status = Some(to);
        scope
            .transition_with_audit(
                trade.id,
                trade.version,
                &update,
                Some(trade.status),
                to,
                trigger,
                metadata,
            )
            .await
    }

    /// Broker confirmed the entry fill: PENDING -> OPEN.
    pub async fn mark_open(
        scope: &UserScope,
        trade: &TradeRow,
        fill_price: Option<f64>,
        trigger: &str,
    ) -> Result<TradeRow, StoreError> {
        let update = TradeUpdate {
            broker_fill_price: fill_price,
            set_broker_fill_time: fill_price.is_some(),
            ..Default::default()
        };
        let metadata = json!({ "fill_price": fill_price });
        Self::transition(scope, trade, TradeStatus::Open, update, trigger, metadata).await
    }

    /// Broker rejected the entry (or the user canceled pre-fill):
    /// PENDING -> CANCELED with the reason in the audit metadata.
    pub async fn mark_canceled(
        scope: &UserScope,
        trade: &TradeRow,
        reason: &str,
        trigger: &str,
    ) -> Result<TradeRow, StoreError> {
        let update = TradeUpdate {
            close_reason: Some(reason.to_string()),
            ..Default::default()
        };
        let metadata = json!({ "reason": reason });
        Self::transition(scope, trade, TradeStatus::Canceled, update, trigger, metadata).await
    }

    /// Partial fill reported during the trade's life.
    pub async fn mark_partially_filled(
        scope: &UserScope,
        trade: &TradeRow,
        filled_qty: i64,
        trigger: &str,
    ) -> Result<TradeRow, StoreError> {
        let metadata = json!({ "filled_qty": filled_qty });
        Self::transition(
            scope,
            trade,
            TradeStatus::PartiallyFilled,
            TradeUpdate::default(),
            trigger,
            metadata,
        )
        .await
    }

    /// Remaining quantity filled: PARTIALLY_FILLED -> OPEN.
    pub async fn mark_fill_complete(
        scope: &UserScope,
        trade: &TradeRow,
        trigger: &str,
    ) -> Result<TradeRow, StoreError> {
        Self::transition(
            scope,
            trade,
            TradeStatus::Open,
            TradeUpdate::default(),
            trigger,
            json!({}),
        )
        .await
    }

    /// An exit rule fired (or the user asked to close): -> CLOSING.
    pub async fn begin_close(
        scope: &UserScope,
        trade: &TradeRow,
        reason: &str,
        trigger: &str,
    ) -> Result<TradeRow, StoreError> {
        let update = TradeUpdate {
            close_reason: Some(reason.to_string()),
            ..Default::default()
        };
        let metadata = json!({ "reason": reason });
        Self::transition(scope, trade, TradeStatus::Closing, update, trigger, metadata).await
    }

    /// Close order filled: CLOSING -> CLOSED with realized P&L and the close
    /// timestamp.
    pub async fn complete_close(
        scope: &UserScope,
        trade: &TradeRow,
        exit_price: f64,
        reason: &str,
        trigger: &str,
    ) -> Result<TradeRow, StoreError> {
        let pnl = realized_pnl(trade.direction, trade.entry_price, exit_price, trade.qty);
        let update = TradeUpdate {
            exit_price: Some(exit_price),
            realized_pnl: Some(pnl),
            close_reason: Some(reason.to_string()),
            set_closed_at: true,
            current_price: Some(exit_price),
            unrealized_pnl: Some(0.0),
            ..Default::default()
        };
        let metadata = json!({ "exit_price": exit_price, "realized_pnl": pnl, "reason": reason });
        let row =
            Self::transition(scope, trade, TradeStatus::Closed, update, trigger, metadata).await?;
        info!(
            trade_id = row.id,
            ticker = %row.ticker,
            realized_pnl = pnl,
            reason,
            "trade closed"
        );
        Ok(row)
    }

    /// Broker rejected the close order: CLOSING -> OPEN.
    pub async fn reopen(
        scope: &UserScope,
        trade: &TradeRow,
        reason: &str,
        trigger: &str,
    ) -> Result<TradeRow, StoreError> {
        let metadata = json!({ "reason": reason });
        Self::transition(
            scope,
            trade,
            TradeStatus::Open,
            TradeUpdate::default(),
            trigger,
            metadata,
        )
        .await
    }

    /// Contract expiry passed: -> EXPIRED with the last known mark as the
    /// exit (worthless when no mark was ever recorded).
    pub async fn mark_expired(
        scope: &UserScope,
        trade: &TradeRow,
        trigger: &str,
    ) -> Result<TradeRow, StoreError> {
        let exit_price = trade.current_price.unwrap_or(0.0);
        let pnl = realized_pnl(trade.direction, trade.entry_price, exit_price, trade.qty);
        let update = TradeUpdate {
            exit_price: Some(exit_price),
            realized_pnl: Some(pnl),
            close_reason: Some("EXPIRED".to_string()),
            set_closed_at: true,
            unrealized_pnl: Some(0.0),
            ..Default::default()
        };
        let metadata = json!({ "exit_price": exit_price, "realized_pnl": pnl });
        Self::transition(scope, trade, TradeStatus::Expired, update, trigger, metadata).await
    }

    /// Live mark update for an open trade (no status change; version still
    /// bumps by one). A concurrent writer simply wins the race.
    pub async fn update_mark(
        scope: &UserScope,
        trade: &TradeRow,
        mark: f64,
    ) -> Result<i64, StoreError> {
        let per_share = match trade.direction {
            TradeDirection::Buy => mark - trade.entry_price,
            TradeDirection::Sell => trade.entry_price - mark,
        };
        let update = TradeUpdate {
            current_price: Some(mark),
            unrealized_pnl: Some(per_share * trade.qty as f64 * 100.0),
            ..Default::default()
        };
        scope.update_versioned(trade.id, trade.version, &update).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Db;

    fn new_trade(key: Option<&str>) -> NewTrade {
        let mut t = NewTrade::sample("AAPL");
        t.idempotency_key = key.map(str::to_string);
        t
    }

    #[test]
    fn transition_table() {
        use TradeStatus::*;
        // Permitted.
        assert!(transition_allowed(Pending, Open));
        assert!(transition_allowed(Pending, Canceled));
        assert!(transition_allowed(Open, PartiallyFilled));
        assert!(transition_allowed(PartiallyFilled, Open));
        assert!(transition_allowed(Open, Closing));
        assert!(transition_allowed(Open, Expired));
        assert!(transition_allowed(Closing, Closed));
        assert!(transition_allowed(Closing, Open));
        assert!(transition_allowed(Closing, Canceled));
        // Forbidden.
        assert!(!transition_allowed(Pending, Closed));
        assert!(!transition_allowed(Open, Closed));
        assert!(!transition_allowed(Closed, Open));
        assert!(!transition_allowed(Canceled, Pending));
        assert!(!transition_allowed(Expired, Closing));
        assert!(!transition_allowed(Pending, Closing));
    }

    #[test]
    fn realized_pnl_signs() {
        assert!((realized_pnl(TradeDirection::Buy, 5.0, 8.0, 2) - 600.0).abs() < 1e-9);
        assert!((realized_pnl(TradeDirection::Buy, 5.0, 3.0, 1) - (-200.0)).abs() < 1e-9);
        assert!((realized_pnl(TradeDirection::Sell, 5.0, 3.0, 1) - 200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn happy_path_pending_open_closing_closed() {
        let db = Db::open_in_memory().unwrap();
        let scope = db.with_user("alice");

        let trade = LifecycleEngine::create(&scope, &new_trade(None)).await.unwrap();
        assert_eq!(trade.status, TradeStatus::Pending);
        assert_eq!(trade.version, 1);

        let trade = LifecycleEngine::mark_open(&scope, &trade, Some(5.05), "broker_fill")
            .await
            .unwrap();
        assert_eq!(trade.status, TradeStatus::Open);
        assert_eq!(trade.version, 2);
        assert!(trade.realized_pnl.is_none(), "open trades have no realized P&L");

        let trade = LifecycleEngine::begin_close(&scope, &trade, "profit_target", "exit_monitor")
            .await
            .unwrap();
        assert_eq!(trade.status, TradeStatus::Closing);
        assert_eq!(trade.version, 3);
        assert!(trade.realized_pnl.is_none());

        let trade = LifecycleEngine::complete_close(&scope, &trade, 8.0, "profit_target", "broker_fill")
            .await
            .unwrap();
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.version, 4);
        // (8.0 - 5.0) * 1 contract * 100 shares.
        assert!((trade.realized_pnl.unwrap() - 300.0).abs() < 1e-9);
        assert!((trade.exit_price.unwrap() - 8.0).abs() < 1e-9);
        assert!(trade.closed_at.is_some());

        // Exactly four audit rows, in order.
        let transitions = scope.transitions_for(trade.id).await.unwrap();
        let path: Vec<(Option<TradeStatus>, TradeStatus)> = transitions
            .iter()
            .map(|t| (t.from_status, t.to_status))
            .collect();
        assert_eq!(
            path,
            vec![
                (None, TradeStatus::Pending),
                (Some(TradeStatus::Pending), TradeStatus::Open),
                (Some(TradeStatus::Open), TradeStatus::Closing),
                (Some(TradeStatus::Closing), TradeStatus::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_close_has_exactly_one_winner() {
        let db = Db::open_in_memory().unwrap();
        let scope = db.with_user("alice");
        let trade = LifecycleEngine::create(&scope, &new_trade(None)).await.unwrap();
        let open = LifecycleEngine::mark_open(&scope, &trade, Some(5.0), "broker_fill")
            .await
            .unwrap();
        assert_eq!(open.version, 2);

        // Two writers hold the same snapshot (version 2). The first wins.
        let first = LifecycleEngine::begin_close(&scope, &open, "stop_loss", "exit_monitor").await;
        assert!(first.is_ok());

        let second = LifecycleEngine::begin_close(&scope, &open, "stop_loss", "exit_monitor").await;
        assert!(matches!(
            second,
            Err(StoreError::ConcurrentModification { expected_version: 2, .. })
        ));

        // Exactly one CLOSING audit row.
        let closings = scope
            .transitions_for(trade.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.to_status == TradeStatus::Closing)
            .count();
        assert_eq!(closings, 1);
    }

    #[tokio::test]
    async fn idempotent_create_returns_original() {
        let db = Db::open_in_memory().unwrap();
        let scope = db.with_user("alice");

        let first = LifecycleEngine::create(&scope, &new_trade(Some("abc-1")))
            .await
            .unwrap();
        let second = LifecycleEngine::create(&scope, &new_trade(Some("abc-1")))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        // Still a single trade and a single creation audit row.
        let transitions = scope.transitions_for(first.id).await.unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(scope.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn broker_reject_cancels_pending_with_reason() {
        let db = Db::open_in_memory().unwrap();
        let scope = db.with_user("alice");
        let trade = LifecycleEngine::create(&scope, &new_trade(None)).await.unwrap();

        let canceled = LifecycleEngine::mark_canceled(
            &scope,
            &trade,
            "insufficient buying power",
            "broker_reject",
        )
        .await
        .unwrap();
        assert_eq!(canceled.status, TradeStatus::Canceled);

        let transitions = scope.transitions_for(trade.id).await.unwrap();
        let cancel_row = transitions.last().unwrap();
        assert_eq!(cancel_row.to_status, TradeStatus::Canceled);
        assert_eq!(cancel_row.metadata["reason"], "insufficient buying power");
    }

    #[tokio::test]
    async fn invalid_transitions_are_rejected_without_audit() {
        let db = Db::open_in_memory().unwrap();
        let scope = db.with_user("alice");
        let trade = LifecycleEngine::create(&scope, &new_trade(None)).await.unwrap();

        // PENDING -> CLOSING is not in the table.
        let err = LifecycleEngine::begin_close(&scope, &trade, "x", "t").await;
        assert!(matches!(err, Err(StoreError::InvalidTransition(_))));

        // Terminal states accept nothing.
        let canceled = LifecycleEngine::mark_canceled(&scope, &trade, "user", "user_cancel")
            .await
            .unwrap();
        let err = LifecycleEngine::mark_open(&scope, &canceled, None, "broker_fill").await;
        assert!(matches!(err, Err(StoreError::InvalidTransition(_))));

        let transitions = scope.transitions_for(trade.id).await.unwrap();
        assert_eq!(transitions.len(), 2); // creation + cancel only
    }

    #[tokio::test]
    async fn partial_fill_roundtrip() {
        let db = Db::open_in_memory().unwrap();
        let scope = db.with_user("alice");
        let trade = LifecycleEngine::create(&scope, &new_trade(None)).await.unwrap();
        let open = LifecycleEngine::mark_open(&scope, &trade, Some(5.0), "broker_fill")
            .await
            .unwrap();

        let partial =
            LifecycleEngine::mark_partially_filled(&scope, &open, 1, "broker_partial")
                .await
                .unwrap();
        assert_eq!(partial.status, TradeStatus::PartiallyFilled);
        assert!(partial.realized_pnl.is_none());

        let back = LifecycleEngine::mark_fill_complete(&scope, &partial, "broker_fill")
            .await
            .unwrap();
        assert_eq!(back.status, TradeStatus::Open);
    }

    #[tokio::test]
    async fn reopen_after_broker_rejected_close() {
        let db = Db::open_in_memory().unwrap();
        let scope = db.with_user("alice");
        let trade = LifecycleEngine::create(&scope, &new_trade(None)).await.unwrap();
        let open = LifecycleEngine::mark_open(&scope, &trade, Some(5.0), "broker_fill")
            .await
            .unwrap();
        let closing = LifecycleEngine::begin_close(&scope, &open, "time_stop", "exit_monitor")
            .await
            .unwrap();

        let reopened = LifecycleEngine::reopen(&scope, &closing, "close order rejected", "broker_reject")
            .await
            .unwrap();
        assert_eq!(reopened.status, TradeStatus::Open);
        assert!(reopened.realized_pnl.is_none());
    }

    #[tokio::test]
    async fn expiry_sets_all_outcome_fields() {
        let db = Db::open_in_memory().unwrap();
        let scope = db.with_user("alice");
        let trade = LifecycleEngine::create(&scope, &new_trade(None)).await.unwrap();
        let open = LifecycleEngine::mark_open(&scope, &trade, Some(5.0), "broker_fill")
            .await
            .unwrap();

        // No mark ever recorded: expires worthless.
        let expired = LifecycleEngine::mark_expired(&scope, &open, "eod_reconcile")
            .await
            .unwrap();
        assert_eq!(expired.status, TradeStatus::Expired);
        assert!((expired.exit_price.unwrap() - 0.0).abs() < 1e-9);
        assert!((expired.realized_pnl.unwrap() - (-500.0)).abs() < 1e-9);
        assert_eq!(expired.close_reason.as_deref(), Some("EXPIRED"));
        assert!(expired.closed_at.is_some());
    }

    #[tokio::test]
    async fn mark_update_bumps_version_without_audit() {
        let db = Db::open_in_memory().unwrap();
        let scope = db.with_user("alice");
        let trade = LifecycleEngine::create(&scope, &new_trade(None)).await.unwrap();
        let open = LifecycleEngine::mark_open(&scope, &trade, Some(5.0), "broker_fill")
            .await
            .unwrap();

        let v = LifecycleEngine::update_mark(&scope, &open, 6.5).await.unwrap();
        assert_eq!(v, 3);

        let row = scope.get_trade(trade.id).await.unwrap();
        assert!((row.current_price.unwrap() - 6.5).abs() < 1e-9);
        assert!((row.unrealized_pnl.unwrap() - 150.0).abs() < 1e-9);
        // Status unchanged, no extra audit rows.
        assert_eq!(row.status, TradeStatus::Open);
        assert_eq!(scope.transitions_for(trade.id).await.unwrap().len(), 2);
    }
}
