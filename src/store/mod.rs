// =============================================================================
// Trade Store — SQLite persistence with a mandatory per-user scope
// =============================================================================
//
// All data access goes through a `UserScope` established per unit of work:
// every statement the scope issues binds the owning username into both reads
// and writes, so rows belonging to other users are invisible in either
// direction. The policy applies unconditionally — there is no privileged
// bypass on the data paths. The single system-level call
// (`usernames_with_active_trades`) exists so the scheduler can enumerate the
// users it must establish scopes for; it returns usernames only, never rows.
//
// The connection runs in WAL mode with foreign keys on; schema creation is
// idempotent at startup.
// =============================================================================

pub mod trades;

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::StoreError;
use crate::types::BrokerMode;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS paper_trades (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    username            TEXT    NOT NULL,
    idempotency_key     TEXT,
    ticker              TEXT    NOT NULL,
    option_type         TEXT    NOT NULL CHECK (option_type IN ('CALL','PUT')),
    strike              REAL    NOT NULL,
    expiry              TEXT    NOT NULL,
    direction           TEXT    NOT NULL DEFAULT 'BUY',
    entry_price         REAL    NOT NULL,
    qty                 INTEGER NOT NULL DEFAULT 1,
    sl_price            REAL,
    tp_price            REAL,
    strategy            TEXT,
    current_price       REAL,
    unrealized_pnl      REAL,
    status              TEXT    NOT NULL DEFAULT 'PENDING'
        CHECK (status IN ('PENDING','OPEN','PARTIALLY_FILLED','CLOSING','CLOSED','EXPIRED','CANCELED')),
    exit_price          REAL,
    realized_pnl        REAL,
    close_reason        TEXT,
    trade_context       TEXT    NOT NULL DEFAULT '{}',
    broker_mode         TEXT    NOT NULL DEFAULT 'TRADIER_SANDBOX',
    broker_order_id     TEXT,
    broker_sl_order_id  TEXT,
    broker_tp_order_id  TEXT,
    broker_fill_price   REAL,
    broker_fill_time    TEXT,
    version             INTEGER NOT NULL DEFAULT 1,
    created_at          TEXT    NOT NULL DEFAULT (datetime('now')),
    updated_at          TEXT    NOT NULL DEFAULT (datetime('now')),
    closed_at           TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS ix_paper_trades_idempotency
    ON paper_trades(idempotency_key) WHERE idempotency_key IS NOT NULL;
CREATE INDEX IF NOT EXISTS ix_paper_trades_username ON paper_trades(username);
CREATE INDEX IF NOT EXISTS ix_paper_trades_status ON paper_trades(status);
CREATE INDEX IF NOT EXISTS ix_paper_trades_username_status ON paper_trades(username, status);
CREATE INDEX IF NOT EXISTS ix_paper_trades_username_ticker ON paper_trades(username, ticker);

CREATE TABLE IF NOT EXISTS state_transitions (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_id      INTEGER NOT NULL REFERENCES paper_trades(id) ON DELETE CASCADE,
    from_status   TEXT,
    to_status     TEXT    NOT NULL,
    trigger       TEXT    NOT NULL,
    metadata_json TEXT    NOT NULL DEFAULT '{}',
    created_at    TEXT    NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS ix_state_transitions_trade_id ON state_transitions(trade_id);

CREATE TABLE IF NOT EXISTS price_snapshots (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_id      INTEGER NOT NULL REFERENCES paper_trades(id) ON DELETE CASCADE,
    username      TEXT    NOT NULL,
    timestamp     TEXT    NOT NULL DEFAULT (datetime('now')),
    mark_price    REAL,
    bid           REAL,
    ask           REAL,
    delta         REAL,
    iv            REAL,
    underlying    REAL,
    snapshot_type TEXT    NOT NULL DEFAULT 'PERIODIC'
        CHECK (snapshot_type IN ('PERIODIC','PRE_SESSION','POST_SESSION','ON_CLOSE'))
);
CREATE INDEX IF NOT EXISTS ix_price_snapshots_trade_id ON price_snapshots(trade_id);
CREATE INDEX IF NOT EXISTS ix_price_snapshots_username ON price_snapshots(username);

CREATE TABLE IF NOT EXISTS user_settings (
    username             TEXT PRIMARY KEY,
    broker_mode          TEXT NOT NULL DEFAULT 'TRADIER_SANDBOX',
    sandbox_token_enc    TEXT,
    live_token_enc       TEXT,
    broker_account_id    TEXT,
    account_balance      REAL    NOT NULL DEFAULT 5000.0,
    max_positions        INTEGER NOT NULL DEFAULT 5,
    daily_loss_limit     REAL    NOT NULL DEFAULT 150.0,
    heat_limit_pct       REAL    NOT NULL DEFAULT 6.0,
    default_sl_pct       REAL    NOT NULL DEFAULT 20.0,
    default_tp_pct       REAL    NOT NULL DEFAULT 50.0,
    auto_refresh         INTEGER NOT NULL DEFAULT 1,
    sound_enabled        INTEGER NOT NULL DEFAULT 1,
    created_at           TEXT    NOT NULL DEFAULT (datetime('now')),
    updated_at           TEXT    NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS scan_history (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    username           TEXT NOT NULL,
    ticker             TEXT NOT NULL,
    strategy           TEXT NOT NULL,
    technical_score    REAL,
    sentiment_score    REAL,
    opportunity_count  INTEGER NOT NULL DEFAULT 0,
    best_score         REAL,
    created_at         TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS ix_scan_history_username ON scan_history(username);
"#;

/// Process-wide database handle.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        info!(path, "database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure(conn: &Connection) -> Result<(), StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Establish the user context for a unit of work. Every read and write
    /// issued through the returned scope is constrained to this user's rows.
    pub fn with_user(&self, username: &str) -> UserScope {
        UserScope {
            conn: self.conn.clone(),
            username: username.to_string(),
        }
    }

    /// System surface for the scheduler: which users currently have trades
    /// in a non-terminal status. Returns usernames only.
    pub async fn usernames_with_active_trades(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT username FROM paper_trades
             WHERE status IN ('PENDING','OPEN','PARTIALLY_FILLED','CLOSING')",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish()
    }
}

// ---------------------------------------------------------------------------
// User settings
// ---------------------------------------------------------------------------

/// Per-user configuration row. Broker tokens are stored encrypted.
#[derive(Debug, Clone)]
pub struct UserSettings {
    pub username: String,
    pub broker_mode: BrokerMode,
    pub sandbox_token_enc: Option<String>,
    pub live_token_enc: Option<String>,
    pub broker_account_id: Option<String>,
    pub account_balance: f64,
    pub max_positions: i64,
    pub daily_loss_limit: f64,
    pub heat_limit_pct: f64,
    pub default_sl_pct: f64,
    pub default_tp_pct: f64,
    pub auto_refresh: bool,
    pub sound_enabled: bool,
}

impl UserSettings {
    pub fn defaults(username: &str) -> Self {
        Self {
            username: username.to_string(),
            broker_mode: BrokerMode::TradierSandbox,
            sandbox_token_enc: None,
            live_token_enc: None,
            broker_account_id: None,
            account_balance: 5000.0,
            max_positions: 5,
            daily_loss_limit: 150.0,
            heat_limit_pct: 6.0,
            default_sl_pct: 20.0,
            default_tp_pct: 50.0,
            auto_refresh: true,
            sound_enabled: true,
        }
    }
}

/// Kinds of price snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Periodic,
    PreSession,
    PostSession,
    OnClose,
}

impl SnapshotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Periodic => "PERIODIC",
            Self::PreSession => "PRE_SESSION",
            Self::PostSession => "POST_SESSION",
            Self::OnClose => "ON_CLOSE",
        }
    }
}

/// One stored price snapshot.
#[derive(Debug, Clone)]
pub struct PriceSnapshotRow {
    pub id: i64,
    pub trade_id: i64,
    pub username: String,
    pub timestamp: String,
    pub mark_price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub delta: Option<f64>,
    pub iv: Option<f64>,
    pub underlying: Option<f64>,
    pub snapshot_type: String,
}

/// A unit of work bound to one user. See the module docs for the isolation
/// contract.
#[derive(Clone)]
pub struct UserScope {
    pub(crate) conn: Arc<Mutex<Connection>>,
    pub(crate) username: String,
}

impl UserScope {
    pub fn username(&self) -> &str {
        &self.username
    }

    // -- settings ---------------------------------------------------------

    /// Fetch this user's settings row.
    pub async fn get_settings(&self) -> Result<Option<UserSettings>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT username, broker_mode, sandbox_token_enc, live_token_enc,
                        broker_account_id, account_balance, max_positions,
                        daily_loss_limit, heat_limit_pct, default_sl_pct,
                        default_tp_pct, auto_refresh, sound_enabled
                 FROM user_settings WHERE username = ?1",
                params![self.username],
                |row| {
                    Ok(UserSettings {
                        username: row.get(0)?,
                        broker_mode: BrokerMode::parse(&row.get::<_, String>(1)?),
                        sandbox_token_enc: row.get(2)?,
                        live_token_enc: row.get(3)?,
                        broker_account_id: row.get(4)?,
                        account_balance: row.get(5)?,
                        max_positions: row.get(6)?,
                        daily_loss_limit: row.get(7)?,
                        heat_limit_pct: row.get(8)?,
                        default_sl_pct: row.get(9)?,
                        default_tp_pct: row.get(10)?,
                        auto_refresh: row.get::<_, i64>(11)? != 0,
                        sound_enabled: row.get::<_, i64>(12)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Insert or update this user's settings. The row key is always the
    /// scope's own username regardless of what the payload carries.
    pub async fn upsert_settings(&self, settings: &UserSettings) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO user_settings (
                username, broker_mode, sandbox_token_enc, live_token_enc,
                broker_account_id, account_balance, max_positions,
                daily_loss_limit, heat_limit_pct, default_sl_pct,
                default_tp_pct, auto_refresh, sound_enabled, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,datetime('now'))
             ON CONFLICT(username) DO UPDATE SET
                broker_mode = excluded.broker_mode,
                sandbox_token_enc = excluded.sandbox_token_enc,
                live_token_enc = excluded.live_token_enc,
                broker_account_id = excluded.broker_account_id,
                account_balance = excluded.account_balance,
                max_positions = excluded.max_positions,
                daily_loss_limit = excluded.daily_loss_limit,
                heat_limit_pct = excluded.heat_limit_pct,
                default_sl_pct = excluded.default_sl_pct,
                default_tp_pct = excluded.default_tp_pct,
                auto_refresh = excluded.auto_refresh,
                sound_enabled = excluded.sound_enabled,
                updated_at = datetime('now')",
            params![
                self.username,
                settings.broker_mode.to_string(),
                settings.sandbox_token_enc,
                settings.live_token_enc,
                settings.broker_account_id,
                settings.account_balance,
                settings.max_positions,
                settings.daily_loss_limit,
                settings.heat_limit_pct,
                settings.default_sl_pct,
                settings.default_tp_pct,
                settings.auto_refresh as i64,
                settings.sound_enabled as i64,
            ],
        )?;
        Ok(())
    }

    // -- price snapshots --------------------------------------------------

    /// Append a price snapshot for one of this user's trades.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_snapshot(
        &self,
        trade_id: i64,
        kind: SnapshotKind,
        mark: Option<f64>,
        bid: Option<f64>,
        ask: Option<f64>,
        delta: Option<f64>,
        iv: Option<f64>,
        underlying: Option<f64>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        // Ownership gate: the trade must belong to this scope's user.
        let owned: Option<i64> = conn
            .query_row(
                "SELECT id FROM paper_trades WHERE id = ?1 AND username = ?2",
                params![trade_id, self.username],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Err(StoreError::NotFound(format!(
                "trade {trade_id} for user {}",
                self.username
            )));
        }

        conn.execute(
            "INSERT INTO price_snapshots
                (trade_id, username, mark_price, bid, ask, delta, iv, underlying, snapshot_type)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                trade_id,
                self.username,
                mark,
                bid,
                ask,
                delta,
                iv,
                underlying,
                kind.as_str()
            ],
        )?;
        Ok(())
    }

    /// Snapshots for one trade, oldest first.
    pub async fn snapshots_for_trade(
        &self,
        trade_id: i64,
    ) -> Result<Vec<PriceSnapshotRow>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, trade_id, username, timestamp, mark_price, bid, ask,
                    delta, iv, underlying, snapshot_type
             FROM price_snapshots
             WHERE trade_id = ?1 AND username = ?2
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![trade_id, self.username], |row| {
            Ok(PriceSnapshotRow {
                id: row.get(0)?,
                trade_id: row.get(1)?,
                username: row.get(2)?,
                timestamp: row.get(3)?,
                mark_price: row.get(4)?,
                bid: row.get(5)?,
                ask: row.get(6)?,
                delta: row.get(7)?,
                iv: row.get(8)?,
                underlying: row.get(9)?,
                snapshot_type: row.get(10)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -- scan history -----------------------------------------------------

    /// Persist a scan summary for later inspection.
    pub async fn insert_scan_result(
        &self,
        ticker: &str,
        strategy: &str,
        technical_score: f64,
        sentiment_score: f64,
        opportunity_count: usize,
        best_score: Option<f64>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO scan_history
                (username, ticker, strategy, technical_score, sentiment_score,
                 opportunity_count, best_score)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                self.username,
                ticker,
                strategy,
                technical_score,
                sentiment_score,
                opportunity_count as i64,
                best_score
            ],
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for UserScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserScope")
            .field("username", &self.username)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn settings_roundtrip_and_isolation() {
        let db = Db::open_in_memory().unwrap();
        let alice = db.with_user("alice");
        let bob = db.with_user("bob");

        let mut settings = UserSettings::defaults("alice");
        settings.account_balance = 25_000.0;
        settings.broker_mode = BrokerMode::TradierLive;
        alice.upsert_settings(&settings).await.unwrap();

        let loaded = alice.get_settings().await.unwrap().unwrap();
        assert_eq!(loaded.username, "alice");
        assert!((loaded.account_balance - 25_000.0).abs() < 1e-9);
        assert_eq!(loaded.broker_mode, BrokerMode::TradierLive);

        // Bob sees nothing.
        assert!(bob.get_settings().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_overwrites_in_place() {
        let db = Db::open_in_memory().unwrap();
        let scope = db.with_user("alice");
        scope
            .upsert_settings(&UserSettings::defaults("alice"))
            .await
            .unwrap();

        let mut updated = UserSettings::defaults("alice");
        updated.max_positions = 9;
        scope.upsert_settings(&updated).await.unwrap();

        let loaded = scope.get_settings().await.unwrap().unwrap();
        assert_eq!(loaded.max_positions, 9);
    }

    #[tokio::test]
    async fn snapshot_rejects_foreign_trade() {
        let db = Db::open_in_memory().unwrap();
        let alice = db.with_user("alice");
        let bob = db.with_user("bob");

        let trade = alice
            .insert_trade(&crate::store::trades::NewTrade::sample("AAPL"), "test")
            .await
            .unwrap();

        // Bob cannot write snapshots against Alice's trade.
        let result = bob
            .insert_snapshot(trade.id, SnapshotKind::Periodic, Some(5.0), None, None, None, None, None)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        // Alice can.
        alice
            .insert_snapshot(trade.id, SnapshotKind::PreSession, Some(5.0), Some(4.9), Some(5.1), None, None, Some(150.0))
            .await
            .unwrap();
        let snaps = alice.snapshots_for_trade(trade.id).await.unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].snapshot_type, "PRE_SESSION");
        assert_eq!(snaps[0].username, "alice");

        // And Bob reads none of them.
        assert!(bob.snapshots_for_trade(trade.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_usernames_enumeration() {
        let db = Db::open_in_memory().unwrap();
        db.with_user("alice")
            .insert_trade(&crate::store::trades::NewTrade::sample("AAPL"), "test")
            .await
            .unwrap();
        db.with_user("bob")
            .insert_trade(&crate::store::trades::NewTrade::sample("MSFT"), "test")
            .await
            .unwrap();

        let mut users = db.usernames_with_active_trades().await.unwrap();
        users.sort();
        assert_eq!(users, vec!["alice", "bob"]);
    }
}
