//! SQLite persistence layer for the trading engine.
//!
//! All durable state lives here: accounts, positions, orders, fills, copy
//! subscriptions, referral entries, and withdrawals. Multi-row ledger moves
//! (open, close, withdrawal) run inside a single transaction so a crash
//! never leaves a position without its balance move or fill row.
//!
//! Terminal transitions are guarded with conditional UPDATEs
//! (`... WHERE status = 'open'`); when two closers race, exactly one sees an
//! affected row and the other observes the position already terminal.

use crate::types::{
    Account, CloseReason, CopySubscription, Fill, FillAction, Order, OrderKind, OrderStatus,
    Position, PositionSide, PositionStatus, ReferralEntry, Withdrawal,
};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, error, info};

/// SQLite store behind the engine services.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory store (tests, default config).
    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite store initialized");
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                api_key_hash TEXT UNIQUE NOT NULL,
                balance REAL NOT NULL,
                margin_reserved REAL NOT NULL DEFAULT 0,
                cumulative_volume REAL NOT NULL DEFAULT 0,
                cumulative_fees REAL NOT NULL DEFAULT 0,
                realized_pnl REAL NOT NULL DEFAULT 0,
                referral_code TEXT UNIQUE NOT NULL,
                referrer_id TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_referral_code
                ON accounts(referral_code);

            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL,
                size_usd REAL NOT NULL,
                leverage REAL NOT NULL,
                entry_price REAL NOT NULL,
                margin REAL NOT NULL,
                liquidation_price REAL NOT NULL,
                status TEXT NOT NULL,
                stop_price REAL,
                take_profit_price REAL,
                leader_id TEXT,
                source_position_id TEXT,
                opened_at INTEGER NOT NULL,
                closed_at INTEGER,
                close_reason TEXT,
                exit_price REAL,
                realized_pnl REAL
            );
            CREATE INDEX IF NOT EXISTS idx_positions_account_status
                ON positions(account_id, status);
            CREATE INDEX IF NOT EXISTS idx_positions_ticker_status
                ON positions(ticker, status);
            CREATE INDEX IF NOT EXISTS idx_positions_source
                ON positions(source_position_id);

            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                position_id TEXT,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                requested_price REAL,
                size_usd REAL NOT NULL,
                fill_price REAL,
                fee REAL NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_orders_account
                ON orders(account_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_orders_position_status
                ON orders(position_id, status);

            CREATE TABLE IF NOT EXISTS fills (
                id TEXT PRIMARY KEY,
                order_id TEXT,
                position_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL,
                action TEXT NOT NULL,
                notional REAL NOT NULL,
                price REAL NOT NULL,
                fee REAL NOT NULL,
                markup_fee REAL NOT NULL,
                realized_pnl REAL,
                close_reason TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_fills_account
                ON fills(account_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS copy_subscriptions (
                follower_id TEXT NOT NULL,
                leader_id TEXT NOT NULL,
                allocation_usd REAL NOT NULL,
                max_position_size REAL,
                stop_loss_pct REAL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (follower_id, leader_id)
            );
            CREATE INDEX IF NOT EXISTS idx_subscriptions_leader
                ON copy_subscriptions(leader_id, active);

            CREATE TABLE IF NOT EXISTS referral_entries (
                id TEXT PRIMARY KEY,
                referrer_id TEXT NOT NULL,
                referred_id TEXT NOT NULL,
                fill_id TEXT NOT NULL,
                markup_amount REAL NOT NULL,
                commission REAL NOT NULL,
                created_at INTEGER NOT NULL,
                withdrawal_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_referral_referrer
                ON referral_entries(referrer_id, withdrawal_id);

            CREATE TABLE IF NOT EXISTS withdrawals (
                id TEXT PRIMARY KEY,
                referrer_id TEXT NOT NULL,
                amount REAL NOT NULL,
                address TEXT NOT NULL,
                entries INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );",
        )?;

        info!("SQLite schema initialized");
        Ok(())
    }

    // ========== Accounts ==========

    pub fn create_account(&self, account: &Account) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO accounts
             (id, api_key_hash, balance, margin_reserved, cumulative_volume,
              cumulative_fees, realized_pnl, referral_code, referrer_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                account.id,
                account.api_key_hash,
                account.balance,
                account.margin_reserved,
                account.cumulative_volume,
                account.cumulative_fees,
                account.realized_pnl,
                account.referral_code,
                account.referrer_id,
                account.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_account(&self, id: &str) -> Option<Account> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT id, api_key_hash, balance, margin_reserved, cumulative_volume,
                    cumulative_fees, realized_pnl, referral_code, referrer_id, created_at
             FROM accounts WHERE id = ?1",
            params![id],
            row_to_account,
        );
        optional(result, "account")
    }

    pub fn get_account_by_key_hash(&self, key_hash: &str) -> Option<Account> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT id, api_key_hash, balance, margin_reserved, cumulative_volume,
                    cumulative_fees, realized_pnl, referral_code, referrer_id, created_at
             FROM accounts WHERE api_key_hash = ?1",
            params![key_hash],
            row_to_account,
        );
        optional(result, "account by key")
    }

    pub fn get_account_by_referral_code(&self, code: &str) -> Option<Account> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT id, api_key_hash, balance, margin_reserved, cumulative_volume,
                    cumulative_fees, realized_pnl, referral_code, referrer_id, created_at
             FROM accounts WHERE referral_code = ?1",
            params![code],
            row_to_account,
        );
        optional(result, "account by referral code")
    }

    /// Accounts referred by the given account.
    pub fn count_referred(&self, referrer_id: &str) -> u32 {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE referrer_id = ?1",
            params![referrer_id],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    /// Top leader accounts by realized P&L with active follower counts.
    pub fn top_leaders(&self, limit: usize) -> Vec<(Account, u32)> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT a.id, a.api_key_hash, a.balance, a.margin_reserved, a.cumulative_volume,
                    a.cumulative_fees, a.realized_pnl, a.referral_code, a.referrer_id,
                    a.created_at,
                    (SELECT COUNT(*) FROM copy_subscriptions s
                     WHERE s.leader_id = a.id AND s.active = 1) AS followers
             FROM accounts a
             WHERE a.cumulative_volume > 0
             ORDER BY a.realized_pnl DESC
             LIMIT ?1",
        ) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Error preparing leaderboard query: {}", e);
                return Vec::new();
            }
        };

        stmt.query_map(params![limit as i64], |row| {
            let account = row_to_account(row)?;
            let followers: u32 = row.get(10)?;
            Ok((account, followers))
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    // ========== Positions ==========

    pub fn get_position(&self, id: &str) -> Option<Position> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!("{} WHERE id = ?1", SELECT_POSITION),
            params![id],
            row_to_position,
        );
        optional(result, "position")
    }

    /// Open positions for an account.
    pub fn open_positions(&self, account_id: &str) -> Vec<Position> {
        self.query_positions(
            &format!(
                "{} WHERE account_id = ?1 AND status = 'open' ORDER BY opened_at DESC",
                SELECT_POSITION
            ),
            params![account_id],
        )
    }

    /// Open and recent terminal positions for an account.
    pub fn all_positions(&self, account_id: &str, terminal_limit: usize) -> Vec<Position> {
        let mut positions = self.open_positions(account_id);
        let terminal = self.query_positions(
            &format!(
                "{} WHERE account_id = ?1 AND status != 'open'
                 ORDER BY closed_at DESC LIMIT ?2",
                SELECT_POSITION
            ),
            params![account_id, terminal_limit as i64],
        );
        positions.extend(terminal);
        positions
    }

    /// All open positions on a market, across accounts.
    pub fn open_positions_for_market(&self, ticker: &str) -> Vec<Position> {
        self.query_positions(
            &format!(
                "{} WHERE ticker = ?1 AND status = 'open'",
                SELECT_POSITION
            ),
            params![ticker],
        )
    }

    /// Open mirrors a follower holds for a leader.
    pub fn open_mirrors(&self, follower_id: &str, leader_id: &str) -> Vec<Position> {
        self.query_positions(
            &format!(
                "{} WHERE account_id = ?1 AND leader_id = ?2 AND status = 'open'",
                SELECT_POSITION
            ),
            params![follower_id, leader_id],
        )
    }

    /// Open mirrors of a specific leader position.
    pub fn mirrors_of(&self, source_position_id: &str) -> Vec<Position> {
        self.query_positions(
            &format!(
                "{} WHERE source_position_id = ?1 AND status = 'open'",
                SELECT_POSITION
            ),
            params![source_position_id],
        )
    }

    fn query_positions(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Vec<Position> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(sql) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Error preparing position query: {}", e);
                return Vec::new();
            }
        };
        stmt.query_map(args, row_to_position)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// Update trigger prices on an open position. Returns false if the
    /// position is no longer open.
    pub fn update_triggers(
        &self,
        position_id: &str,
        stop_price: Option<f64>,
        take_profit_price: Option<f64>,
    ) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE positions SET stop_price = ?1, take_profit_price = ?2
             WHERE id = ?3 AND status = 'open'",
            params![stop_price, take_profit_price, position_id],
        )?;
        Ok(affected == 1)
    }

    // ========== Ledger moves ==========

    /// Atomically open a position: debit margin and fee, insert the
    /// position, its filled order, the fill, and any referral commission.
    pub fn settle_open(
        &self,
        position: &Position,
        order: &Order,
        fill: &Fill,
        referral: Option<&ReferralEntry>,
    ) -> Result<(), rusqlite::Error> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE accounts SET
                balance = balance - ?1 - ?2,
                margin_reserved = margin_reserved + ?1,
                cumulative_volume = cumulative_volume + ?3,
                cumulative_fees = cumulative_fees + ?2
             WHERE id = ?4",
            params![position.margin, fill.fee, fill.notional, position.account_id],
        )?;

        insert_position(&tx, position)?;
        insert_order(&tx, order)?;
        insert_fill(&tx, fill)?;
        if let Some(entry) = referral {
            insert_referral_entry(&tx, entry)?;
        }

        tx.commit()
    }

    /// Atomically close a position. The conditional status UPDATE is the
    /// one-winner guard: returns Ok(false) without side effects when the
    /// position is no longer open.
    #[allow(clippy::too_many_arguments)]
    pub fn settle_close(
        &self,
        position: &Position,
        status: PositionStatus,
        reason: CloseReason,
        exit_price: f64,
        pnl: f64,
        close_order: Option<&Order>,
        filled_trigger_order: Option<&str>,
        fill: &Fill,
        referral: Option<&ReferralEntry>,
    ) -> Result<bool, rusqlite::Error> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let affected = tx.execute(
            "UPDATE positions SET
                status = ?1, closed_at = ?2, close_reason = ?3,
                exit_price = ?4, realized_pnl = ?5
             WHERE id = ?6 AND status = 'open'",
            params![
                status.to_string(),
                now,
                reason.to_string(),
                exit_price,
                pnl,
                position.id,
            ],
        )?;

        if affected == 0 {
            // Lost the race: another close already landed.
            return Ok(false);
        }

        tx.execute(
            "UPDATE accounts SET
                balance = balance + ?1 + ?2 - ?3,
                margin_reserved = margin_reserved - ?1,
                realized_pnl = realized_pnl + ?2,
                cumulative_volume = cumulative_volume + ?4,
                cumulative_fees = cumulative_fees + ?3
             WHERE id = ?5",
            params![
                position.margin,
                pnl,
                fill.fee,
                fill.notional,
                position.account_id,
            ],
        )?;

        // The firing trigger order fills; every other pending trigger on the
        // position is cancelled.
        if let Some(order_id) = filled_trigger_order {
            tx.execute(
                "UPDATE orders SET status = 'filled', fill_price = ?1, fee = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = 'pending'",
                params![exit_price, fill.fee, now, order_id],
            )?;
        }
        tx.execute(
            "UPDATE orders SET status = 'cancelled', updated_at = ?1
             WHERE position_id = ?2 AND status = 'pending'",
            params![now, position.id],
        )?;

        if let Some(order) = close_order {
            insert_order(&tx, order)?;
        }
        insert_fill(&tx, fill)?;
        if let Some(entry) = referral {
            insert_referral_entry(&tx, entry)?;
        }

        tx.commit()?;
        Ok(true)
    }

    // ========== Orders ==========

    pub fn create_order(&self, order: &Order) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        insert_order(&conn, order)
    }

    /// Cancel a pending trigger order of the given kind on a position.
    /// Used when a trigger price is overwritten.
    pub fn cancel_pending_trigger(
        &self,
        position_id: &str,
        kind: OrderKind,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        conn.execute(
            "UPDATE orders SET status = 'cancelled', updated_at = ?1
             WHERE position_id = ?2 AND kind = ?3 AND status = 'pending'",
            params![now, position_id, kind.to_string()],
        )?;
        Ok(())
    }

    /// Pending trigger order of a given kind on a position.
    pub fn pending_trigger(&self, position_id: &str, kind: OrderKind) -> Option<Order> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!(
                "{} WHERE position_id = ?1 AND kind = ?2 AND status = 'pending'",
                SELECT_ORDER
            ),
            params![position_id, kind.to_string()],
            row_to_order,
        );
        optional(result, "pending trigger")
    }

    pub fn get_orders(
        &self,
        account_id: &str,
        status: Option<OrderStatus>,
        limit: usize,
    ) -> Vec<Order> {
        let conn = self.conn.lock().unwrap();
        let (sql, status_param) = match status {
            Some(s) => (
                format!(
                    "{} WHERE account_id = ?1 AND status = ?2
                     ORDER BY created_at DESC LIMIT ?3",
                    SELECT_ORDER
                ),
                Some(s.to_string()),
            ),
            None => (
                format!(
                    "{} WHERE account_id = ?1 ORDER BY created_at DESC LIMIT ?2",
                    SELECT_ORDER
                ),
                None,
            ),
        };

        let mut stmt = match conn.prepare(&sql) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Error preparing order query: {}", e);
                return Vec::new();
            }
        };

        let result = match status_param {
            Some(s) => stmt
                .query_map(params![account_id, s, limit as i64], row_to_order)
                .map(|rows| rows.filter_map(|r| r.ok()).collect()),
            None => stmt
                .query_map(params![account_id, limit as i64], row_to_order)
                .map(|rows| rows.filter_map(|r| r.ok()).collect()),
        };
        result.unwrap_or_default()
    }

    // ========== Fills ==========

    pub fn get_fills(&self, account_id: &str, limit: usize) -> Vec<Fill> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(&format!(
            "{} WHERE account_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            SELECT_FILL
        )) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Error preparing fill query: {}", e);
                return Vec::new();
            }
        };
        stmt.query_map(params![account_id, limit as i64], row_to_fill)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    // ========== Copy subscriptions ==========

    /// Insert or update the (follower, leader) edge. Re-subscribing updates
    /// the existing row rather than duplicating it.
    pub fn upsert_subscription(&self, sub: &CopySubscription) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO copy_subscriptions
             (follower_id, leader_id, allocation_usd, max_position_size,
              stop_loss_pct, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(follower_id, leader_id) DO UPDATE SET
                allocation_usd = excluded.allocation_usd,
                max_position_size = excluded.max_position_size,
                stop_loss_pct = excluded.stop_loss_pct,
                active = excluded.active,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            params![
                sub.follower_id,
                sub.leader_id,
                sub.allocation_usd,
                sub.max_position_size,
                sub.stop_loss_pct,
                sub.active as i64,
                sub.created_at,
                sub.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_subscription(
        &self,
        follower_id: &str,
        leader_id: &str,
    ) -> Option<CopySubscription> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!(
                "{} WHERE follower_id = ?1 AND leader_id = ?2",
                SELECT_SUBSCRIPTION
            ),
            params![follower_id, leader_id],
            row_to_subscription,
        );
        optional(result, "subscription")
    }

    /// Active subscriptions following a leader.
    pub fn active_subscriptions_for_leader(&self, leader_id: &str) -> Vec<CopySubscription> {
        self.query_subscriptions(
            &format!(
                "{} WHERE leader_id = ?1 AND active = 1",
                SELECT_SUBSCRIPTION
            ),
            params![leader_id],
        )
    }

    /// All subscriptions held by a follower.
    pub fn subscriptions_for_follower(&self, follower_id: &str) -> Vec<CopySubscription> {
        self.query_subscriptions(
            &format!(
                "{} WHERE follower_id = ?1 ORDER BY created_at DESC",
                SELECT_SUBSCRIPTION
            ),
            params![follower_id],
        )
    }

    fn query_subscriptions(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Vec<CopySubscription> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(sql) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Error preparing subscription query: {}", e);
                return Vec::new();
            }
        };
        stmt.query_map(args, row_to_subscription)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// Deactivate a subscription. Returns false if it was not active.
    pub fn deactivate_subscription(
        &self,
        follower_id: &str,
        leader_id: &str,
    ) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        let affected = conn.execute(
            "UPDATE copy_subscriptions SET active = 0, updated_at = ?1
             WHERE follower_id = ?2 AND leader_id = ?3 AND active = 1",
            params![now, follower_id, leader_id],
        )?;
        Ok(affected == 1)
    }

    // ========== Referral ledger ==========

    /// Unwithdrawn entries for a referrer, oldest first.
    pub fn unwithdrawn_entries(&self, referrer_id: &str) -> Vec<ReferralEntry> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(&format!(
            "{} WHERE referrer_id = ?1 AND withdrawal_id IS NULL ORDER BY created_at ASC",
            SELECT_REFERRAL_ENTRY
        )) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Error preparing referral query: {}", e);
                return Vec::new();
            }
        };
        stmt.query_map(params![referrer_id], row_to_referral_entry)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// (lifetime, unwithdrawn, withdrawn) commission totals for a referrer.
    pub fn referral_totals(&self, referrer_id: &str) -> (f64, f64, f64) {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT
                COALESCE(SUM(commission), 0),
                COALESCE(SUM(CASE WHEN withdrawal_id IS NULL THEN commission ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN withdrawal_id IS NOT NULL THEN commission ELSE 0 END), 0)
             FROM referral_entries WHERE referrer_id = ?1",
            params![referrer_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap_or((0.0, 0.0, 0.0))
    }

    /// Atomically stamp the given entries with the withdrawal and record it.
    /// Returns false (no side effects) if any entry was already spent, so
    /// concurrent withdrawals can never consume an entry twice.
    pub fn apply_withdrawal(
        &self,
        withdrawal: &Withdrawal,
        entry_ids: &[String],
    ) -> Result<bool, rusqlite::Error> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut stamped = 0usize;
        for entry_id in entry_ids {
            stamped += tx.execute(
                "UPDATE referral_entries SET withdrawal_id = ?1
                 WHERE id = ?2 AND withdrawal_id IS NULL",
                params![withdrawal.id, entry_id],
            )?;
        }

        if stamped != entry_ids.len() {
            // An entry was spent by a concurrent withdrawal; roll back.
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO withdrawals (id, referrer_id, amount, address, entries, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                withdrawal.id,
                withdrawal.referrer_id,
                withdrawal.amount,
                withdrawal.address,
                withdrawal.entries,
                withdrawal.created_at,
            ],
        )?;

        tx.commit()?;
        Ok(true)
    }
}

// =============================================================================
// SQL fragments and row mapping
// =============================================================================

const SELECT_POSITION: &str = "SELECT id, account_id, ticker, side, size_usd, leverage,
    entry_price, margin, liquidation_price, status, stop_price, take_profit_price,
    leader_id, source_position_id, opened_at, closed_at, close_reason, exit_price,
    realized_pnl FROM positions";

const SELECT_ORDER: &str = "SELECT id, account_id, position_id, ticker, side, kind,
    status, requested_price, size_usd, fill_price, fee, created_at, updated_at
    FROM orders";

const SELECT_FILL: &str = "SELECT id, order_id, position_id, account_id, ticker, side,
    action, notional, price, fee, markup_fee, realized_pnl, close_reason, created_at
    FROM fills";

const SELECT_SUBSCRIPTION: &str = "SELECT follower_id, leader_id, allocation_usd,
    max_position_size, stop_loss_pct, active, created_at, updated_at
    FROM copy_subscriptions";

const SELECT_REFERRAL_ENTRY: &str = "SELECT id, referrer_id, referred_id, fill_id,
    markup_amount, commission, created_at, withdrawal_id FROM referral_entries";

fn optional<T>(result: Result<T, rusqlite::Error>, what: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(rusqlite::Error::QueryReturnedNoRows) => None,
        Err(e) => {
            error!("Error fetching {}: {}", what, e);
            None
        }
    }
}

fn row_to_account(row: &Row) -> Result<Account, rusqlite::Error> {
    Ok(Account {
        id: row.get(0)?,
        api_key_hash: row.get(1)?,
        balance: row.get(2)?,
        margin_reserved: row.get(3)?,
        cumulative_volume: row.get(4)?,
        cumulative_fees: row.get(5)?,
        realized_pnl: row.get(6)?,
        referral_code: row.get(7)?,
        referrer_id: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn row_to_position(row: &Row) -> Result<Position, rusqlite::Error> {
    Ok(Position {
        id: row.get(0)?,
        account_id: row.get(1)?,
        ticker: row.get(2)?,
        side: parse_side(&row.get::<_, String>(3)?),
        size_usd: row.get(4)?,
        leverage: row.get(5)?,
        entry_price: row.get(6)?,
        margin: row.get(7)?,
        liquidation_price: row.get(8)?,
        status: parse_position_status(&row.get::<_, String>(9)?),
        stop_price: row.get(10)?,
        take_profit_price: row.get(11)?,
        leader_id: row.get(12)?,
        source_position_id: row.get(13)?,
        opened_at: row.get(14)?,
        closed_at: row.get(15)?,
        close_reason: row
            .get::<_, Option<String>>(16)?
            .and_then(|s| CloseReason::parse(&s)),
        exit_price: row.get(17)?,
        realized_pnl: row.get(18)?,
    })
}

fn row_to_order(row: &Row) -> Result<Order, rusqlite::Error> {
    Ok(Order {
        id: row.get(0)?,
        account_id: row.get(1)?,
        position_id: row.get(2)?,
        ticker: row.get(3)?,
        side: parse_side(&row.get::<_, String>(4)?),
        kind: parse_order_kind(&row.get::<_, String>(5)?),
        status: parse_order_status(&row.get::<_, String>(6)?),
        requested_price: row.get(7)?,
        size_usd: row.get(8)?,
        fill_price: row.get(9)?,
        fee: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn row_to_fill(row: &Row) -> Result<Fill, rusqlite::Error> {
    Ok(Fill {
        id: row.get(0)?,
        order_id: row.get(1)?,
        position_id: row.get(2)?,
        account_id: row.get(3)?,
        ticker: row.get(4)?,
        side: parse_side(&row.get::<_, String>(5)?),
        action: parse_fill_action(&row.get::<_, String>(6)?),
        notional: row.get(7)?,
        price: row.get(8)?,
        fee: row.get(9)?,
        markup_fee: row.get(10)?,
        realized_pnl: row.get(11)?,
        close_reason: row
            .get::<_, Option<String>>(12)?
            .and_then(|s| CloseReason::parse(&s)),
        created_at: row.get(13)?,
    })
}

fn row_to_subscription(row: &Row) -> Result<CopySubscription, rusqlite::Error> {
    Ok(CopySubscription {
        follower_id: row.get(0)?,
        leader_id: row.get(1)?,
        allocation_usd: row.get(2)?,
        max_position_size: row.get(3)?,
        stop_loss_pct: row.get(4)?,
        active: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn row_to_referral_entry(row: &Row) -> Result<ReferralEntry, rusqlite::Error> {
    Ok(ReferralEntry {
        id: row.get(0)?,
        referrer_id: row.get(1)?,
        referred_id: row.get(2)?,
        fill_id: row.get(3)?,
        markup_amount: row.get(4)?,
        commission: row.get(5)?,
        created_at: row.get(6)?,
        withdrawal_id: row.get(7)?,
    })
}

fn insert_position(
    conn: &Connection,
    position: &Position,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO positions
         (id, account_id, ticker, side, size_usd, leverage, entry_price, margin,
          liquidation_price, status, stop_price, take_profit_price, leader_id,
          source_position_id, opened_at, closed_at, close_reason, exit_price,
          realized_pnl)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                 ?15, ?16, ?17, ?18, ?19)",
        params![
            position.id,
            position.account_id,
            position.ticker,
            position.side.to_string(),
            position.size_usd,
            position.leverage,
            position.entry_price,
            position.margin,
            position.liquidation_price,
            position.status.to_string(),
            position.stop_price,
            position.take_profit_price,
            position.leader_id,
            position.source_position_id,
            position.opened_at,
            position.closed_at,
            position.close_reason.map(|r| r.to_string()),
            position.exit_price,
            position.realized_pnl,
        ],
    )?;
    Ok(())
}

fn insert_order(conn: &Connection, order: &Order) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO orders
         (id, account_id, position_id, ticker, side, kind, status, requested_price,
          size_usd, fill_price, fee, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            order.id,
            order.account_id,
            order.position_id,
            order.ticker,
            order.side.to_string(),
            order.kind.to_string(),
            order.status.to_string(),
            order.requested_price,
            order.size_usd,
            order.fill_price,
            order.fee,
            order.created_at,
            order.updated_at,
        ],
    )?;
    Ok(())
}

fn insert_fill(conn: &Connection, fill: &Fill) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO fills
         (id, order_id, position_id, account_id, ticker, side, action, notional,
          price, fee, markup_fee, realized_pnl, close_reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            fill.id,
            fill.order_id,
            fill.position_id,
            fill.account_id,
            fill.ticker,
            fill.side.to_string(),
            fill.action.to_string(),
            fill.notional,
            fill.price,
            fill.fee,
            fill.markup_fee,
            fill.realized_pnl,
            fill.close_reason.map(|r| r.to_string()),
            fill.created_at,
        ],
    )?;
    Ok(())
}

fn insert_referral_entry(
    conn: &Connection,
    entry: &ReferralEntry,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO referral_entries
         (id, referrer_id, referred_id, fill_id, markup_amount, commission,
          created_at, withdrawal_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.id,
            entry.referrer_id,
            entry.referred_id,
            entry.fill_id,
            entry.markup_amount,
            entry.commission,
            entry.created_at,
            entry.withdrawal_id,
        ],
    )?;
    Ok(())
}

fn parse_side(s: &str) -> PositionSide {
    PositionSide::parse(s).unwrap_or(PositionSide::Long)
}

fn parse_position_status(s: &str) -> PositionStatus {
    match s {
        "closed" => PositionStatus::Closed,
        "liquidated" => PositionStatus::Liquidated,
        _ => PositionStatus::Open,
    }
}

fn parse_order_kind(s: &str) -> OrderKind {
    match s {
        "stop_loss" => OrderKind::StopLoss,
        "take_profit" => OrderKind::TakeProfit,
        _ => OrderKind::Market,
    }
}

fn parse_order_status(s: &str) -> OrderStatus {
    match s {
        "filled" => OrderStatus::Filled,
        "cancelled" => OrderStatus::Cancelled,
        _ => OrderStatus::Pending,
    }
}

fn parse_fill_action(s: &str) -> FillAction {
    match s {
        "close" => FillAction::Close,
        _ => FillAction::Open,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::short_id;

    fn test_account(id: &str) -> Account {
        Account {
            id: id.to_string(),
            api_key_hash: format!("hash-{}", id),
            balance: 10_000.0,
            margin_reserved: 0.0,
            cumulative_volume: 0.0,
            cumulative_fees: 0.0,
            realized_pnl: 0.0,
            referral_code: format!("ref_{}", id),
            referrer_id: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[test]
    fn test_account_crud() {
        let store = SqliteStore::new_in_memory().unwrap();
        let account = test_account("acct_store1");
        store.create_account(&account).unwrap();

        let loaded = store.get_account("acct_store1").unwrap();
        assert_eq!(loaded.balance, 10_000.0);
        assert_eq!(loaded.referral_code, "ref_acct_store1");

        let by_code = store.get_account_by_referral_code("ref_acct_store1").unwrap();
        assert_eq!(by_code.id, account.id);
    }

    #[test]
    fn test_settle_close_is_exactly_once() {
        let store = SqliteStore::new_in_memory().unwrap();
        let account = test_account("acct_store2");
        store.create_account(&account).unwrap();

        let position = Position::open(
            account.id.clone(),
            "BTC".to_string(),
            PositionSide::Long,
            1000.0,
            5.0,
            100.0,
            0.005,
        );
        let mut order = Order::market(account.id.clone(), "BTC".to_string(), position.side, 1000.0);
        order.status = OrderStatus::Filled;
        order.fill_price = Some(100.0);
        let fill = Fill {
            id: short_id("fill"),
            order_id: Some(order.id.clone()),
            position_id: position.id.clone(),
            account_id: account.id.clone(),
            ticker: "BTC".to_string(),
            side: position.side,
            action: FillAction::Open,
            notional: 1000.0,
            price: 100.0,
            fee: 1.0,
            markup_fee: 0.5,
            realized_pnl: None,
            close_reason: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        store.settle_open(&position, &order, &fill, None).unwrap();

        let close_fill = Fill {
            id: short_id("fill"),
            order_id: None,
            position_id: position.id.clone(),
            account_id: account.id.clone(),
            ticker: "BTC".to_string(),
            side: position.side,
            action: FillAction::Close,
            notional: 1000.0,
            price: 110.0,
            fee: 1.0,
            markup_fee: 0.5,
            realized_pnl: Some(100.0),
            close_reason: Some(CloseReason::UserClose),
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        let first = store
            .settle_close(
                &position,
                PositionStatus::Closed,
                CloseReason::UserClose,
                110.0,
                100.0,
                None,
                None,
                &close_fill,
                None,
            )
            .unwrap();
        assert!(first);

        let second = store
            .settle_close(
                &position,
                PositionStatus::Closed,
                CloseReason::UserClose,
                110.0,
                100.0,
                None,
                None,
                &close_fill,
                None,
            )
            .unwrap();
        assert!(!second, "second close must lose the conditional update");
    }

    #[test]
    fn test_subscription_upsert_no_duplicates() {
        let store = SqliteStore::new_in_memory().unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        let mut sub = CopySubscription {
            follower_id: "acct_f".to_string(),
            leader_id: "acct_l".to_string(),
            allocation_usd: 500.0,
            max_position_size: None,
            stop_loss_pct: None,
            active: true,
            created_at: now,
            updated_at: now,
        };
        store.upsert_subscription(&sub).unwrap();

        sub.allocation_usd = 750.0;
        store.upsert_subscription(&sub).unwrap();

        let subs = store.active_subscriptions_for_leader("acct_l");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].allocation_usd, 750.0);
    }

    #[test]
    fn test_withdrawal_double_spend_guard() {
        let store = SqliteStore::new_in_memory().unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        let entry = ReferralEntry {
            id: short_id("refent"),
            referrer_id: "acct_r".to_string(),
            referred_id: "acct_x".to_string(),
            fill_id: short_id("fill"),
            markup_amount: 10.0,
            commission: 2.0,
            created_at: now,
            withdrawal_id: None,
        };
        {
            let conn = store.conn.lock().unwrap();
            insert_referral_entry(&conn, &entry).unwrap();
        }

        let withdrawal = Withdrawal {
            id: short_id("wd"),
            referrer_id: "acct_r".to_string(),
            amount: 2.0,
            address: "0xabc".to_string(),
            entries: 1,
            created_at: now,
        };
        assert!(store
            .apply_withdrawal(&withdrawal, &[entry.id.clone()])
            .unwrap());

        // Same entry cannot be consumed twice.
        let second = Withdrawal {
            id: short_id("wd"),
            ..withdrawal
        };
        assert!(!store.apply_withdrawal(&second, &[entry.id]).unwrap());
    }
}
