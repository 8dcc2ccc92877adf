use rusqlite::Connection;

use crate::error::Result;

/// Creates every table the settlement touches. Idempotent.
///
/// Money columns are TEXT decimal strings. `transactions` and
/// `potential_accrual_log` reject UPDATE and DELETE.
pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            psyche TEXT NOT NULL DEFAULT 'ZEN_ARCHITECT'
        );
        CREATE TABLE IF NOT EXISTS workspaces (
            id TEXT PRIMARY KEY,
            credits TEXT NOT NULL DEFAULT '0',
            potential TEXT NOT NULL DEFAULT '0'
        );
        CREATE TABLE IF NOT EXISTS pulse_profiles (
            user_id TEXT PRIMARY KEY,
            luck_weight REAL NOT NULL DEFAULT 1.0,
            flow_state REAL NOT NULL DEFAULT 0.0,
            wins INTEGER NOT NULL DEFAULT 0,
            losses INTEGER NOT NULL DEFAULT 0,
            consecutive_losses INTEGER NOT NULL DEFAULT 0,
            double_tribute_active INTEGER NOT NULL DEFAULT 0,
            loaded_die_count INTEGER NOT NULL DEFAULT 0,
            guaranteed_win_next INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            instrument_id TEXT NOT NULL,
            type TEXT NOT NULL,
            amount TEXT NOT NULL,
            description TEXT NOT NULL,
            luck_weight REAL NOT NULL,
            outcome TEXT NOT NULL,
            tribute_amount TEXT NOT NULL,
            boon_amount TEXT NOT NULL,
            hollow_win_factor REAL,
            user_psyche TEXT NOT NULL,
            status TEXT NOT NULL,
            awarded_item TEXT,
            system_effect TEXT,
            signed_at TEXT NOT NULL,
            signature TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_workspace ON transactions (workspace_id);
        CREATE TABLE IF NOT EXISTS potential_accrual_log (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            instrument_id TEXT NOT NULL,
            luck_weight REAL NOT NULL,
            potential_awarded TEXT NOT NULL,
            narrative_context TEXT NOT NULL,
            signed_at TEXT NOT NULL,
            signature TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS instrument_discovery (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            instrument_id TEXT NOT NULL,
            first_viewed_at TEXT NOT NULL,
            converted INTEGER NOT NULL DEFAULT 0,
            converted_at TEXT,
            dtt_minutes INTEGER,
            UNIQUE (user_id, instrument_id)
        );
        CREATE TABLE IF NOT EXISTS user_items (
            user_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            acquired_at TEXT NOT NULL,
            PRIMARY KEY (user_id, item_id)
        );
        CREATE TRIGGER IF NOT EXISTS transactions_no_update
            BEFORE UPDATE ON transactions
            BEGIN SELECT RAISE(ABORT, 'transactions are append-only'); END;
        CREATE TRIGGER IF NOT EXISTS transactions_no_delete
            BEFORE DELETE ON transactions
            BEGIN SELECT RAISE(ABORT, 'transactions are append-only'); END;
        CREATE TRIGGER IF NOT EXISTS potential_no_update
            BEFORE UPDATE ON potential_accrual_log
            BEGIN SELECT RAISE(ABORT, 'potential_accrual_log is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS potential_no_delete
            BEFORE DELETE ON potential_accrual_log
            BEGIN SELECT RAISE(ABORT, 'potential_accrual_log is append-only'); END;",
    )?;
    Ok(())
}
