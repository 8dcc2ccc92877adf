//! Row I/O for the ledger tables.
//!
//! Every function takes a `&Connection`; callers pass the settlement's open
//! `rusqlite::Transaction` (which derefs to `Connection`) so all writes land
//! in one unit of work.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{Result, TributeError};
use crate::ledger::signing::{fixed8, PotentialPayload, TransactionPayload};

pub const TRANSACTION_TYPE_TRIBUTE: &str = "TRIBUTE";
pub const STATUS_COMPLETED: &str = "COMPLETED";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub id: String,
    pub psyche: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkspaceRecord {
    pub id: String,
    pub credits: Decimal,
    pub potential: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub instrument_id: String,
    pub kind: String,
    /// Net credit change: boon minus tribute.
    pub amount: Decimal,
    pub description: String,
    pub luck_weight: f64,
    pub outcome: String,
    pub tribute_amount: Decimal,
    pub boon_amount: Decimal,
    pub hollow_win_factor: Option<f64>,
    pub user_psyche: String,
    pub status: String,
    pub awarded_item: Option<String>,
    pub system_effect: Option<String>,
    pub signed_at: String,
    #[serde(skip)]
    pub signature: String,
}

impl TransactionRecord {
    pub fn payload(&self) -> TransactionPayload<'_> {
        TransactionPayload {
            workspace_id: &self.workspace_id,
            user_id: &self.user_id,
            instrument_id: &self.instrument_id,
            kind: &self.kind,
            amount: fixed8(self.amount),
            outcome: &self.outcome,
            tribute_amount: fixed8(self.tribute_amount),
            boon_amount: fixed8(self.boon_amount),
            timestamp: &self.signed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PotentialAccrualRecord {
    pub id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub instrument_id: String,
    pub luck_weight: f64,
    pub potential_awarded: Decimal,
    pub narrative_context: String,
    pub signed_at: String,
    #[serde(skip)]
    pub signature: String,
}

impl PotentialAccrualRecord {
    pub fn payload(&self) -> PotentialPayload<'_> {
        PotentialPayload {
            workspace_id: &self.workspace_id,
            user_id: &self.user_id,
            instrument_id: &self.instrument_id,
            potential_awarded: fixed8(self.potential_awarded),
            timestamp: &self.signed_at,
        }
    }
}

fn parse_decimal(column: &'static str, raw: &str) -> Result<Decimal> {
    raw.parse::<Decimal>().map_err(|_| TributeError::Corrupt {
        column,
        value: raw.to_string(),
    })
}

// =============================================================================
// Users and workspaces
// =============================================================================

pub fn upsert_user(conn: &Connection, user_id: &str, psyche: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, psyche) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET psyche = excluded.psyche",
        params![user_id, psyche],
    )?;
    Ok(())
}

pub fn upsert_workspace(conn: &Connection, workspace_id: &str, credits: Decimal) -> Result<()> {
    conn.execute(
        "INSERT INTO workspaces (id, credits) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET credits = excluded.credits",
        params![workspace_id, credits.to_string()],
    )?;
    Ok(())
}

pub fn load_user(conn: &Connection, user_id: &str) -> Result<UserRecord> {
    conn.query_row(
        "SELECT id, psyche FROM users WHERE id = ?1",
        params![user_id],
        |row| Ok(UserRecord { id: row.get(0)?, psyche: row.get(1)? }),
    )
    .optional()?
    .ok_or_else(|| TributeError::NotFound { entity: "user", id: user_id.to_string() })
}

pub fn load_workspace(conn: &Connection, workspace_id: &str) -> Result<WorkspaceRecord> {
    let raw: Option<(String, String)> = conn
        .query_row(
            "SELECT credits, potential FROM workspaces WHERE id = ?1",
            params![workspace_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (credits, potential) = raw.ok_or_else(|| TributeError::NotFound {
        entity: "workspace",
        id: workspace_id.to_string(),
    })?;
    Ok(WorkspaceRecord {
        id: workspace_id.to_string(),
        credits: parse_decimal("workspaces.credits", &credits)?,
        potential: parse_decimal("workspaces.potential", &potential)?,
    })
}

pub fn set_credits(conn: &Connection, workspace_id: &str, credits: Decimal) -> Result<()> {
    let changed = conn.execute(
        "UPDATE workspaces SET credits = ?2 WHERE id = ?1",
        params![workspace_id, credits.to_string()],
    )?;
    if changed == 0 {
        return Err(TributeError::NotFound { entity: "workspace", id: workspace_id.to_string() });
    }
    Ok(())
}

pub fn set_potential(conn: &Connection, workspace_id: &str, potential: Decimal) -> Result<()> {
    let changed = conn.execute(
        "UPDATE workspaces SET potential = ?2 WHERE id = ?1",
        params![workspace_id, potential.to_string()],
    )?;
    if changed == 0 {
        return Err(TributeError::NotFound { entity: "workspace", id: workspace_id.to_string() });
    }
    Ok(())
}

// =============================================================================
// Append-only ledger rows
// =============================================================================

pub fn insert_transaction(conn: &Connection, rec: &TransactionRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO transactions
            (id, workspace_id, user_id, instrument_id, type, amount, description, luck_weight,
             outcome, tribute_amount, boon_amount, hollow_win_factor, user_psyche, status,
             awarded_item, system_effect, signed_at, signature)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            rec.id,
            rec.workspace_id,
            rec.user_id,
            rec.instrument_id,
            rec.kind,
            rec.amount.to_string(),
            rec.description,
            rec.luck_weight,
            rec.outcome,
            rec.tribute_amount.to_string(),
            rec.boon_amount.to_string(),
            rec.hollow_win_factor,
            rec.user_psyche,
            rec.status,
            rec.awarded_item,
            rec.system_effect,
            rec.signed_at,
            rec.signature,
        ],
    )?;
    Ok(())
}

pub fn insert_potential(conn: &Connection, rec: &PotentialAccrualRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO potential_accrual_log
            (id, workspace_id, user_id, instrument_id, luck_weight, potential_awarded,
             narrative_context, signed_at, signature)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            rec.id,
            rec.workspace_id,
            rec.user_id,
            rec.instrument_id,
            rec.luck_weight,
            rec.potential_awarded.to_string(),
            rec.narrative_context,
            rec.signed_at,
            rec.signature,
        ],
    )?;
    Ok(())
}

const TRANSACTION_COLUMNS: &str = "id, workspace_id, user_id, instrument_id, type, amount, description,
    luck_weight, outcome, tribute_amount, boon_amount, hollow_win_factor, user_psyche, status,
    awarded_item, system_effect, signed_at, signature";

struct RawTransaction {
    rec: TransactionRecord,
    amount: String,
    tribute_amount: String,
    boon_amount: String,
}

fn raw_transaction(row: &Row<'_>) -> rusqlite::Result<RawTransaction> {
    Ok(RawTransaction {
        rec: TransactionRecord {
            id: row.get(0)?,
            workspace_id: row.get(1)?,
            user_id: row.get(2)?,
            instrument_id: row.get(3)?,
            kind: row.get(4)?,
            amount: Decimal::ZERO,
            description: row.get(6)?,
            luck_weight: row.get(7)?,
            outcome: row.get(8)?,
            tribute_amount: Decimal::ZERO,
            boon_amount: Decimal::ZERO,
            hollow_win_factor: row.get(11)?,
            user_psyche: row.get(12)?,
            status: row.get(13)?,
            awarded_item: row.get(14)?,
            system_effect: row.get(15)?,
            signed_at: row.get(16)?,
            signature: row.get(17)?,
        },
        amount: row.get(5)?,
        tribute_amount: row.get(9)?,
        boon_amount: row.get(10)?,
    })
}

impl RawTransaction {
    fn finish(mut self) -> Result<TransactionRecord> {
        self.rec.amount = parse_decimal("transactions.amount", &self.amount)?;
        self.rec.tribute_amount = parse_decimal("transactions.tribute_amount", &self.tribute_amount)?;
        self.rec.boon_amount = parse_decimal("transactions.boon_amount", &self.boon_amount)?;
        Ok(self.rec)
    }
}

pub fn load_transaction(conn: &Connection, tx_id: &str) -> Result<TransactionRecord> {
    let sql = format!("SELECT {} FROM transactions WHERE id = ?1", TRANSACTION_COLUMNS);
    conn.query_row(&sql, params![tx_id], raw_transaction)
        .optional()?
        .ok_or_else(|| TributeError::NotFound { entity: "transaction", id: tx_id.to_string() })?
        .finish()
}

/// Newest first.
pub fn recent_transactions(conn: &Connection, workspace_id: &str, limit: usize) -> Result<Vec<TransactionRecord>> {
    let sql = format!(
        "SELECT {} FROM transactions WHERE workspace_id = ?1 ORDER BY signed_at DESC, rowid DESC LIMIT ?2",
        TRANSACTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![workspace_id, limit as i64], raw_transaction)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.finish()?);
    }
    Ok(out)
}

pub fn all_transactions(conn: &Connection) -> Result<Vec<TransactionRecord>> {
    let sql = format!("SELECT {} FROM transactions ORDER BY rowid", TRANSACTION_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], raw_transaction)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.finish()?);
    }
    Ok(out)
}

pub fn all_potential(conn: &Connection) -> Result<Vec<PotentialAccrualRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, workspace_id, user_id, instrument_id, luck_weight, potential_awarded,
                narrative_context, signed_at, signature
         FROM potential_accrual_log ORDER BY rowid",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            PotentialAccrualRecord {
                id: row.get(0)?,
                workspace_id: row.get(1)?,
                user_id: row.get(2)?,
                instrument_id: row.get(3)?,
                luck_weight: row.get(4)?,
                potential_awarded: Decimal::ZERO,
                narrative_context: row.get(6)?,
                signed_at: row.get(7)?,
                signature: row.get(8)?,
            },
            row.get::<_, String>(5)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (mut rec, amount) = row?;
        rec.potential_awarded = parse_decimal("potential_accrual_log.potential_awarded", &amount)?;
        out.push(rec);
    }
    Ok(out)
}

// =============================================================================
// Discovery and inventory
// =============================================================================

/// Records the first view of an instrument. Later views are ignored.
pub fn record_discovery(conn: &Connection, user_id: &str, instrument_id: &str, viewed_at: DateTime<Utc>) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO instrument_discovery (user_id, instrument_id, first_viewed_at)
         VALUES (?1, ?2, ?3)",
        params![user_id, instrument_id, viewed_at.to_rfc3339()],
    )?;
    Ok(inserted > 0)
}

/// Marks an unconverted discovery as converted. Returns the minutes from
/// first view to tribute, at least 1, or `None` when nothing changed.
pub fn convert_discovery(conn: &Connection, user_id: &str, instrument_id: &str, now: DateTime<Utc>) -> Result<Option<i64>> {
    let first_viewed: Option<String> = conn
        .query_row(
            "SELECT first_viewed_at FROM instrument_discovery
             WHERE user_id = ?1 AND instrument_id = ?2 AND converted = 0",
            params![user_id, instrument_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(first_viewed) = first_viewed else {
        return Ok(None);
    };
    let first = DateTime::parse_from_rfc3339(&first_viewed)
        .map_err(|_| TributeError::Corrupt {
            column: "instrument_discovery.first_viewed_at",
            value: first_viewed.clone(),
        })?
        .with_timezone(&Utc);
    let dtt = (now - first).num_minutes().max(1);
    conn.execute(
        "UPDATE instrument_discovery SET converted = 1, converted_at = ?3, dtt_minutes = ?4
         WHERE user_id = ?1 AND instrument_id = ?2 AND converted = 0",
        params![user_id, instrument_id, now.to_rfc3339(), dtt],
    )?;
    Ok(Some(dtt))
}

pub fn discovery_dtt(conn: &Connection, user_id: &str, instrument_id: &str) -> Result<Option<i64>> {
    let dtt: Option<Option<i64>> = conn
        .query_row(
            "SELECT dtt_minutes FROM instrument_discovery WHERE user_id = ?1 AND instrument_id = ?2",
            params![user_id, instrument_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(dtt.flatten())
}

pub fn grant_item(conn: &Connection, user_id: &str, item_id: &str, acquired_at: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO user_items (user_id, item_id, acquired_at) VALUES (?1, ?2, ?3)",
        params![user_id, item_id, acquired_at],
    )?;
    Ok(())
}

pub fn user_items(conn: &Connection, user_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT item_id FROM user_items WHERE user_id = ?1 ORDER BY item_id")?;
    let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
