//! Ledger & audit writer.
//!
//! [`write_settlement`] performs every write of a settlement against the
//! caller's open transaction: balance mutation, the signed transaction row,
//! the optional signed potential row and workspace counter, discovery
//! conversion and any item grant. Nothing here commits.

pub mod schema;
pub mod signing;
pub mod store;

use chrono::Utc;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Result, TributeError};
use crate::logging::{log_verification, ts_now};

pub use signing::Signer;
pub use store::{PotentialAccrualRecord, TransactionRecord, UserRecord, WorkspaceRecord};

/// Everything the writer needs from the compute phase.
#[derive(Debug, Clone)]
pub struct SettlementWrite<'a> {
    pub workspace_id: &'a str,
    pub user_id: &'a str,
    pub instrument_id: &'a str,
    pub instrument_name: &'a str,
    pub user_psyche: &'a str,
    pub luck_weight: f64,
    pub outcome: &'a str,
    pub tribute_amount: Decimal,
    pub boon_amount: Decimal,
    pub hollow_win_factor: Option<f64>,
    pub awarded_item: Option<&'a str>,
    pub system_effect: Option<&'a str>,
    /// Potential to accrue; `None` when the settlement does not qualify.
    pub potential: Option<Decimal>,
    pub credits_before: Decimal,
    pub potential_before: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WrittenSettlement {
    pub transaction_id: String,
    pub net_amount: Decimal,
    pub credits_after: Decimal,
    pub potential_awarded: Decimal,
    pub discovery_dtt_minutes: Option<i64>,
    pub signed_at: String,
}

pub fn write_settlement(conn: &Connection, signer: &Signer, w: &SettlementWrite<'_>) -> Result<WrittenSettlement> {
    let net_amount = w
        .boon_amount
        .checked_sub(w.tribute_amount)
        .ok_or(TributeError::InvalidAmount(w.tribute_amount))?;
    let credits_after = w
        .credits_before
        .checked_add(net_amount)
        .ok_or(TributeError::InvalidAmount(net_amount))?;
    store::set_credits(conn, w.workspace_id, credits_after)?;

    let signed_at = ts_now();
    let mut tx = TransactionRecord {
        id: Uuid::new_v4().to_string(),
        workspace_id: w.workspace_id.to_string(),
        user_id: w.user_id.to_string(),
        instrument_id: w.instrument_id.to_string(),
        kind: store::TRANSACTION_TYPE_TRIBUTE.to_string(),
        amount: net_amount,
        description: format!("Tribute: {} - {}", w.instrument_name, w.outcome),
        luck_weight: w.luck_weight,
        outcome: w.outcome.to_string(),
        tribute_amount: w.tribute_amount,
        boon_amount: w.boon_amount,
        hollow_win_factor: w.hollow_win_factor,
        user_psyche: w.user_psyche.to_string(),
        status: store::STATUS_COMPLETED.to_string(),
        awarded_item: w.awarded_item.map(str::to_string),
        system_effect: w.system_effect.map(str::to_string),
        signed_at: signed_at.clone(),
        signature: String::new(),
    };
    tx.signature = signer.sign(&tx.payload())?;
    store::insert_transaction(conn, &tx)?;

    let mut potential_awarded = Decimal::ZERO;
    if let Some(amount) = w.potential.filter(|p| *p > Decimal::ZERO) {
        let mut rec = PotentialAccrualRecord {
            id: Uuid::new_v4().to_string(),
            workspace_id: w.workspace_id.to_string(),
            user_id: w.user_id.to_string(),
            instrument_id: w.instrument_id.to_string(),
            luck_weight: w.luck_weight,
            potential_awarded: amount,
            narrative_context: format!("Potential accrued from tribute to {}", w.instrument_name),
            signed_at: signed_at.clone(),
            signature: String::new(),
        };
        rec.signature = signer.sign(&rec.payload())?;
        store::insert_potential(conn, &rec)?;
        let potential_after = w.potential_before.checked_add(amount).ok_or(TributeError::InvalidAmount(amount))?;
        store::set_potential(conn, w.workspace_id, potential_after)?;
        potential_awarded = amount;
    }

    let discovery_dtt_minutes = store::convert_discovery(conn, w.user_id, w.instrument_id, Utc::now())?;

    if let Some(item) = w.awarded_item {
        store::grant_item(conn, w.user_id, item, &signed_at)?;
    }

    Ok(WrittenSettlement {
        transaction_id: tx.id,
        net_amount,
        credits_after,
        potential_awarded,
        discovery_dtt_minutes,
        signed_at,
    })
}

// =============================================================================
// Verification
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    pub transactions_checked: usize,
    pub potential_checked: usize,
    pub tampered_transactions: Vec<String>,
    pub tampered_potential: Vec<String>,
}

impl AuditReport {
    pub fn tampered(&self) -> usize {
        self.tampered_transactions.len() + self.tampered_potential.len()
    }

    pub fn is_clean(&self) -> bool {
        self.tampered() == 0
    }
}

pub fn verify_transaction(conn: &Connection, signer: &Signer, tx_id: &str) -> Result<bool> {
    let rec = store::load_transaction(conn, tx_id)?;
    signer.verify(&rec.payload(), &rec.signature)
}

/// Recomputes the signature of every ledger row.
pub fn verify_all(conn: &Connection, signer: &Signer) -> Result<AuditReport> {
    let mut report = AuditReport::default();
    for rec in store::all_transactions(conn)? {
        report.transactions_checked += 1;
        if !signer.verify(&rec.payload(), &rec.signature)? {
            report.tampered_transactions.push(rec.id);
        }
    }
    for rec in store::all_potential(conn)? {
        report.potential_checked += 1;
        if !signer.verify(&rec.payload(), &rec.signature)? {
            report.tampered_potential.push(rec.id);
        }
    }
    log_verification(report.transactions_checked + report.potential_checked, report.tampered());
    Ok(report)
}
