//! Pulse profile state and the luck-provider contract.
//!
//! The pulse subsystem owns the rolling luck metric and pity safeguard; this
//! crate only consumes it through [`LuckProvider`]. Every call receives the
//! settlement's open transaction so reads and write-backs commit or roll back
//! together with the ledger rows. [`SqlitePulse`] is the reference provider
//! backed by the `pulse_profiles` table.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Result;
use crate::logging::{log, obj, ts_now, v_str, Domain, Level};

/// One-shot buffs carried on a pulse profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Buff {
    DoubleTribute,
    LoadedDie,
    GuaranteedWin,
}

impl Buff {
    pub fn as_str(&self) -> &'static str {
        match self {
            Buff::DoubleTribute => "double_tribute",
            Buff::LoadedDie => "loaded_die",
            Buff::GuaranteedWin => "guaranteed_win",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseProfile {
    pub user_id: String,
    /// Flow-state intensity in [0, 1].
    pub flow_state: f64,
    pub double_tribute_active: bool,
    pub loaded_die_count: u32,
    pub guaranteed_win_next: bool,
}

impl PulseProfile {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            flow_state: 0.0,
            double_tribute_active: false,
            loaded_die_count: 0,
            guaranteed_win_next: false,
        }
    }

    pub fn has(&self, buff: Buff) -> bool {
        match buff {
            Buff::DoubleTribute => self.double_tribute_active,
            Buff::LoadedDie => self.loaded_die_count > 0,
            Buff::GuaranteedWin => self.guaranteed_win_next,
        }
    }

    /// Uses up one charge of `buff`. Returns false when it was not active.
    pub fn consume(&mut self, buff: Buff) -> bool {
        if !self.has(buff) {
            return false;
        }
        match buff {
            Buff::DoubleTribute => self.double_tribute_active = false,
            Buff::LoadedDie => self.loaded_die_count -= 1,
            Buff::GuaranteedWin => self.guaranteed_win_next = false,
        }
        true
    }
}

pub trait LuckProvider: Send + Sync {
    /// Returns the profile, creating it with defaults on first interaction.
    fn load_profile(&self, conn: &Connection, user_id: &str) -> Result<PulseProfile>;
    fn current_luck_weight(&self, conn: &Connection, user_id: &str) -> Result<f64>;
    fn is_pity_eligible(&self, conn: &Connection, user_id: &str) -> Result<bool>;
    fn record_win(&self, conn: &Connection, user_id: &str) -> Result<()>;
    fn record_loss(&self, conn: &Connection, user_id: &str) -> Result<()>;
}

/// Persists flow state and buff charges. Caller supplies the transaction.
pub fn save_profile(conn: &Connection, profile: &PulseProfile) -> Result<()> {
    conn.execute(
        "INSERT INTO pulse_profiles
            (user_id, flow_state, double_tribute_active, loaded_die_count, guaranteed_win_next, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id) DO UPDATE SET
            flow_state = excluded.flow_state,
            double_tribute_active = excluded.double_tribute_active,
            loaded_die_count = excluded.loaded_die_count,
            guaranteed_win_next = excluded.guaranteed_win_next,
            updated_at = excluded.updated_at",
        params![
            profile.user_id,
            profile.flow_state,
            profile.double_tribute_active,
            profile.loaded_die_count as i64,
            profile.guaranteed_win_next,
            ts_now(),
        ],
    )?;
    Ok(())
}

pub fn read_profile(conn: &Connection, user_id: &str) -> Result<Option<PulseProfile>> {
    let profile = conn
        .query_row(
            "SELECT flow_state, double_tribute_active, loaded_die_count, guaranteed_win_next
             FROM pulse_profiles WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(PulseProfile {
                    user_id: user_id.to_string(),
                    flow_state: row.get(0)?,
                    double_tribute_active: row.get(1)?,
                    loaded_die_count: row.get::<_, i64>(2)?.max(0) as u32,
                    guaranteed_win_next: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(profile)
}

/// Reference provider: luck weight is whatever the pulse subsystem last
/// stored, pity triggers after `pity_threshold` consecutive losses.
#[derive(Debug, Clone)]
pub struct SqlitePulse {
    pub pity_threshold: u32,
}

impl Default for SqlitePulse {
    fn default() -> Self {
        Self { pity_threshold: 10 }
    }
}

impl SqlitePulse {
    pub fn new(pity_threshold: u32) -> Self {
        Self { pity_threshold }
    }

    fn ensure_row(conn: &Connection, user_id: &str) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO pulse_profiles (user_id, updated_at) VALUES (?1, ?2)",
            params![user_id, ts_now()],
        )?;
        Ok(())
    }

    /// Overwrites the luck metric and flow state, as the pulse subsystem would.
    pub fn set_state(conn: &Connection, user_id: &str, luck_weight: f64, flow_state: f64) -> Result<()> {
        Self::ensure_row(conn, user_id)?;
        conn.execute(
            "UPDATE pulse_profiles SET luck_weight = ?2, flow_state = ?3, updated_at = ?4 WHERE user_id = ?1",
            params![user_id, luck_weight, flow_state.clamp(0.0, 1.0), ts_now()],
        )?;
        Ok(())
    }

    pub fn consecutive_losses(conn: &Connection, user_id: &str) -> Result<u32> {
        let losses: Option<i64> = conn
            .query_row(
                "SELECT consecutive_losses FROM pulse_profiles WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(losses.unwrap_or(0).max(0) as u32)
    }
}

impl LuckProvider for SqlitePulse {
    fn load_profile(&self, conn: &Connection, user_id: &str) -> Result<PulseProfile> {
        Self::ensure_row(conn, user_id)?;
        Ok(read_profile(conn, user_id)?.unwrap_or_else(|| PulseProfile::new(user_id)))
    }

    fn current_luck_weight(&self, conn: &Connection, user_id: &str) -> Result<f64> {
        let weight: Option<f64> = conn
            .query_row(
                "SELECT luck_weight FROM pulse_profiles WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(weight.unwrap_or(1.0))
    }

    fn is_pity_eligible(&self, conn: &Connection, user_id: &str) -> Result<bool> {
        Ok(Self::consecutive_losses(conn, user_id)? >= self.pity_threshold)
    }

    fn record_win(&self, conn: &Connection, user_id: &str) -> Result<()> {
        Self::ensure_row(conn, user_id)?;
        conn.execute(
            "UPDATE pulse_profiles
             SET wins = wins + 1, consecutive_losses = 0, updated_at = ?2
             WHERE user_id = ?1",
            params![user_id, ts_now()],
        )?;
        Ok(())
    }

    fn record_loss(&self, conn: &Connection, user_id: &str) -> Result<()> {
        Self::ensure_row(conn, user_id)?;
        conn.execute(
            "UPDATE pulse_profiles
             SET losses = losses + 1, consecutive_losses = consecutive_losses + 1, updated_at = ?2
             WHERE user_id = ?1",
            params![user_id, ts_now()],
        )?;
        let streak = Self::consecutive_losses(conn, user_id)?;
        if streak == self.pity_threshold {
            log(
                Level::Info,
                Domain::Pulse,
                "pity_armed",
                obj(&[("user_id", v_str(user_id)), ("losses", json!(streak))]),
            );
        }
        Ok(())
    }
}
