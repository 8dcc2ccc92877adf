#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rusqlite::Connection;
use rust_decimal::Decimal;

use tribute_engine::error::{Result, TributeError};
use tribute_engine::instruments::{ArtifactManifest, Boon, InstrumentCatalog, InstrumentConfig, OutcomeTier, TierRank};
use tribute_engine::ledger::store;
use tribute_engine::pulse::{read_profile, save_profile, LuckProvider, PulseProfile};
use tribute_engine::{EngineConfig, TributeEngine};

pub const USER: &str = "user-1";
pub const WORKSPACE: &str = "ws-1";
pub const SECRET: &str = "integration-test-secret";

pub fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Luck provider with fixed answers that counts notifications.
pub struct ScriptedLuck {
    pub luck_weight: f64,
    pub pity: bool,
    pub flow_state: f64,
    pub fail_notify: bool,
    pub wins: AtomicUsize,
    pub losses: AtomicUsize,
}

impl ScriptedLuck {
    pub fn new(luck_weight: f64) -> Self {
        Self {
            luck_weight,
            pity: false,
            flow_state: 0.0,
            fail_notify: false,
            wins: AtomicUsize::new(0),
            losses: AtomicUsize::new(0),
        }
    }

    pub fn pity(mut self) -> Self {
        self.pity = true;
        self
    }

    pub fn flow(mut self, flow_state: f64) -> Self {
        self.flow_state = flow_state;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_notify = true;
        self
    }

    pub fn wins(&self) -> usize {
        self.wins.load(Ordering::SeqCst)
    }

    pub fn losses(&self) -> usize {
        self.losses.load(Ordering::SeqCst)
    }
}

impl LuckProvider for ScriptedLuck {
    fn load_profile(&self, conn: &Connection, user_id: &str) -> Result<PulseProfile> {
        let mut profile = read_profile(conn, user_id)?.unwrap_or_else(|| PulseProfile::new(user_id));
        profile.flow_state = self.flow_state;
        Ok(profile)
    }

    fn current_luck_weight(&self, _conn: &Connection, _user_id: &str) -> Result<f64> {
        Ok(self.luck_weight)
    }

    fn is_pity_eligible(&self, _conn: &Connection, _user_id: &str) -> Result<bool> {
        Ok(self.pity)
    }

    fn record_win(&self, _conn: &Connection, _user_id: &str) -> Result<()> {
        if self.fail_notify {
            return Err(TributeError::Provider("pulse service unavailable".to_string()));
        }
        self.wins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn record_loss(&self, _conn: &Connection, _user_id: &str) -> Result<()> {
        if self.fail_notify {
            return Err(TributeError::Provider("pulse service unavailable".to_string()));
        }
        self.losses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Instruments with weight tables chosen so outcomes are predictable.
pub fn scenario_catalog() -> InstrumentCatalog {
    InstrumentCatalog::new(
        vec![
            ArtifactManifest {
                id: "COIN_FLIP".to_string(),
                name: "Coin Flip".to_string(),
                credit_cost: d("100"),
            },
            ArtifactManifest {
                id: "CARD_GOLDEN_FLEECE".to_string(),
                name: "Golden Fleece".to_string(),
                credit_cost: d("200"),
            },
            ArtifactManifest {
                id: "ORPHAN".to_string(),
                name: "Listed Only".to_string(),
                credit_cost: d("10"),
            },
        ],
        vec![
            // 80/20 total loss versus double-up.
            InstrumentConfig {
                id: "COIN_FLIP".to_string(),
                tribute_cost: d("100"),
                rarity_table: vec![
                    OutcomeTier::new(TierRank::Common, 80.0, vec![Boon::credits(0.0, 1.0)]),
                    OutcomeTier::new(TierRank::Rare, 20.0, vec![Boon::credits(2.0, 1.0)]),
                    OutcomeTier::new(TierRank::Divine, 0.0, vec![Boon::credits(10.0, 1.0)]),
                ],
            },
            // Always UNCOMMON on the weighted path; two credit boons.
            InstrumentConfig {
                id: "SURE_THING".to_string(),
                tribute_cost: d("50"),
                rarity_table: vec![
                    OutcomeTier::new(TierRank::Common, 0.0, vec![Boon::credits(0.0, 1.0)]),
                    OutcomeTier::new(
                        TierRank::Uncommon,
                        1.0,
                        vec![Boon::credits(1.5, 1.0), Boon::credits(2.0, 1.0)],
                    ),
                    OutcomeTier::new(TierRank::Divine, 0.0, vec![Boon::credits(10.0, 1.0)]),
                ],
            },
            // Always RARE, always a special item.
            InstrumentConfig {
                id: "ITEM_BOX".to_string(),
                tribute_cost: d("40"),
                rarity_table: vec![
                    OutcomeTier::new(TierRank::Common, 0.0, vec![Boon::credits(0.0, 1.0)]),
                    OutcomeTier::new(TierRank::Rare, 1.0, vec![Boon::special_item("CARD_GOLDEN_FLEECE", 1.0)]),
                    OutcomeTier::new(TierRank::Divine, 0.0, vec![Boon::credits(10.0, 1.0)]),
                ],
            },
            // No DIVINE tier at all; pity falls back to COMMON.
            InstrumentConfig {
                id: "PLAIN_FLIP".to_string(),
                tribute_cost: d("100"),
                rarity_table: vec![
                    OutcomeTier::new(TierRank::Common, 80.0, vec![Boon::credits(0.0, 1.0)]),
                    OutcomeTier::new(TierRank::Rare, 20.0, vec![Boon::credits(2.0, 1.0)]),
                ],
            },
            // Always RARE, but the credit boon pays nothing.
            InstrumentConfig {
                id: "EMPTY_PROMISE".to_string(),
                tribute_cost: d("20"),
                rarity_table: vec![
                    OutcomeTier::new(TierRank::Common, 0.0, vec![Boon::credits(0.0, 1.0)]),
                    OutcomeTier::new(TierRank::Rare, 1.0, vec![Boon::credits(0.0, 1.0)]),
                ],
            },
            // DIVINE only pays out a system effect.
            InstrumentConfig {
                id: "STORM_ALTAR".to_string(),
                tribute_cost: d("30"),
                rarity_table: vec![
                    OutcomeTier::new(TierRank::Common, 1.0, vec![Boon::credits(0.0, 1.0)]),
                    OutcomeTier::new(TierRank::Divine, 0.0, vec![Boon::system_effect("GLOBAL_LUCK_SURGE", 1.0)]),
                ],
            },
        ],
    )
    .unwrap()
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        signing_secret: SECRET.to_string(),
        guaranteed_win_instrument: "COIN_FLIP".to_string(),
        rng_seed: Some(42),
        ..EngineConfig::default()
    }
}

pub fn engine_with(cfg: EngineConfig, luck: Arc<dyn LuckProvider>, credits: &str) -> TributeEngine {
    let conn = Connection::open_in_memory().unwrap();
    let engine = TributeEngine::with_connection(cfg, scenario_catalog(), conn, luck).unwrap();
    seed(&engine, "ZEN_ARCHITECT", credits);
    engine
}

pub fn engine(luck: Arc<dyn LuckProvider>, credits: &str) -> TributeEngine {
    engine_with(test_config(), luck, credits)
}

pub fn seed(engine: &TributeEngine, psyche: &str, credits: &str) {
    engine
        .with_conn(|conn| {
            store::upsert_user(conn, USER, psyche)?;
            store::upsert_workspace(conn, WORKSPACE, d(credits))
        })
        .unwrap();
}

pub fn balance(engine: &TributeEngine) -> Decimal {
    engine.with_conn(|conn| store::load_workspace(conn, WORKSPACE)).unwrap().credits
}

pub fn potential(engine: &TributeEngine) -> Decimal {
    engine.with_conn(|conn| store::load_workspace(conn, WORKSPACE)).unwrap().potential
}

pub fn set_profile(engine: &TributeEngine, edit: impl FnOnce(&mut PulseProfile)) {
    engine
        .with_conn(|conn| {
            let mut profile = read_profile(conn, USER)?.unwrap_or_else(|| PulseProfile::new(USER));
            edit(&mut profile);
            save_profile(conn, &profile)
        })
        .unwrap();
}

pub fn profile(engine: &TributeEngine) -> PulseProfile {
    engine
        .with_conn(|conn| read_profile(conn, USER))
        .unwrap()
        .unwrap_or_else(|| PulseProfile::new(USER))
}

pub fn count(engine: &TributeEngine, table: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    engine
        .with_conn(|conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
        .unwrap()
}
