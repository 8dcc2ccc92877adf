//! Tribute settlement.
//!
//! One settlement is one `BEGIN IMMEDIATE` transaction: load user, workspace
//! and pulse profile, resolve modifiers, select tier and boon, compute the
//! award, notify the luck provider, write the ledger, commit. Any error drops
//! the transaction and nothing is persisted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::{Connection, TransactionBehavior};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{Result, TributeError};
use crate::instruments::{InstrumentCatalog, ResolvedInstrument};
use crate::ledger::{self, schema, store, AuditReport, SettlementWrite, Signer, TransactionRecord};
use crate::logging::{
    log, log_buff_consumed, log_hollow_win, log_potential, log_rejection, log_settlement, log_tier_rule, obj,
    v_str, Domain, Level, ProfileScope,
};
use crate::modifiers::{
    amplify_tribute, check_affordable, default_rules, psyche_modifiers, resolve_tier, HollowWinPolicy, TierContext,
    TierRule,
};
use crate::outcome::{apply_hollow_win, compute_award, potential_award};
use crate::pulse::{save_profile, Buff, LuckProvider, SqlitePulse};
use crate::selector::select_weighted;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TributeRequest {
    pub user_id: String,
    pub workspace_id: String,
    pub instrument_id: String,
    /// Replaces the catalog tribute cost when set.
    pub tribute_override: Option<Decimal>,
}

impl TributeRequest {
    pub fn new(user_id: &str, workspace_id: &str, instrument_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            workspace_id: workspace_id.to_string(),
            instrument_id: instrument_id.to_string(),
            tribute_override: None,
        }
    }

    pub fn with_tribute(mut self, amount: Decimal) -> Self {
        self.tribute_override = Some(amount);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TributeOutcome {
    pub outcome: String,
    pub boon_amount: Decimal,
    pub missed_upside: Decimal,
    pub tribute_amount: Decimal,
    pub net_amount: Decimal,
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awarded_item: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_effect: Option<String>,
    pub potential_awarded: Decimal,
}

/// The seam the orchestration layer settles through.
#[async_trait]
pub trait TributeSettler: Send + Sync {
    async fn settle_tribute(&self, req: TributeRequest) -> Result<TributeOutcome>;
}

struct EngineInner {
    cfg: EngineConfig,
    catalog: InstrumentCatalog,
    conn: Mutex<Connection>,
    luck: Arc<dyn LuckProvider>,
    rules: Vec<Box<dyn TierRule>>,
    rng: Mutex<StdRng>,
    signer: Signer,
    hollow: HollowWinPolicy,
}

/// Post-commit facts that are logged but not returned.
struct Settled {
    outcome: TributeOutcome,
    rule: &'static str,
    tier: &'static str,
    consumed: Vec<Buff>,
    hollow: Option<(f64, Decimal)>,
}

#[derive(Clone)]
pub struct TributeEngine {
    inner: Arc<EngineInner>,
}

impl TributeEngine {
    /// Opens the configured database with the reference luck provider.
    pub fn open(cfg: EngineConfig) -> Result<Self> {
        cfg.validate()?;
        let catalog = match &cfg.instruments_path {
            Some(path) => InstrumentCatalog::load(path)?,
            None => InstrumentCatalog::builtin()?,
        };
        let conn = Connection::open(&cfg.sqlite_path)?;
        Self::with_connection(cfg, catalog, conn, Arc::new(SqlitePulse::default()))
    }

    pub fn with_connection(
        cfg: EngineConfig,
        catalog: InstrumentCatalog,
        conn: Connection,
        luck: Arc<dyn LuckProvider>,
    ) -> Result<Self> {
        cfg.validate()?;
        conn.busy_timeout(Duration::from_millis(cfg.busy_timeout_ms))?;
        schema::init(&conn)?;

        if cfg.uses_dev_secret() {
            log(
                Level::Warn,
                Domain::Config,
                "dev_signing_secret",
                obj(&[
                    ("environment", v_str(cfg.environment.as_str())),
                    ("msg", v_str("ledger rows are signed with the development secret")),
                ]),
            );
        }

        let rng = match cfg.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let hollow = HollowWinPolicy {
            flow_threshold: cfg.hollow_win_flow_threshold,
            probability: cfg.hollow_win_probability,
        };
        let signer = Signer::new(&cfg.signing_secret);
        Ok(Self {
            inner: Arc::new(EngineInner {
                cfg,
                catalog,
                conn: Mutex::new(conn),
                luck,
                rules: default_rules(),
                rng: Mutex::new(rng),
                signer,
                hollow,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.cfg
    }

    pub fn catalog(&self) -> &InstrumentCatalog {
        &self.inner.catalog
    }

    pub fn reseed(&self, seed: u64) -> Result<()> {
        *relock(&self.inner.rng) = StdRng::seed_from_u64(seed);
        Ok(())
    }

    /// Runs `f` against the shared connection outside any settlement.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = relock(&self.inner.conn);
        f(&conn)
    }

    pub async fn settle_tribute(&self, req: TributeRequest) -> Result<TributeOutcome> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.settle_tribute_blocking(&req))
            .await
            .map_err(|e| TributeError::Join(e.to_string()))?
    }

    pub fn settle_tribute_blocking(&self, req: &TributeRequest) -> Result<TributeOutcome> {
        let _scope = ProfileScope::with_context(
            "settle_tribute",
            &[("instrument_id", v_str(&req.instrument_id))],
        );
        match self.settle_in_transaction(req) {
            Ok(settled) => {
                self.log_settled(req, &settled);
                Ok(settled.outcome)
            }
            Err(err) => {
                log_rejection(&req.user_id, &req.instrument_id, rejection_reason(&err), &err.to_string());
                Err(err)
            }
        }
    }

    fn settle_in_transaction(&self, req: &TributeRequest) -> Result<Settled> {
        let resolved = self.inner.catalog.resolve(&req.instrument_id)?;
        let base = req.tribute_override.unwrap_or_else(|| resolved.default_tribute());
        if base < Decimal::ZERO {
            return Err(TributeError::InvalidAmount(base));
        }

        let mut conn = relock(&self.inner.conn);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let settled = self.settle(&tx, req, &resolved, base)?;
        tx.commit()?;
        Ok(settled)
    }

    fn settle(
        &self,
        conn: &Connection,
        req: &TributeRequest,
        resolved: &ResolvedInstrument<'_>,
        base: Decimal,
    ) -> Result<Settled> {
        let inner = &*self.inner;
        let user = store::load_user(conn, &req.user_id)?;
        let workspace = store::load_workspace(conn, &req.workspace_id)?;
        let mut profile = inner.luck.load_profile(conn, &req.user_id)?;
        let mut consumed = Vec::new();

        let plan = amplify_tribute(base, &profile)?;
        check_affordable(workspace.credits, plan.amount)?;
        if plan.amplified && profile.consume(Buff::DoubleTribute) {
            consumed.push(Buff::DoubleTribute);
        }

        let psyche = psyche_modifiers(&user.psyche);
        let luck_weight = inner.luck.current_luck_weight(conn, &req.user_id)?;
        if !luck_weight.is_finite() || luck_weight < 0.0 {
            return Err(TributeError::Provider(format!("luck weight {} out of range", luck_weight)));
        }
        let pity_eligible = inner.luck.is_pity_eligible(conn, &req.user_id)?;

        let snapshot = profile.clone();
        let ctx = TierContext {
            instrument: resolved.config,
            profile: &snapshot,
            luck_weight,
            odds_factor: psyche.odds_factor,
            pity_eligible,
            guaranteed_win_instrument: &inner.cfg.guaranteed_win_instrument,
        };

        let mut rng = relock(&inner.rng);
        let decision = resolve_tier(&inner.rules, &ctx, &mut *rng)?;
        if let Some(buff) = decision.consumed {
            if profile.consume(buff) {
                consumed.push(buff);
            }
        }

        let boon = select_weighted(&decision.tier.boons, |b| b.weight, &mut *rng).ok_or_else(|| {
            TributeError::InvalidConfig(format!("{}: tier {} has no boons", resolved.config.id, decision.tier.tier.label()))
        })?;
        let award = compute_award(decision.tier, boon, plan.amount, psyche.boon_factor, |id| {
            inner.catalog.item_cost(id)
        })?;
        let hollow_eligible = award.credit_win && award.nominal_amount > Decimal::ZERO;
        let rolled = inner.hollow.roll(hollow_eligible, profile.flow_state, &mut *rng);
        drop(rng);

        let hollow = match rolled {
            Some(factor) => apply_hollow_win(award.nominal_amount, factor)?.map(|paid| (factor, paid)),
            None => None,
        };
        let hollow_factor = hollow.map(|(factor, _)| factor);
        let boon_amount = hollow.map_or(award.nominal_amount, |(_, paid)| paid);

        let outcome_label = decision.outcome_label();
        if decision.is_loss() {
            inner.luck.record_loss(conn, &req.user_id)?;
        } else {
            inner.luck.record_win(conn, &req.user_id)?;
        }
        if !consumed.is_empty() {
            save_profile(conn, &profile)?;
        }

        let potential = if inner.cfg.potential_accrual_enabled && award.credit_win {
            Some(potential_award(plan.amount, luck_weight, inner.cfg.potential_rate)?)
        } else {
            None
        };

        let written = ledger::write_settlement(
            conn,
            &inner.signer,
            &SettlementWrite {
                workspace_id: &req.workspace_id,
                user_id: &req.user_id,
                instrument_id: &resolved.config.id,
                instrument_name: resolved.display_name(),
                user_psyche: &user.psyche,
                luck_weight,
                outcome: outcome_label,
                tribute_amount: plan.amount,
                boon_amount,
                hollow_win_factor: hollow_factor,
                awarded_item: award.awarded_item.as_deref(),
                system_effect: award.system_effect.as_deref(),
                potential,
                credits_before: workspace.credits,
                potential_before: workspace.potential,
            },
        )?;

        Ok(Settled {
            outcome: TributeOutcome {
                outcome: outcome_label.to_string(),
                boon_amount,
                missed_upside: award.missed_upside,
                tribute_amount: plan.amount,
                net_amount: written.net_amount,
                transaction_id: written.transaction_id,
                awarded_item: award.awarded_item.clone(),
                system_effect: award.system_effect.clone(),
                potential_awarded: written.potential_awarded,
            },
            rule: decision.rule,
            tier: decision.tier.tier.label(),
            consumed,
            hollow: hollow_factor.map(|f| (f, award.nominal_amount)),
        })
    }

    fn log_settled(&self, req: &TributeRequest, settled: &Settled) {
        let o = &settled.outcome;
        log_tier_rule(&req.user_id, settled.rule, settled.tier);
        for buff in &settled.consumed {
            log_buff_consumed(&req.user_id, buff.as_str());
        }
        if let Some((factor, nominal)) = settled.hollow {
            log_hollow_win(
                &req.user_id,
                &req.instrument_id,
                factor,
                &nominal.to_string(),
                &o.boon_amount.to_string(),
            );
        }
        if o.potential_awarded > Decimal::ZERO {
            log_potential(&req.workspace_id, &req.user_id, &o.potential_awarded.to_string());
        }
        log_settlement(
            &o.transaction_id,
            &req.user_id,
            &req.workspace_id,
            &req.instrument_id,
            &o.outcome,
            &o.tribute_amount.to_string(),
            &o.boon_amount.to_string(),
            &o.net_amount.to_string(),
        );
    }

    // =========================================================================
    // Ledger access outside settlement
    // =========================================================================

    /// First view of an instrument; later views are no-ops.
    pub fn record_discovery(&self, user_id: &str, instrument_id: &str) -> Result<bool> {
        self.with_conn(|conn| store::record_discovery(conn, user_id, instrument_id, chrono::Utc::now()))
    }

    pub fn recent_transactions(&self, workspace_id: &str, limit: usize) -> Result<Vec<TransactionRecord>> {
        self.with_conn(|conn| store::recent_transactions(conn, workspace_id, limit))
    }

    pub fn verify_transaction(&self, tx_id: &str) -> Result<bool> {
        self.with_conn(|conn| ledger::verify_transaction(conn, &self.inner.signer, tx_id))
    }

    pub fn verify_all(&self) -> Result<AuditReport> {
        self.with_conn(|conn| ledger::verify_all(conn, &self.inner.signer))
    }
}

#[async_trait]
impl TributeSettler for TributeEngine {
    async fn settle_tribute(&self, req: TributeRequest) -> Result<TributeOutcome> {
        TributeEngine::settle_tribute(self, req).await
    }
}

/// A panic while a lock was held leaves nothing half-written: the open
/// SQLite transaction rolls back when it is dropped.
fn relock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

fn rejection_reason(err: &TributeError) -> &'static str {
    match err {
        TributeError::UnknownInstrument(_) => "unknown_instrument",
        TributeError::InsufficientCredits { .. } => "insufficient_credits",
        TributeError::NotFound { .. } => "not_found",
        TributeError::InvalidConfig(_) | TributeError::InvalidAmount(_) | TributeError::Config(_) => "configuration",
        _ => "dependency",
    }
}
