//! Modifier pipeline: tribute amplification, the affordability gate, tier
//! selection rules in precedence order, and the hollow-win adjustment.
//!
//! Tier rules are evaluated first-match-wins:
//!
//! | Order | Rule            | Fires when                                   | Selection                        |
//! |-------|-----------------|----------------------------------------------|----------------------------------|
//! | 1     | guaranteed_win  | buff active and instrument matches the grant | base weights, no COMMON/DIVINE   |
//! | 2     | pity            | luck provider reports pity                   | DIVINE, no randomness            |
//! | 3     | weighted        | always                                       | modulated weights, no DIVINE     |
//!
//! A rule that resolves no tier falls back to COMMON.

use std::ops::Range;

use rand::{Rng, RngCore};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TributeError};
use crate::instruments::{InstrumentConfig, OutcomeTier, TierRank};
use crate::pulse::{Buff, PulseProfile};
use crate::selector::select_weighted;

pub const LOADED_DIE_BOOST: f64 = 1.15;
pub const HOLLOW_WIN_FACTOR_RANGE: Range<f64> = 0.80..0.95;

const MIN_ODDS_SCALE: f64 = 1e-6;
const MAX_ODDS_SCALE: f64 = 1e6;

// =============================================================================
// Psyche
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PsycheModifiers {
    pub odds_factor: f64,
    pub boon_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Psyche {
    /// Baseline.
    ZenArchitect,
    /// Higher risk, higher reward.
    SyndicateEnforcer,
    /// Lower risk, lower reward.
    RiskAverseArtisan,
}

impl Psyche {
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "ZEN_ARCHITECT" => Some(Psyche::ZenArchitect),
            "SYNDICATE_ENFORCER" => Some(Psyche::SyndicateEnforcer),
            "RISK_AVERSE_ARTISAN" => Some(Psyche::RiskAverseArtisan),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Psyche::ZenArchitect => "ZEN_ARCHITECT",
            Psyche::SyndicateEnforcer => "SYNDICATE_ENFORCER",
            Psyche::RiskAverseArtisan => "RISK_AVERSE_ARTISAN",
        }
    }

    pub fn modifiers(&self) -> PsycheModifiers {
        match self {
            Psyche::ZenArchitect => PsycheModifiers { odds_factor: 1.0, boon_factor: 1.0 },
            Psyche::SyndicateEnforcer => PsycheModifiers { odds_factor: 0.85, boon_factor: 1.25 },
            Psyche::RiskAverseArtisan => PsycheModifiers { odds_factor: 1.15, boon_factor: 0.8 },
        }
    }
}

/// Unknown archetypes get the baseline.
pub fn psyche_modifiers(label: &str) -> PsycheModifiers {
    Psyche::parse(label).unwrap_or(Psyche::ZenArchitect).modifiers()
}

// =============================================================================
// Cost: amplification and affordability
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostPlan {
    pub amount: Decimal,
    /// The double-tribute buff applied and must be consumed.
    pub amplified: bool,
}

pub fn amplify_tribute(base: Decimal, profile: &PulseProfile) -> Result<CostPlan> {
    if profile.has(Buff::DoubleTribute) {
        let amount = base.checked_mul(Decimal::TWO).ok_or(TributeError::InvalidAmount(base))?;
        Ok(CostPlan { amount, amplified: true })
    } else {
        Ok(CostPlan { amount: base, amplified: false })
    }
}

pub fn check_affordable(balance: Decimal, required: Decimal) -> Result<()> {
    if balance < required {
        return Err(TributeError::InsufficientCredits { required, available: balance });
    }
    Ok(())
}

// =============================================================================
// Tier rules
// =============================================================================

pub struct TierContext<'a> {
    pub instrument: &'a InstrumentConfig,
    pub profile: &'a PulseProfile,
    pub luck_weight: f64,
    pub odds_factor: f64,
    pub pity_eligible: bool,
    pub guaranteed_win_instrument: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierPath {
    GuaranteedWin,
    Pity,
    Weighted,
}

pub struct RuleOutcome<'a> {
    pub tier: Option<&'a OutcomeTier>,
    pub consumed: Option<Buff>,
}

pub trait TierRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn path(&self) -> TierPath;
    fn applies(&self, ctx: &TierContext<'_>) -> bool;
    fn select<'a>(&self, ctx: &TierContext<'a>, rng: &mut dyn RngCore) -> RuleOutcome<'a>;
}

pub struct GuaranteedWinRule;

impl TierRule for GuaranteedWinRule {
    fn name(&self) -> &'static str {
        "guaranteed_win"
    }

    fn path(&self) -> TierPath {
        TierPath::GuaranteedWin
    }

    fn applies(&self, ctx: &TierContext<'_>) -> bool {
        ctx.profile.has(Buff::GuaranteedWin) && ctx.instrument.id == ctx.guaranteed_win_instrument
    }

    fn select<'a>(&self, ctx: &TierContext<'a>, rng: &mut dyn RngCore) -> RuleOutcome<'a> {
        let eligible: Vec<&'a OutcomeTier> = ctx
            .instrument
            .rarity_table
            .iter()
            .filter(|t| t.tier != TierRank::Common && t.tier != TierRank::Divine)
            .collect();
        RuleOutcome {
            tier: select_weighted(&eligible, |t| t.base_weight, rng).copied(),
            consumed: Some(Buff::GuaranteedWin),
        }
    }
}

pub struct PityRule;

impl TierRule for PityRule {
    fn name(&self) -> &'static str {
        "pity"
    }

    fn path(&self) -> TierPath {
        TierPath::Pity
    }

    fn applies(&self, ctx: &TierContext<'_>) -> bool {
        ctx.pity_eligible
    }

    fn select<'a>(&self, ctx: &TierContext<'a>, _rng: &mut dyn RngCore) -> RuleOutcome<'a> {
        RuleOutcome { tier: ctx.instrument.tier(TierRank::Divine), consumed: None }
    }
}

pub struct WeightedRule;

impl TierRule for WeightedRule {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn path(&self) -> TierPath {
        TierPath::Weighted
    }

    fn applies(&self, _ctx: &TierContext<'_>) -> bool {
        true
    }

    fn select<'a>(&self, ctx: &TierContext<'a>, rng: &mut dyn RngCore) -> RuleOutcome<'a> {
        let loaded_die = ctx.profile.has(Buff::LoadedDie);
        let eligible: Vec<&'a OutcomeTier> = ctx
            .instrument
            .rarity_table
            .iter()
            .filter(|t| t.tier != TierRank::Divine)
            .collect();
        let tier = select_weighted(
            &eligible,
            |t| modulated_weight(t, loaded_die, ctx.luck_weight, ctx.odds_factor),
            rng,
        )
        .copied();
        RuleOutcome { tier, consumed: loaded_die.then_some(Buff::LoadedDie) }
    }
}

/// Luck and odds suppress COMMON and amplify every better tier.
pub fn modulated_weight(tier: &OutcomeTier, loaded_die: bool, luck_weight: f64, odds_factor: f64) -> f64 {
    let boost = if loaded_die && tier.tier != TierRank::Common { LOADED_DIE_BOOST } else { 1.0 };
    let weight = tier.base_weight * boost;
    let scale = odds_scale(luck_weight * odds_factor);
    if tier.tier == TierRank::Common {
        weight / scale
    } else {
        weight * scale
    }
}

fn odds_scale(raw: f64) -> f64 {
    if raw.is_nan() || raw <= 0.0 {
        MIN_ODDS_SCALE
    } else {
        raw.min(MAX_ODDS_SCALE)
    }
}

pub fn default_rules() -> Vec<Box<dyn TierRule>> {
    vec![Box::new(GuaranteedWinRule), Box::new(PityRule), Box::new(WeightedRule)]
}

#[derive(Debug, Clone, Copy)]
pub struct TierDecision<'a> {
    pub tier: &'a OutcomeTier,
    pub path: TierPath,
    pub rule: &'static str,
    pub consumed: Option<Buff>,
    /// No tier resolved and COMMON was substituted.
    pub fell_back: bool,
}

impl TierDecision<'_> {
    pub fn outcome_label(&self) -> &'static str {
        if self.fell_back {
            return self.tier.tier.label();
        }
        match self.path {
            TierPath::GuaranteedWin => "guaranteed_win",
            TierPath::Pity => "pity_boon",
            TierPath::Weighted => self.tier.tier.label(),
        }
    }

    pub fn is_loss(&self) -> bool {
        self.outcome_label() == TierRank::Common.label()
    }
}

pub fn resolve_tier<'a>(
    rules: &[Box<dyn TierRule>],
    ctx: &TierContext<'a>,
    rng: &mut dyn RngCore,
) -> Result<TierDecision<'a>> {
    let fired = rules.iter().find(|rule| rule.applies(ctx));
    let (picked, path, rule, consumed) = match fired {
        Some(rule) => {
            let outcome = rule.select(ctx, rng);
            (outcome.tier, rule.path(), rule.name(), outcome.consumed)
        }
        None => (None, TierPath::Weighted, "none", None),
    };
    let (tier, fell_back) = match picked {
        Some(tier) => (tier, false),
        None => {
            let common = ctx.instrument.tier(TierRank::Common).ok_or_else(|| {
                TributeError::InvalidConfig(format!(
                    "{}: no tier resolved and no COMMON fallback",
                    ctx.instrument.id
                ))
            })?;
            (common, true)
        }
    };
    Ok(TierDecision { tier, path, rule, consumed, fell_back })
}

// =============================================================================
// Hollow win
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HollowWinPolicy {
    pub flow_threshold: f64,
    pub probability: f64,
}

impl Default for HollowWinPolicy {
    fn default() -> Self {
        Self { flow_threshold: 0.75, probability: 1.0 / 3.0 }
    }
}

impl HollowWinPolicy {
    /// Factor in [0.80, 0.95) when a credit win at high flow is hollowed out.
    pub fn roll<R: Rng + ?Sized>(&self, credit_win: bool, flow_state: f64, rng: &mut R) -> Option<f64> {
        if !credit_win || flow_state.is_nan() || flow_state <= self.flow_threshold {
            return None;
        }
        if rng.gen::<f64>() >= self.probability {
            return None;
        }
        Some(rng.gen_range(HOLLOW_WIN_FACTOR_RANGE))
    }
}
