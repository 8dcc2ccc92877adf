//! Turns a selected boon into money: boon amount, missed upside, potential.
//!
//! All amounts are rounded to [`MONEY_DP`] places before they touch a balance,
//! so `final = initial - tribute + boon` holds exactly in decimal arithmetic.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{Result, TributeError};
use crate::instruments::{Boon, BoonKind, OutcomeTier, TierRank};

pub const MONEY_DP: u32 = 8;
pub const DEFAULT_ITEM_COST: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoonAward {
    pub kind: BoonKind,
    /// Credit-equivalent value before any hollow-win reduction.
    pub nominal_amount: Decimal,
    pub missed_upside: Decimal,
    pub awarded_item: Option<String>,
    pub system_effect: Option<String>,
    /// Credit boon from a tier above COMMON.
    pub credit_win: bool,
}

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp(MONEY_DP)
}

/// `amount` times every factor; overflow is an invalid amount, never a panic.
pub fn scale_money(amount: Decimal, factors: &[Decimal]) -> Result<Decimal> {
    factors
        .iter()
        .try_fold(amount, |acc, f| acc.checked_mul(*f))
        .map(round_money)
        .ok_or(TributeError::InvalidAmount(amount))
}

fn decimal(x: f64, what: &str) -> Result<Decimal> {
    Decimal::from_f64(x)
        .ok_or_else(|| TributeError::InvalidConfig(format!("{} {} is not a representable amount", what, x)))
}

pub fn compute_award<F>(
    tier: &OutcomeTier,
    boon: &Boon,
    tribute: Decimal,
    boon_factor: f64,
    item_cost: F,
) -> Result<BoonAward>
where
    F: Fn(&str) -> Option<Decimal>,
{
    match boon.kind {
        BoonKind::Credits => {
            let multiplier = boon
                .multiplier()
                .ok_or_else(|| TributeError::InvalidConfig("credit boon without multiplier".to_string()))?;
            let factor = decimal(boon_factor, "boon factor")?;
            let amount = scale_money(tribute, &[decimal(multiplier, "boon multiplier")?, factor])?;

            let multipliers: Vec<f64> = tier.credit_boons().filter_map(Boon::multiplier).collect();
            let missed_upside = if multipliers.len() > 1 {
                let best = multipliers.iter().copied().fold(f64::MIN, f64::max);
                let best_amount = scale_money(tribute, &[decimal(best, "boon multiplier")?, factor])?;
                best_amount.checked_sub(amount).unwrap_or(Decimal::ZERO).max(Decimal::ZERO)
            } else {
                Decimal::ZERO
            };

            Ok(BoonAward {
                kind: BoonKind::Credits,
                nominal_amount: amount,
                missed_upside,
                awarded_item: None,
                system_effect: None,
                credit_win: tier.tier != TierRank::Common,
            })
        }
        BoonKind::SpecialItem => {
            let key = boon
                .key()
                .ok_or_else(|| TributeError::InvalidConfig("special item boon without key".to_string()))?;
            let cost = item_cost(key).unwrap_or_else(|| Decimal::new(DEFAULT_ITEM_COST, 0));
            Ok(BoonAward {
                kind: BoonKind::SpecialItem,
                nominal_amount: scale_money(cost, &[Decimal::new(15, 1)])?,
                missed_upside: Decimal::ZERO,
                awarded_item: Some(key.to_string()),
                system_effect: None,
                credit_win: false,
            })
        }
        BoonKind::SystemEffect => {
            let key = boon
                .key()
                .ok_or_else(|| TributeError::InvalidConfig("system effect boon without key".to_string()))?;
            Ok(BoonAward {
                kind: BoonKind::SystemEffect,
                nominal_amount: Decimal::ZERO,
                missed_upside: Decimal::ZERO,
                awarded_item: None,
                system_effect: Some(key.to_string()),
                credit_win: false,
            })
        }
    }
}

/// The reduced amount, or `None` when rounding leaves nothing to take away.
pub fn apply_hollow_win(nominal: Decimal, factor: f64) -> Result<Option<Decimal>> {
    let paid = scale_money(nominal, &[decimal(factor, "hollow-win factor")?])?;
    Ok((paid < nominal).then_some(paid))
}

pub fn potential_award(tribute: Decimal, luck_weight: f64, rate: f64) -> Result<Decimal> {
    let luck = Decimal::from_f64(luck_weight)
        .ok_or_else(|| TributeError::Provider(format!("luck weight {} is not a number", luck_weight)))?;
    scale_money(tribute, &[luck, decimal(rate, "potential rate")?])
}
