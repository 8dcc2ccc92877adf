//! End-to-end settlement behaviour against an in-memory store.

mod common;

use std::sync::Arc;

use rust_decimal::Decimal;

use common::*;
use tribute_engine::ledger::store;
use tribute_engine::{EngineConfig, ErrorClass, TributeError, TributeRequest};

fn req(instrument: &str) -> TributeRequest {
    TributeRequest::new(USER, WORKSPACE, instrument)
}

#[test]
fn coin_flip_frequencies_follow_weights() {
    let luck = Arc::new(ScriptedLuck::new(1.0));
    let engine = engine(luck.clone(), "1000000");
    let runs = 2000;
    let mut rare = 0;
    let mut expected = d("1000000");

    for _ in 0..runs {
        let out = engine.settle_tribute_blocking(&req("COIN_FLIP")).unwrap();
        assert_eq!(out.tribute_amount, d("100"));
        match out.outcome.as_str() {
            "rare" => {
                rare += 1;
                assert_eq!(out.net_amount, d("100"));
            }
            "common" => assert_eq!(out.net_amount, d("-100")),
            other => panic!("unexpected outcome {}", other),
        }
        expected += out.net_amount;
    }

    let rate = rare as f64 / runs as f64;
    assert!(rate > 0.16 && rate < 0.24, "rare rate {}", rate);
    assert_eq!(balance(&engine), expected);
    assert_eq!(luck.wins(), rare);
    assert_eq!(luck.losses(), runs - rare);
}

#[test]
fn pity_always_divine() {
    let luck = Arc::new(ScriptedLuck::new(1.0).pity());
    let engine = engine(luck.clone(), "100000");
    for _ in 0..25 {
        let out = engine.settle_tribute_blocking(&req("COIN_FLIP")).unwrap();
        assert_eq!(out.outcome, "pity_boon");
        assert_eq!(out.boon_amount, d("1000"));
    }
    assert_eq!(luck.wins(), 25);
    assert_eq!(luck.losses(), 0);
}

#[test]
fn insufficient_credits_leaves_state_untouched() {
    let luck = Arc::new(ScriptedLuck::new(1.0));
    let engine = engine(luck.clone(), "50");
    let err = engine.settle_tribute_blocking(&req("COIN_FLIP")).unwrap_err();
    assert!(matches!(err, TributeError::InsufficientCredits { .. }));
    assert_eq!(err.class(), ErrorClass::InsufficientFunds);
    assert_eq!(err.to_string(), "Cannot make tribute. Insufficient credits.");
    assert_eq!(balance(&engine), d("50"));
    assert_eq!(count(&engine, "transactions"), 0);
    assert_eq!(luck.wins() + luck.losses(), 0);
}

#[test]
fn double_tribute_charged_once() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0)), "1000");
    set_profile(&engine, |p| p.double_tribute_active = true);

    let first = engine.settle_tribute_blocking(&req("SURE_THING").with_tribute(d("50"))).unwrap();
    assert_eq!(first.tribute_amount, d("100"));
    assert!(!profile(&engine).double_tribute_active);

    let second = engine.settle_tribute_blocking(&req("SURE_THING").with_tribute(d("50"))).unwrap();
    assert_eq!(second.tribute_amount, d("50"));
}

#[test]
fn overflowing_amplified_tribute_is_rejected_and_engine_stays_usable() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0)), "1000");
    set_profile(&engine, |p| p.double_tribute_active = true);

    let huge = d("50000000000000000000000000000");
    let err = engine.settle_tribute_blocking(&req("COIN_FLIP").with_tribute(huge)).unwrap_err();
    assert!(matches!(err, TributeError::InvalidAmount(amount) if amount == huge));
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert!(profile(&engine).double_tribute_active);
    assert_eq!(balance(&engine), d("1000"));

    let ordinary = engine.settle_tribute_blocking(&req("STORM_ALTAR").with_tribute(d("10"))).unwrap();
    assert_eq!(ordinary.tribute_amount, d("20"));
    assert_eq!(balance(&engine), d("980"));
}

#[test]
fn table_without_divine_settles() {
    let luck = Arc::new(ScriptedLuck::new(1.0));
    let engine = engine(luck.clone(), "1000000");
    let runs = 1000;
    let mut rare = 0;
    for _ in 0..runs {
        let out = engine.settle_tribute_blocking(&req("PLAIN_FLIP")).unwrap();
        match out.outcome.as_str() {
            "rare" => {
                rare += 1;
                assert_eq!(out.boon_amount, d("200"));
            }
            "common" => assert_eq!(out.boon_amount, Decimal::ZERO),
            other => panic!("unexpected outcome {}", other),
        }
    }
    let rate = rare as f64 / runs as f64;
    assert!(rate > 0.15 && rate < 0.25, "rare rate {}", rate);
    assert_eq!(luck.wins(), rare);
}

#[test]
fn pity_without_divine_falls_back_to_common_loss() {
    let luck = Arc::new(ScriptedLuck::new(1.0).pity());
    let engine = engine(luck.clone(), "1000");
    let out = engine.settle_tribute_blocking(&req("PLAIN_FLIP")).unwrap();
    assert_eq!(out.outcome, "common");
    assert_eq!(out.boon_amount, Decimal::ZERO);
    assert_eq!(balance(&engine), d("900"));
    assert_eq!(luck.losses(), 1);
    assert_eq!(luck.wins(), 0);
}

#[test]
fn guaranteed_win_with_no_eligible_tier_is_a_common_loss() {
    let cfg = EngineConfig {
        guaranteed_win_instrument: "STORM_ALTAR".to_string(),
        ..test_config()
    };
    let luck = Arc::new(ScriptedLuck::new(1.0));
    let engine = engine_with(cfg, luck.clone(), "1000");
    set_profile(&engine, |p| p.guaranteed_win_next = true);

    let out = engine.settle_tribute_blocking(&req("STORM_ALTAR")).unwrap();
    assert_eq!(out.outcome, "common");
    assert_eq!(out.boon_amount, Decimal::ZERO);
    assert_eq!(luck.losses(), 1);
    assert_eq!(luck.wins(), 0);
}

#[test]
fn amplified_tribute_checked_before_buff_is_spent() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0)), "80");
    set_profile(&engine, |p| p.double_tribute_active = true);

    let err = engine.settle_tribute_blocking(&req("SURE_THING").with_tribute(d("50"))).unwrap_err();
    assert!(matches!(err, TributeError::InsufficientCredits { required, .. } if required == d("100")));
    assert!(profile(&engine).double_tribute_active);
    assert_eq!(balance(&engine), d("80"));
}

#[test]
fn balance_equation_holds_for_every_settlement() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.3).flow(0.9)), "100000");
    for instrument in ["COIN_FLIP", "SURE_THING", "ITEM_BOX", "STORM_ALTAR"].iter().cycle().take(60) {
        let before = balance(&engine);
        let out = engine.settle_tribute_blocking(&req(instrument)).unwrap();
        assert_eq!(balance(&engine), before - out.tribute_amount + out.boon_amount);
        assert_eq!(out.net_amount, out.boon_amount - out.tribute_amount);
    }
}

#[test]
fn default_tribute_comes_from_manifest_then_instrument() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0)), "1000");
    let listed = engine.settle_tribute_blocking(&req("COIN_FLIP")).unwrap();
    assert_eq!(listed.tribute_amount, d("100"));
    let unlisted = engine.settle_tribute_blocking(&req("SURE_THING")).unwrap();
    assert_eq!(unlisted.tribute_amount, d("50"));
    let overridden = engine.settle_tribute_blocking(&req("SURE_THING").with_tribute(d("12.5"))).unwrap();
    assert_eq!(overridden.tribute_amount, d("12.5"));
}

#[test]
fn guaranteed_win_only_on_granted_instrument() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0)), "10000");
    set_profile(&engine, |p| p.guaranteed_win_next = true);

    let other = engine.settle_tribute_blocking(&req("SURE_THING")).unwrap();
    assert_eq!(other.outcome, "uncommon");
    assert!(profile(&engine).guaranteed_win_next);

    let granted = engine.settle_tribute_blocking(&req("COIN_FLIP")).unwrap();
    assert_eq!(granted.outcome, "guaranteed_win");
    assert_eq!(granted.boon_amount, d("200"));
    assert!(!profile(&engine).guaranteed_win_next);
}

#[test]
fn guaranteed_win_takes_precedence_over_pity() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0).pity()), "10000");
    set_profile(&engine, |p| p.guaranteed_win_next = true);
    let out = engine.settle_tribute_blocking(&req("COIN_FLIP")).unwrap();
    assert_eq!(out.outcome, "guaranteed_win");
    let next = engine.settle_tribute_blocking(&req("COIN_FLIP")).unwrap();
    assert_eq!(next.outcome, "pity_boon");
}

#[test]
fn loaded_die_spent_on_weighted_path_only() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0)), "10000");
    set_profile(&engine, |p| p.loaded_die_count = 2);
    engine.settle_tribute_blocking(&req("SURE_THING")).unwrap();
    assert_eq!(profile(&engine).loaded_die_count, 1);

    let pity = engine_with(test_config(), Arc::new(ScriptedLuck::new(1.0).pity()), "10000");
    set_profile(&pity, |p| p.loaded_die_count = 2);
    pity.settle_tribute_blocking(&req("SURE_THING")).unwrap();
    assert_eq!(profile(&pity).loaded_die_count, 2);
}

#[test]
fn missed_upside_within_tier() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0)), "100000");
    let mut seen_low = false;
    for _ in 0..40 {
        let out = engine.settle_tribute_blocking(&req("SURE_THING")).unwrap();
        assert_eq!(out.outcome, "uncommon");
        assert_eq!(out.missed_upside, d("100") - out.boon_amount);
        seen_low |= out.boon_amount == d("75");
    }
    assert!(seen_low);

    let single = engine.settle_tribute_blocking(&req("COIN_FLIP")).unwrap();
    assert_eq!(single.missed_upside, Decimal::ZERO);
}

#[test]
fn special_item_granted_and_valued() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0)), "1000");
    let out = engine.settle_tribute_blocking(&req("ITEM_BOX")).unwrap();
    assert_eq!(out.outcome, "rare");
    assert_eq!(out.awarded_item.as_deref(), Some("CARD_GOLDEN_FLEECE"));
    assert_eq!(out.boon_amount, d("300"));
    assert_eq!(out.potential_awarded, Decimal::ZERO);
    assert_eq!(balance(&engine), d("1260"));

    let items = engine.with_conn(|conn| store::user_items(conn, USER)).unwrap();
    assert_eq!(items, vec!["CARD_GOLDEN_FLEECE".to_string()]);
}

#[test]
fn system_effect_reported_and_stored() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0).pity()), "1000");
    let out = engine.settle_tribute_blocking(&req("STORM_ALTAR")).unwrap();
    assert_eq!(out.outcome, "pity_boon");
    assert_eq!(out.system_effect.as_deref(), Some("GLOBAL_LUCK_SURGE"));
    assert_eq!(out.boon_amount, Decimal::ZERO);
    assert_eq!(out.net_amount, d("-30"));

    let row = engine.with_conn(|conn| store::load_transaction(conn, &out.transaction_id)).unwrap();
    assert_eq!(row.system_effect.as_deref(), Some("GLOBAL_LUCK_SURGE"));
}

#[test]
fn potential_accrues_on_credit_wins_when_enabled() {
    let engine = engine(Arc::new(ScriptedLuck::new(2.0)), "1000");
    let out = engine.settle_tribute_blocking(&req("SURE_THING")).unwrap();
    assert_eq!(out.potential_awarded, d("10"));
    assert_eq!(potential(&engine), d("10"));
    assert_eq!(count(&engine, "potential_accrual_log"), 1);
}

#[test]
fn potential_disabled_by_config() {
    let cfg = EngineConfig { potential_accrual_enabled: false, ..test_config() };
    let engine = engine_with(cfg, Arc::new(ScriptedLuck::new(2.0)), "1000");
    let out = engine.settle_tribute_blocking(&req("SURE_THING")).unwrap();
    assert_eq!(out.potential_awarded, Decimal::ZERO);
    assert_eq!(potential(&engine), Decimal::ZERO);
    assert_eq!(count(&engine, "potential_accrual_log"), 0);
}

#[test]
fn hollow_win_reduces_without_changing_label() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0).flow(0.9)), "1000000");
    let runs = 300;
    let mut hollow = 0;
    for _ in 0..runs {
        let out = engine.settle_tribute_blocking(&req("SURE_THING")).unwrap();
        assert_eq!(out.outcome, "uncommon");
        assert!(out.missed_upside == Decimal::ZERO || out.missed_upside == d("25"));
        let row = engine.with_conn(|conn| store::load_transaction(conn, &out.transaction_id)).unwrap();
        match row.hollow_win_factor {
            Some(f) => {
                hollow += 1;
                assert!((0.80..0.95).contains(&f), "factor {}", f);
                assert!(out.boon_amount < d("100"));
                assert!(out.boon_amount != d("75"));
            }
            None => assert!(out.boon_amount == d("75") || out.boon_amount == d("100")),
        }
    }
    let rate = hollow as f64 / runs as f64;
    assert!(rate > 0.2 && rate < 0.46, "hollow rate {}", rate);
}

#[test]
fn no_hollow_win_at_threshold_flow() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0).flow(0.75)), "100000");
    for _ in 0..50 {
        let out = engine.settle_tribute_blocking(&req("SURE_THING")).unwrap();
        let row = engine.with_conn(|conn| store::load_transaction(conn, &out.transaction_id)).unwrap();
        assert_eq!(row.hollow_win_factor, None);
    }
}

#[test]
fn zero_value_win_is_never_hollowed() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0).flow(0.99)), "100000");
    for _ in 0..60 {
        let out = engine.settle_tribute_blocking(&req("EMPTY_PROMISE")).unwrap();
        assert_eq!(out.outcome, "rare");
        assert_eq!(out.boon_amount, Decimal::ZERO);
        let row = engine.with_conn(|conn| store::load_transaction(conn, &out.transaction_id)).unwrap();
        assert_eq!(row.hollow_win_factor, None);
    }
}

#[test]
fn discovery_converted_on_first_tribute_only() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0)), "1000");
    assert!(engine.record_discovery(USER, "SURE_THING").unwrap());
    assert!(!engine.record_discovery(USER, "SURE_THING").unwrap());

    engine.settle_tribute_blocking(&req("SURE_THING")).unwrap();
    let first: (i64, Option<String>) = engine
        .with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT converted, converted_at FROM instrument_discovery WHERE user_id = ?1",
                [USER],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?)
        })
        .unwrap();
    assert_eq!(first.0, 1);
    assert_eq!(engine.with_conn(|conn| store::discovery_dtt(conn, USER, "SURE_THING")).unwrap(), Some(1));

    engine.settle_tribute_blocking(&req("SURE_THING")).unwrap();
    let again: Option<String> = engine
        .with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT converted_at FROM instrument_discovery WHERE user_id = ?1",
                [USER],
                |row| row.get(0),
            )?)
        })
        .unwrap();
    assert_eq!(again, first.1);
}

#[test]
fn unknown_instrument_is_configuration_error() {
    let luck = Arc::new(ScriptedLuck::new(1.0));
    let engine = engine(luck.clone(), "1000");

    let err = engine.settle_tribute_blocking(&req("NOPE")).unwrap_err();
    assert!(matches!(err, TributeError::UnknownInstrument(ref id) if id == "NOPE"));
    assert_eq!(err.class(), ErrorClass::Configuration);

    let orphan = engine.settle_tribute_blocking(&req("ORPHAN")).unwrap_err();
    assert!(matches!(orphan, TributeError::InvalidConfig(_)));

    assert_eq!(balance(&engine), d("1000"));
    assert_eq!(count(&engine, "transactions"), 0);
    assert_eq!(luck.wins() + luck.losses(), 0);
}

#[test]
fn provider_failure_rolls_back_everything() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0).failing()), "1000");
    set_profile(&engine, |p| p.double_tribute_active = true);

    let err = engine.settle_tribute_blocking(&req("SURE_THING")).unwrap_err();
    assert!(matches!(err, TributeError::Provider(_)));
    assert_eq!(err.class(), ErrorClass::Dependency);
    assert_eq!(balance(&engine), d("1000"));
    assert!(profile(&engine).double_tribute_active);
    assert_eq!(count(&engine, "transactions"), 0);
    assert_eq!(count(&engine, "potential_accrual_log"), 0);
}

#[test]
fn missing_workspace_is_dependency_error() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0)), "1000");
    let err = engine
        .settle_tribute_blocking(&TributeRequest::new(USER, "ws-missing", "SURE_THING"))
        .unwrap_err();
    assert!(matches!(err, TributeError::NotFound { entity: "workspace", .. }));
    assert_eq!(err.class(), ErrorClass::Dependency);
}

#[test]
fn outcome_serializes_camel_case() {
    let engine = engine(Arc::new(ScriptedLuck::new(1.0)), "1000");
    let out = engine.settle_tribute_blocking(&req("SURE_THING")).unwrap();
    let json = serde_json::to_value(&out).unwrap();
    assert_eq!(json["outcome"], "uncommon");
    assert!(json.get("boonAmount").is_some());
    assert!(json.get("missedUpside").is_some());
    assert!(json.get("awardedItem").is_none());
}

#[test]
fn seeded_engines_are_reproducible() {
    let run = || {
        let engine = engine(Arc::new(ScriptedLuck::new(1.0)), "100000");
        (0..30)
            .map(|_| engine.settle_tribute_blocking(&req("COIN_FLIP")).unwrap().outcome)
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}
