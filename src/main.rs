//! `tribute` command line.
//!
//! Usage:
//!   tribute init
//!   tribute seed <user_id> <workspace_id> <credits> [psyche]
//!   tribute settle <user_id> <workspace_id> <instrument_id> [tribute_amount]
//!   tribute discover <user_id> <instrument_id>
//!   tribute history <workspace_id> [limit]
//!
//! Configuration comes from the environment (`TRIBUTE_DB`,
//! `TRIBUTE_SIGNING_SECRET`, ...). Results are printed to stdout as JSON;
//! log records go to stderr.

use anyhow::{anyhow, bail, Context, Result};
use rust_decimal::Decimal;
use serde_json::json;

use tribute_engine::ledger::store;
use tribute_engine::logging::{log, obj, set_console, v_str, Console, Domain, Level};
use tribute_engine::modifiers::Psyche;
use tribute_engine::{EngineConfig, TributeEngine, TributeRequest};

const USAGE: &str = "usage: tribute <init|seed|settle|discover|history> [args...]";

fn arg<'a>(args: &'a [String], idx: usize, name: &str) -> Result<&'a str> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing <{}>\n{}", name, USAGE))
}

fn parse_amount(raw: &str) -> Result<Decimal> {
    raw.parse::<Decimal>()
        .with_context(|| format!("invalid amount '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    set_console(Console::Stderr);
    let args: Vec<String> = std::env::args().collect();
    let cmd = arg(&args, 1, "command")?;

    let cfg = EngineConfig::from_env();
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("command", v_str(cmd)),
            ("db", v_str(&cfg.sqlite_path)),
            ("environment", v_str(cfg.environment.as_str())),
        ]),
    );
    let engine = TributeEngine::open(cfg)?;

    match cmd {
        "init" => {
            let ids = engine.catalog().instrument_ids();
            println!("{}", json!({ "initialized": true, "instruments": ids }));
        }
        "seed" => {
            let user_id = arg(&args, 2, "user_id")?;
            let workspace_id = arg(&args, 3, "workspace_id")?;
            let credits = parse_amount(arg(&args, 4, "credits")?)?;
            let psyche = args.get(5).map(String::as_str).unwrap_or("ZEN_ARCHITECT");
            if Psyche::parse(psyche).is_none() {
                bail!("unknown psyche '{}'", psyche);
            }
            engine.with_conn(|conn| {
                store::upsert_user(conn, user_id, psyche)?;
                store::upsert_workspace(conn, workspace_id, credits)
            })?;
            println!(
                "{}",
                json!({ "user": user_id, "workspace": workspace_id, "credits": credits.to_string(), "psyche": psyche })
            );
        }
        "settle" => {
            let mut req = TributeRequest::new(
                arg(&args, 2, "user_id")?,
                arg(&args, 3, "workspace_id")?,
                arg(&args, 4, "instrument_id")?,
            );
            if let Some(raw) = args.get(5) {
                req = req.with_tribute(parse_amount(raw)?);
            }
            let outcome = engine.settle_tribute(req).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        "discover" => {
            let user_id = arg(&args, 2, "user_id")?;
            let instrument_id = arg(&args, 3, "instrument_id")?;
            engine.catalog().resolve(instrument_id)?;
            let first_view = engine.record_discovery(user_id, instrument_id)?;
            println!("{}", json!({ "user": user_id, "instrument": instrument_id, "first_view": first_view }));
        }
        "history" => {
            let workspace_id = arg(&args, 2, "workspace_id")?;
            let limit = match args.get(3) {
                Some(raw) => raw.parse::<usize>().with_context(|| format!("invalid limit '{}'", raw))?,
                None => 20,
            };
            let rows = engine.recent_transactions(workspace_id, limit)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }
    Ok(())
}
