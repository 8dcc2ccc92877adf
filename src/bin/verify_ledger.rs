//! Ledger signature audit.
//!
//! Recomputes the HMAC of every transaction and potential-accrual row with
//! the configured signing secret and lists rows whose stored signature no
//! longer matches. Exits non-zero when anything was tampered with.
//!
//! Usage: verify_ledger [db_path]

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};

use tribute_engine::ledger::{verify_all, Signer};
use tribute_engine::logging::{set_console, Console};
use tribute_engine::EngineConfig;

fn main() -> Result<()> {
    set_console(Console::Stderr);
    let cfg = EngineConfig::from_env();
    cfg.validate()?;
    let path = std::env::args().nth(1).unwrap_or_else(|| cfg.sqlite_path.clone());

    let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("opening {}", path))?;
    let signer = Signer::new(&cfg.signing_secret);

    println!("=== Ledger Signature Audit ===\n");
    println!("Database: {}", path);
    if cfg.uses_dev_secret() {
        println!("Warning: verifying with the development signing secret");
    }

    let report = verify_all(&conn, &signer)?;
    println!("Transactions checked: {}", report.transactions_checked);
    println!("Potential rows checked: {}", report.potential_checked);
    for id in &report.tampered_transactions {
        println!("  TAMPERED transaction {}", id);
    }
    for id in &report.tampered_potential {
        println!("  TAMPERED potential {}", id);
    }
    println!("Status: {}", if report.is_clean() { "OK" } else { "TAMPERED" });

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
