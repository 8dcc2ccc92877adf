//! Structured JSON-lines logging for tribute settlement.
//!
//! Every record carries a run id and a monotonically increasing sequence so a
//! settlement can be reconstructed from the log alongside the signed ledger.
//! Records go to stdout unless [`set_console`] routes them to stderr, which
//! command-line tools do so their own output stays machine-readable. When
//! `LOG_DIR` is set they are also appended to `$LOG_DIR/<run_id>/events.jsonl`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Tribute,  // Settlement lifecycle
    Modifier, // Tier rules, buffs, hollow wins
    Ledger,   // Balance mutation, ledger rows
    Pulse,    // Luck provider interaction
    Config,   // Startup configuration
    Audit,    // Signature checks, fairness-sensitive events
    System,   // Process lifecycle
    Profile,  // Timing
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Tribute => "tribute",
            Domain::Modifier => "modifier",
            Domain::Ledger => "ledger",
            Domain::Pulse => "pulse",
            Domain::Config => "config",
            Domain::Audit => "audit",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static CONSOLE_STDERR: AtomicBool = AtomicBool::new(false);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    Stderr,
}

pub fn set_console(console: Console) {
    CONSOLE_STDERR.store(console == Console::Stderr, Ordering::SeqCst);
}

pub fn console() -> Console {
    if CONSOLE_STDERR.load(Ordering::SeqCst) {
        Console::Stderr
    } else {
        Console::Stdout
    }
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let events = std::env::var("LOG_DIR").ok().and_then(|base| {
            let mut run_dir = PathBuf::from(base);
            run_dir.push(&run_id);
            if let Err(err) = create_dir_all(&run_dir) {
                eprintln!("[log] failed to create run dir: {}", err);
                return None;
            }
            match OpenOptions::new()
                .create(true)
                .append(true)
                .open(run_dir.join("events.jsonl"))
            {
                Ok(file) => Some(Mutex::new(BufWriter::new(file))),
                Err(err) => {
                    eprintln!("[log] failed to open events log: {}", err);
                    None
                }
            }
        });
        RunContext { run_id, events }
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["signature", "signing_secret", "secret", "authorization"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["user_id", "workspace_id", "instrument_id", "tx_id", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let (mut top, data) = split_fields(sanitize_fields(fields));

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    if let Some(events) = &ctx.events {
        if let Ok(mut w) = events.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
    match console() {
        Console::Stdout => println!("{}", line),
        Console::Stderr => eprintln!("{}", line),
    }
}

// =============================================================================
// Domain helpers
// =============================================================================

pub fn log_settlement(
    tx_id: &str,
    user_id: &str,
    workspace_id: &str,
    instrument_id: &str,
    outcome: &str,
    tribute_amount: &str,
    boon_amount: &str,
    net_amount: &str,
) {
    log(
        Level::Info,
        Domain::Tribute,
        "settled",
        obj(&[
            ("tx_id", v_str(tx_id)),
            ("user_id", v_str(user_id)),
            ("workspace_id", v_str(workspace_id)),
            ("instrument_id", v_str(instrument_id)),
            ("outcome", v_str(outcome)),
            ("tribute_amount", v_str(tribute_amount)),
            ("boon_amount", v_str(boon_amount)),
            ("net_amount", v_str(net_amount)),
        ]),
    );
}

pub fn log_rejection(user_id: &str, instrument_id: &str, reason: &str, detail: &str) {
    log(
        Level::Warn,
        Domain::Tribute,
        "rejected",
        obj(&[
            ("user_id", v_str(user_id)),
            ("instrument_id", v_str(instrument_id)),
            ("reason", v_str(reason)),
            ("detail", v_str(detail)),
        ]),
    );
}

pub fn log_tier_rule(user_id: &str, rule: &str, tier: &str) {
    log(
        Level::Debug,
        Domain::Modifier,
        "tier_rule",
        obj(&[("user_id", v_str(user_id)), ("rule", v_str(rule)), ("tier", v_str(tier))]),
    );
}

pub fn log_buff_consumed(user_id: &str, buff: &str) {
    log(
        Level::Info,
        Domain::Modifier,
        "buff_consumed",
        obj(&[("user_id", v_str(user_id)), ("buff", v_str(buff))]),
    );
}

/// Hollow wins never reach the outcome label; this record is their audit trail.
pub fn log_hollow_win(user_id: &str, instrument_id: &str, factor: f64, nominal: &str, paid: &str) {
    log(
        Level::Info,
        Domain::Audit,
        "hollow_win",
        obj(&[
            ("user_id", v_str(user_id)),
            ("instrument_id", v_str(instrument_id)),
            ("factor", v_num(factor)),
            ("reduction_pct", v_num((1.0 - factor) * 100.0)),
            ("nominal", v_str(nominal)),
            ("paid", v_str(paid)),
        ]),
    );
}

pub fn log_potential(workspace_id: &str, user_id: &str, amount: &str) {
    log(
        Level::Info,
        Domain::Ledger,
        "potential_accrued",
        obj(&[
            ("workspace_id", v_str(workspace_id)),
            ("user_id", v_str(user_id)),
            ("amount", v_str(amount)),
        ]),
    );
}

pub fn log_verification(checked: usize, tampered: usize) {
    let level = if tampered == 0 { Level::Info } else { Level::Error };
    log(
        level,
        Domain::Audit,
        "ledger_verified",
        obj(&[("checked", json!(checked)), ("tampered", json!(tampered))]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Emits a `profile` record with elapsed time on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self::with_context(label, &[])
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Self::should_sample();
        Self {
            label,
            context: if enabled { Some(obj(fields)) } else { None },
            started: Instant::now(),
            enabled,
        }
    }

    fn should_sample() -> bool {
        std::env::var("PROFILE_SAMPLE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|p| {
                if p >= 1.0 {
                    true
                } else if p <= 0.0 {
                    false
                } else {
                    let seq = PROFILE_SEQ.fetch_add(1, Ordering::SeqCst);
                    let bucket = (seq % 10_000) as f64 / 10_000.0;
                    bucket < p
                }
            })
            .unwrap_or(true)
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}
