use std::fmt;

use crate::error::{Result, TributeError};

/// Signing secret used when `TRIBUTE_SIGNING_SECRET` is unset. Never valid in production.
pub const DEV_SIGNING_SECRET: &str = "default_secret_for_dev";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        match std::env::var("TRIBUTE_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("test") => Environment::Test,
            _ => Environment::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }
}

#[derive(Clone)]
pub struct EngineConfig {
    pub sqlite_path: String,
    pub signing_secret: String,
    pub environment: Environment,
    /// Award potential on qualifying credit wins.
    pub potential_accrual_enabled: bool,
    pub potential_rate: f64,
    /// The instrument a guaranteed-win buff is granted for.
    pub guaranteed_win_instrument: String,
    pub hollow_win_flow_threshold: f64,
    pub hollow_win_probability: f64,
    /// JSON instrument catalog; the built-in catalog is used when unset.
    pub instruments_path: Option<String>,
    pub busy_timeout_ms: u64,
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "./tribute.sqlite".to_string(),
            signing_secret: DEV_SIGNING_SECRET.to_string(),
            environment: Environment::Development,
            potential_accrual_enabled: true,
            potential_rate: 0.1,
            guaranteed_win_instrument: "SISYPHUSS_ASCENT".to_string(),
            hollow_win_flow_threshold: 0.75,
            hollow_win_probability: 1.0 / 3.0,
            instruments_path: None,
            busy_timeout_ms: 5000,
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            sqlite_path: std::env::var("TRIBUTE_DB").unwrap_or(d.sqlite_path),
            signing_secret: std::env::var("TRIBUTE_SIGNING_SECRET").ok().filter(|s| !s.is_empty()).unwrap_or(d.signing_secret),
            environment: Environment::from_env(),
            potential_accrual_enabled: std::env::var("POTENTIAL_ACCRUAL").map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(d.potential_accrual_enabled),
            potential_rate: std::env::var("POTENTIAL_RATE").ok().and_then(|v| v.parse().ok()).unwrap_or(d.potential_rate),
            guaranteed_win_instrument: std::env::var("GUARANTEED_WIN_INSTRUMENT").unwrap_or(d.guaranteed_win_instrument),
            hollow_win_flow_threshold: std::env::var("HOLLOW_WIN_FLOW_TH").ok().and_then(|v| v.parse().ok()).unwrap_or(d.hollow_win_flow_threshold),
            hollow_win_probability: std::env::var("HOLLOW_WIN_PROB").ok().and_then(|v| v.parse().ok()).unwrap_or(d.hollow_win_probability),
            instruments_path: std::env::var("INSTRUMENTS_PATH").ok(),
            busy_timeout_ms: std::env::var("TRIBUTE_BUSY_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.busy_timeout_ms),
            rng_seed: std::env::var("TRIBUTE_SEED").ok().and_then(|v| v.parse().ok()),
        }
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.signing_secret.is_empty() || self.signing_secret == DEV_SIGNING_SECRET
    }

    /// Refuses to run production with the development signing secret.
    pub fn validate(&self) -> Result<()> {
        if self.uses_dev_secret() && self.environment == Environment::Production {
            return Err(TributeError::Config(
                "TRIBUTE_SIGNING_SECRET must be set to a non-default value in production".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.hollow_win_probability) {
            return Err(TributeError::Config(format!(
                "hollow_win_probability {} outside [0, 1]",
                self.hollow_win_probability
            )));
        }
        if !self.potential_rate.is_finite() || self.potential_rate < 0.0 {
            return Err(TributeError::Config(format!(
                "potential_rate {} must be a non-negative number",
                self.potential_rate
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("sqlite_path", &self.sqlite_path)
            .field("signing_secret", &"[REDACTED]")
            .field("environment", &self.environment)
            .field("potential_accrual_enabled", &self.potential_accrual_enabled)
            .field("potential_rate", &self.potential_rate)
            .field("guaranteed_win_instrument", &self.guaranteed_win_instrument)
            .field("hollow_win_flow_threshold", &self.hollow_win_flow_threshold)
            .field("hollow_win_probability", &self.hollow_win_probability)
            .field("instruments_path", &self.instruments_path)
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .field("rng_seed", &self.rng_seed)
            .finish()
    }
}
