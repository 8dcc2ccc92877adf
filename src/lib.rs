//! Probabilistic tribute settlement with a signed, append-only ledger.

pub mod config;
pub mod engine;
pub mod error;
pub mod instruments;
pub mod ledger;
pub mod logging;
pub mod modifiers;
pub mod outcome;
pub mod pulse;
pub mod selector;

pub use config::{EngineConfig, Environment};
pub use engine::{TributeEngine, TributeOutcome, TributeRequest, TributeSettler};
pub use error::{ErrorClass, Result, TributeError};
pub use instruments::InstrumentCatalog;
pub use pulse::{LuckProvider, PulseProfile, SqlitePulse};
