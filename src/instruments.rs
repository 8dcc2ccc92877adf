//! Static instrument configuration: the artifact manifest and per-instrument
//! rarity tables. Loaded once, validated, then shared read-only by every
//! settlement.

use std::collections::HashMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TributeError};

const BUILTIN_CATALOG: &str = include_str!("../config/instruments.json");

/// Tier ranks, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierRank {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
    Divine,
}

impl TierRank {
    /// Outcome label written to the ledger.
    pub fn label(&self) -> &'static str {
        match self {
            TierRank::Common => "common",
            TierRank::Uncommon => "uncommon",
            TierRank::Rare => "rare",
            TierRank::Epic => "epic",
            TierRank::Legendary => "legendary",
            TierRank::Divine => "divine",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoonKind {
    Credits,
    SpecialItem,
    SystemEffect,
}

/// Credit multiplier for `credits` boons, an item or effect key otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoonValue {
    Multiplier(f64),
    Key(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boon {
    #[serde(rename = "type")]
    pub kind: BoonKind,
    pub value: BoonValue,
    pub weight: f64,
}

impl Boon {
    pub fn credits(multiplier: f64, weight: f64) -> Self {
        Self { kind: BoonKind::Credits, value: BoonValue::Multiplier(multiplier), weight }
    }

    pub fn special_item(key: &str, weight: f64) -> Self {
        Self { kind: BoonKind::SpecialItem, value: BoonValue::Key(key.to_string()), weight }
    }

    pub fn system_effect(key: &str, weight: f64) -> Self {
        Self { kind: BoonKind::SystemEffect, value: BoonValue::Key(key.to_string()), weight }
    }

    pub fn multiplier(&self) -> Option<f64> {
        match (&self.kind, &self.value) {
            (BoonKind::Credits, BoonValue::Multiplier(m)) => Some(*m),
            _ => None,
        }
    }

    pub fn key(&self) -> Option<&str> {
        match (&self.kind, &self.value) {
            (BoonKind::SpecialItem | BoonKind::SystemEffect, BoonValue::Key(k)) => Some(k.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeTier {
    pub tier: TierRank,
    pub base_weight: f64,
    pub boons: Vec<Boon>,
}

impl OutcomeTier {
    pub fn new(tier: TierRank, base_weight: f64, boons: Vec<Boon>) -> Self {
        Self { tier, base_weight, boons }
    }

    pub fn credit_boons(&self) -> impl Iterator<Item = &Boon> {
        self.boons.iter().filter(|b| b.kind == BoonKind::Credits)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub id: String,
    pub tribute_cost: Decimal,
    pub rarity_table: Vec<OutcomeTier>,
}

impl InstrumentConfig {
    pub fn tier(&self, rank: TierRank) -> Option<&OutcomeTier> {
        self.rarity_table.iter().find(|t| t.tier == rank)
    }

    fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(TributeError::InvalidConfig(format!("{}: {}", self.id, msg)));

        if self.tribute_cost.is_sign_negative() {
            return bad(format!("negative tribute cost {}", self.tribute_cost));
        }
        if self.rarity_table.is_empty() {
            return bad("empty rarity table".to_string());
        }
        if self.tier(TierRank::Common).is_none() {
            return bad("rarity table has no Common tier".to_string());
        }
        for (i, tier) in self.rarity_table.iter().enumerate() {
            if self.rarity_table[..i].iter().any(|t| t.tier == tier.tier) {
                return bad(format!("duplicate {:?} tier", tier.tier));
            }
            if !tier.base_weight.is_finite() || tier.base_weight < 0.0 {
                return bad(format!("{:?} base weight {} must be non-negative", tier.tier, tier.base_weight));
            }
            if tier.boons.is_empty() {
                return bad(format!("{:?} tier has no boons", tier.tier));
            }
            for boon in &tier.boons {
                if !boon.weight.is_finite() || boon.weight < 0.0 {
                    return bad(format!("{:?} boon weight {} must be non-negative", tier.tier, boon.weight));
                }
                match boon.kind {
                    BoonKind::Credits => match boon.multiplier() {
                        Some(m) if m.is_finite() && m >= 0.0 => {}
                        _ => return bad(format!("{:?} credit boon needs a non-negative multiplier", tier.tier)),
                    },
                    BoonKind::SpecialItem | BoonKind::SystemEffect => match boon.key() {
                        Some(k) if !k.is_empty() => {}
                        _ => return bad(format!("{:?} {:?} boon needs a key", tier.tier, boon.kind)),
                    },
                }
            }
        }
        Ok(())
    }
}

/// Catalog entry for anything purchasable: instruments and the items they award.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub id: String,
    pub name: String,
    pub credit_cost: Decimal,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    manifests: Vec<ArtifactManifest>,
    instruments: Vec<InstrumentConfig>,
}

#[derive(Debug, Clone)]
pub struct ResolvedInstrument<'a> {
    pub config: &'a InstrumentConfig,
    pub manifest: Option<&'a ArtifactManifest>,
}

impl ResolvedInstrument<'_> {
    pub fn display_name(&self) -> &str {
        self.manifest.map(|m| m.name.as_str()).unwrap_or(&self.config.id)
    }

    /// Manifest cost when listed, otherwise the instrument's own tribute cost.
    pub fn default_tribute(&self) -> Decimal {
        self.manifest
            .map(|m| m.credit_cost)
            .unwrap_or(self.config.tribute_cost)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstrumentCatalog {
    manifests: HashMap<String, ArtifactManifest>,
    instruments: HashMap<String, InstrumentConfig>,
}

impl InstrumentCatalog {
    pub fn new(manifests: Vec<ArtifactManifest>, instruments: Vec<InstrumentConfig>) -> Result<Self> {
        let mut catalog = Self::default();
        for m in manifests {
            if catalog.manifests.contains_key(&m.id) {
                return Err(TributeError::InvalidConfig(format!("duplicate manifest entry {}", m.id)));
            }
            catalog.manifests.insert(m.id.clone(), m);
        }
        for inst in instruments {
            inst.validate()?;
            if catalog.instruments.contains_key(&inst.id) {
                return Err(TributeError::InvalidConfig(format!("duplicate instrument {}", inst.id)));
            }
            catalog.instruments.insert(inst.id.clone(), inst);
        }
        Ok(catalog)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(raw)
            .map_err(|e| TributeError::InvalidConfig(format!("instrument catalog: {}", e)))?;
        Self::new(file.manifests, file.instruments)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TributeError::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_CATALOG)
    }

    /// Looks an instrument up in both the manifest and the rarity tables.
    pub fn resolve(&self, instrument_id: &str) -> Result<ResolvedInstrument<'_>> {
        let manifest = self.manifests.get(instrument_id);
        match self.instruments.get(instrument_id) {
            Some(config) => Ok(ResolvedInstrument { config, manifest }),
            None if manifest.is_some() => Err(TributeError::InvalidConfig(format!(
                "instrument '{}' is in the manifest but has no rarity table",
                instrument_id
            ))),
            None => Err(TributeError::UnknownInstrument(instrument_id.to_string())),
        }
    }

    pub fn manifest(&self, id: &str) -> Option<&ArtifactManifest> {
        self.manifests.get(id)
    }

    pub fn item_cost(&self, id: &str) -> Option<Decimal> {
        self.manifests.get(id).map(|m| m.credit_cost)
    }

    pub fn instrument_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.instruments.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
