use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::Sha256;

use crate::error::{Result, TributeError};

type HmacSha256 = Hmac<Sha256>;

/// Fixed 8-place string used for every amount inside a signed payload.
pub fn fixed8(amount: Decimal) -> String {
    format!("{:.8}", amount)
}

/// Canonical signed form of a transaction row. Field order is the wire order.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload<'a> {
    pub workspace_id: &'a str,
    pub user_id: &'a str,
    pub instrument_id: &'a str,
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub amount: String,
    pub outcome: &'a str,
    pub tribute_amount: String,
    pub boon_amount: String,
    pub timestamp: &'a str,
}

/// Canonical signed form of a potential accrual row.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PotentialPayload<'a> {
    pub workspace_id: &'a str,
    pub user_id: &'a str,
    pub instrument_id: &'a str,
    pub potential_awarded: String,
    pub timestamp: &'a str,
}

/// HMAC-SHA256 over canonical JSON, hex encoded. Tamper evidence only.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl Signer {
    pub fn new(secret: &str) -> Self {
        Self { key: secret.as_bytes().to_vec() }
    }

    fn mac_for<T: Serialize>(&self, payload: &T) -> Result<HmacSha256> {
        let canonical = serde_json::to_vec(payload)
            .map_err(|e| TributeError::Signing(format!("canonicalize: {}", e)))?;
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| TributeError::Signing(format!("HMAC error: {}", e)))?;
        mac.update(&canonical);
        Ok(mac)
    }

    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<String> {
        Ok(hex::encode(self.mac_for(payload)?.finalize().into_bytes()))
    }

    /// Constant-time comparison against a stored hex digest.
    pub fn verify<T: Serialize>(&self, payload: &T, signature_hex: &str) -> Result<bool> {
        let Ok(expected) = hex::decode(signature_hex) else {
            return Ok(false);
        };
        Ok(self.mac_for(payload)?.verify_slice(&expected).is_ok())
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer([REDACTED])")
    }
}
