//! Persistable wallet snapshot.
//!
//! A snapshot is a JSON projection of wallet state sufficient to skip a full
//! rebuild on restart: payment code, known senders, per-zone block cursors,
//! per-channel address cursors, and timestamps. It carries no key material,
//! only a fingerprint the restore path checks against the supplied identity.
//! A wallet rebuilt from identity plus a fresh rescan converges to the same
//! state; the snapshot is an optimization, not the source of truth.

use crate::error::WalletError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Serialized wallet state. Zone and payment-code keys are stored as their
/// string forms to keep the document stable across versions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletSnapshot {
    /// SHA-256 fingerprint of the identity seed; no raw key material.
    pub identity_fingerprint: String,
    pub payment_code: String,
    pub known_senders: Vec<String>,
    /// Zone id -> last scanned block.
    pub block_cursors: BTreeMap<String, u64>,
    /// Counterparty code -> (zone id -> highest derived address index).
    pub channel_cursors: BTreeMap<String, BTreeMap<String, u32>>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl WalletSnapshot {
    pub fn to_json(&self) -> Result<String, WalletError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| WalletError::Serialization(format!("failed to serialize snapshot: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        serde_json::from_str(json)
            .map_err(|e| WalletError::Serialization(format!("failed to parse snapshot: {}", e)))
    }
}
