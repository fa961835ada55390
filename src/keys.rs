//! Identity, payment codes, and address derivation.
//!
//! An `Identity` is the wallet's root seed, created once at wallet creation
//! or import and immutable afterwards. Its published `PaymentCode` (Bech32m,
//! HRP `qipc`) is the one identifier a holder shares; receive addresses are
//! derived per counterparty and are unlinkable to the code on-chain.
//!
//! The elliptic-curve shared-secret math itself is a collaborator concern,
//! behind the `AddressDeriver` seam. `HashDeriver` is the built-in
//! deterministic implementation.

use crate::error::WalletError;
use crate::zone::Zone;

use bech32::{Bech32m, Hrp};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Human-readable part of every payment code.
pub const PAYMENT_CODE_HRP: &str = "qipc";

/// Root key material for one wallet. Never serialized into snapshots; the
/// snapshot carries only a fingerprint (see [`Identity::fingerprint`]).
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    seed: [u8; 32],
}

impl Identity {
    /// Create a fresh identity from OS randomness.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill(&mut seed);
        Self { seed }
    }

    /// Import an identity from a 64-char hex seed.
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, WalletError> {
        let bytes = hex::decode(seed_hex)
            .map_err(|e| WalletError::Serialization(format!("invalid identity seed hex: {}", e)))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WalletError::Serialization("identity seed must be 32 bytes".to_string()))?;
        Ok(Self { seed })
    }

    /// The raw seed, for the key-service collaborator only.
    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    /// Hex form of the seed, for export to secure storage.
    pub fn seed_hex(&self) -> String {
        hex::encode(self.seed)
    }

    /// SHA-256 fingerprint of the seed. Safe to persist; lets a snapshot be
    /// matched against an identity without embedding key material.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"qi-identity-fp");
        hasher.update(self.seed);
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Seed stays out of logs.
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// A stable, publishable payment code (Bech32m, HRP `qipc`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PaymentCode(String);

impl PaymentCode {
    /// Parse and validate a payment code string.
    pub fn parse(code: &str) -> Result<Self, WalletError> {
        let (hrp, data) = bech32::decode(code)
            .map_err(|e| WalletError::InvalidCounterpartyCode(format!("{}: {}", code, e)))?;
        if hrp.as_str() != PAYMENT_CODE_HRP {
            return Err(WalletError::InvalidCounterpartyCode(format!(
                "{}: expected HRP '{}', got '{}'",
                code,
                PAYMENT_CODE_HRP,
                hrp.as_str()
            )));
        }
        if data.len() != 32 {
            return Err(WalletError::InvalidCounterpartyCode(format!(
                "{}: payload must be 32 bytes, got {}",
                code,
                data.len()
            )));
        }
        Ok(Self(code.to_string()))
    }

    /// Encode 32 bytes of public derivation material as a payment code.
    pub fn from_material(material: &[u8; 32]) -> Self {
        let hrp = Hrp::parse(PAYMENT_CODE_HRP).expect("static HRP is valid");
        let encoded = bech32::encode::<Bech32m>(hrp, material).expect("32-byte payload encodes");
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(20)]
    }
}

impl fmt::Display for PaymentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A derived receive address within one zone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key-service seam for payment-code and address derivation.
///
/// Both operations must be pure and deterministic in their inputs: replaying
/// an index after a crash yields the same address, and re-deriving never
/// changes a previously derived address.
pub trait AddressDeriver: Send + Sync {
    /// Derive the wallet's own payment code (index 0 of the identity).
    fn derive_payment_code(&self, identity: &Identity) -> PaymentCode;

    /// Derive the receive address at `index` for the channel between
    /// `identity` and `counterparty` in `zone`.
    fn derive_address(
        &self,
        identity: &Identity,
        counterparty: &PaymentCode,
        zone: Zone,
        index: u32,
    ) -> Address;
}

/// Deterministic SHA-256 based deriver.
///
/// Stands in for the elliptic-curve shared-secret derivation; same contract,
/// same determinism, no curve dependency.
#[derive(Debug, Clone, Default)]
pub struct HashDeriver;

impl AddressDeriver for HashDeriver {
    fn derive_payment_code(&self, identity: &Identity) -> PaymentCode {
        let mut hasher = Sha256::new();
        hasher.update(b"qi-payment-code");
        hasher.update(identity.seed());
        hasher.update(0u32.to_le_bytes());
        let material: [u8; 32] = hasher.finalize().into();
        PaymentCode::from_material(&material)
    }

    fn derive_address(
        &self,
        identity: &Identity,
        counterparty: &PaymentCode,
        zone: Zone,
        index: u32,
    ) -> Address {
        let mut hasher = Sha256::new();
        hasher.update(b"qi-channel-address");
        hasher.update(identity.seed());
        hasher.update(counterparty.as_str().as_bytes());
        hasher.update(zone.id().as_bytes());
        hasher.update(index.to_le_bytes());
        let digest = hasher.finalize();
        Address(format!("0x{}", hex::encode(&digest[..20])))
    }
}
