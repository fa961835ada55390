//! Error taxonomy for the wallet.
//!
//! Two layers, matching the transport/protocol split: `RpcError` covers the
//! node transport (HTTP, WebSocket, JSON), `WalletError` covers the protocol
//! itself. Per-zone and per-counterparty failures are isolated by callers;
//! whole-wallet failures (serialization, identity derivation) propagate.

use crate::zone::Zone;

/// Transport-level errors from the node RPC endpoints.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("no data returned")]
    NoData,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Protocol-level wallet errors.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// A counterparty payment code failed to parse. Terminal for that one
    /// channel open; callers keep going with the rest.
    #[error("invalid counterparty payment code: {0}")]
    InvalidCounterpartyCode(String),

    /// Denomination index outside the fixed value table.
    #[error("invalid denomination index: {index}")]
    InvalidDenomination { index: u8 },

    /// A human-readable amount string failed to parse.
    #[error("invalid Qi amount: {0}")]
    InvalidAmount(String),

    /// The mailbox could not be read. Distinct from an empty mailbox.
    #[error("mailbox query failed: {0}")]
    MailboxQueryFailed(#[source] RpcError),

    /// A notify call could not be made durable.
    #[error("mailbox write failed: {0}")]
    MailboxWriteFailed(#[source] RpcError),

    /// Scanning one zone failed. Does not abort a multi-zone scan.
    #[error("scan failed for zone {zone}: {source}")]
    ScanFailed {
        zone: Zone,
        #[source]
        source: RpcError,
    },

    /// The origin zone cannot cover the requested amount.
    #[error("insufficient funds: have {available} Qit, need {required} Qit")]
    InsufficientFunds { available: u128, required: u128 },

    /// The value transfer itself failed. Any notify made beforehand is
    /// already durable in the registry, so a retry will skip the notify.
    #[error("transfer failed: {reason}")]
    TransferFailed {
        reason: String,
        /// Hash of the notify transaction issued during this send, if one was.
        notify_tx: Option<String>,
    },

    /// Corrupt or incompatible snapshot. Fatal for that restore call only.
    #[error("snapshot serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}
