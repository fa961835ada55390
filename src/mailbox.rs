//! Notification mailbox client.
//!
//! The mailbox is an on-chain registry recording sender -> receiver payment
//! intents. A sender must notify a receiver once before the first payment,
//! or the receiver can never derive the addresses the funds sit on. The
//! registry is append-safe: duplicate notifies collapse into one logical
//! fact, and the query result is treated with set semantics here.

use crate::error::{RpcError, WalletError};
use crate::keys::PaymentCode;

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Durability receipt for a notify call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationReceipt {
    /// Hash of the registry transaction.
    pub tx_hash: String,
}

/// A pushed `NotificationSent(sender, receiver)` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub sender: PaymentCode,
    pub receiver: PaymentCode,
}

/// The on-chain notification registry surface: one state-mutating call and
/// one read-only call.
#[async_trait::async_trait]
pub trait NotificationRegistry: Send + Sync {
    /// Record that `sender` intends to pay `receiver`. Must be append-safe;
    /// the caller may retry on transport failure.
    async fn notify(
        &self,
        sender: &PaymentCode,
        receiver: &PaymentCode,
    ) -> Result<NotificationReceipt, RpcError>;

    /// All sender codes that have ever notified `receiver`.
    async fn get_notifications(&self, receiver: &PaymentCode) -> Result<Vec<String>, RpcError>;
}

/// Client over the registry collaborator, adding parse/dedup semantics and
/// the protocol-level error split.
#[derive(Clone)]
pub struct MailboxClient {
    registry: Arc<dyn NotificationRegistry>,
}

impl MailboxClient {
    pub fn new(registry: Arc<dyn NotificationRegistry>) -> Self {
        Self { registry }
    }

    /// Send a notification and await its durability confirmation.
    pub async fn notify(
        &self,
        sender: &PaymentCode,
        receiver: &PaymentCode,
    ) -> Result<NotificationReceipt, WalletError> {
        let receipt = self
            .registry
            .notify(sender, receiver)
            .await
            .map_err(WalletError::MailboxWriteFailed)?;
        debug!(
            "Mailbox notification {} -> {} durable in tx {}",
            sender.short(),
            receiver.short(),
            receipt.tx_hash
        );
        Ok(receipt)
    }

    /// All senders that have ever notified `receiver`, as a set.
    ///
    /// A transport failure surfaces as `MailboxQueryFailed`; it is never
    /// collapsed into an empty mailbox. Entries that fail to parse as
    /// payment codes are skipped with a warning.
    pub async fn list_notifications(
        &self,
        receiver: &PaymentCode,
    ) -> Result<BTreeSet<PaymentCode>, WalletError> {
        let raw = self
            .registry
            .get_notifications(receiver)
            .await
            .map_err(WalletError::MailboxQueryFailed)?;

        let mut senders = BTreeSet::new();
        for entry in raw {
            match PaymentCode::parse(&entry) {
                Ok(code) => {
                    senders.insert(code);
                }
                Err(e) => warn!("Skipping malformed mailbox entry: {}", e),
            }
        }
        Ok(senders)
    }

    /// Whether `sender` already appears in `receiver`'s mailbox. This is the
    /// dedup gate the send flow uses to avoid redundant notify calls.
    pub async fn has_notified(
        &self,
        sender: &PaymentCode,
        receiver: &PaymentCode,
    ) -> Result<bool, WalletError> {
        Ok(self.list_notifications(receiver).await?.contains(sender))
    }
}
