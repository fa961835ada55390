//! Wallet observer registry.
//!
//! Payment-received and sender-discovered callbacks are stored with a stable
//! subscription id; registration hands back a handle that removes exactly
//! that callback. Dispatch isolates callbacks from each other: an error from
//! one is logged and the rest still run, and no callback failure aborts the
//! sync that emitted the event. The callback list is snapshotted before
//! dispatch, so a callback may subscribe or unsubscribe re-entrantly; a
//! removal during dispatch takes effect from the next emit.

use crate::keys::PaymentCode;
use crate::ledger::Outpoint;
use crate::zone::Zone;

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tracing::error;

/// Emitted once per newly observed outpoint.
#[derive(Debug, Clone)]
pub struct PaymentReceived {
    pub outpoint: Outpoint,
    /// Qit value from the denomination table.
    pub amount: u128,
    pub zone: Zone,
    pub timestamp: DateTime<Utc>,
}

/// Emitted once per newly discovered counterparty code.
#[derive(Debug, Clone)]
pub struct SenderDiscovered {
    pub sender: PaymentCode,
    pub timestamp: DateTime<Utc>,
}

type CallbackResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type PaymentCallback = Arc<dyn Fn(&PaymentReceived) -> CallbackResult + Send + Sync>;
type SenderCallback = Arc<dyn Fn(&SenderDiscovered) -> CallbackResult + Send + Sync>;

/// Handle returned by a subscription; pass back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

#[derive(Default)]
struct Observers {
    next_id: u64,
    payment: Vec<(u64, PaymentCallback)>,
    sender: Vec<(u64, SenderCallback)>,
}

impl Observers {
    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Ordered registry of wallet observers.
#[derive(Default)]
pub struct ObserverRegistry {
    inner: Mutex<Observers>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_payment_received<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&PaymentReceived) -> CallbackResult + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.alloc_id();
        inner.payment.push((id, Arc::new(callback)));
        SubscriptionHandle(id)
    }

    pub fn on_sender_discovered<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&SenderDiscovered) -> CallbackResult + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.alloc_id();
        inner.sender.push((id, Arc::new(callback)));
        SubscriptionHandle(id)
    }

    /// Remove the callback registered under `handle`, whichever list holds it.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut inner = self.inner.lock().unwrap();
        inner.payment.retain(|(id, _)| *id != handle.0);
        inner.sender.retain(|(id, _)| *id != handle.0);
    }

    pub fn emit_payment(&self, event: &PaymentReceived) {
        // Snapshot under the lock, dispatch outside it.
        let callbacks: Vec<(u64, PaymentCallback)> =
            self.inner.lock().unwrap().payment.clone();
        for (id, callback) in callbacks {
            if let Err(e) = callback(event) {
                error!("Payment observer {} failed: {}", id, e);
            }
        }
    }

    pub fn emit_sender(&self, event: &SenderDiscovered) {
        let callbacks: Vec<(u64, SenderCallback)> =
            self.inner.lock().unwrap().sender.clone();
        for (id, callback) in callbacks {
            if let Err(e) = callback(event) {
                error!("Sender observer {} failed: {}", id, e);
            }
        }
    }
}
