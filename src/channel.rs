//! Payment channels and the per-counterparty registry.
//!
//! A channel is the derivation relationship between this identity and one
//! counterparty payment code. Opening a channel is what makes the
//! counterparty's payments discoverable: the scanner's watch list for a zone
//! is built strictly from channels in `Open` state, so an unopened
//! counterparty can never be scanned regardless of call order.

use crate::error::WalletError;
use crate::keys::PaymentCode;
use crate::zone::Zone;

use std::collections::BTreeMap;
use tracing::debug;

/// Channel lifecycle. Channels are never destroyed, only persisted or
/// forgotten with the wallet state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unopened,
    Open,
}

/// Derivation state for one counterparty.
#[derive(Debug, Clone)]
pub struct Channel {
    counterparty: PaymentCode,
    state: ChannelState,
    /// Highest derived address index per zone. Only ever increases.
    cursors: BTreeMap<Zone, u32>,
}

impl Channel {
    fn new(counterparty: PaymentCode) -> Self {
        Self {
            counterparty,
            state: ChannelState::Unopened,
            cursors: BTreeMap::new(),
        }
    }

    pub fn counterparty(&self) -> &PaymentCode {
        &self.counterparty
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Next address index to derive for `zone`.
    pub fn cursor(&self, zone: Zone) -> u32 {
        self.cursors.get(&zone).copied().unwrap_or(0)
    }

    /// Advance the cursor for `zone`. Monotonic: a lower index is a no-op.
    pub fn advance_cursor(&mut self, zone: Zone, index: u32) {
        let entry = self.cursors.entry(zone).or_insert(0);
        *entry = (*entry).max(index);
    }

    pub fn cursors(&self) -> &BTreeMap<Zone, u32> {
        &self.cursors
    }

    /// Restore a persisted cursor map, keeping monotonicity.
    pub fn restore_cursors(&mut self, cursors: BTreeMap<Zone, u32>) {
        for (zone, index) in cursors {
            self.advance_cursor(zone, index);
        }
    }
}

/// All channels known to one wallet, keyed by counterparty code. At most one
/// channel per counterparty.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<PaymentCode, Channel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or return) the channel with `counterparty`.
    ///
    /// Validates the code and is idempotent: re-opening an already-open
    /// channel returns it untouched, so previously derived addresses and
    /// cursors never change.
    pub fn open(&mut self, counterparty: &str) -> Result<&mut Channel, WalletError> {
        let code = PaymentCode::parse(counterparty)?;
        self.open_parsed(code)
    }

    /// Open with an already validated code.
    pub fn open_parsed(&mut self, code: PaymentCode) -> Result<&mut Channel, WalletError> {
        let channel = self
            .channels
            .entry(code.clone())
            .or_insert_with(|| Channel::new(code.clone()));
        if channel.state == ChannelState::Unopened {
            channel.state = ChannelState::Open;
            debug!("Opened payment channel with {}...", code.short());
        }
        Ok(channel)
    }

    pub fn get(&self, counterparty: &PaymentCode) -> Option<&Channel> {
        self.channels.get(counterparty)
    }

    pub fn get_mut(&mut self, counterparty: &PaymentCode) -> Option<&mut Channel> {
        self.channels.get_mut(counterparty)
    }

    /// Channels currently in `Open` state, in stable (code) order. This is
    /// the scanner's watch list.
    pub fn open_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values().filter(|c| c.is_open())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
