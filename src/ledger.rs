//! Local UTXO ledger state.
//!
//! Holds the outpoint set and the per-zone block cursors. Outpoints are
//! unique by `(txid, output index, zone)`; the scanner inserts newly seen
//! unspent outputs and drops ones a rescan shows spent. Balances are derived
//! here from the denomination table, never stored.

use crate::denomination::denomination_value;
use crate::error::WalletError;
use crate::keys::Address;
use crate::zone::Zone;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Uniqueness key for a spendable output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutpointKey {
    pub txid: String,
    pub index: u32,
    pub zone: Zone,
}

/// One spendable unit of value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outpoint {
    pub txid: String,
    pub index: u32,
    pub zone: Zone,
    /// Index into the fixed denomination table, not a raw amount.
    pub denomination: u8,
    pub address: Address,
}

impl Outpoint {
    pub fn key(&self) -> OutpointKey {
        OutpointKey {
            txid: self.txid.clone(),
            index: self.index,
            zone: self.zone,
        }
    }
}

/// Balance for one zone, derived from live outpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneBalance {
    pub zone: Zone,
    /// Spendable balance in Qit.
    pub balance: u128,
    pub utxo_count: usize,
    /// Locked/unconfirmed subtotal in Qit.
    pub locked_balance: u128,
}

/// Warning recorded when one zone's balance could not be derived.
#[derive(Debug, Clone)]
pub struct BalanceWarning {
    pub zone: Zone,
    pub reason: String,
}

/// Total across all zones, degrading gracefully: a failing zone contributes
/// zero plus a warning instead of aborting the whole total.
#[derive(Debug, Clone)]
pub struct TotalBalance {
    /// Sum in Qit over every zone that could be derived.
    pub total: u128,
    pub warnings: Vec<BalanceWarning>,
}

/// The wallet's view of chain state.
#[derive(Debug, Default)]
pub struct LedgerState {
    outpoints: BTreeMap<OutpointKey, Outpoint>,
    /// Last scanned block per zone. Mutated only after a successful scan.
    block_cursors: BTreeMap<Zone, u64>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an outpoint if absent. Returns true when it was newly added.
    pub fn insert(&mut self, outpoint: Outpoint) -> bool {
        let key = outpoint.key();
        if self.outpoints.contains_key(&key) {
            return false;
        }
        self.outpoints.insert(key, outpoint);
        true
    }

    /// Drop a previously recorded outpoint (observed spent on rescan).
    pub fn remove(&mut self, key: &OutpointKey) -> Option<Outpoint> {
        self.outpoints.remove(key)
    }

    pub fn contains(&self, key: &OutpointKey) -> bool {
        self.outpoints.contains_key(key)
    }

    pub fn outpoints(&self) -> impl Iterator<Item = &Outpoint> {
        self.outpoints.values()
    }

    /// Live outpoints in one zone.
    pub fn outpoints_in(&self, zone: Zone) -> impl Iterator<Item = &Outpoint> {
        self.outpoints.values().filter(move |o| o.zone == zone)
    }

    /// Sum denomination values of all live outpoints in `zone`.
    ///
    /// An outpoint with an index outside the table poisons the zone's
    /// balance with `InvalidDenomination` rather than contributing zero.
    pub fn balance(&self, zone: Zone) -> Result<ZoneBalance, WalletError> {
        let mut balance = 0u128;
        let mut utxo_count = 0usize;
        for outpoint in self.outpoints_in(zone) {
            balance = balance.saturating_add(denomination_value(outpoint.denomination)?);
            utxo_count += 1;
        }
        Ok(ZoneBalance {
            zone,
            balance,
            utxo_count,
            locked_balance: 0,
        })
    }

    /// Sum `balance(zone)` over the fixed zone set, recording a warning for
    /// any zone that fails rather than failing the total.
    pub fn total_balance(&self) -> TotalBalance {
        let mut total = 0u128;
        let mut warnings = Vec::new();
        for zone in Zone::ALL {
            match self.balance(zone) {
                Ok(balance) => total = total.saturating_add(balance.balance),
                Err(e) => {
                    tracing::warn!("Balance unavailable for zone {}: {}", zone, e);
                    warnings.push(BalanceWarning {
                        zone,
                        reason: e.to_string(),
                    });
                }
            }
        }
        TotalBalance { total, warnings }
    }

    pub fn block_cursor(&self, zone: Zone) -> u64 {
        self.block_cursors.get(&zone).copied().unwrap_or(0)
    }

    /// Advance a zone's block cursor. Monotonic.
    pub fn set_block_cursor(&mut self, zone: Zone, height: u64) {
        let entry = self.block_cursors.entry(zone).or_insert(0);
        *entry = (*entry).max(height);
    }

    pub fn block_cursors(&self) -> &BTreeMap<Zone, u64> {
        &self.block_cursors
    }

    pub fn restore_block_cursors(&mut self, cursors: BTreeMap<Zone, u64>) {
        for (zone, height) in cursors {
            self.set_block_cursor(zone, height);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outpoint(txid: &str, index: u32, zone: Zone, denomination: u8) -> Outpoint {
        Outpoint {
            txid: txid.to_string(),
            index,
            zone,
            denomination,
            address: Address::new("0xabc"),
        }
    }

    #[test]
    fn duplicate_outpoints_are_not_inserted() {
        let mut ledger = LedgerState::new();
        assert!(ledger.insert(outpoint("tx1", 0, Zone::Cyprus1, 6)));
        assert!(!ledger.insert(outpoint("tx1", 0, Zone::Cyprus1, 6)));
        assert_eq!(ledger.outpoints_in(Zone::Cyprus1).count(), 1);
    }

    #[test]
    fn same_txid_different_zone_is_distinct() {
        let mut ledger = LedgerState::new();
        assert!(ledger.insert(outpoint("tx1", 0, Zone::Cyprus1, 6)));
        assert!(ledger.insert(outpoint("tx1", 0, Zone::Hydra3, 6)));
        assert_eq!(ledger.outpoints().count(), 2);
    }

    #[test]
    fn balance_sums_denomination_values() {
        let mut ledger = LedgerState::new();
        ledger.insert(outpoint("tx1", 0, Zone::Cyprus1, 6));
        ledger.insert(outpoint("tx2", 0, Zone::Cyprus1, 6));
        ledger.insert(outpoint("tx3", 0, Zone::Cyprus1, 2));
        ledger.insert(outpoint("tx4", 0, Zone::Paxos1, 6));

        let balance = ledger.balance(Zone::Cyprus1).unwrap();
        assert_eq!(balance.balance, 2_010);
        assert_eq!(balance.utxo_count, 3);
    }

    #[test]
    fn invalid_denomination_poisons_the_zone_balance() {
        let mut ledger = LedgerState::new();
        ledger.insert(outpoint("tx1", 0, Zone::Hydra3, 99));
        assert!(matches!(
            ledger.balance(Zone::Hydra3),
            Err(WalletError::InvalidDenomination { index: 99 })
        ));
    }

    #[test]
    fn total_balance_degrades_per_zone() {
        let mut ledger = LedgerState::new();
        ledger.insert(outpoint("tx1", 0, Zone::Cyprus1, 6));
        ledger.insert(outpoint("tx2", 0, Zone::Paxos2, 2));
        // Hydra3 holds an outpoint the value table cannot resolve.
        ledger.insert(outpoint("tx3", 0, Zone::Hydra3, 42));

        let total = ledger.total_balance();
        assert_eq!(total.total, 1_010);
        assert_eq!(total.warnings.len(), 1);
        assert_eq!(total.warnings[0].zone, Zone::Hydra3);
    }

    #[test]
    fn block_cursor_is_monotonic() {
        let mut ledger = LedgerState::new();
        ledger.set_block_cursor(Zone::Cyprus1, 100);
        ledger.set_block_cursor(Zone::Cyprus1, 50);
        assert_eq!(ledger.block_cursor(Zone::Cyprus1), 100);
    }
}
