//! Gap-limited UTXO scanner.
//!
//! Scanning a zone walks the derived address sequence of every channel that
//! is `Open` in the registry, from index zero through the channel's persisted
//! cursor and onward until `gap_limit` consecutive unused addresses. The
//! below-cursor stretch is always revisited: a counterparty's next payment
//! lands at their own next index, which can sit below a cursor that advanced
//! past an empty tail, and a wallet restored from a snapshot holds cursors
//! but no outpoints yet. The watch list is built strictly from open
//! channels, so a counterparty whose channel has not been opened cannot
//! contribute addresses, whatever the call order.
//!
//! The scan is split into three steps so that chain queries never run under
//! the wallet lock: `plan` snapshots the watch list, `collect` performs the
//! I/O, and `merge` applies the result to shared state in one critical
//! section.

use crate::channel::ChannelRegistry;
use crate::error::{RpcError, WalletError};
use crate::keys::{Address, AddressDeriver, Identity, PaymentCode};
use crate::ledger::{LedgerState, Outpoint, OutpointKey};
use crate::zone::Zone;

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// An unspent chain output as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    pub txid: String,
    pub index: u32,
    pub denomination: u8,
}

/// Chain-query collaborator surface.
#[async_trait::async_trait]
pub trait ChainQuery: Send + Sync {
    async fn get_unspent_outputs(
        &self,
        address: &Address,
        zone: Zone,
    ) -> Result<Vec<UnspentOutput>, RpcError>;

    async fn get_block_height(&self, zone: Zone) -> Result<u64, RpcError>;
}

/// Snapshot of the watch list for one zone, taken under the wallet lock.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub zone: Zone,
    /// Open channels and their cursor (highest index previously scanned).
    channels: Vec<(PaymentCode, u32)>,
}

/// Raw result of the I/O phase, before merging into shared state.
#[derive(Debug)]
pub struct ZoneScan {
    zone: Zone,
    found: Vec<Outpoint>,
    cursor_advances: Vec<(PaymentCode, u32)>,
    /// Every address whose full unspent set this scan now knows.
    rescanned: BTreeSet<Address>,
    block_height: u64,
}

/// Outcome of merging one zone's scan.
#[derive(Debug)]
pub struct ScanOutcome {
    pub zone: Zone,
    /// Outpoints not previously in the ledger, in discovery order.
    pub new_outpoints: Vec<Outpoint>,
    /// Previously recorded outpoints dropped as spent.
    pub removed: usize,
    /// Highest address index scanned across all channels.
    pub highest_index: u32,
}

pub struct Scanner {
    chain: Arc<dyn ChainQuery>,
    deriver: Arc<dyn AddressDeriver>,
    gap_limit: u32,
}

impl Scanner {
    pub fn new(chain: Arc<dyn ChainQuery>, deriver: Arc<dyn AddressDeriver>, gap_limit: u32) -> Self {
        Self {
            chain,
            deriver,
            gap_limit: gap_limit.max(1),
        }
    }

    /// Snapshot the watch list for `zone` from the current channel set.
    pub fn plan(channels: &ChannelRegistry, zone: Zone) -> ScanPlan {
        ScanPlan {
            zone,
            channels: channels
                .open_channels()
                .map(|c| (c.counterparty().clone(), c.cursor(zone)))
                .collect(),
        }
    }

    /// Query the chain for every address in the plan's window.
    ///
    /// Fails as a whole with `ScanFailed` for this zone; the caller isolates
    /// it from other zones.
    pub async fn collect(&self, identity: &Identity, plan: ScanPlan) -> Result<ZoneScan, WalletError> {
        let zone = plan.zone;
        let scan_failed = |source: RpcError| WalletError::ScanFailed { zone, source };

        let mut found = Vec::new();
        let mut rescanned = BTreeSet::new();
        let mut cursor_advances = Vec::new();

        for (counterparty, cursor) in plan.channels {
            let mut index = 0u32;
            let mut gap = 0u32;

            // The gap rule only terminates the walk past the cursor; below
            // it every address is revisited, both to observe spends of known
            // outpoints and to catch payments at indices the cursor already
            // overshot.
            while index < cursor || gap < self.gap_limit {
                let address = self
                    .deriver
                    .derive_address(identity, &counterparty, zone, index);
                let outputs = self
                    .chain
                    .get_unspent_outputs(&address, zone)
                    .await
                    .map_err(scan_failed)?;

                if outputs.is_empty() {
                    gap += 1;
                } else {
                    gap = 0;
                    record_outputs(&mut found, outputs, zone, &address);
                }
                rescanned.insert(address);
                index += 1;
            }

            debug!(
                "Scanned {} addresses for channel {}... in {}",
                index,
                counterparty.short(),
                zone
            );
            cursor_advances.push((counterparty, index));
        }

        let block_height = self.chain.get_block_height(zone).await.map_err(scan_failed)?;

        Ok(ZoneScan {
            zone,
            found,
            cursor_advances,
            rescanned,
            block_height,
        })
    }

    /// Merge a collected scan into shared state. Run under the wallet lock;
    /// one merge at a time preserves the outpoint uniqueness invariant.
    pub fn merge(
        scan: ZoneScan,
        channels: &mut ChannelRegistry,
        ledger: &mut LedgerState,
    ) -> ScanOutcome {
        let zone = scan.zone;
        let found_keys: BTreeSet<OutpointKey> = scan.found.iter().map(Outpoint::key).collect();

        // Drop outpoints at rescanned addresses that are no longer reported
        // unspent.
        let stale: Vec<OutpointKey> = ledger
            .outpoints_in(zone)
            .filter(|o| scan.rescanned.contains(&o.address) && !found_keys.contains(&o.key()))
            .map(Outpoint::key)
            .collect();
        let removed = stale.len();
        for key in &stale {
            ledger.remove(key);
        }

        // Insert-if-absent; only genuinely new outpoints surface as events.
        let mut new_outpoints = Vec::new();
        for outpoint in scan.found {
            if ledger.insert(outpoint.clone()) {
                new_outpoints.push(outpoint);
            }
        }

        let mut highest_index = 0u32;
        for (counterparty, index) in scan.cursor_advances {
            highest_index = highest_index.max(index);
            if let Some(channel) = channels.get_mut(&counterparty) {
                channel.advance_cursor(zone, index);
            }
        }

        ledger.set_block_cursor(zone, scan.block_height);

        ScanOutcome {
            zone,
            new_outpoints,
            removed,
            highest_index,
        }
    }
}

fn record_outputs(found: &mut Vec<Outpoint>, outputs: Vec<UnspentOutput>, zone: Zone, address: &Address) {
    for output in outputs {
        // Denomination indices are validated at this boundary; a bad index
        // is skipped, never recorded as zero value.
        if crate::denomination::denomination_value(output.denomination).is_err() {
            warn!(
                "Skipping output {}:{} in {} with invalid denomination index {}",
                output.txid, output.index, zone, output.denomination
            );
            continue;
        }
        found.push(Outpoint {
            txid: output.txid,
            index: output.index,
            zone,
            denomination: output.denomination,
            address: address.clone(),
        });
    }
}
