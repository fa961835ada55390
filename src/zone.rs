//! Ledger zones.
//!
//! The Quai ledger is sharded into nine zones, each with its own address
//! space, block height, and scan state. Zone identity is carried on every
//! outpoint and scan cursor; balances are derived per zone.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One shard of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Cyprus1,
    Cyprus2,
    Cyprus3,
    Paxos1,
    Paxos2,
    Paxos3,
    Hydra1,
    Hydra2,
    Hydra3,
}

impl Zone {
    /// The fixed set of zones, in scan order.
    pub const ALL: [Zone; 9] = [
        Zone::Cyprus1,
        Zone::Cyprus2,
        Zone::Cyprus3,
        Zone::Paxos1,
        Zone::Paxos2,
        Zone::Paxos3,
        Zone::Hydra1,
        Zone::Hydra2,
        Zone::Hydra3,
    ];

    /// Stable string identifier used in RPC params and snapshots.
    pub fn id(&self) -> &'static str {
        match self {
            Zone::Cyprus1 => "cyprus1",
            Zone::Cyprus2 => "cyprus2",
            Zone::Cyprus3 => "cyprus3",
            Zone::Paxos1 => "paxos1",
            Zone::Paxos2 => "paxos2",
            Zone::Paxos3 => "paxos3",
            Zone::Hydra1 => "hydra1",
            Zone::Hydra2 => "hydra2",
            Zone::Hydra3 => "hydra3",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Zone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Zone::ALL
            .iter()
            .find(|z| z.id() == s)
            .copied()
            .ok_or_else(|| format!("unknown zone: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_ids_round_trip() {
        for zone in Zone::ALL {
            assert_eq!(zone.id().parse::<Zone>().unwrap(), zone);
        }
    }

    #[test]
    fn unknown_zone_is_rejected() {
        assert!("cyprus4".parse::<Zone>().is_err());
    }
}
