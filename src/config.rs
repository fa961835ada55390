//! Wallet configuration and network presets.

use crate::zone::Zone;
use std::time::Duration;

/// Known deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Orchard,
    Local,
}

impl Network {
    pub fn rpc_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://rpc.quai.network",
            Network::Orchard => "https://orchard.rpc.quai.network",
            Network::Local => "http://localhost:8610",
        }
    }

    pub fn ws_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "wss://rpc.quai.network",
            Network::Orchard => "wss://orchard.rpc.quai.network",
            Network::Local => "ws://localhost:8610",
        }
    }

    pub fn mailbox_address(&self) -> &'static str {
        match self {
            Network::Mainnet | Network::Orchard => "0x004C82298b3ED69a949008d7037918B13A4260c5",
            // Must be deployed locally.
            Network::Local => "",
        }
    }
}

/// Resolved wallet configuration.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub rpc_url: String,
    pub ws_url: String,
    pub mailbox_address: String,
    /// Poll cadence for `start_polling`.
    pub polling_interval: Duration,
    pub default_zone: Zone,
    /// Consecutive unused addresses tolerated before a channel's scan
    /// window stops advancing.
    pub gap_limit: u32,
}

impl WalletConfig {
    /// Preset configuration for a known network.
    pub fn for_network(network: Network) -> Self {
        Self {
            rpc_url: network.rpc_url().to_string(),
            ws_url: network.ws_url().to_string(),
            mailbox_address: network.mailbox_address().to_string(),
            polling_interval: Duration::from_secs(30),
            default_zone: Zone::Cyprus1,
            gap_limit: 20,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self::for_network(Network::Mainnet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_to_mainnet() {
        let config = WalletConfig::default();
        assert_eq!(config.rpc_url, Network::Mainnet.rpc_url());
        assert_eq!(config.default_zone, Zone::Cyprus1);
        assert_eq!(config.polling_interval, Duration::from_secs(30));
    }
}
