//! High-level stealth-payment wallet.
//!
//! `QiAgentWallet` composes the derivation, mailbox, scanner, and
//! orchestrator layers behind one facade: create or import an identity,
//! publish its payment code, sync to discover senders and outpoints, check
//! balances, and send with the mandatory notify-before-transfer ordering.

use crate::channel::ChannelRegistry;
use crate::config::WalletConfig;
use crate::error::{RpcError, WalletError};
use crate::events::{ObserverRegistry, PaymentReceived, SenderDiscovered, SubscriptionHandle};
use crate::keys::{AddressDeriver, Identity, PaymentCode};
use crate::ledger::{LedgerState, TotalBalance, ZoneBalance};
use crate::mailbox::{MailboxClient, NotificationRegistry};
use crate::orchestrator::{SyncOrchestrator, SyncPhase, SyncReport};
use crate::rpc::QuaiRpcClient;
use crate::scanner::{ChainQuery, ScanOutcome, Scanner};
use crate::snapshot::WalletSnapshot;
use crate::zone::Zone;
use crate::denomination::{format_balance, parse_qi};

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// Payment submission collaborator. Transaction construction, signing, and
/// broadcast live behind this seam.
#[async_trait::async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Submit a value transfer, returning the transaction hash.
    async fn submit_payment(
        &self,
        recipient: &PaymentCode,
        amount: u128,
        origin: Zone,
        destination: Zone,
    ) -> Result<String, RpcError>;

    /// Convert Qi value to Quai at a Quai address, returning the
    /// transaction hash.
    async fn convert_to_quai(&self, quai_address: &str, amount: u128)
    -> Result<String, RpcError>;
}

/// Receipt for a completed send, carrying both the notify outcome (if a
/// notification was made during this send) and the transfer outcome.
#[derive(Debug, Clone)]
pub struct PaymentSent {
    pub amount: u128,
    pub recipient: PaymentCode,
    pub tx_hash: String,
    /// Hash of the notify transaction, `None` when the recipient was
    /// already notified.
    pub notify_tx: Option<String>,
    pub origin: Zone,
    pub destination: Zone,
    pub timestamp: DateTime<Utc>,
}

/// Mutable wallet state, serialized through one lock.
pub(crate) struct WalletState {
    pub(crate) payment_code: PaymentCode,
    pub(crate) channels: ChannelRegistry,
    pub(crate) ledger: LedgerState,
    pub(crate) known_senders: BTreeSet<PaymentCode>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_activity: DateTime<Utc>,
}

/// One wallet instance: a single logical owner of its channels, outpoints,
/// and cursors.
pub struct QiAgentWallet {
    config: WalletConfig,
    identity: Identity,
    payment_code: PaymentCode,
    state: Arc<Mutex<WalletState>>,
    mailbox: MailboxClient,
    submitter: Arc<dyn TransactionSubmitter>,
    observers: Arc<ObserverRegistry>,
    orchestrator: Arc<SyncOrchestrator>,
}

impl QiAgentWallet {
    /// Assemble a wallet from an identity and its collaborators.
    pub fn new(
        identity: Identity,
        deriver: Arc<dyn AddressDeriver>,
        chain: Arc<dyn ChainQuery>,
        registry: Arc<dyn NotificationRegistry>,
        submitter: Arc<dyn TransactionSubmitter>,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        let payment_code = deriver.derive_payment_code(&identity);

        let mut channels = ChannelRegistry::new();
        // The wallet's own self-receive sequence is a channel like any other.
        channels.open_parsed(payment_code.clone())?;

        let now = Utc::now();
        let state = Arc::new(Mutex::new(WalletState {
            payment_code: payment_code.clone(),
            channels,
            ledger: LedgerState::new(),
            known_senders: BTreeSet::new(),
            created_at: now,
            last_activity: now,
        }));

        let mailbox = MailboxClient::new(registry);
        let observers = Arc::new(ObserverRegistry::new());
        let scanner = Scanner::new(chain, deriver, config.gap_limit);
        let orchestrator = Arc::new(SyncOrchestrator::new(
            identity.clone(),
            state.clone(),
            mailbox.clone(),
            scanner,
            observers.clone(),
            config.default_zone,
        ));

        Ok(Self {
            config,
            identity,
            payment_code,
            state,
            mailbox,
            submitter,
            observers,
            orchestrator,
        })
    }

    /// Create a wallet with a freshly generated identity. Export the seed
    /// via [`QiAgentWallet::identity`] for safekeeping.
    pub fn create(
        deriver: Arc<dyn AddressDeriver>,
        chain: Arc<dyn ChainQuery>,
        registry: Arc<dyn NotificationRegistry>,
        submitter: Arc<dyn TransactionSubmitter>,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        let wallet = Self::new(Identity::generate(), deriver, chain, registry, submitter, config)?;
        info!("Created wallet with payment code {}...", wallet.payment_code.short());
        Ok(wallet)
    }

    /// Build a wallet wired to a live node: one `QuaiRpcClient` serves as
    /// chain query, notification registry, and transaction submitter.
    pub fn connect(
        identity: Identity,
        deriver: Arc<dyn AddressDeriver>,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        let client = Arc::new(QuaiRpcClient::new(
            config.rpc_url.clone(),
            config.ws_url.clone(),
            config.mailbox_address.clone(),
        ));
        Self::new(
            identity,
            deriver,
            client.clone(),
            client.clone(),
            client,
            config,
        )
    }

    /// Restore a wallet from a persisted snapshot.
    ///
    /// The snapshot must match the supplied identity; a mismatch, unknown
    /// zone id, or malformed sender code fails the restore (and only the
    /// restore). Channels are re-opened idempotently for every known sender.
    pub fn restore(
        identity: Identity,
        snapshot: &WalletSnapshot,
        deriver: Arc<dyn AddressDeriver>,
        chain: Arc<dyn ChainQuery>,
        registry: Arc<dyn NotificationRegistry>,
        submitter: Arc<dyn TransactionSubmitter>,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        if snapshot.identity_fingerprint != identity.fingerprint() {
            return Err(WalletError::Serialization(
                "snapshot does not match the supplied identity".to_string(),
            ));
        }

        let wallet = Self::new(identity, deriver, chain, registry, submitter, config)?;
        if snapshot.payment_code != wallet.payment_code.as_str() {
            return Err(WalletError::Serialization(format!(
                "snapshot payment code {} does not match derived code",
                snapshot.payment_code
            )));
        }

        {
            let mut state = wallet.state.lock().unwrap();

            for sender in &snapshot.known_senders {
                let code = PaymentCode::parse(sender).map_err(|e| {
                    WalletError::Serialization(format!("corrupt known sender entry: {}", e))
                })?;
                state.channels.open_parsed(code.clone())?;
                state.known_senders.insert(code);
            }

            for (code, cursors) in &snapshot.channel_cursors {
                let code = PaymentCode::parse(code).map_err(|e| {
                    WalletError::Serialization(format!("corrupt channel cursor entry: {}", e))
                })?;
                let cursors = parse_zone_map(cursors)?;
                // Cursor entries may belong to explicitly imported channels
                // that never notified; open those too.
                let channel = state.channels.open_parsed(code)?;
                channel.restore_cursors(cursors);
            }

            let block_cursors = parse_zone_map(&snapshot.block_cursors)?;
            state.ledger.restore_block_cursors(block_cursors);
            state.created_at = snapshot.created_at;
            state.last_activity = snapshot.last_activity;
        }

        info!(
            "Restored wallet {}... with {} known sender(s)",
            wallet.payment_code.short(),
            snapshot.known_senders.len()
        );
        Ok(wallet)
    }

    /// Project current state into a persistable snapshot.
    pub fn serialize(&self) -> WalletSnapshot {
        let state = self.state.lock().unwrap();

        let mut channel_cursors = BTreeMap::new();
        for channel in state.channels.open_channels() {
            if channel.cursors().is_empty() {
                continue;
            }
            channel_cursors.insert(
                channel.counterparty().to_string(),
                channel
                    .cursors()
                    .iter()
                    .map(|(zone, index)| (zone.id().to_string(), *index))
                    .collect(),
            );
        }

        WalletSnapshot {
            identity_fingerprint: self.identity.fingerprint(),
            payment_code: state.payment_code.to_string(),
            known_senders: state.known_senders.iter().map(|s| s.to_string()).collect(),
            block_cursors: state
                .ledger
                .block_cursors()
                .iter()
                .map(|(zone, height)| (zone.id().to_string(), *height))
                .collect(),
            channel_cursors,
            created_at: state.created_at,
            last_activity: state.last_activity,
        }
    }

    /// The payment code to publish; what counterparties pay to.
    pub fn payment_code(&self) -> &PaymentCode {
        &self.payment_code
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Counterparty codes discovered so far.
    pub fn known_senders(&self) -> Vec<PaymentCode> {
        self.state.lock().unwrap().known_senders.iter().cloned().collect()
    }

    /// Explicitly import a counterparty channel without waiting for a
    /// mailbox notification.
    pub fn import_channel(&self, counterparty: &str) -> Result<PaymentCode, WalletError> {
        let mut state = self.state.lock().unwrap();
        let channel = state.channels.open(counterparty)?;
        let code = channel.counterparty().clone();
        state.known_senders.insert(code.clone());
        Ok(code)
    }

    /// Spendable balance for one zone, in Qit.
    pub fn balance(&self, zone: Zone) -> Result<ZoneBalance, WalletError> {
        self.state.lock().unwrap().ledger.balance(zone)
    }

    /// Human-readable balance string, e.g. `"1.500 Qi"`.
    pub fn balance_display(&self, zone: Zone) -> Result<String, WalletError> {
        Ok(format_balance(self.balance(zone)?.balance))
    }

    /// Total across all zones; per-zone failures degrade to warnings.
    pub fn total_balance(&self) -> TotalBalance {
        self.state.lock().unwrap().ledger.total_balance()
    }

    /// Send Qit to a recipient payment code.
    ///
    /// Ordering is mandatory: for a recipient this wallet has never notified,
    /// the mailbox notify is made durable before the transfer is submitted.
    /// Without it the recipient could never derive the addresses holding the
    /// funds.
    pub async fn send(
        &self,
        recipient: &str,
        amount: u128,
        origin: Zone,
        destination: Zone,
    ) -> Result<PaymentSent, WalletError> {
        let recipient = PaymentCode::parse(recipient)?;

        let available = self.balance(origin)?.balance;
        if available < amount {
            return Err(WalletError::InsufficientFunds {
                available,
                required: amount,
            });
        }

        let notify_tx = if self
            .mailbox
            .has_notified(&self.payment_code, &recipient)
            .await?
        {
            None
        } else {
            info!("Sending mailbox notification to {}...", recipient.short());
            let receipt = self.mailbox.notify(&self.payment_code, &recipient).await?;
            Some(receipt.tx_hash)
        };

        let tx_hash = self
            .submitter
            .submit_payment(&recipient, amount, origin, destination)
            .await
            .map_err(|e| WalletError::TransferFailed {
                reason: e.to_string(),
                // The notify is already durable; a retry must not re-notify.
                notify_tx: notify_tx.clone(),
            })?;

        self.state.lock().unwrap().last_activity = Utc::now();
        info!("Payment sent: {}", tx_hash);

        Ok(PaymentSent {
            amount,
            recipient,
            tx_hash,
            notify_tx,
            origin,
            destination,
            timestamp: Utc::now(),
        })
    }

    /// Send using a human-readable Qi amount, e.g. `"1.5"`.
    pub async fn send_qi(
        &self,
        recipient: &str,
        qi_amount: &str,
        origin: Zone,
        destination: Zone,
    ) -> Result<PaymentSent, WalletError> {
        let amount = parse_qi(qi_amount)?;
        self.send(recipient, amount, origin, destination).await
    }

    /// Convert Qi holdings into Quai at a Quai address. No mailbox step:
    /// the destination is a plain address, not a payment code.
    pub async fn convert_to_quai(
        &self,
        quai_address: &str,
        amount: u128,
    ) -> Result<String, WalletError> {
        let tx_hash = self.submitter.convert_to_quai(quai_address, amount).await?;
        self.state.lock().unwrap().last_activity = Utc::now();
        info!("Converted {} Qit to Quai: {}", amount, tx_hash);
        Ok(tx_hash)
    }

    /// One discovery-then-scan cycle for a zone.
    pub async fn sync(&self, zone: Zone) -> Result<ScanOutcome, WalletError> {
        self.orchestrator.sync(zone).await
    }

    /// One discovery cycle plus a scan of every zone, isolating per-zone
    /// failures.
    pub async fn sync_all(&self) -> Result<SyncReport, WalletError> {
        self.orchestrator.sync_all().await
    }

    /// Check the mailbox and open channels for newly seen senders.
    pub async fn discover_senders(&self) -> Result<Vec<PaymentCode>, WalletError> {
        self.orchestrator.discover_senders().await
    }

    /// Start polling `sync` for the default zone at the configured interval.
    pub fn start_polling(&self) {
        self.orchestrator.start_polling(self.config.polling_interval);
    }

    /// Start polling with an explicit interval.
    pub fn start_polling_every(&self, interval: Duration) {
        self.orchestrator.start_polling(interval);
    }

    /// Stop the poller; an in-flight sync completes.
    pub fn stop_polling(&self) {
        self.orchestrator.stop_polling();
    }

    pub fn is_polling(&self) -> bool {
        self.orchestrator.is_polling()
    }

    pub fn sync_phase(&self) -> SyncPhase {
        self.orchestrator.sync_phase()
    }

    /// Poll ticks dropped because a sync was already in flight.
    pub fn skipped_ticks(&self) -> u64 {
        self.orchestrator.skipped_ticks()
    }

    /// Subscribe to payment-received events; fires once per newly observed
    /// outpoint.
    pub fn on_payment_received<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&PaymentReceived) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.observers.on_payment_received(callback)
    }

    /// Subscribe to sender-discovered events; fires once per new
    /// counterparty code.
    pub fn on_sender_discovered<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&SenderDiscovered) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.observers.on_sender_discovered(callback)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.observers.unsubscribe(handle);
    }
}

fn parse_zone_map<V: Copy>(map: &BTreeMap<String, V>) -> Result<BTreeMap<Zone, V>, WalletError> {
    map.iter()
        .map(|(zone, value)| {
            let zone = Zone::from_str(zone)
                .map_err(|e| WalletError::Serialization(format!("corrupt cursor entry: {}", e)))?;
            Ok((zone, *value))
        })
        .collect()
}
