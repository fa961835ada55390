//! End-to-end wallet flows over in-memory collaborators: discovery ordering,
//! notify-before-transfer, the poller overlap guard, snapshot restore, and
//! per-zone failure isolation.

use qi_agent_wallet::{
    Address, AddressDeriver, ChainQuery, HashDeriver, Identity, NotificationReceipt,
    NotificationRegistry, PaymentCode, QiAgentWallet, RpcError, TransactionSubmitter,
    UnspentOutput, WalletConfig, WalletError, WalletSnapshot, Zone,
};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MockChain {
    outputs: Mutex<HashMap<(Address, Zone), Vec<UnspentOutput>>>,
    failing_zones: Mutex<HashSet<Zone>>,
    query_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockChain {
    fn fund(&self, address: Address, zone: Zone, txid: &str, denomination: u8) {
        self.outputs
            .lock()
            .unwrap()
            .entry((address, zone))
            .or_default()
            .push(UnspentOutput {
                txid: txid.to_string(),
                index: 0,
                denomination,
            });
    }

    fn fail_zone(&self, zone: Zone) {
        self.failing_zones.lock().unwrap().insert(zone);
    }
}

#[async_trait::async_trait]
impl ChainQuery for MockChain {
    async fn get_unspent_outputs(
        &self,
        address: &Address,
        zone: Zone,
    ) -> Result<Vec<UnspentOutput>, RpcError> {
        if self.failing_zones.lock().unwrap().contains(&zone) {
            return Err(RpcError::Rpc(format!("node unavailable for {}", zone)));
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(self
            .outputs
            .lock()
            .unwrap()
            .get(&(address.clone(), zone))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_block_height(&self, zone: Zone) -> Result<u64, RpcError> {
        if self.failing_zones.lock().unwrap().contains(&zone) {
            return Err(RpcError::Rpc(format!("node unavailable for {}", zone)));
        }
        Ok(1_000)
    }
}

#[derive(Default)]
struct MockRegistry {
    entries: Mutex<Vec<String>>,
    notify_calls: AtomicUsize,
}

#[async_trait::async_trait]
impl NotificationRegistry for MockRegistry {
    async fn notify(
        &self,
        sender: &PaymentCode,
        _receiver: &PaymentCode,
    ) -> Result<NotificationReceipt, RpcError> {
        let call = self.notify_calls.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().push(sender.to_string());
        Ok(NotificationReceipt {
            tx_hash: format!("0xnotify{}", call),
        })
    }

    async fn get_notifications(&self, _receiver: &PaymentCode) -> Result<Vec<String>, RpcError> {
        Ok(self.entries.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct MockSubmitter {
    fail: AtomicBool,
    submissions: Mutex<Vec<(String, u128)>>,
    conversions: Mutex<Vec<(String, u128)>>,
}

#[async_trait::async_trait]
impl TransactionSubmitter for MockSubmitter {
    async fn submit_payment(
        &self,
        recipient: &PaymentCode,
        amount: u128,
        _origin: Zone,
        _destination: Zone,
    ) -> Result<String, RpcError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RpcError::Rpc("broadcast rejected".to_string()));
        }
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push((recipient.to_string(), amount));
        Ok(format!("0xtransfer{}", submissions.len()))
    }

    async fn convert_to_quai(
        &self,
        quai_address: &str,
        amount: u128,
    ) -> Result<String, RpcError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RpcError::Rpc("broadcast rejected".to_string()));
        }
        let mut conversions = self.conversions.lock().unwrap();
        conversions.push((quai_address.to_string(), amount));
        Ok(format!("0xconvert{}", conversions.len()))
    }
}

struct Harness {
    chain: Arc<MockChain>,
    registry: Arc<MockRegistry>,
    submitter: Arc<MockSubmitter>,
    config: WalletConfig,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Harness {
    fn new() -> Self {
        init_tracing();
        let mut config = WalletConfig::default();
        // Small window keeps mock scans cheap.
        config.gap_limit = 2;
        Self {
            chain: Arc::new(MockChain::default()),
            registry: Arc::new(MockRegistry::default()),
            submitter: Arc::new(MockSubmitter::default()),
            config,
        }
    }

    fn with_query_delay(delay: Duration) -> Self {
        let mut harness = Self::new();
        harness.chain = Arc::new(MockChain {
            query_delay: Some(delay),
            ..Default::default()
        });
        harness
    }

    fn wallet(&self, identity: Identity) -> QiAgentWallet {
        QiAgentWallet::new(
            identity,
            Arc::new(HashDeriver),
            self.chain.clone(),
            self.registry.clone(),
            self.submitter.clone(),
            self.config.clone(),
        )
        .unwrap()
    }

    /// Record `sender_code` in the receiver's mailbox without going through
    /// a wallet, as a remote counterparty would.
    fn notify_from(&self, sender_code: &PaymentCode) {
        self.registry
            .entries
            .lock()
            .unwrap()
            .push(sender_code.to_string());
    }

    /// Put an output on the address the receiver would derive for
    /// `sender_code` at `index`.
    fn fund_channel_address(
        &self,
        receiver: &Identity,
        sender_code: &PaymentCode,
        zone: Zone,
        index: u32,
        txid: &str,
        denomination: u8,
    ) {
        let address = HashDeriver.derive_address(receiver, sender_code, zone, index);
        self.chain.fund(address, zone, txid, denomination);
    }
}

fn identity(seed_byte: u8) -> Identity {
    Identity::from_seed_hex(&format!("{:02x}", seed_byte).repeat(32)).unwrap()
}

#[tokio::test]
async fn funds_stay_invisible_until_the_sender_notifies() {
    let harness = Harness::new();
    let receiver = identity(1);
    let sender_code = HashDeriver.derive_payment_code(&identity(2));
    let wallet = harness.wallet(receiver.clone());

    // Funds land before any notification exists.
    harness.fund_channel_address(&receiver, &sender_code, Zone::Cyprus1, 0, "tx1", 6);

    wallet.sync(Zone::Cyprus1).await.unwrap();
    assert_eq!(wallet.balance(Zone::Cyprus1).unwrap().balance, 0);
    assert!(wallet.known_senders().is_empty());

    // Once the mailbox carries the announcement, the same funds surface.
    harness.notify_from(&sender_code);
    let outcome = wallet.sync(Zone::Cyprus1).await.unwrap();

    assert_eq!(outcome.new_outpoints.len(), 1);
    assert_eq!(wallet.balance(Zone::Cyprus1).unwrap().balance, 1_000);
    assert_eq!(wallet.known_senders(), vec![sender_code]);
}

#[tokio::test]
async fn payment_events_fire_once_per_outpoint() {
    let harness = Harness::new();
    let receiver = identity(1);
    let sender_code = HashDeriver.derive_payment_code(&identity(2));
    let wallet = harness.wallet(receiver.clone());

    harness.notify_from(&sender_code);
    harness.fund_channel_address(&receiver, &sender_code, Zone::Cyprus1, 0, "tx1", 6);

    let amounts = Arc::new(Mutex::new(Vec::new()));
    let discovered = Arc::new(AtomicUsize::new(0));
    {
        let amounts = amounts.clone();
        wallet.on_payment_received(move |event| {
            amounts.lock().unwrap().push(event.amount);
            Ok(())
        });
    }
    {
        let discovered = discovered.clone();
        wallet.on_sender_discovered(move |_| {
            discovered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    wallet.sync(Zone::Cyprus1).await.unwrap();
    // Rescan of an unchanged chain must not re-emit.
    wallet.sync(Zone::Cyprus1).await.unwrap();

    assert_eq!(*amounts.lock().unwrap(), vec![1_000]);
    assert_eq!(discovered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn send_notifies_once_then_dedups() {
    let harness = Harness::new();
    let sender = identity(1);
    let recipient_code = HashDeriver.derive_payment_code(&identity(2));
    let wallet = harness.wallet(sender.clone());

    // Self-channel funds to spend from.
    harness.fund_channel_address(&sender, wallet.payment_code(), Zone::Cyprus1, 0, "tx1", 6);
    wallet.sync(Zone::Cyprus1).await.unwrap();

    let first = wallet
        .send(recipient_code.as_str(), 10, Zone::Cyprus1, Zone::Paxos1)
        .await
        .unwrap();
    let second = wallet
        .send(recipient_code.as_str(), 10, Zone::Cyprus1, Zone::Paxos1)
        .await
        .unwrap();

    assert!(first.notify_tx.is_some());
    assert!(second.notify_tx.is_none());
    assert_eq!(harness.registry.notify_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.submitter.submissions.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn failed_transfer_keeps_the_notification_durable() {
    let harness = Harness::new();
    let sender = identity(1);
    let recipient_code = HashDeriver.derive_payment_code(&identity(2));
    let wallet = harness.wallet(sender.clone());

    harness.fund_channel_address(&sender, wallet.payment_code(), Zone::Cyprus1, 0, "tx1", 6);
    wallet.sync(Zone::Cyprus1).await.unwrap();

    harness.submitter.fail.store(true, Ordering::SeqCst);
    let err = wallet
        .send(recipient_code.as_str(), 10, Zone::Cyprus1, Zone::Cyprus1)
        .await
        .unwrap_err();
    match err {
        WalletError::TransferFailed { notify_tx, .. } => assert!(notify_tx.is_some()),
        other => panic!("expected TransferFailed, got {}", other),
    }

    // The retry finds the notification already recorded.
    harness.submitter.fail.store(false, Ordering::SeqCst);
    let retry = wallet
        .send(recipient_code.as_str(), 10, Zone::Cyprus1, Zone::Cyprus1)
        .await
        .unwrap();
    assert!(retry.notify_tx.is_none());
    assert_eq!(harness.registry.notify_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn convert_to_quai_needs_no_mailbox_step() {
    let harness = Harness::new();
    let wallet = harness.wallet(identity(1));

    let tx_hash = wallet
        .convert_to_quai("0x00a3e45aa16163F2663015b6695894D918866d19", 2_000)
        .await
        .unwrap();

    assert_eq!(tx_hash, "0xconvert1");
    assert_eq!(
        harness.submitter.conversions.lock().unwrap().as_slice(),
        &[(
            "0x00a3e45aa16163F2663015b6695894D918866d19".to_string(),
            2_000
        )]
    );
    // The destination is a plain Quai address, not a payment code.
    assert_eq!(harness.registry.notify_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn insufficient_funds_blocks_the_send_before_any_notify() {
    let harness = Harness::new();
    let wallet = harness.wallet(identity(1));
    let recipient_code = HashDeriver.derive_payment_code(&identity(2));

    let err = wallet
        .send(recipient_code.as_str(), 500, Zone::Cyprus1, Zone::Cyprus1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WalletError::InsufficientFunds {
            available: 0,
            required: 500
        }
    ));
    assert_eq!(harness.registry.notify_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn poll_ticks_never_overlap_a_running_sync() {
    let harness = Harness::with_query_delay(Duration::from_millis(25));
    let wallet = harness.wallet(identity(1));

    wallet.start_polling_every(Duration::from_millis(5));
    tokio::time::sleep(Duration::from_millis(300)).await;
    wallet.stop_polling();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // With each cycle far slower than the interval, ticks must be dropped,
    // and at no point may two cycles query the chain concurrently.
    assert!(wallet.skipped_ticks() > 0);
    assert_eq!(harness.chain.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(!wallet.is_polling());
}

#[tokio::test]
async fn snapshot_restores_senders_and_cursors() {
    let harness = Harness::new();
    let receiver = identity(1);
    let sender_code = HashDeriver.derive_payment_code(&identity(2));
    let wallet = harness.wallet(receiver.clone());

    harness.notify_from(&sender_code);
    harness.fund_channel_address(&receiver, &sender_code, Zone::Cyprus1, 0, "tx1", 6);
    wallet.sync(Zone::Cyprus1).await.unwrap();

    let snapshot = wallet.serialize();
    let json = snapshot.to_json().unwrap();
    let parsed = WalletSnapshot::from_json(&json).unwrap();

    let restored = QiAgentWallet::restore(
        receiver.clone(),
        &parsed,
        Arc::new(HashDeriver),
        harness.chain.clone(),
        harness.registry.clone(),
        harness.submitter.clone(),
        harness.config.clone(),
    )
    .unwrap();

    assert_eq!(restored.known_senders(), vec![sender_code]);
    assert_eq!(restored.serialize(), snapshot);

    // A rescan from the restored cursors converges without replaying events.
    let outcome = restored.sync(Zone::Cyprus1).await.unwrap();
    assert_eq!(outcome.new_outpoints.len(), 1);
    assert_eq!(restored.balance(Zone::Cyprus1).unwrap().balance, 1_000);
}

#[tokio::test]
async fn snapshot_for_a_different_identity_is_rejected() {
    let harness = Harness::new();
    let wallet = harness.wallet(identity(1));
    let snapshot = wallet.serialize();

    let result = QiAgentWallet::restore(
        identity(9),
        &snapshot,
        Arc::new(HashDeriver),
        harness.chain.clone(),
        harness.registry.clone(),
        harness.submitter.clone(),
        harness.config.clone(),
    );
    assert!(matches!(result, Err(WalletError::Serialization(_))));
}

#[tokio::test]
async fn one_failing_zone_does_not_abort_the_cycle() {
    let harness = Harness::new();
    let receiver = identity(1);
    let wallet = harness.wallet(receiver.clone());

    harness.fund_channel_address(&receiver, wallet.payment_code(), Zone::Cyprus1, 0, "tx1", 6);
    harness.chain.fail_zone(Zone::Paxos1);

    let report = wallet.sync_all().await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, Zone::Paxos1);
    assert_eq!(report.outcomes.len(), Zone::ALL.len() - 1);
    assert_eq!(wallet.total_balance().total, 1_000);
}
