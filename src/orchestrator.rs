//! Sync orchestrator.
//!
//! Coordinates one wallet's sync cycle in the only order that works:
//! discover senders from the mailbox, open a channel per new sender, then
//! scan. Scanning before a channel is open cannot see that counterparty's
//! addresses, so funds would stay invisible until the scan after the open;
//! the phase machine here encodes the dependency instead of trusting caller
//! discipline.
//!
//! Concurrency: chain queries for different zones fan out in parallel, but
//! result merges serialize through the wallet lock, and the whole cycle is
//! guarded by an async gate so two sync cycles for the same wallet never
//! overlap. Poll ticks that fire mid-sync are skipped, not queued.

use crate::denomination::denomination_value;
use crate::error::WalletError;
use crate::events::{ObserverRegistry, PaymentReceived, SenderDiscovered};
use crate::keys::{Identity, PaymentCode};
use crate::mailbox::MailboxClient;
use crate::scanner::{ScanOutcome, Scanner};
use crate::wallet::WalletState;
use crate::zone::Zone;

use chrono::Utc;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where a sync cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    DiscoveringSenders,
    OpeningChannels,
    Scanning,
}

/// Result of one multi-zone sync cycle. Per-zone failures are isolated and
/// reported here rather than aborting the cycle.
#[derive(Debug)]
pub struct SyncReport {
    pub new_senders: Vec<PaymentCode>,
    pub outcomes: Vec<ScanOutcome>,
    pub failures: Vec<(Zone, WalletError)>,
}

struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct SyncOrchestrator {
    identity: Identity,
    state: Arc<Mutex<WalletState>>,
    mailbox: MailboxClient,
    scanner: Scanner,
    observers: Arc<ObserverRegistry>,
    default_zone: Zone,

    /// Serializes sync cycles; `try_lock` failure is the skipped-tick path.
    sync_gate: tokio::sync::Mutex<()>,
    phase: Mutex<SyncPhase>,
    skipped_ticks: AtomicU64,
    poller: Mutex<Option<PollerHandle>>,
}

impl SyncOrchestrator {
    pub fn new(
        identity: Identity,
        state: Arc<Mutex<WalletState>>,
        mailbox: MailboxClient,
        scanner: Scanner,
        observers: Arc<ObserverRegistry>,
        default_zone: Zone,
    ) -> Self {
        Self {
            identity,
            state,
            mailbox,
            scanner,
            observers,
            default_zone,
            sync_gate: tokio::sync::Mutex::new(()),
            phase: Mutex::new(SyncPhase::Idle),
            skipped_ticks: AtomicU64::new(0),
            poller: Mutex::new(None),
        }
    }

    pub fn sync_phase(&self) -> SyncPhase {
        *self.phase.lock().unwrap()
    }

    /// Poll ticks dropped because a sync was already in flight.
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks.load(Ordering::SeqCst)
    }

    /// Run one sync cycle for `zone`. Waits if another cycle is in flight.
    pub async fn sync(&self, zone: Zone) -> Result<ScanOutcome, WalletError> {
        let _gate = self.sync_gate.lock().await;
        self.run_cycle(zone).await
    }

    /// Run one cycle unless a sync is already in flight; a busy gate bumps
    /// the skipped-tick counter and returns `None`.
    pub async fn try_sync(&self, zone: Zone) -> Result<Option<ScanOutcome>, WalletError> {
        match self.sync_gate.try_lock() {
            Ok(_gate) => self.run_cycle(zone).await.map(Some),
            Err(_) => {
                self.skipped_ticks.fetch_add(1, Ordering::SeqCst);
                debug!("Skipping poll tick: sync already in flight");
                Ok(None)
            }
        }
    }

    /// Discovery-then-scan across every zone, isolating per-zone failures.
    pub async fn sync_all(&self) -> Result<SyncReport, WalletError> {
        let _gate = self.sync_gate.lock().await;

        let new_senders = self.discover_senders_locked().await?;

        self.set_phase(SyncPhase::Scanning);
        let plans: Vec<_> = {
            let state = self.state.lock().unwrap();
            Zone::ALL
                .iter()
                .map(|&zone| Scanner::plan(&state.channels, zone))
                .collect()
        };

        let collected = join_all(
            plans
                .into_iter()
                .map(|plan| self.scanner.collect(&self.identity, plan)),
        )
        .await;

        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        for (zone, result) in Zone::ALL.iter().copied().zip(collected) {
            match result {
                Ok(scan) => {
                    let outcome = {
                        let mut state = self.state.lock().unwrap();
                        let state = &mut *state;
                        let outcome =
                            Scanner::merge(scan, &mut state.channels, &mut state.ledger);
                        state.last_activity = Utc::now();
                        outcome
                    };
                    self.emit_payments(&outcome);
                    outcomes.push(outcome);
                }
                Err(e) => {
                    warn!("Scan failed for zone {}: {}", zone, e);
                    failures.push((zone, e));
                }
            }
        }
        self.set_phase(SyncPhase::Idle);

        info!(
            "Sync cycle complete: {} new sender(s), {} zone(s) scanned, {} failed",
            new_senders.len(),
            outcomes.len(),
            failures.len()
        );

        Ok(SyncReport {
            new_senders,
            outcomes,
            failures,
        })
    }

    /// Check the mailbox for new senders and open a channel per new code.
    ///
    /// A channel-open failure for one sender is logged and reported but does
    /// not halt discovery of the rest; the failed sender is left out of the
    /// known set so the next cycle retries it.
    pub async fn discover_senders(&self) -> Result<Vec<PaymentCode>, WalletError> {
        let _gate = self.sync_gate.lock().await;
        self.discover_senders_locked().await
    }

    async fn discover_senders_locked(&self) -> Result<Vec<PaymentCode>, WalletError> {
        self.set_phase(SyncPhase::DiscoveringSenders);
        let my_code = {
            let state = self.state.lock().unwrap();
            state.payment_code.clone()
        };

        let senders = match self.mailbox.list_notifications(&my_code).await {
            Ok(senders) => senders,
            Err(e) => {
                self.set_phase(SyncPhase::Idle);
                return Err(e);
            }
        };

        self.set_phase(SyncPhase::OpeningChannels);
        let mut new_senders = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            for sender in senders {
                if state.known_senders.contains(&sender) {
                    continue;
                }
                match state.channels.open_parsed(sender.clone()) {
                    Ok(_) => {
                        state.known_senders.insert(sender.clone());
                        state.last_activity = Utc::now();
                        new_senders.push(sender);
                    }
                    Err(e) => {
                        // Not marked known: the next cycle re-discovers and
                        // retries the open.
                        error!("Failed to open channel with {}...: {}", sender.short(), e);
                    }
                }
            }
        }

        if !new_senders.is_empty() {
            info!("Discovered {} new sender(s)", new_senders.len());
        }
        for sender in &new_senders {
            let event = SenderDiscovered {
                sender: sender.clone(),
                timestamp: Utc::now(),
            };
            self.observers.emit_sender(&event);
        }

        Ok(new_senders)
    }

    /// One discovery-then-scan cycle for a single zone. Caller holds the gate.
    async fn run_cycle(&self, zone: Zone) -> Result<ScanOutcome, WalletError> {
        debug!("Syncing wallet for zone {}", zone);
        self.discover_senders_locked().await?;

        self.set_phase(SyncPhase::Scanning);
        let plan = {
            let state = self.state.lock().unwrap();
            Scanner::plan(&state.channels, zone)
        };

        let scan = match self.scanner.collect(&self.identity, plan).await {
            Ok(scan) => scan,
            Err(e) => {
                self.set_phase(SyncPhase::Idle);
                return Err(e);
            }
        };

        let outcome = {
            let mut state = self.state.lock().unwrap();
            let state = &mut *state;
            let outcome = Scanner::merge(scan, &mut state.channels, &mut state.ledger);
            state.last_activity = Utc::now();
            outcome
        };
        self.emit_payments(&outcome);
        self.set_phase(SyncPhase::Idle);

        debug!(
            "Sync complete for {}: {} new outpoint(s), {} removed",
            zone,
            outcome.new_outpoints.len(),
            outcome.removed
        );
        Ok(outcome)
    }

    /// Start polling `sync` for the default zone on a fixed interval.
    ///
    /// A tick firing while a sync is still in flight is skipped, not queued.
    /// Restarts the poller if one is already running.
    pub fn start_polling(self: &Arc<Self>, interval: Duration) {
        self.stop_polling();

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let orchestrator = self.clone();
        let zone = self.default_zone;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = orchestrator.try_sync(zone).await {
                            error!("Polling sync failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Poller stopped");
        });

        info!("Started polling every {:?}", interval);
        *self.poller.lock().unwrap() = Some(PollerHandle { shutdown, task });
    }

    /// Stop the poller. Cancels only the timer: an in-flight sync completes,
    /// but no further cycles are scheduled.
    pub fn stop_polling(&self) {
        if let Some(handle) = self.poller.lock().unwrap().take() {
            let _ = handle.shutdown.send(true);
            drop(handle.task);
            info!("Stopped polling");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller.lock().unwrap().is_some()
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock().unwrap() = phase;
    }

    fn emit_payments(&self, outcome: &ScanOutcome) {
        if outcome.new_outpoints.is_empty() {
            return;
        }
        for outpoint in &outcome.new_outpoints {
            let amount = match denomination_value(outpoint.denomination) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Not emitting payment event for {}: {}", outpoint.txid, e);
                    continue;
                }
            };
            self.observers.emit_payment(&PaymentReceived {
                outpoint: outpoint.clone(),
                amount,
                zone: outcome.zone,
                timestamp: Utc::now(),
            });
        }
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
