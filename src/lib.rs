//! Stealth-payment wallet for the Quai network's Qi ledger.
//!
//! A wallet holds one identity and publishes one reusable payment code.
//! Counterparties announce themselves through an on-chain notification
//! mailbox; the wallet opens a derivation channel per announced sender and
//! scans each zone's chain for outputs on the derived addresses, gap-limited
//! per channel. Balances are derived from a fixed denomination table over the
//! set of live outpoints.
//!
//! ```no_run
//! use qi_agent_wallet::{HashDeriver, Identity, QiAgentWallet, WalletConfig, Zone};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), qi_agent_wallet::WalletError> {
//! let wallet = QiAgentWallet::connect(
//!     Identity::generate(),
//!     Arc::new(HashDeriver),
//!     WalletConfig::default(),
//! )?;
//!
//! println!("pay me at: {}", wallet.payment_code());
//! wallet.sync(Zone::Cyprus1).await?;
//! println!("balance: {}", wallet.balance_display(Zone::Cyprus1)?);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod denomination;
pub mod error;
pub mod events;
pub mod keys;
pub mod ledger;
pub mod mailbox;
pub mod orchestrator;
pub mod rpc;
pub mod scanner;
pub mod snapshot;
pub mod wallet;
pub mod zone;

pub use channel::{Channel, ChannelRegistry, ChannelState};
pub use config::{Network, WalletConfig};
pub use denomination::{
    DENOMINATIONS, QIT_PER_QI, denomination_value, format_balance, format_qi, parse_qi,
    sum_denominations,
};
pub use error::{RpcError, WalletError};
pub use events::{PaymentReceived, SenderDiscovered, SubscriptionHandle};
pub use keys::{Address, AddressDeriver, HashDeriver, Identity, PaymentCode};
pub use ledger::{Outpoint, OutpointKey, TotalBalance, ZoneBalance};
pub use mailbox::{MailboxClient, NotificationEvent, NotificationReceipt, NotificationRegistry};
pub use orchestrator::{SyncPhase, SyncReport};
pub use rpc::QuaiRpcClient;
pub use scanner::{ChainQuery, ScanOutcome, Scanner, UnspentOutput};
pub use snapshot::WalletSnapshot;
pub use wallet::{PaymentSent, QiAgentWallet, TransactionSubmitter};
pub use zone::Zone;
