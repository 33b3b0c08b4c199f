//! # Module overview
//! Client-side reader for the on-chain messaging program: threads (two participants)
//! and broadcast channels (one owner). Message content never lives in account state;
//! each append is an instruction whose payload carries the encrypted text, while the
//! account only keeps a running counter.
//!
//! 1. layout: decodes thread/channel/subscription accounts (fixed offsets, see `layout`).
//! 2. filter: picks append instructions for the program out of a transaction.
//! 3. extract: parses one append payload and decrypts it.
//! 4. history: scans the bounded signature window and orders messages by index.
//! 5. tracker: live tail driven by counter deltas on account notifications.
//!
//! The ledger itself sits behind `ledger::LedgerClient`; `rpc::RpcLedger` is the
//! JSON-RPC + websocket implementation.

pub mod protocol;
pub mod layout;
pub mod filter;
pub mod extract;
pub mod cipher;
pub mod ledger;
pub mod history;
pub mod tracker;
pub mod rpc;
pub mod config;
pub mod error;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports
pub use error   ::{ Error, LedgerError, CipherError, Result };
pub use layout  ::{ AccountKind, AccountRecord, ThreadRecord, ChannelRecord, SubscriptionRecord };
pub use cipher  ::SharedSecret;
pub use ledger  ::{ LedgerClient, LedgerTransaction, LedgerInstruction, TransactionRef, AccountUpdate };
pub use history ::{ HistoryReconstructor, HistoryOptions, History, IndexRange, MessageRecord, Reconstruction, ScanWarning };
pub use tracker ::{ ChangeTracker, TailEvent, TrackerState };
pub use rpc     ::RpcLedger;
pub use config  ::ReaderConfig;
