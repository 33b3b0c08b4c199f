use solana_sdk::{pubkey::Pubkey, signature::Signature};
use thiserror::Error;

use crate::layout::AccountKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the reader.
///
/// Only account-level failures abort a read. Per-record and per-reference
/// failures are collected as `history::ScanWarning` instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Account does not exist; expected after a close.
    #[error("account {address} not found")]
    AccountNotFound { address: Pubkey },

    #[error("malformed {kind} account: {reason}")]
    MalformedAccount { kind: AccountKind, reason: String },

    #[error("malformed append payload: {reason}")]
    MalformedPayload { reason: String },

    #[error("message {index} could not be decrypted")]
    DecryptionFailed { index: u32 },

    #[error("fetching transaction {signature} failed: {source}")]
    TransactionFetchFailed {
        signature: Signature,
        #[source]
        source: LedgerError,
    },

    #[error("subscribing to {address} failed: {source}")]
    SubscriptionSetupFailed {
        address: Pubkey,
        #[source]
        source: LedgerError,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("config: {0}")]
    Config(String),
}

/// Failures reported by a `LedgerClient`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("pubsub error: {0}")]
    Pubsub(String),

    #[error("undecodable ledger response: {0}")]
    Decode(String),

    #[error("subscription closed")]
    Closed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherError {
    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,

    #[error("plaintext is not valid utf-8")]
    Utf8,
}
