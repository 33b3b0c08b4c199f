//! Ledger collaborator: account reads, signature history, transaction
//! contents and account-change notifications.

use async_trait::async_trait;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tokio::sync::mpsc;

use crate::error::LedgerError;

/// One entry of an address's signature history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRef {
    pub signature : Signature,
    pub slot      : u64,
    pub block_time: Option<i64>,
    /// Transaction executed but returned an error.
    pub failed    : bool,
}

/// One top-level instruction with its account keys resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerInstruction {
    pub program_id: Pubkey,
    pub accounts  : Vec<Pubkey>,
    pub data      : Vec<u8>,
}

/// Transaction contents as far as the reader needs them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub signature   : Signature,
    pub slot        : u64,
    pub block_time  : Option<i64>,
    pub failed      : bool,
    pub instructions: Vec<LedgerInstruction>,
}

/// Account state pushed by a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountUpdate {
    pub slot    : u64,
    pub lamports: u64,
    pub data    : Vec<u8>,
}

impl AccountUpdate {
    /// A closed account is drained of lamports and data.
    pub fn is_closed(&self) -> bool {
        self.lamports == 0 || self.data.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Live notification stream for one account.
///
/// Callers release it through `LedgerClient::unsubscribe`, or
/// `LedgerClient::release` where they cannot await.
#[derive(Debug)]
pub struct AccountSubscription {
    pub handle : SubscriptionHandle,
    pub updates: mpsc::Receiver<AccountUpdate>,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Raw account bytes, `None` when the account does not exist.
    async fn get_account_bytes(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError>;

    /// Signatures touching `address`, newest first, at most `limit`.
    async fn list_transaction_refs(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<TransactionRef>, LedgerError>;

    /// Full transaction, `None` when the ledger no longer has it.
    async fn get_transaction(
        &self,
        reference: &TransactionRef,
    ) -> Result<Option<LedgerTransaction>, LedgerError>;

    async fn subscribe_account_changes(
        &self,
        address: &Pubkey,
    ) -> Result<AccountSubscription, LedgerError>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), LedgerError>;

    /// Starts releasing `handle` without waiting for the upstream side.
    /// Used from `Drop`, where nothing can be awaited.
    fn release(&self, handle: SubscriptionHandle);
}
