//! In-memory ledger for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tokio::sync::mpsc;

use crate::cipher::SharedSecret;
use crate::error::LedgerError;
use crate::extract::AppendArgs;
use crate::layout::AccountKind;
use crate::ledger::{
    AccountSubscription, AccountUpdate, LedgerClient, LedgerInstruction, LedgerTransaction,
    SubscriptionHandle, TransactionRef,
};
use crate::protocol::PROGRAM_ID;

pub(crate) fn append_ix(
    kind: AccountKind,
    target: Pubkey,
    sender: Pubkey,
    index: u32,
    text: &str,
    secret: &SharedSecret,
) -> LedgerInstruction {
    let args = AppendArgs { message_index: index, encrypted_content: secret.encrypt(text).unwrap() };
    LedgerInstruction {
        program_id: PROGRAM_ID,
        accounts: vec![target, sender],
        data: args.encode(&kind.append_operation().tag()),
    }
}

pub(crate) fn thread_account(a: &Pubkey, b: &Pubkey, count: u32) -> Vec<u8> {
    crate::layout::tests::thread_bytes(a, b, count)
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<Pubkey, Vec<u8>>,
    /// Oldest first.
    transactions: Vec<LedgerTransaction>,
    broken: HashSet<Signature>,
    forgotten: HashSet<Signature>,
    subscribers: HashMap<u64, (Pubkey, mpsc::Sender<AccountUpdate>)>,
    next_handle: u64,
    refuse_subscriptions: bool,
    unsubscribed: Vec<SubscriptionHandle>,
    fail_listing: bool,
}

#[derive(Default)]
pub(crate) struct MockLedger {
    inner: Mutex<Inner>,
}

impl MockLedger {
    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        f(&mut self.inner.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Appends a transaction in the next slot and returns its signature.
    pub(crate) fn push_transaction(&self, instructions: Vec<LedgerInstruction>) -> Signature {
        self.with(|inner| {
            let n = inner.transactions.len() as u64 + 1;
            let mut raw = [0u8; 64];
            raw[..8].copy_from_slice(&n.to_le_bytes());
            let signature = Signature::from(raw);
            inner.transactions.push(LedgerTransaction {
                signature,
                slot: 100 + n,
                block_time: Some(1_700_000_000 + n as i64),
                failed: false,
                instructions,
            });
            signature
        })
    }

    pub(crate) fn fail_fetch(&self, signature: Signature) {
        self.with(|inner| inner.broken.insert(signature));
    }

    pub(crate) fn forget(&self, signature: Signature) {
        self.with(|inner| inner.forgotten.insert(signature));
    }

    pub(crate) fn mark_failed(&self, signature: Signature) {
        self.with(|inner| {
            for tx in inner.transactions.iter_mut().filter(|tx| tx.signature == signature) {
                tx.failed = true;
            }
        });
    }

    pub(crate) fn fail_listing(&self, fail: bool) {
        self.with(|inner| inner.fail_listing = fail);
    }

    pub(crate) fn set_account(&self, address: Pubkey, data: Vec<u8>) {
        self.with(|inner| inner.accounts.insert(address, data));
    }

    pub(crate) fn set_thread(&self, address: Pubkey, a: Pubkey, b: Pubkey, count: u32) {
        self.set_account(address, thread_account(&a, &b, count));
    }

    pub(crate) fn remove_account(&self, address: &Pubkey) {
        self.with(|inner| inner.accounts.remove(address));
    }

    pub(crate) fn refuse_subscriptions(&self) {
        self.with(|inner| inner.refuse_subscriptions = true);
    }

    /// Pushes an update to every live subscription on `address`.
    pub(crate) fn notify(&self, address: &Pubkey, update: AccountUpdate) {
        self.with(|inner| {
            for (key, tx) in inner.subscribers.values() {
                if key == address {
                    tx.try_send(update.clone()).unwrap();
                }
            }
        });
    }

    /// Ends every live subscription stream without unsubscribing.
    pub(crate) fn hang_up(&self) {
        self.with(|inner| inner.subscribers.clear());
    }

    pub(crate) fn unsubscribed(&self) -> Vec<SubscriptionHandle> {
        self.with(|inner| inner.unsubscribed.clone())
    }

    pub(crate) fn live_subscriptions(&self) -> usize {
        self.with(|inner| inner.subscribers.len())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_account_bytes(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(self.with(|inner| inner.accounts.get(address).cloned()))
    }

    async fn list_transaction_refs(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<TransactionRef>, LedgerError> {
        self.with(|inner| {
            if inner.fail_listing {
                return Err(LedgerError::Rpc("listing unavailable".into()));
            }
            Ok(inner
                .transactions
                .iter()
                .rev()
                .filter(|tx| tx.instructions.iter().any(|ix| ix.accounts.contains(address)))
                .take(limit)
                .map(|tx| TransactionRef {
                    signature: tx.signature,
                    slot: tx.slot,
                    block_time: tx.block_time,
                    failed: tx.failed,
                })
                .collect())
        })
    }

    async fn get_transaction(
        &self,
        reference: &TransactionRef,
    ) -> Result<Option<LedgerTransaction>, LedgerError> {
        self.with(|inner| {
            if inner.broken.contains(&reference.signature) {
                return Err(LedgerError::Rpc("connection reset".into()));
            }
            if inner.forgotten.contains(&reference.signature) {
                return Ok(None);
            }
            Ok(inner.transactions.iter().find(|tx| tx.signature == reference.signature).cloned())
        })
    }

    async fn subscribe_account_changes(
        &self,
        address: &Pubkey,
    ) -> Result<AccountSubscription, LedgerError> {
        self.with(|inner| {
            if inner.refuse_subscriptions {
                return Err(LedgerError::Pubsub("websocket refused".into()));
            }
            let (tx, rx) = mpsc::channel(64);
            inner.next_handle += 1;
            let handle = SubscriptionHandle(inner.next_handle);
            inner.subscribers.insert(handle.0, (*address, tx));
            Ok(AccountSubscription { handle, updates: rx })
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), LedgerError> {
        self.release(handle);
        Ok(())
    }

    fn release(&self, handle: SubscriptionHandle) {
        self.with(|inner| {
            inner.subscribers.remove(&handle.0);
            inner.unsubscribed.push(handle);
        });
    }
}
