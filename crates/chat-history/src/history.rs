//! History reconstruction over the bounded signature window.
//!
//! 1. list up to `signature_limit` signatures for the account (newest first)
//! 2. fetch each transaction; a failed fetch only skips that signature
//! 3. filter append instructions aimed at the account, parse, range-check, decrypt
//! 4. sort by message index once every signature has been processed
//!
//! Signature order says nothing about index order. Index order is established
//! only by the final sort, so fetches may run concurrently.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tracing::{debug, info, warn};

use crate::cipher::SharedSecret;
use crate::error::{Error, Result};
use crate::extract::{decrypt_args, AppendArgs};
use crate::filter::matching_instructions;
use crate::layout::{self, AccountKind, AccountRecord};
use crate::ledger::{LedgerClient, TransactionRef};

/// Signature window accepted by the ledger in one request.
pub const MAX_SIGNATURE_WINDOW: usize = 1000;
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryOptions {
    /// Clamped to `MAX_SIGNATURE_WINDOW`.
    pub signature_limit  : usize,
    /// Transactions fetched at once; 1 fetches strictly in list order.
    pub fetch_concurrency: usize,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            signature_limit  : MAX_SIGNATURE_WINDOW,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }
}

/// Half-open range of message indices; `end == None` is unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexRange {
    pub start: u32,
    pub end  : Option<u32>,
}

impl IndexRange {
    pub fn from(start: u32) -> Self {
        Self { start, end: None }
    }

    pub fn between(start: u32, end: u32) -> Self {
        Self { start, end: Some(end) }
    }

    pub fn contains(&self, index: u32) -> bool {
        index >= self.start && self.end.map_or(true, |end| index < end)
    }
}

/// One decrypted message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    pub index      : u32,
    pub sender     : Pubkey,
    pub plaintext  : String,
    /// Block time of the carrying transaction.
    pub observed_at: Option<i64>,
    pub slot       : u64,
    pub signature  : Signature,
}

/// A contained failure: the scan skipped something and went on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanWarning {
    FetchFailed { signature: Signature, reason: String },
    TransactionMissing { signature: Signature },
    MalformedPayload { signature: Signature, reason: String },
    DecryptionFailed { signature: Signature, index: u32 },
    /// Same index carried by two successful transactions; the earliest slot is kept.
    DuplicateIndex { index: u32, kept: Signature, dropped: Signature },
}

/// Result of one scan: ordered messages plus everything that was skipped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconstruction {
    pub messages: Vec<MessageRecord>,
    pub warnings: Vec<ScanWarning>,
    /// Signatures examined.
    pub scanned : usize,
    /// Signatures skipped because the transaction failed on-chain.
    pub reverted: usize,
}

impl Reconstruction {
    /// Signatures or records dropped because of an error.
    pub fn skipped(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| !matches!(w, ScanWarning::DuplicateIndex { .. }))
            .count()
    }

    /// Indices that were found but could not be decrypted.
    pub fn undecryptable(&self) -> Vec<u32> {
        self.warnings
            .iter()
            .filter_map(|w| match w {
                ScanWarning::DecryptionFailed { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }
}

/// Account state together with the messages recovered for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct History {
    pub account       : AccountRecord,
    pub reconstruction: Reconstruction,
}

impl History {
    /// Index ranges below the on-chain counter that the scan did not recover.
    ///
    /// Walks the sorted messages, so the cost follows the number of
    /// recovered messages rather than the counter.
    pub fn missing_ranges(&self) -> Vec<Range<u32>> {
        let counter = self.account.counter();
        let mut gaps = Vec::new();
        let mut next = 0u32;
        for index in self.reconstruction.messages.iter().map(|m| m.index).take_while(|&i| i < counter) {
            if index > next {
                gaps.push(next..index);
            }
            next = index + 1;
        }
        if next < counter {
            gaps.push(next..counter);
        }
        gaps
    }

    /// Number of indices covered by `missing_ranges`.
    pub fn missing_count(&self) -> u64 {
        self.missing_ranges().iter().map(|r| u64::from(r.end - r.start)).sum()
    }
}

enum ReferenceScan {
    Reverted,
    Scanned {
        messages: Vec<MessageRecord>,
        warnings: Vec<ScanWarning>,
    },
}

impl ReferenceScan {
    fn warning(warning: ScanWarning) -> Self {
        ReferenceScan::Scanned { messages: Vec::new(), warnings: vec![warning] }
    }
}

pub struct HistoryReconstructor<L: ?Sized> {
    ledger    : Arc<L>,
    program_id: Pubkey,
    options   : HistoryOptions,
}

impl<L: ?Sized> Clone for HistoryReconstructor<L> {
    fn clone(&self) -> Self {
        Self {
            ledger    : Arc::clone(&self.ledger),
            program_id: self.program_id,
            options   : self.options.clone(),
        }
    }
}

impl<L: LedgerClient + ?Sized> HistoryReconstructor<L> {
    pub fn new(ledger: Arc<L>, program_id: Pubkey, options: HistoryOptions) -> Self {
        Self { ledger, program_id, options }
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Fetches and decodes the account; `AccountNotFound` once it is closed.
    pub async fn load_account(&self, address: &Pubkey, kind: AccountKind) -> Result<AccountRecord> {
        let raw = self
            .ledger
            .get_account_bytes(address)
            .await?
            .ok_or(Error::AccountNotFound { address: *address })?;
        layout::decode(&raw, kind)
    }

    /// Account metadata plus its full recoverable history.
    pub async fn read(
        &self,
        address: &Pubkey,
        kind: AccountKind,
        secret: &SharedSecret,
    ) -> Result<History> {
        let account = self.load_account(address, kind).await?;
        let reconstruction = self
            .reconstruct_range(address, kind, secret, IndexRange::between(0, account.counter()))
            .await?;
        Ok(History { account, reconstruction })
    }

    /// Messages with `index >= min_index`, ordered by index.
    pub async fn reconstruct(
        &self,
        address: &Pubkey,
        kind: AccountKind,
        secret: &SharedSecret,
        min_index: u32,
    ) -> Result<Reconstruction> {
        self.reconstruct_range(address, kind, secret, IndexRange::from(min_index)).await
    }

    pub async fn reconstruct_range(
        &self,
        address: &Pubkey,
        kind: AccountKind,
        secret: &SharedSecret,
        range: IndexRange,
    ) -> Result<Reconstruction> {
        let limit = self.options.signature_limit.clamp(1, MAX_SIGNATURE_WINDOW);
        let refs = self.ledger.list_transaction_refs(address, limit).await?;

        let mut seen = HashSet::with_capacity(refs.len());
        let refs: Vec<TransactionRef> = refs.into_iter().filter(|r| seen.insert(r.signature)).collect();
        debug!(%address, %kind, signatures = refs.len(), start = range.start, end = ?range.end, "scanning history");

        let tag = kind.append_operation().tag();
        let scans: Vec<ReferenceScan> = stream::iter(refs.iter())
            .map(|reference| self.scan_reference(address, &tag, secret, range, reference))
            .buffered(self.options.fetch_concurrency.max(1))
            .collect()
            .await;

        let mut out = Reconstruction { scanned: refs.len(), ..Default::default() };
        let mut candidates = Vec::new();
        for scan in scans {
            match scan {
                ReferenceScan::Reverted => out.reverted += 1,
                ReferenceScan::Scanned { messages, warnings } => {
                    candidates.extend(messages);
                    out.warnings.extend(warnings);
                }
            }
        }

        candidates.sort_by(|a, b| {
            (a.index, a.slot, a.signature.as_ref()).cmp(&(b.index, b.slot, b.signature.as_ref()))
        });
        for record in candidates {
            match out.messages.last() {
                Some(kept) if kept.index == record.index => {
                    warn!(index = record.index, kept = %kept.signature, dropped = %record.signature, "duplicate message index");
                    out.warnings.push(ScanWarning::DuplicateIndex {
                        index  : record.index,
                        kept   : kept.signature,
                        dropped: record.signature,
                    });
                }
                _ => out.messages.push(record),
            }
        }

        info!(
            %address,
            messages = out.messages.len(),
            skipped = out.skipped(),
            reverted = out.reverted,
            "history reconstructed"
        );
        Ok(out)
    }

    async fn scan_reference(
        &self,
        address: &Pubkey,
        tag: &[u8],
        secret: &SharedSecret,
        range: IndexRange,
        reference: &TransactionRef,
    ) -> ReferenceScan {
        let signature = reference.signature;
        if reference.failed {
            debug!(%signature, "skipping failed transaction");
            return ReferenceScan::Reverted;
        }

        let tx = match self.ledger.get_transaction(reference).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                warn!(%signature, "transaction not available");
                return ReferenceScan::warning(ScanWarning::TransactionMissing { signature });
            }
            Err(e) => {
                warn!(%signature, error = %e, "transaction fetch failed");
                return ReferenceScan::warning(ScanWarning::FetchFailed { signature, reason: e.to_string() });
            }
        };
        if tx.failed {
            debug!(%signature, "skipping failed transaction");
            return ReferenceScan::Reverted;
        }

        let mut messages = Vec::new();
        let mut warnings = Vec::new();
        for matched in matching_instructions(&tx, &self.program_id, tag) {
            if matched.target != *address {
                debug!(%signature, target = %matched.target, "append for another account");
                continue;
            }
            let args = match AppendArgs::parse(matched.payload) {
                Ok(args) => args,
                Err(e) => {
                    warn!(%signature, position = matched.position, error = %e, "malformed append");
                    warnings.push(ScanWarning::MalformedPayload { signature, reason: e.to_string() });
                    continue;
                }
            };
            if !range.contains(args.message_index) {
                continue;
            }
            match decrypt_args(args, secret) {
                Ok(decrypted) => {
                    debug!(%signature, index = decrypted.index, "message recovered");
                    messages.push(MessageRecord {
                        index      : decrypted.index,
                        sender     : matched.sender,
                        plaintext  : decrypted.plaintext,
                        observed_at: tx.block_time.or(reference.block_time),
                        slot       : tx.slot,
                        signature,
                    });
                }
                Err(Error::DecryptionFailed { index }) => {
                    warn!(%signature, index, "message could not be decrypted");
                    warnings.push(ScanWarning::DecryptionFailed { signature, index });
                }
                Err(e) => {
                    warnings.push(ScanWarning::MalformedPayload { signature, reason: e.to_string() });
                }
            }
        }
        ReferenceScan::Scanned { messages, warnings }
    }
}
