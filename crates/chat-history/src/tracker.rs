//! Live tail: diff the append counter on each account notification and
//! reconstruct only the new index range.
//!
//! Idle -> Subscribed -> (notification) Diffing -> Subscribed
//! terminal: Unsubscribed (teardown, account closed) or Failed (setup error).
//!
//! Notifications are handled one at a time; `&mut self` keeps the counter
//! comparison single-flight. The last seen counter belongs to the tracker,
//! so any number of trackers can run side by side.

use std::future::Future;

use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info, warn};

use crate::cipher::SharedSecret;
use crate::error::{Error, Result};
use crate::history::{HistoryReconstructor, IndexRange, MessageRecord, ScanWarning};
use crate::layout::{self, AccountKind, AccountRecord};
use crate::ledger::{AccountSubscription, AccountUpdate, LedgerClient};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Subscribed,
    Diffing,
    Unsubscribed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TailEvent {
    /// New messages in `range`, ordered by index.
    Messages {
        range   : IndexRange,
        messages: Vec<MessageRecord>,
        warnings: Vec<ScanWarning>,
    },
    /// The counter advanced but no content could be recovered for `range`.
    ContentUnavailable {
        range   : IndexRange,
        warnings: Vec<ScanWarning>,
    },
    /// The account was closed.
    Closed,
}

/// Why `ChangeTracker::run` returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerExit {
    Interrupted,
    AccountClosed,
    StreamEnded,
}

pub struct ChangeTracker<L: LedgerClient + ?Sized> {
    history     : HistoryReconstructor<L>,
    address     : Pubkey,
    kind        : AccountKind,
    secret      : SharedSecret,
    state       : TrackerState,
    last_count  : u32,
    subscription: Option<AccountSubscription>,
}

impl<L: LedgerClient + ?Sized> ChangeTracker<L> {
    pub fn new(
        history: HistoryReconstructor<L>,
        address: Pubkey,
        kind: AccountKind,
        secret: SharedSecret,
    ) -> Self {
        Self {
            history,
            address,
            kind,
            secret,
            state: TrackerState::Idle,
            last_count: 0,
            subscription: None,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Counter value up to which messages have been handled.
    pub fn last_count(&self) -> u32 {
        self.last_count
    }

    pub fn address(&self) -> &Pubkey {
        &self.address
    }

    /// Opens the notification stream, then reads the current counter.
    ///
    /// Messages below the returned record's counter are not replayed.
    /// Appends landing between the two steps show up as the first diff.
    pub async fn start(&mut self) -> Result<AccountRecord> {
        if self.state != TrackerState::Idle {
            return Err(Error::Config(format!("tracker already started ({:?})", self.state)));
        }
        match self.open().await {
            Ok(record) => {
                self.last_count = record.counter();
                self.state = TrackerState::Subscribed;
                info!(address = %self.address, kind = %self.kind, count = self.last_count, "tracking account");
                Ok(record)
            }
            Err(e) => {
                warn!(address = %self.address, error = %e, "tracker setup failed");
                self.state = TrackerState::Failed;
                self.shutdown().await;
                Err(e)
            }
        }
    }

    async fn open(&mut self) -> Result<AccountRecord> {
        let subscription = self
            .history
            .ledger()
            .subscribe_account_changes(&self.address)
            .await
            .map_err(|source| Error::SubscriptionSetupFailed { address: self.address, source })?;
        self.subscription = Some(subscription);
        self.history.load_account(&self.address, self.kind).await
    }

    /// Handles one notification. `None` when nothing new happened.
    ///
    /// A failed reconstruction leaves the counter untouched so the next
    /// notification covers the same range again.
    pub async fn apply(&mut self, update: AccountUpdate) -> Result<Option<TailEvent>> {
        if update.is_closed() {
            info!(address = %self.address, slot = update.slot, "account closed");
            self.shutdown().await;
            return Ok(Some(TailEvent::Closed));
        }

        self.state = TrackerState::Diffing;
        let outcome = self.diff(&update).await;
        self.state = TrackerState::Subscribed;
        outcome
    }

    async fn diff(&mut self, update: &AccountUpdate) -> Result<Option<TailEvent>> {
        let count = match layout::read_counter(&update.data, self.kind) {
            Ok(count) => count,
            Err(e) => {
                warn!(address = %self.address, slot = update.slot, error = %e, "undecodable account update");
                return Ok(None);
            }
        };
        if count <= self.last_count {
            debug!(previous = self.last_count, observed = count, "counter did not advance");
            return Ok(None);
        }

        let range = IndexRange::between(self.last_count, count);
        let found = self
            .history
            .reconstruct_range(&self.address, self.kind, &self.secret, range)
            .await?;
        info!(from = range.start, to = count, found = found.messages.len(), "counter advanced");
        self.last_count = count;

        if found.messages.is_empty() {
            warn!(from = range.start, to = count, "new messages could not be retrieved");
            return Ok(Some(TailEvent::ContentUnavailable { range, warnings: found.warnings }));
        }
        Ok(Some(TailEvent::Messages { range, messages: found.messages, warnings: found.warnings }))
    }

    /// Waits for the next notification that produces an event.
    ///
    /// `None` once the notification stream has ended.
    pub async fn next_event(&mut self) -> Result<Option<TailEvent>> {
        loop {
            let Some(subscription) = self.subscription.as_mut() else {
                return Ok(None);
            };
            let Some(update) = subscription.updates.recv().await else {
                return Ok(None);
            };
            if let Some(event) = self.apply(update).await? {
                return Ok(Some(event));
            }
        }
    }

    /// Releases the subscription. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            let handle = subscription.handle;
            drop(subscription.updates);
            match self.history.ledger().unsubscribe(handle).await {
                Ok(()) => debug!(?handle, "unsubscribed"),
                Err(e) => warn!(?handle, error = %e, "unsubscribe failed"),
            }
        }
        if self.state != TrackerState::Failed {
            self.state = TrackerState::Unsubscribed;
        }
    }

    /// Tails until `interrupt` resolves, the account closes or the stream ends.
    ///
    /// The subscription is released on every return path, and through
    /// `Drop` when the future is cancelled. Ledger errors during a diff are
    /// logged and tailing continues.
    pub async fn run<S, F>(mut self, interrupt: S, mut on_event: F) -> Result<TrackerExit>
    where
        S: Future<Output = ()>,
        F: FnMut(TailEvent),
    {
        if self.state == TrackerState::Idle {
            self.start().await?;
        }
        tokio::pin!(interrupt);

        let exit = loop {
            tokio::select! {
                _ = &mut interrupt => break Ok(TrackerExit::Interrupted),
                event = self.next_event() => match event {
                    Ok(Some(TailEvent::Closed)) => {
                        on_event(TailEvent::Closed);
                        break Ok(TrackerExit::AccountClosed);
                    }
                    Ok(Some(event)) => on_event(event),
                    Ok(None) => break Ok(TrackerExit::StreamEnded),
                    Err(Error::Ledger(e)) => warn!(error = %e, "diff failed, waiting for next update"),
                    Err(e) => break Err(e),
                },
            }
        };

        self.shutdown().await;
        exit
    }
}

impl<L: LedgerClient + ?Sized> Drop for ChangeTracker<L> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            debug!(address = %self.address, handle = ?subscription.handle, "tracker dropped while subscribed");
            self.history.ledger().release(subscription.handle);
        }
    }
}
