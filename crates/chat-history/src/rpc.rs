//! `LedgerClient` over a validator's JSON-RPC and websocket endpoints.
//!
//! Each account subscription runs in its own task that owns a
//! `PubsubClient` and forwards decoded updates into an mpsc channel. The task
//! unsubscribes upstream when told to stop, when its stop handle is dropped,
//! or when the receiving side goes away.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use solana_account_decoder::UiAccountEncoding;
use solana_client::{
    client_error::ClientError,
    nonblocking::{pubsub_client::PubsubClient, rpc_client::RpcClient},
    rpc_client::GetConfirmedSignaturesForAddress2Config,
    rpc_config::{RpcAccountInfoConfig, RpcTransactionConfig},
    rpc_request::RpcRequest,
};
use serde_json::json;
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    instruction::CompiledInstruction,
    pubkey::Pubkey,
    signature::Signature,
};
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, UiLoadedAddresses, UiTransactionEncoding,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::config::ReaderConfig;
use crate::error::{Error, LedgerError};
use crate::ledger::{
    AccountSubscription, AccountUpdate, LedgerClient, LedgerInstruction, LedgerTransaction,
    SubscriptionHandle, TransactionRef,
};

const UPDATE_BUFFER: usize = 64;

struct Forwarder {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct RpcLedger {
    rpc          : RpcClient,
    ws_url       : String,
    commitment   : CommitmentConfig,
    subscriptions: Mutex<HashMap<u64, Forwarder>>,
    next_id      : AtomicU64,
}

impl RpcLedger {
    pub fn new(rpc_url: String, ws_url: String, commitment: CommitmentConfig) -> Self {
        Self::with_client(RpcClient::new_with_commitment(rpc_url, commitment), ws_url, commitment)
    }

    pub fn with_client(rpc: RpcClient, ws_url: String, commitment: CommitmentConfig) -> Self {
        Self {
            rpc,
            ws_url,
            commitment,
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &ReaderConfig) -> Result<Self, Error> {
        Ok(Self::new(config.rpc_url.clone(), config.websocket_url(), config.commitment()?))
    }
}

fn rpc_error(e: ClientError) -> LedgerError {
    LedgerError::Rpc(e.to_string())
}

fn parse_pubkey(s: &str) -> Result<Pubkey, LedgerError> {
    Pubkey::from_str(s).map_err(|e| LedgerError::Decode(format!("bad address {s}: {e}")))
}

fn resolve_instruction(ix: &CompiledInstruction, keys: &[Pubkey]) -> Result<LedgerInstruction, LedgerError> {
    let key = |i: u8| {
        keys.get(i as usize)
            .copied()
            .ok_or_else(|| LedgerError::Decode(format!("account index {i} outside {} keys", keys.len())))
    };
    Ok(LedgerInstruction {
        program_id: key(ix.program_id_index)?,
        accounts  : ix.accounts.iter().map(|&i| key(i)).collect::<Result<_, _>>()?,
        data      : ix.data.clone(),
    })
}

/// Resolves account indices against static keys plus any lookup-table keys.
fn to_ledger_transaction(
    signature: Signature,
    encoded: EncodedConfirmedTransactionWithStatusMeta,
) -> Result<LedgerTransaction, LedgerError> {
    let EncodedConfirmedTransactionWithStatusMeta { slot, transaction, block_time } = encoded;
    let failed = transaction.meta.as_ref().map_or(false, |meta| meta.err.is_some());
    let versioned = transaction
        .transaction
        .decode()
        .ok_or_else(|| LedgerError::Decode(format!("transaction {signature} not binary-encoded")))?;

    let mut keys = versioned.message.static_account_keys().to_vec();
    if let Some(meta) = &transaction.meta {
        let loaded: Option<UiLoadedAddresses> = meta.loaded_addresses.clone().into();
        if let Some(loaded) = loaded {
            for key in loaded.writable.iter().chain(loaded.readonly.iter()) {
                keys.push(parse_pubkey(key)?);
            }
        }
    }

    let instructions = versioned
        .message
        .instructions()
        .iter()
        .map(|ix| resolve_instruction(ix, &keys))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(LedgerTransaction { signature, slot, block_time, failed, instructions })
}

async fn forward_account_updates(
    ws_url : String,
    address: Pubkey,
    config : RpcAccountInfoConfig,
    ready  : oneshot::Sender<Result<(), LedgerError>>,
    updates: mpsc::Sender<AccountUpdate>,
    mut stop: oneshot::Receiver<()>,
) {
    let client = match PubsubClient::new(&ws_url).await {
        Ok(client) => client,
        Err(e) => {
            let _ = ready.send(Err(LedgerError::Pubsub(e.to_string())));
            return;
        }
    };
    let (mut stream, unsubscribe) = match client.account_subscribe(&address, Some(config)).await {
        Ok(subscribed) => subscribed,
        Err(e) => {
            let _ = ready.send(Err(LedgerError::Pubsub(e.to_string())));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    loop {
        tokio::select! {
            _ = &mut stop => break,
            next = stream.next() => {
                let Some(response) = next else {
                    debug!(%address, "notification stream ended");
                    break;
                };
                let Some(account) = response.value.decode::<Account>() else {
                    warn!(%address, slot = response.context.slot, "undecodable account notification");
                    continue;
                };
                let update = AccountUpdate {
                    slot    : response.context.slot,
                    lamports: account.lamports,
                    data    : account.data,
                };
                if updates.send(update).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(stream);
    unsubscribe().await;
    if let Err(e) = client.shutdown().await {
        warn!(%address, error = %e, "pubsub shutdown failed");
    }
    debug!(%address, "account subscription released");
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn get_account_bytes(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        let response = self
            .rpc
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(rpc_error)?;
        Ok(response.value.map(|account| account.data))
    }

    async fn list_transaction_refs(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<TransactionRef>, LedgerError> {
        let config = GetConfirmedSignaturesForAddress2Config {
            before    : None,
            until     : None,
            limit     : Some(limit),
            commitment: Some(self.commitment),
        };
        let statuses = self
            .rpc
            .get_signatures_for_address_with_config(address, config)
            .await
            .map_err(rpc_error)?;

        statuses
            .into_iter()
            .map(|status| {
                let signature = Signature::from_str(&status.signature)
                    .map_err(|e| LedgerError::Decode(format!("bad signature {}: {e}", status.signature)))?;
                Ok(TransactionRef {
                    signature,
                    slot      : status.slot,
                    block_time: status.block_time,
                    failed    : status.err.is_some(),
                })
            })
            .collect()
    }

    async fn get_transaction(
        &self,
        reference: &TransactionRef,
    ) -> Result<Option<LedgerTransaction>, LedgerError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };
        // A pruned or unknown transaction comes back as a null result.
        let encoded: Option<EncodedConfirmedTransactionWithStatusMeta> = self
            .rpc
            .send(RpcRequest::GetTransaction, json!([reference.signature.to_string(), config]))
            .await
            .map_err(rpc_error)?;
        encoded
            .map(|encoded| to_ledger_transaction(reference.signature, encoded))
            .transpose()
    }

    async fn subscribe_account_changes(
        &self,
        address: &Pubkey,
    ) -> Result<AccountSubscription, LedgerError> {
        let config = RpcAccountInfoConfig {
            encoding        : Some(UiAccountEncoding::Base64),
            data_slice      : None,
            commitment      : Some(self.commitment),
            min_context_slot: None,
        };
        let (ready_tx, ready_rx) = oneshot::channel();
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_BUFFER);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(forward_account_updates(
            self.ws_url.clone(),
            *address,
            config,
            ready_tx,
            updates_tx,
            stop_rx,
        ));

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(LedgerError::Closed),
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.lock().insert(id, Forwarder { stop: stop_tx, task });
        debug!(%address, id, "account subscription opened");
        Ok(AccountSubscription { handle: SubscriptionHandle(id), updates: updates_rx })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), LedgerError> {
        let Some(forwarder) = self.subscriptions.lock().remove(&handle.0) else {
            return Ok(());
        };
        let _ = forwarder.stop.send(());
        forwarder
            .task
            .await
            .map_err(|e| LedgerError::Pubsub(format!("subscription task failed: {e}")))
    }

    fn release(&self, handle: SubscriptionHandle) {
        // The forwarder task unsubscribes upstream on its own once stopped.
        if let Some(forwarder) = self.subscriptions.lock().remove(&handle.0) {
            let _ = forwarder.stop.send(());
            debug!(id = handle.0, "account subscription released without waiting");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};

    use serde_json::Value;
    use solana_sdk::{
        hash::Hash,
        message::{v0, v0::MessageAddressTableLookup, MessageHeader, VersionedMessage},
        transaction::VersionedTransaction,
    };
    use solana_transaction_status::{
        EncodedTransaction, EncodedTransactionWithStatusMeta, TransactionBinaryEncoding, UiTransactionStatusMeta,
    };

    fn encoded(message: VersionedMessage) -> EncodedConfirmedTransactionWithStatusMeta {
        encoded_with_meta(message, None)
    }

    fn encoded_with_meta(
        message: VersionedMessage,
        meta: Option<UiTransactionStatusMeta>,
    ) -> EncodedConfirmedTransactionWithStatusMeta {
        let tx = VersionedTransaction { signatures: vec![Signature::default()], message };
        let bytes = bincode::serialize(&tx).unwrap();
        EncodedConfirmedTransactionWithStatusMeta {
            slot: 77,
            transaction: EncodedTransactionWithStatusMeta {
                transaction: EncodedTransaction::Binary(
                    STANDARD.encode(bytes),
                    TransactionBinaryEncoding::Base64,
                ),
                meta,
                version: None,
            },
            block_time: Some(1_700_000_000),
        }
    }

    fn meta_with_loaded(writable: &[Pubkey], readonly: &[Pubkey]) -> UiTransactionStatusMeta {
        let keys = |keys: &[Pubkey]| keys.iter().map(|k| k.to_string()).collect::<Vec<_>>();
        serde_json::from_value(json!({
            "err": null,
            "status": { "Ok": null },
            "fee": 5000,
            "preBalances": [],
            "postBalances": [],
            "loadedAddresses": { "writable": keys(writable), "readonly": keys(readonly) },
        }))
        .unwrap()
    }

    fn mocked_ledger(response: Value) -> RpcLedger {
        let rpc = RpcClient::new_mock_with_mocks(
            "succeeds".to_string(),
            HashMap::from([(RpcRequest::GetTransaction, response)]),
        );
        RpcLedger::with_client(rpc, "ws://unused".to_string(), CommitmentConfig::confirmed())
    }

    fn reference() -> TransactionRef {
        TransactionRef { signature: Signature::default(), slot: 1, block_time: None, failed: false }
    }

    #[test]
    fn resolves_static_keys() {
        let payer = Pubkey::new_unique();
        let thread = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let message = v0::Message {
            header: MessageHeader {
                num_required_signatures: 1,
                num_readonly_signed_accounts: 0,
                num_readonly_unsigned_accounts: 1,
            },
            account_keys: vec![payer, thread, program],
            recent_blockhash: Hash::default(),
            instructions: vec![CompiledInstruction::new_from_raw_parts(2, vec![1, 2, 3], vec![1, 0])],
            address_table_lookups: vec![],
        };
        let tx = to_ledger_transaction(Signature::default(), encoded(VersionedMessage::V0(message))).unwrap();
        assert_eq!(tx.slot, 77);
        assert_eq!(tx.block_time, Some(1_700_000_000));
        assert!(!tx.failed);
        assert_eq!(
            tx.instructions,
            vec![LedgerInstruction { program_id: program, accounts: vec![thread, payer], data: vec![1, 2, 3] }]
        );
    }

    #[test]
    fn unsanitary_message_is_a_decode_error() {
        let message = v0::Message {
            account_keys: vec![Pubkey::new_unique()],
            instructions: vec![CompiledInstruction::new_from_raw_parts(5, vec![], vec![])],
            ..Default::default()
        };
        assert!(matches!(
            to_ledger_transaction(Signature::default(), encoded(VersionedMessage::V0(message))),
            Err(LedgerError::Decode(_))
        ));
    }

    #[test]
    fn resolves_lookup_table_keys() {
        let payer = Pubkey::new_unique();
        let thread = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let sender = Pubkey::new_unique();
        let table_reader = Pubkey::new_unique();
        let message = v0::Message {
            header: MessageHeader {
                num_required_signatures: 1,
                num_readonly_signed_accounts: 0,
                num_readonly_unsigned_accounts: 1,
            },
            account_keys: vec![payer, thread, program],
            recent_blockhash: Hash::default(),
            // Index 3 is the first writable lookup key, 4 the first readonly one.
            instructions: vec![CompiledInstruction::new_from_raw_parts(2, vec![9], vec![1, 3, 4])],
            address_table_lookups: vec![MessageAddressTableLookup {
                account_key: Pubkey::new_unique(),
                writable_indexes: vec![0],
                readonly_indexes: vec![0],
            }],
        };
        let meta = meta_with_loaded(&[sender], &[table_reader]);
        let tx = to_ledger_transaction(
            Signature::default(),
            encoded_with_meta(VersionedMessage::V0(message), Some(meta)),
        )
        .unwrap();
        assert_eq!(tx.instructions[0].accounts, vec![thread, sender, table_reader]);
    }

    #[tokio::test]
    async fn null_transaction_is_missing() {
        let ledger = mocked_ledger(Value::Null);
        assert_eq!(ledger.get_transaction(&reference()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn undecodable_transaction_is_an_error() {
        let ledger = mocked_ledger(json!({ "slot": "not a number" }));
        assert!(matches!(ledger.get_transaction(&reference()).await, Err(LedgerError::Rpc(_))));
    }
}
