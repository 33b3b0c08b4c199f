//! Wire constants of the messaging program.
//!
//! Account discriminators and operation tags are Anchor sighashes:
//! `sha256("account:<Name>")[..8]` and `sha256("global:<snake_name>")[..8]`.
//! Only the two append tags drive decoding.

use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;

/// Deployed program id.
pub const PROGRAM_ID: Pubkey = solana_sdk::pubkey!("9tN5NBvynubfJwQWDqrSoHEE3Xy2MVj3BmHdLu13wCcS");

pub const TAG_LEN: usize = 8;

// PDA seed prefixes
pub const THREAD_SEED      : &[u8] = b"message_thread";
pub const CHANNEL_SEED     : &[u8] = b"broadcast_channel";
pub const SUBSCRIPTION_SEED: &[u8] = b"subscription";

/// First eight bytes of `sha256("<namespace>:<name>")`.
pub fn sighash(namespace: &str, name: &str) -> [u8; TAG_LEN] {
    let digest = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&digest[..TAG_LEN]);
    out
}

/// Instructions exposed by the program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    InitializeThread,
    SendMessage,
    SendBroadcast,
    InitializeChannel,
    SubscribeChannel,
    CloseThread,
    CloseChannel,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::InitializeThread  => "initialize_thread",
            Operation::SendMessage       => "send_message",
            Operation::SendBroadcast     => "send_broadcast",
            Operation::InitializeChannel => "initialize_channel",
            Operation::SubscribeChannel  => "subscribe_channel",
            Operation::CloseThread       => "close_thread",
            Operation::CloseChannel      => "close_channel",
        }
    }

    pub fn tag(self) -> [u8; TAG_LEN] {
        sighash("global", self.name())
    }
}

/// Thread PDA for `(participant_a, participant_b, thread_id)`.
pub fn thread_address(
    program_id   : &Pubkey,
    participant_a: &Pubkey,
    participant_b: &Pubkey,
    thread_id    : &[u8; 32],
) -> Pubkey {
    Pubkey::find_program_address(
        &[THREAD_SEED, participant_a.as_ref(), participant_b.as_ref(), thread_id.as_ref()],
        program_id,
    )
    .0
}

/// Channel PDA for `(owner, name)`.
pub fn channel_address(program_id: &Pubkey, owner: &Pubkey, name: &str) -> Pubkey {
    Pubkey::find_program_address(&[CHANNEL_SEED, owner.as_ref(), name.as_bytes()], program_id).0
}

/// Subscription PDA for `(channel, subscriber)`.
pub fn subscription_address(program_id: &Pubkey, channel: &Pubkey, subscriber: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[SUBSCRIPTION_SEED, channel.as_ref(), subscriber.as_ref()],
        program_id,
    )
    .0
}
