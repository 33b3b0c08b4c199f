//! Account layouts and decoding.
//!
//! Thread:       disc(8) | participant_a(32) | participant_b(32) | thread_id(32) | message_count u32
//!               | created_at i64 | last_message_at i64
//! Channel:      disc(8) | owner(32) | name_len u32 | name (reserved 32) | broadcast_count u32
//!               | subscriber_count u32 | created_at i64 | last_broadcast_at i64
//! Subscription: disc(8) | subscriber(32) | channel(32) | subscribed_at i64 | last_read_index u32
//!
//! The channel counter sits at offset 76 whatever the actual name length is;
//! the name field always occupies its full 32-byte reservation.

use std::fmt;

use solana_sdk::pubkey::Pubkey;

use crate::error::{Error, Result};
use crate::protocol::{sighash, Operation, TAG_LEN};

// Size constants
pub const DISC_SIZE: usize = TAG_LEN;
pub const PUBKEY_LEN: usize = 32;

pub const THREAD_PARTICIPANT_A: usize = DISC_SIZE; // = 8
pub const THREAD_PARTICIPANT_B: usize = THREAD_PARTICIPANT_A + PUBKEY_LEN; // = 40
pub const THREAD_ID            : usize = THREAD_PARTICIPANT_B + PUBKEY_LEN; // = 72
pub const THREAD_COUNT         : usize = THREAD_ID + 32; // = 104
pub const THREAD_MIN_LEN       : usize = THREAD_COUNT + 4; // = 108
pub const THREAD_CREATED_AT    : usize = THREAD_MIN_LEN; // = 108
pub const THREAD_LAST_MESSAGE  : usize = THREAD_CREATED_AT + 8; // = 116

pub const CHANNEL_OWNER       : usize = DISC_SIZE; // = 8
pub const CHANNEL_NAME_LEN    : usize = CHANNEL_OWNER + PUBKEY_LEN; // = 40
pub const CHANNEL_NAME        : usize = CHANNEL_NAME_LEN + 4; // = 44
pub const MAX_CHANNEL_NAME    : usize = 32;
pub const CHANNEL_COUNT       : usize = CHANNEL_NAME + MAX_CHANNEL_NAME; // = 76
pub const CHANNEL_MIN_LEN     : usize = CHANNEL_COUNT + 4; // = 80
pub const CHANNEL_SUBSCRIBERS : usize = CHANNEL_MIN_LEN; // = 80
pub const CHANNEL_CREATED_AT  : usize = CHANNEL_SUBSCRIBERS + 4; // = 84
pub const CHANNEL_LAST_MESSAGE: usize = CHANNEL_CREATED_AT + 8; // = 92

pub const SUBSCRIPTION_SUBSCRIBER: usize = DISC_SIZE; // = 8
pub const SUBSCRIPTION_CHANNEL   : usize = SUBSCRIPTION_SUBSCRIBER + PUBKEY_LEN; // = 40
pub const SUBSCRIPTION_SINCE     : usize = SUBSCRIPTION_CHANNEL + PUBKEY_LEN; // = 72
pub const SUBSCRIPTION_LAST_READ : usize = SUBSCRIPTION_SINCE + 8; // = 80
pub const SUBSCRIPTION_MIN_LEN   : usize = SUBSCRIPTION_LAST_READ + 4; // = 84

/// Account shapes that hold an append counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccountKind {
    Thread,
    Channel,
}

impl AccountKind {
    pub fn account_name(self) -> &'static str {
        match self {
            AccountKind::Thread  => "MessageThread",
            AccountKind::Channel => "BroadcastChannel",
        }
    }

    pub fn discriminator(self) -> [u8; DISC_SIZE] {
        sighash("account", self.account_name())
    }

    /// Operation that appends to this kind of account.
    pub fn append_operation(self) -> Operation {
        match self {
            AccountKind::Thread  => Operation::SendMessage,
            AccountKind::Channel => Operation::SendBroadcast,
        }
    }

    /// Shortest buffer the decoder accepts.
    pub fn min_len(self) -> usize {
        match self {
            AccountKind::Thread  => THREAD_MIN_LEN,
            AccountKind::Channel => CHANNEL_MIN_LEN,
        }
    }

    fn counter_offset(self) -> usize {
        match self {
            AccountKind::Thread  => THREAD_COUNT,
            AccountKind::Channel => CHANNEL_COUNT,
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountKind::Thread  => f.write_str("thread"),
            AccountKind::Channel => f.write_str("channel"),
        }
    }
}

/// Discriminator of subscription accounts.
pub fn subscription_discriminator() -> [u8; DISC_SIZE] {
    sighash("account", "ChannelSubscription")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadRecord {
    pub participant_a  : Pubkey,
    pub participant_b  : Pubkey,
    pub thread_id      : [u8; 32],
    pub message_count  : u32,
    pub created_at     : Option<i64>,
    pub last_message_at: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelRecord {
    pub owner            : Pubkey,
    pub name             : String,
    pub broadcast_count  : u32,
    pub subscriber_count : Option<u32>,
    pub created_at       : Option<i64>,
    pub last_broadcast_at: Option<i64>,
}

/// Decoded account state. Produced fresh on every decode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountRecord {
    Thread(ThreadRecord),
    Channel(ChannelRecord),
}

impl AccountRecord {
    pub fn kind(&self) -> AccountKind {
        match self {
            AccountRecord::Thread(_)  => AccountKind::Thread,
            AccountRecord::Channel(_) => AccountKind::Channel,
        }
    }

    /// Number of appends applied on-chain.
    pub fn counter(&self) -> u32 {
        match self {
            AccountRecord::Thread(t)  => t.message_count,
            AccountRecord::Channel(c) => c.broadcast_count,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionRecord {
    pub subscriber     : Pubkey,
    pub channel        : Pubkey,
    pub subscribed_at  : i64,
    pub last_read_index: u32,
}

/// Bounds-checked little-endian reads over raw account bytes.
struct Fields<'a> {
    data: &'a [u8],
    what: &'static str,
}

impl<'a> Fields<'a> {
    fn bytes(&self, offset: usize, len: usize) -> std::result::Result<&'a [u8], String> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| {
                format!(
                    "{} needs bytes {}..{} but account has {}",
                    self.what,
                    offset,
                    offset.saturating_add(len),
                    self.data.len()
                )
            })
    }

    fn array<const N: usize>(&self, offset: usize) -> std::result::Result<[u8; N], String> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(offset, N)?);
        Ok(out)
    }

    fn pubkey(&self, offset: usize) -> std::result::Result<Pubkey, String> {
        self.array::<PUBKEY_LEN>(offset).map(Pubkey::new_from_array)
    }

    fn u32(&self, offset: usize) -> std::result::Result<u32, String> {
        self.array::<4>(offset).map(u32::from_le_bytes)
    }

    fn i64(&self, offset: usize) -> std::result::Result<i64, String> {
        self.array::<8>(offset).map(i64::from_le_bytes)
    }
}

fn fields<'a>(data: &'a [u8], what: &'static str) -> Fields<'a> {
    Fields { data, what }
}

fn malformed(kind: AccountKind) -> impl Fn(String) -> Error {
    move |reason| Error::MalformedAccount { kind, reason }
}

/// Decodes raw account bytes as `kind`.
///
/// The discriminator is skipped without being checked.
pub fn decode(raw: &[u8], kind: AccountKind) -> Result<AccountRecord> {
    match kind {
        AccountKind::Thread  => decode_thread(raw).map(AccountRecord::Thread),
        AccountKind::Channel => decode_channel(raw).map(AccountRecord::Channel),
    }
}

pub fn decode_thread(raw: &[u8]) -> Result<ThreadRecord> {
    let err = malformed(AccountKind::Thread);
    if raw.len() < THREAD_MIN_LEN {
        return Err(err(format!("{} bytes, need at least {THREAD_MIN_LEN}", raw.len())));
    }
    let f = fields(raw, "thread");
    Ok(ThreadRecord {
        participant_a  : f.pubkey(THREAD_PARTICIPANT_A).map_err(&err)?,
        participant_b  : f.pubkey(THREAD_PARTICIPANT_B).map_err(&err)?,
        thread_id      : f.array::<32>(THREAD_ID).map_err(&err)?,
        message_count  : f.u32(THREAD_COUNT).map_err(&err)?,
        created_at     : f.i64(THREAD_CREATED_AT).ok(),
        last_message_at: f.i64(THREAD_LAST_MESSAGE).ok(),
    })
}

pub fn decode_channel(raw: &[u8]) -> Result<ChannelRecord> {
    let err = malformed(AccountKind::Channel);
    let f = fields(raw, "channel");

    let owner = f.pubkey(CHANNEL_OWNER).map_err(&err)?;
    let name_len = f.u32(CHANNEL_NAME_LEN).map_err(&err)? as usize;
    if name_len > MAX_CHANNEL_NAME {
        return Err(err(format!("name length {name_len} exceeds {MAX_CHANNEL_NAME}")));
    }
    let name = std::str::from_utf8(f.bytes(CHANNEL_NAME, name_len).map_err(&err)?)
        .map_err(|e| err(format!("name is not utf-8: {e}")))?
        .to_owned();

    Ok(ChannelRecord {
        owner,
        name,
        broadcast_count  : f.u32(CHANNEL_COUNT).map_err(&err)?,
        subscriber_count : f.u32(CHANNEL_SUBSCRIBERS).ok(),
        created_at       : f.i64(CHANNEL_CREATED_AT).ok(),
        last_broadcast_at: f.i64(CHANNEL_LAST_MESSAGE).ok(),
    })
}

pub fn decode_subscription(raw: &[u8]) -> std::result::Result<SubscriptionRecord, String> {
    let f = fields(raw, "subscription");
    Ok(SubscriptionRecord {
        subscriber     : f.pubkey(SUBSCRIPTION_SUBSCRIBER)?,
        channel        : f.pubkey(SUBSCRIPTION_CHANNEL)?,
        subscribed_at  : f.i64(SUBSCRIPTION_SINCE)?,
        last_read_index: f.u32(SUBSCRIPTION_LAST_READ)?,
    })
}

/// Reads only the append counter; used on every live notification.
pub fn read_counter(raw: &[u8], kind: AccountKind) -> Result<u32> {
    if raw.len() < kind.min_len() {
        return Err(malformed(kind)(format!(
            "{} bytes, need at least {}",
            raw.len(),
            kind.min_len()
        )));
    }
    fields(raw, "counter")
        .u32(kind.counter_offset())
        .map_err(malformed(kind))
}

/// Kind named by a known discriminator, if any.
pub fn detect_kind(raw: &[u8]) -> Option<AccountKind> {
    let disc = raw.get(..DISC_SIZE)?;
    [AccountKind::Thread, AccountKind::Channel]
        .into_iter()
        .find(|kind| kind.discriminator() == disc)
}

pub fn is_subscription(raw: &[u8]) -> bool {
    raw.get(..DISC_SIZE) == Some(&subscription_discriminator()[..])
}
