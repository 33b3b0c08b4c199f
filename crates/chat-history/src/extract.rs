//! Append payload decoding.
//!
//! Payload: tag(8) | message_index u32 | content_len u32 | ciphertext(content_len).
//! The part after the tag is the borsh encoding of the instruction arguments.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::cipher::SharedSecret;
use crate::error::{Error, Result};
use crate::protocol::TAG_LEN;

/// Fixed part of an append payload: tag + index + length prefix.
pub const APPEND_HEAD: usize = TAG_LEN + 4 + 4; // = 16

/// Arguments of `send_message` / `send_broadcast`.
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct AppendArgs {
    pub message_index    : u32,
    pub encrypted_content: Vec<u8>,
}

impl AppendArgs {
    /// Parses a full instruction payload (tag included, not checked).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < APPEND_HEAD {
            return Err(Error::MalformedPayload {
                reason: format!("{} bytes, need at least {APPEND_HEAD}", payload.len()),
            });
        }
        let declared = u32::from_le_bytes([payload[12], payload[13], payload[14], payload[15]]) as usize;
        let available = payload.len() - APPEND_HEAD;
        if declared > available {
            return Err(Error::MalformedPayload {
                reason: format!("content length {declared} exceeds the {available} bytes present"),
            });
        }
        let mut args = &payload[TAG_LEN..];
        Self::deserialize(&mut args).map_err(|e| Error::MalformedPayload { reason: e.to_string() })
    }

    /// Full payload for `tag`.
    pub fn encode(&self, tag: &[u8; TAG_LEN]) -> Vec<u8> {
        let mut out = Vec::with_capacity(APPEND_HEAD + self.encrypted_content.len());
        out.extend_from_slice(tag);
        out.extend_from_slice(&self.message_index.to_le_bytes());
        out.extend_from_slice(&(self.encrypted_content.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.encrypted_content);
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptedAppend {
    pub index    : u32,
    pub plaintext: String,
}

/// Parses and decrypts one append payload.
pub fn extract(payload: &[u8], secret: &SharedSecret) -> Result<DecryptedAppend> {
    let args = AppendArgs::parse(payload)?;
    decrypt_args(args, secret)
}

pub(crate) fn decrypt_args(args: AppendArgs, secret: &SharedSecret) -> Result<DecryptedAppend> {
    let index = args.message_index;
    let plaintext = secret
        .decrypt(&args.encrypted_content)
        .map_err(|_| Error::DecryptionFailed { index })?;
    Ok(DecryptedAppend { index, plaintext })
}
