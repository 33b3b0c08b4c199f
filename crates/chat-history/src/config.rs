//! Reader configuration: defaults, optional TOML file, environment overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};

use crate::error::{Error, Result};
use crate::history::{HistoryOptions, DEFAULT_FETCH_CONCURRENCY, MAX_SIGNATURE_WINDOW};
use crate::protocol::PROGRAM_ID;

pub const DEFAULT_CONFIG_FILE: &str = "chat-reader.toml";
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8899";

pub const ENV_RPC_URL   : &str = "CHAT_RPC_URL";
pub const ENV_WS_URL    : &str = "CHAT_WS_URL";
pub const ENV_PROGRAM_ID: &str = "CHAT_PROGRAM_ID";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub rpc_url: String,
    /// Derived from `rpc_url` when unset.
    pub ws_url: Option<String>,
    pub program_id: String,
    /// processed | confirmed | finalized
    pub commitment: String,
    pub signature_limit: usize,
    pub fetch_concurrency: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            rpc_url          : DEFAULT_RPC_URL.to_string(),
            ws_url           : None,
            program_id       : PROGRAM_ID.to_string(),
            commitment       : "confirmed".to_string(),
            signature_limit  : MAX_SIGNATURE_WINDOW,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }
}

impl ReaderConfig {
    /// Defaults, then `path` (or `./chat-reader.toml` if present), then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::from_file(&local)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&contents)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }

    pub fn from_toml(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.rpc_url = url;
        }
        if let Some(url) = lookup(ENV_WS_URL) {
            self.ws_url = Some(url);
        }
        if let Some(id) = lookup(ENV_PROGRAM_ID) {
            self.program_id = id;
        }
    }

    pub fn program_id(&self) -> Result<Pubkey> {
        Pubkey::from_str(&self.program_id)
            .map_err(|e| Error::Config(format!("invalid program id {}: {e}", self.program_id)))
    }

    pub fn commitment(&self) -> Result<CommitmentConfig> {
        match self.commitment.as_str() {
            "processed" => Ok(CommitmentConfig::processed()),
            "confirmed" => Ok(CommitmentConfig::confirmed()),
            "finalized" => Ok(CommitmentConfig::finalized()),
            other => Err(Error::Config(format!("unknown commitment {other:?}"))),
        }
    }

    /// Websocket endpoint: explicit `ws_url`, else `rpc_url` with a ws scheme
    /// and the default RPC port moved to the pubsub port.
    pub fn websocket_url(&self) -> String {
        if let Some(url) = &self.ws_url {
            return url.clone();
        }
        let url = if let Some(rest) = self.rpc_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.rpc_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.rpc_url.clone()
        };
        url.replacen(":8899", ":8900", 1)
    }

    pub fn history_options(&self) -> HistoryOptions {
        HistoryOptions {
            signature_limit  : self.signature_limit.clamp(1, MAX_SIGNATURE_WINDOW),
            fetch_concurrency: self.fetch_concurrency.max(1),
        }
    }
}
