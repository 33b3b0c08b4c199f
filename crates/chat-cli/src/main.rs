//! Reader CLI for the messaging program.
//! Prints decoded accounts and decrypted history; `--json` switches to one
//! JSON object per line. Diagnostics go to stderr through tracing.

mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chat_history::{
    cipher, layout, protocol, tracker::TrackerExit, AccountKind, ChangeTracker, HistoryReconstructor,
    IndexRange, LedgerClient, ReaderConfig, RpcLedger, SharedSecret,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::output::Printer;

/// Defines the CLI and the selected subcommand.
#[derive(Parser, Debug)]
#[command(name = "chat-cli")]
#[command(about = "Reads threads and channels of the on-chain messaging program", long_about = None)]
struct Cli {
    /// Config file (defaults to ./chat-reader.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    rpc_url: Option<String>,
    #[arg(long, global = true)]
    ws_url: Option<String>,
    #[arg(long, global = true)]
    program_id: Option<String>,
    /// Print one JSON object per line.
    #[arg(long, global = true)]
    json: bool,
    /// -v for info, -vv for debug. RUST_LOG wins when set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

/// Lists available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Prints account metadata and the full recoverable history.
    Read {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        secret: SecretArg,
        /// Only messages with index >= FROM.
        #[arg(long)]
        from: Option<u32>,
    },
    /// Follows an account and prints messages as they arrive until Ctrl-C.
    Tail {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        secret: SecretArg,
        /// Print existing history before following.
        #[arg(long)]
        history: bool,
    },
    /// Decodes any account owned by the program.
    Inspect {
        address: Pubkey,
        /// Skip discriminator detection.
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// Derives program addresses.
    #[command(subcommand)]
    Derive(DeriveCommand),
    /// Encrypts text and prints base64 ciphertext.
    Encrypt {
        #[command(flatten)]
        secret: SecretArg,
        text: String,
    },
    /// Decrypts base64 ciphertext and prints the text.
    Decrypt {
        #[command(flatten)]
        secret: SecretArg,
        ciphertext: String,
    },
}

#[derive(Subcommand, Debug)]
enum DeriveCommand {
    Thread {
        #[arg(long)]
        a: Pubkey,
        #[arg(long)]
        b: Pubkey,
        /// 32 bytes as hex.
        #[arg(long)]
        thread_id: String,
    },
    Channel {
        #[arg(long)]
        owner: Pubkey,
        #[arg(long)]
        name: String,
    },
    Subscription {
        #[arg(long)]
        channel: Pubkey,
        #[arg(long)]
        subscriber: Pubkey,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct Target {
    #[arg(long)]
    thread: Option<Pubkey>,
    #[arg(long)]
    channel: Option<Pubkey>,
}

impl Target {
    fn resolve(&self) -> Result<(Pubkey, AccountKind)> {
        match (self.thread, self.channel) {
            (Some(address), None) => Ok((address, AccountKind::Thread)),
            (None, Some(address)) => Ok((address, AccountKind::Channel)),
            _ => bail!("pass exactly one of --thread or --channel"),
        }
    }
}

#[derive(Args, Debug)]
struct SecretArg {
    #[arg(long = "secret", env = "CHAT_SECRET", hide_env_values = true)]
    value: String,
}

impl SecretArg {
    fn shared(&self) -> SharedSecret {
        SharedSecret::new(&self.value)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Thread,
    Channel,
}

impl From<KindArg> for AccountKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Thread => AccountKind::Thread,
            KindArg::Channel => AccountKind::Channel,
        }
    }
}

/// Holds JSON output of derive.
#[derive(Serialize)]
struct OutAddress {
    kind: &'static str,
    address: String,
    #[serde(rename = "programId")]
    program_id: String,
}

/// Holds JSON output of encrypt and decrypt.
#[derive(Serialize)]
struct OutCipher {
    #[serde(rename = "ctB64", skip_serializing_if = "Option::is_none")]
    ct_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<ReaderConfig> {
    let mut config = ReaderConfig::load(cli.config.as_deref())?;
    if let Some(url) = &cli.rpc_url {
        config.rpc_url = url.clone();
    }
    if let Some(url) = &cli.ws_url {
        config.ws_url = Some(url.clone());
    }
    if let Some(id) = &cli.program_id {
        config.program_id = id.clone();
    }
    Ok(config)
}

fn reconstructor(config: &ReaderConfig) -> Result<HistoryReconstructor<RpcLedger>> {
    let ledger = Arc::new(RpcLedger::from_config(config)?);
    Ok(HistoryReconstructor::new(ledger, config.program_id()?, config.history_options()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parses flags and dispatches.
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let printer = Printer { json: cli.json };

    match &cli.command {
        Commands::Read { target, secret, from } => {
            let config = load_config(&cli)?;
            let history = reconstructor(&config)?;
            let (address, kind) = target.resolve()?;
            let secret = secret.shared();

            match from {
                None => {
                    let read = history.read(&address, kind, &secret).await?;
                    printer.history(&address, &read)?;
                }
                Some(from) => {
                    let account = history.load_account(&address, kind).await?;
                    printer.account(&address, &account)?;
                    let range = IndexRange::between(*from, account.counter());
                    let scan = history.reconstruct_range(&address, kind, &secret, range).await?;
                    printer.reconstruction(&scan, None)?;
                }
            }
        }

        Commands::Tail { target, secret, history: replay } => {
            let config = load_config(&cli)?;
            let history = reconstructor(&config)?;
            let (address, kind) = target.resolve()?;
            let secret = secret.shared();

            // Listen for Ctrl-C before subscribing so an early interrupt still unsubscribes.
            let interrupt = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "ctrl-c handler unavailable");
                    std::future::pending::<()>().await;
                }
            };
            tokio::pin!(interrupt);

            let mut tracker = ChangeTracker::new(history.clone(), address, kind, secret.clone());
            let account = tokio::select! {
                started = tracker.start() => started?,
                _ = &mut interrupt => return Ok(()),
            };
            let prelude = async {
                printer.account(&address, &account)?;
                if *replay {
                    let range = IndexRange::between(0, account.counter());
                    let scan = history.reconstruct_range(&address, kind, &secret, range).await?;
                    printer.reconstruction(&scan, None)?;
                }
                anyhow::Ok(())
            };
            let interrupted = tokio::select! {
                done = prelude => {
                    if let Err(e) = done {
                        tracker.shutdown().await;
                        return Err(e);
                    }
                    false
                }
                _ = &mut interrupt => true,
            };
            if interrupted {
                tracker.shutdown().await;
                return Ok(());
            }

            let exit = tracker
                .run(interrupt, |event| {
                    if let Err(e) = printer.event(&event) {
                        warn!(error = %e, "failed to print event");
                    }
                })
                .await?;
            info!(?exit, "tail finished");
            if exit == TrackerExit::StreamEnded {
                bail!("notification stream for {address} ended");
            }
        }

        Commands::Inspect { address, kind } => {
            let config = load_config(&cli)?;
            let ledger = RpcLedger::from_config(&config)?;
            let raw = ledger
                .get_account_bytes(address)
                .await?
                .ok_or_else(|| anyhow!("account {address} not found"))?;

            if kind.is_none() && layout::is_subscription(&raw) {
                let record = layout::decode_subscription(&raw).map_err(|reason| anyhow!(reason))?;
                printer.subscription(address, &record)?;
            } else {
                let kind = (*kind)
                    .map(AccountKind::from)
                    .or_else(|| layout::detect_kind(&raw))
                    .ok_or_else(|| anyhow!("{address} is not a thread, channel or subscription account"))?;
                let record = layout::decode(&raw, kind)?;
                printer.account(address, &record)?;
            }
        }

        Commands::Derive(derive) => {
            let config = load_config(&cli)?;
            let program_id = config.program_id()?;
            let (kind, address) = match derive {
                DeriveCommand::Thread { a, b, thread_id } => {
                    let bytes = hex::decode(thread_id.trim_start_matches("0x")).context("thread id is not hex")?;
                    let thread_id: [u8; 32] = bytes
                        .try_into()
                        .map_err(|b: Vec<u8>| anyhow!("thread id must be 32 bytes, got {}", b.len()))?;
                    ("thread", protocol::thread_address(&program_id, a, b, &thread_id))
                }
                DeriveCommand::Channel { owner, name } => {
                    ("channel", protocol::channel_address(&program_id, owner, name))
                }
                DeriveCommand::Subscription { channel, subscriber } => {
                    ("subscription", protocol::subscription_address(&program_id, channel, subscriber))
                }
            };
            if cli.json {
                let out = OutAddress { kind, address: address.to_string(), program_id: program_id.to_string() };
                println!("{}", serde_json::to_string(&out)?);
            } else {
                println!("{address}");
            }
        }

        Commands::Encrypt { secret, text } => {
            let ct = cipher::encrypt(text, &secret.value)?;
            let ct_b64 = STANDARD.encode(ct);
            if cli.json {
                let out = OutCipher { ct_b64: Some(ct_b64), text: None };
                println!("{}", serde_json::to_string(&out)?);
            } else {
                println!("{ct_b64}");
            }
        }

        Commands::Decrypt { secret, ciphertext } => {
            let ct = STANDARD.decode(ciphertext.trim()).context("ciphertext is not base64")?;
            let text = cipher::decrypt(&ct, &secret.value)?;
            if cli.json {
                let out = OutCipher { ct_b64: None, text: Some(text) };
                println!("{}", serde_json::to_string(&out)?);
            } else {
                println!("{text}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn read_requires_exactly_one_target() {
        let a = Pubkey::new_unique().to_string();
        let b = Pubkey::new_unique().to_string();
        let both = ["chat-cli", "read", "--secret", "s", "--thread", &a, "--channel", &b];
        assert!(Cli::try_parse_from(both).is_err());
        assert!(Cli::try_parse_from(["chat-cli", "read", "--secret", "s"]).is_err());
    }

    #[test]
    fn target_maps_to_account_kind() {
        let address = Pubkey::new_unique();
        let cli = Cli::try_parse_from(["chat-cli", "tail", "--secret", "s", "--channel", &address.to_string()])
            .unwrap();
        let Commands::Tail { target, .. } = cli.command else { panic!("expected tail") };
        assert_eq!(target.resolve().unwrap(), (address, AccountKind::Channel));
    }
}
