//! Stdout rendering: plain lines, or one JSON object per line with `--json`.

use std::ops::Range;

use anyhow::Result;
use chat_history::{
    history::{History, MessageRecord, Reconstruction, ScanWarning},
    layout::SubscriptionRecord,
    AccountRecord, TailEvent,
};
use chrono::DateTime;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;

fn timestamp(secs: Option<i64>) -> Option<String> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0)).map(|t| t.to_rfc3339())
}

fn short(key: &Pubkey) -> String {
    let s = key.to_string();
    if s.len() <= 10 {
        return s;
    }
    format!("{}..{}", &s[..4], &s[s.len() - 4..])
}

/// Holds JSON output of one message.
#[derive(Serialize)]
struct OutMessage {
    kind: &'static str,
    index: u32,
    sender: String,
    text: String,
    #[serde(rename = "observedAt", skip_serializing_if = "Option::is_none")]
    observed_at: Option<String>,
    slot: u64,
    signature: String,
}

/// Holds JSON output of account metadata.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum OutAccount {
    #[serde(rename_all = "camelCase")]
    Thread {
        address: String,
        participant_a: String,
        participant_b: String,
        thread_id: String,
        message_count: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        created_at: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_message_at: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Channel {
        address: String,
        owner: String,
        name: String,
        broadcast_count: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        subscriber_count: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        created_at: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_broadcast_at: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Subscription {
        address: String,
        subscriber: String,
        channel: String,
        subscribed_at: Option<String>,
        last_read_index: u32,
    },
}

/// Holds JSON output of a contained failure.
#[derive(Serialize)]
struct OutWarning {
    kind: &'static str,
    warning: String,
}

/// Holds JSON output closing a scan.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutSummary {
    kind: &'static str,
    messages: usize,
    scanned: usize,
    skipped: usize,
    reverted: usize,
    undecryptable: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing: Option<Vec<OutRange>>,
}

/// Holds JSON output of a half-open index range.
#[derive(Serialize)]
struct OutRange {
    from: u32,
    to: u32,
}

/// Holds JSON output of tail state changes.
#[derive(Serialize)]
struct OutNotice {
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<u32>,
}

fn describe(warning: &ScanWarning) -> String {
    match warning {
        ScanWarning::FetchFailed { signature, reason } => format!("fetch failed for {signature}: {reason}"),
        ScanWarning::TransactionMissing { signature } => format!("transaction {signature} unavailable"),
        ScanWarning::MalformedPayload { signature, reason } => format!("malformed append in {signature}: {reason}"),
        ScanWarning::DecryptionFailed { index, .. } => format!("message #{index} could not be decrypted"),
        ScanWarning::DuplicateIndex { index, dropped, .. } => {
            format!("duplicate message #{index} in {dropped} ignored")
        }
    }
}

pub struct Printer {
    pub json: bool,
}

impl Printer {
    fn emit<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string(value)?);
        Ok(())
    }

    pub fn account(&self, address: &Pubkey, record: &AccountRecord) -> Result<()> {
        let out = match record {
            AccountRecord::Thread(t) => OutAccount::Thread {
                address: address.to_string(),
                participant_a: t.participant_a.to_string(),
                participant_b: t.participant_b.to_string(),
                thread_id: hex::encode(t.thread_id),
                message_count: t.message_count,
                created_at: timestamp(t.created_at),
                last_message_at: timestamp(t.last_message_at.filter(|&s| s != 0)),
            },
            AccountRecord::Channel(c) => OutAccount::Channel {
                address: address.to_string(),
                owner: c.owner.to_string(),
                name: c.name.clone(),
                broadcast_count: c.broadcast_count,
                subscriber_count: c.subscriber_count,
                created_at: timestamp(c.created_at),
                last_broadcast_at: timestamp(c.last_broadcast_at.filter(|&s| s != 0)),
            },
        };
        if self.json {
            return self.emit(&out);
        }
        match record {
            AccountRecord::Thread(t) => {
                println!("thread {address}");
                println!("  participants: {} <-> {}", t.participant_a, t.participant_b);
                println!("  thread id   : {}", hex::encode(t.thread_id));
                println!("  messages    : {}", t.message_count);
            }
            AccountRecord::Channel(c) => {
                println!("channel {:?} ({address})", c.name);
                println!("  owner      : {}", c.owner);
                println!("  broadcasts : {}", c.broadcast_count);
                if let Some(n) = c.subscriber_count {
                    println!("  subscribers: {n}");
                }
            }
        }
        Ok(())
    }

    pub fn subscription(&self, address: &Pubkey, record: &SubscriptionRecord) -> Result<()> {
        if self.json {
            return self.emit(&OutAccount::Subscription {
                address: address.to_string(),
                subscriber: record.subscriber.to_string(),
                channel: record.channel.to_string(),
                subscribed_at: timestamp(Some(record.subscribed_at)),
                last_read_index: record.last_read_index,
            });
        }
        println!("subscription {address}");
        println!("  subscriber     : {}", record.subscriber);
        println!("  channel        : {}", record.channel);
        println!("  last read index: {}", record.last_read_index);
        Ok(())
    }

    pub fn message(&self, m: &MessageRecord) -> Result<()> {
        if self.json {
            return self.emit(&OutMessage {
                kind: "message",
                index: m.index,
                sender: m.sender.to_string(),
                text: m.plaintext.clone(),
                observed_at: timestamp(m.observed_at),
                slot: m.slot,
                signature: m.signature.to_string(),
            });
        }
        let when = timestamp(m.observed_at).unwrap_or_else(|| format!("slot {}", m.slot));
        println!("#{:<4} {} {}: {}", m.index, when, short(&m.sender), m.plaintext);
        Ok(())
    }

    fn warnings(&self, warnings: &[ScanWarning]) -> Result<()> {
        for w in warnings {
            if self.json {
                self.emit(&OutWarning { kind: "warning", warning: describe(w) })?;
            } else {
                eprintln!("warning: {}", describe(w));
            }
        }
        Ok(())
    }

    pub fn reconstruction(&self, r: &Reconstruction, missing: Option<Vec<Range<u32>>>) -> Result<()> {
        for m in &r.messages {
            self.message(m)?;
        }
        self.warnings(&r.warnings)?;
        let summary = OutSummary {
            kind: "summary",
            messages: r.messages.len(),
            scanned: r.scanned,
            skipped: r.skipped(),
            reverted: r.reverted,
            undecryptable: r.undecryptable(),
            missing: missing.map(|ranges| ranges.iter().map(|r| OutRange { from: r.start, to: r.end }).collect()),
        };
        if self.json {
            return self.emit(&summary);
        }
        println!(
            "-- {} message(s) from {} transaction(s), {} skipped",
            summary.messages, summary.scanned, summary.skipped
        );
        if let Some(missing) = summary.missing.filter(|m| !m.is_empty()) {
            let total: u64 = missing.iter().map(|r| u64::from(r.to - r.from)).sum();
            let spans: Vec<String> = missing.iter().map(|r| format!("#{}..#{}", r.from, r.to)).collect();
            println!("-- {} message(s) not retrievable: {}", total, spans.join(", "));
        }
        Ok(())
    }

    pub fn history(&self, address: &Pubkey, h: &History) -> Result<()> {
        self.account(address, &h.account)?;
        self.reconstruction(&h.reconstruction, Some(h.missing_ranges()))
    }

    pub fn event(&self, event: &TailEvent) -> Result<()> {
        match event {
            TailEvent::Messages { messages, warnings, .. } => {
                for m in messages {
                    self.message(m)?;
                }
                self.warnings(warnings)
            }
            TailEvent::ContentUnavailable { range, warnings } => {
                self.warnings(warnings)?;
                let to = range.end.unwrap_or(range.start);
                if self.json {
                    return self.emit(&OutNotice { kind: "unavailable", from: Some(range.start), to: Some(to) });
                }
                eprintln!("new message(s) #{}..#{} could not be retrieved", range.start, to);
                Ok(())
            }
            TailEvent::Closed => {
                if self.json {
                    return self.emit(&OutNotice { kind: "closed", from: None, to: None });
                }
                println!("-- account closed");
                Ok(())
            }
        }
    }
}
