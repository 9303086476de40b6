// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Grouped transactions payload.
//!
//! Structurally identical traces across a batch collapse into one group.
//! Each trace occurrence is then sent as `[group index, start ms, end ms]`
//! relative to its own transaction's root trace:
//!
//! ```text
//! {
//!   "transactions": [{"transaction": "GET /", "result": 200, "kind": "request",
//!                     "timestamp": "2025-03-01T10:42:00.000Z", "durations": [12.5]}],
//!   "traces": {
//!     "groups": [{"transaction": "GET /", "signature": "transaction", "kind": "transaction",
//!                 "transaction_kind": "request", "timestamp": "...", "parents": [], "extra": {}}],
//!     "raw": [[12.5, [0, 0.0, 12.5], {"extra": {}, "user": {}}]]
//!   }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::traces::EndedTransaction;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionsPayload {
    pub transactions: Vec<TransactionEntry>,
    pub traces: TracesSection,
}

impl TransactionsPayload {
    /// Number of transaction occurrences carried by the payload.
    pub fn transaction_count(&self) -> usize {
        self.traces.raw.len()
    }

    /// Number of trace occurrences carried by the payload.
    pub fn trace_count(&self) -> usize {
        self.traces
            .raw
            .iter()
            .map(|raw| raw.occurrences.len())
            .sum()
    }
}

/// Durations of every occurrence of one transaction within the same minute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionEntry {
    pub transaction: String,
    pub result: u16,
    pub kind: String,
    pub timestamp: String,
    pub durations: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TracesSection {
    pub groups: Vec<TraceGroup>,
    pub raw: Vec<RawTransaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceGroup {
    pub transaction: String,
    pub signature: String,
    pub kind: String,
    pub transaction_kind: String,
    pub timestamp: String,
    pub parents: Vec<String>,
    pub extra: Map<String, Value>,
}

/// `[group index, start offset ms, end offset ms]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Occurrence(pub usize, pub f64, pub f64);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawContext {
    pub extra: Map<String, Value>,
    pub user: Map<String, Value>,
}

/// One transaction occurrence, sent as `[total, occurrence..., context]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub total: f64,
    pub occurrences: Vec<Occurrence>,
    pub context: RawContext,
}

impl Serialize for RawTransaction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.occurrences.len() + 2))?;
        seq.serialize_element(&self.total)?;
        for occurrence in &self.occurrences {
            seq.serialize_element(occurrence)?;
        }
        seq.serialize_element(&self.context)?;
        seq.end()
    }
}

#[derive(Hash, PartialEq, Eq)]
struct GroupKey {
    transaction: String,
    signature: String,
    kind: String,
    parents: Vec<String>,
}

#[derive(Hash, PartialEq, Eq)]
struct EntryKey {
    transaction: String,
    result: u16,
    kind: String,
    timestamp: String,
}

/// Transaction timestamps are reported rounded down to the minute.
pub(crate) fn minute_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:00.000Z").to_string()
}

/// Groups a batch of ended transactions into one payload.
///
/// Group indices follow first-encounter order, so they are stable for a
/// given batch.
pub fn encode(batch: &[EndedTransaction]) -> TransactionsPayload {
    let mut transactions: Vec<TransactionEntry> = Vec::new();
    let mut entry_index: HashMap<EntryKey, usize> = HashMap::new();
    let mut groups: Vec<TraceGroup> = Vec::new();
    let mut group_index: HashMap<GroupKey, usize> = HashMap::new();
    let mut raw = Vec::with_capacity(batch.len());

    for txn in batch {
        let timestamp = minute_timestamp(&txn.timestamp);

        let entry_key = EntryKey {
            transaction: txn.name.clone(),
            result: txn.result,
            kind: txn.kind.clone(),
            timestamp: timestamp.clone(),
        };
        let entry = *entry_index.entry(entry_key).or_insert_with(|| {
            transactions.push(TransactionEntry {
                transaction: txn.name.clone(),
                result: txn.result,
                kind: txn.kind.clone(),
                timestamp: timestamp.clone(),
                durations: Vec::new(),
            });
            transactions.len() - 1
        });
        transactions[entry].durations.push(txn.duration);

        let mut occurrences = Vec::with_capacity(txn.traces.len());
        for trace in &txn.traces {
            let kind = trace.wire_kind();
            let key = GroupKey {
                transaction: txn.name.clone(),
                signature: trace.signature.clone(),
                kind: kind.clone(),
                parents: trace.ancestors.clone(),
            };

            let index = *group_index.entry(key).or_insert_with(|| {
                let mut extra = trace.extra.clone();
                if !trace.frames.is_empty() {
                    if let Ok(frames) = serde_json::to_value(&trace.frames) {
                        extra.insert("_frames".to_string(), frames);
                    }
                }

                groups.push(TraceGroup {
                    transaction: txn.name.clone(),
                    signature: trace.signature.clone(),
                    kind,
                    transaction_kind: txn.kind.clone(),
                    timestamp: timestamp.clone(),
                    parents: trace.ancestors.clone(),
                    extra,
                });
                groups.len() - 1
            });

            occurrences.push(Occurrence(
                index,
                trace.start_time,
                trace.start_time + trace.duration,
            ));
        }

        raw.push(RawTransaction {
            total: txn.duration,
            occurrences,
            context: RawContext {
                extra: txn.extra.clone(),
                user: txn.user.clone(),
            },
        });
    }

    TransactionsPayload {
        transactions,
        traces: TracesSection { groups, raw },
    }
}
