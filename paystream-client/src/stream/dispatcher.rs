//! Routing of classified events to a sink, with optional transaction summaries.

use paystream_types::LifecycleEvent;
use serde::Serialize;
use std::collections::HashSet;

use super::events::{InboundEvent, TransactionEvent};
use crate::config::OutputMode;

/// Most mints listed in a transaction summary
pub const MAX_SUMMARY_MINTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    pub signature: String,
    pub slot: Option<u64>,
    pub commitment: Option<String>,
    pub transfer_count: usize,
    pub distinct_mints: Vec<String>,
}

/// What the sink receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Output {
    Event(InboundEvent),
    Summary(TransactionSummary),
}

impl Output {
    pub fn kind(&self) -> &'static str {
        match self {
            Output::Event(event) => event.kind(),
            Output::Summary(_) => "transaction_summary",
        }
    }
}

pub trait EventSink: Send {
    fn handle(&mut self, output: &Output);
}

/// Default sink: one JSON line per event on the `paystream::events` log target.
pub struct LogSink;

impl EventSink for LogSink {
    fn handle(&mut self, output: &Output) {
        match serde_json::to_string(output) {
            Ok(json) => log::info!(target: "paystream::events", "{} {}", output.kind(), json),
            Err(e) => log::warn!("[EVENT] Failed to encode {} event: {}", output.kind(), e),
        }
    }
}

pub struct EventDispatcher {
    mode: OutputMode,
    sink: Box<dyn EventSink>,
}

impl EventDispatcher {
    pub fn new(mode: OutputMode, sink: Box<dyn EventSink>) -> Self {
        Self { mode, sink }
    }

    /// Forward data events to the sink. Lifecycle events are handed back to
    /// the caller, which owns the connection they refer to.
    pub fn dispatch(&mut self, event: InboundEvent) -> Option<LifecycleEvent> {
        let output = match (event, self.mode) {
            (InboundEvent::Lifecycle(lifecycle), _) => {
                log::debug!("[EVENT] lifecycle {}", lifecycle.op());
                return Some(lifecycle);
            }
            (InboundEvent::Transaction(tx), OutputMode::Summary) => {
                log::debug!("[EVENT] Summarizing {} transaction {}", tx.format(), tx.signature());
                Output::Summary(summarize(&tx))
            }
            (event, _) => Output::Event(event),
        };
        self.sink.handle(&output);
        None
    }
}

pub fn summarize(tx: &TransactionEvent) -> TransactionSummary {
    match tx {
        TransactionEvent::Enhanced(tx) => TransactionSummary {
            signature: tx.signature.clone(),
            slot: tx.slot,
            commitment: tx.commitment.clone(),
            transfer_count: tx.native_transfers.len() + tx.token_transfers.len(),
            distinct_mints: distinct_mints(tx.token_transfers.iter().map(|t| t.mint.as_str())),
        },
        TransactionEvent::Raw(tx) => TransactionSummary {
            signature: tx.signature.clone(),
            slot: tx.slot,
            commitment: tx.commitment.clone(),
            transfer_count: tx.token_balance_changes.len(),
            distinct_mints: distinct_mints(
                tx.token_balance_changes.iter().map(|c| c.mint.as_str()),
            ),
        },
    }
}

/// First-seen order, no repeats, at most `MAX_SUMMARY_MINTS`.
pub fn distinct_mints<'a, I>(mints: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for mint in mints {
        if out.len() == MAX_SUMMARY_MINTS {
            break;
        }
        if seen.insert(mint) {
            out.push(mint.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::events::{classify, Classified};
    use crate::test_support::CollectingSink;
    use serde_json::{json, Value};

    fn parse(value: Value) -> InboundEvent {
        match classify(value.to_string().as_bytes()) {
            Classified::Event(event) => event,
            Classified::Unrecognized(reason) => panic!("unrecognized: {}", reason),
        }
    }

    fn transaction(value: Value) -> TransactionEvent {
        match parse(value) {
            InboundEvent::Transaction(tx) => tx,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_distinct_mints_order_and_cap() {
        let mints = ["A", "B", "A", "C", "D", "E", "F"];
        assert_eq!(distinct_mints(mints), vec!["A", "B", "C", "D", "E"]);
        assert_eq!(distinct_mints(["X", "X", "Y"]), vec!["X", "Y"]);
        assert!(distinct_mints(Vec::<&str>::new()).is_empty());
    }

    #[test]
    fn test_summarize_enhanced() {
        let transfers: Vec<Value> = ["A", "B", "A", "C", "D", "E", "F"]
            .iter()
            .map(|mint| json!({"mint": mint, "tokenAmount": 1.0}))
            .collect();
        let tx = transaction(json!({
            "type": "transaction",
            "signature": "sig-1",
            "slot": 42,
            "commitment": "confirmed",
            "nativeTransfers": [{"amount": 1}, {"amount": 2}],
            "tokenTransfers": transfers,
        }));

        let summary = summarize(&tx);
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            json!({
                "signature": "sig-1",
                "slot": 42,
                "commitment": "confirmed",
                "transferCount": 9,
                "distinctMints": ["A", "B", "C", "D", "E"],
            })
        );
        assert_eq!(summarize(&tx), summary);
    }

    #[test]
    fn test_summarize_raw() {
        let tx = transaction(json!({
            "type": "transaction",
            "signature": "sig-2",
            "tokenBalanceChanges": [{"mint": "M2"}, {"mint": "M1"}, {"mint": "M2"}],
        }));
        let summary = summarize(&tx);
        assert_eq!(summary.transfer_count, 3);
        assert_eq!(summary.distinct_mints, vec!["M2", "M1"]);
        assert_eq!(summary.slot, None);
    }

    #[test]
    fn test_dispatch_modes() {
        let sink = CollectingSink::default();
        let mut dispatcher = EventDispatcher::new(OutputMode::Summary, Box::new(sink.clone()));
        let tx = json!({"type": "transaction", "signature": "s", "nativeTransfers": []});

        assert!(dispatcher.dispatch(parse(tx.clone())).is_none());
        assert!(dispatcher
            .dispatch(parse(json!({"type": "slot", "slot": 1})))
            .is_none());
        assert_eq!(sink.kinds(), vec!["transaction_summary", "slot"]);

        let full_sink = CollectingSink::default();
        let mut dispatcher = EventDispatcher::new(OutputMode::Full, Box::new(full_sink.clone()));
        dispatcher.dispatch(parse(tx));
        assert_eq!(full_sink.kinds(), vec!["transaction"]);
    }

    #[test]
    fn test_lifecycle_returned_not_sunk() {
        let sink = CollectingSink::default();
        let mut dispatcher = EventDispatcher::new(OutputMode::Full, Box::new(sink.clone()));
        let lifecycle = dispatcher.dispatch(parse(json!({"op": "error", "message": "x"})));
        assert_eq!(
            lifecycle,
            Some(LifecycleEvent::Error {
                message: "x".to_string()
            })
        );
        assert!(sink.kinds().is_empty());
    }
}
