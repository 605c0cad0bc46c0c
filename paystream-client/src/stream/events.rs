//! Inbound message classification.
//!
//! Every frame maps to exactly one `InboundEvent` variant or to
//! `Classified::Unrecognized`. Predicates are tried in a fixed order; the
//! first structural match decides the variant, and a match whose payload then
//! fails to decode is unrecognized rather than retried against later variants.

use paystream_types::{
    AccountEvent, EnhancedTransaction, EventFormat, LeaderboardEvent, LifecycleEvent,
    RawTransaction, SlotEvent, StatusEvent, TickerEvent, LIFECYCLE_OPS,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TransactionEvent {
    Enhanced(EnhancedTransaction),
    Raw(RawTransaction),
}

impl TransactionEvent {
    pub fn format(&self) -> EventFormat {
        match self {
            TransactionEvent::Enhanced(_) => EventFormat::Enhanced,
            TransactionEvent::Raw(_) => EventFormat::Raw,
        }
    }

    pub fn signature(&self) -> &str {
        match self {
            TransactionEvent::Enhanced(tx) => &tx.signature,
            TransactionEvent::Raw(tx) => &tx.signature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InboundEvent {
    Status(StatusEvent),
    Transaction(TransactionEvent),
    Account(AccountEvent),
    Slot(SlotEvent),
    Ticker(TickerEvent),
    Leaderboard(LeaderboardEvent),
    Lifecycle(LifecycleEvent),
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Status(_) => "status",
            InboundEvent::Transaction(_) => "transaction",
            InboundEvent::Account(_) => "account",
            InboundEvent::Slot(_) => "slot",
            InboundEvent::Ticker(_) => "ticker",
            InboundEvent::Leaderboard(_) => "leaderboard",
            InboundEvent::Lifecycle(_) => "lifecycle",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Event(InboundEvent),
    /// Reason the payload matched nothing; diagnostic only
    Unrecognized(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Status,
    EnhancedTransaction,
    RawTransaction,
    Account,
    Slot,
    Ticker,
    Leaderboard,
    Lifecycle,
}

pub fn classify(raw: &[u8]) -> Classified {
    let value: Value = match serde_json::from_slice(raw) {
        Ok(value) => value,
        Err(e) => return Classified::Unrecognized(format!("not JSON: {}", e)),
    };
    let shape = match value.as_object() {
        Some(obj) => detect_shape(obj),
        None => return Classified::Unrecognized("not a JSON object".to_string()),
    };
    let Some(shape) = shape else {
        return Classified::Unrecognized(describe(&value));
    };

    match shape {
        Shape::Status => decode(value, "status", InboundEvent::Status),
        Shape::EnhancedTransaction => decode(value, "enhanced transaction", |tx| {
            InboundEvent::Transaction(TransactionEvent::Enhanced(tx))
        }),
        Shape::RawTransaction => decode(value, "raw transaction", |tx| {
            InboundEvent::Transaction(TransactionEvent::Raw(tx))
        }),
        Shape::Account => decode(value, "account", InboundEvent::Account),
        Shape::Slot => decode(value, "slot", InboundEvent::Slot),
        Shape::Ticker => decode(value, "ticker", InboundEvent::Ticker),
        Shape::Leaderboard => decode(value, "leaderboard", InboundEvent::Leaderboard),
        Shape::Lifecycle => decode(value, "lifecycle", InboundEvent::Lifecycle),
    }
}

fn detect_shape(obj: &Map<String, Value>) -> Option<Shape> {
    let kind = obj.get("type").and_then(Value::as_str);
    let has = |key: &str| obj.get(key).map_or(false, |v| !v.is_null());

    if kind == Some("status") && has("timestamp") {
        return Some(Shape::Status);
    }
    if kind == Some("transaction") && obj.get("signature").map_or(false, Value::is_string) {
        return Some(if has("nativeTransfers") {
            Shape::EnhancedTransaction
        } else {
            Shape::RawTransaction
        });
    }
    if kind == Some("account") && (has("pubkey") || has("publicKey")) {
        return Some(Shape::Account);
    }
    if kind == Some("slot") && obj.get("slot").map_or(false, Value::is_u64) {
        return Some(Shape::Slot);
    }
    if kind == Some("ticker") && has("baseMint") {
        return Some(Shape::Ticker);
    }
    if kind == Some("leaderboard") && obj.get("items").map_or(false, Value::is_array) {
        return Some(Shape::Leaderboard);
    }
    if let Some(op) = obj.get("op").and_then(Value::as_str) {
        if LIFECYCLE_OPS.contains(&op) {
            return Some(Shape::Lifecycle);
        }
    }
    None
}

fn decode<T, F>(value: Value, label: &str, wrap: F) -> Classified
where
    T: DeserializeOwned,
    F: FnOnce(T) -> InboundEvent,
{
    match serde_json::from_value::<T>(value) {
        Ok(event) => Classified::Event(wrap(event)),
        Err(e) => Classified::Unrecognized(format!("malformed {} event: {}", label, e)),
    }
}

fn describe(value: &Value) -> String {
    let field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
    match (field("type"), field("op")) {
        (Some(kind), _) => format!("unknown or incomplete event type '{}'", kind),
        (None, Some(op)) => format!("unknown op '{}'", op),
        (None, None) => "no 'type' or 'op' field".to_string(),
    }
}
