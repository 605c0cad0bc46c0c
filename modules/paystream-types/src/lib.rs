//! Shared wire types for the payment-gated event stream and its clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =====================================================
// Common
// =====================================================

/// Server timestamps arrive either as epoch milliseconds or as ISO-8601 text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Millis(i64),
    Text(String),
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Timestamp::Millis(ms) => write!(f, "{}", ms),
            Timestamp::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Transaction payload shape requested from the server.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EventFormat {
    Raw,
    Enhanced,
}

/// Output toggles sent once per connection in `setOptions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputOptions {
    pub event_format: EventFormat,
    pub include_accounts: bool,
    pub include_token_balance_changes: bool,
    pub include_logs: bool,
    pub include_instructions: bool,
    pub filter_token_balances: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            event_format: EventFormat::Enhanced,
            include_accounts: true,
            include_token_balance_changes: true,
            include_logs: false,
            include_instructions: false,
            filter_token_balances: false,
        }
    }
}

// =====================================================
// HTTP bodies
// =====================================================

/// Body of `GET {base}/{version}/schema/stream/{id}` once paid for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSchema {
    pub websocket_endpoint: String,
    #[serde(alias = "id")]
    pub stream_id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of `POST {base}/{version}/renew/stream/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewRequest {
    pub token: String,
}

/// Successful direct renewal response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewResponse {
    pub token: String,
    pub expires_at: Timestamp,
    pub slice_seconds: u64,
}

// =====================================================
// Outbound control messages
// =====================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op")]
pub enum ClientMessage {
    #[serde(rename = "setAccounts")]
    SetAccounts { accounts: Vec<String> },
    #[serde(rename = "setPrograms")]
    SetPrograms { programs: Vec<String> },
    #[serde(rename = "setOptions")]
    SetOptions(OutputOptions),
    #[serde(rename = "getState")]
    GetState,
    #[serde(rename = "renew_token")]
    RenewToken { token: String },
    #[serde(rename = "renew_inband", rename_all = "camelCase")]
    RenewInband {
        payment_requirements: Value,
        payment_payload: Value,
    },
}

impl ClientMessage {
    pub fn op(&self) -> &'static str {
        match self {
            ClientMessage::SetAccounts { .. } => "setAccounts",
            ClientMessage::SetPrograms { .. } => "setPrograms",
            ClientMessage::SetOptions(_) => "setOptions",
            ClientMessage::GetState => "getState",
            ClientMessage::RenewToken { .. } => "renew_token",
            ClientMessage::RenewInband { .. } => "renew_inband",
        }
    }
}

// =====================================================
// Inbound data events
// =====================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub timestamp: Timestamp,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeTransfer {
    #[serde(default)]
    pub from_user_account: Option<String>,
    #[serde(default)]
    pub to_user_account: Option<String>,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    pub mint: String,
    #[serde(default)]
    pub from_user_account: Option<String>,
    #[serde(default)]
    pub to_user_account: Option<String>,
    #[serde(default)]
    pub from_token_account: Option<String>,
    #[serde(default)]
    pub to_token_account: Option<String>,
    #[serde(default)]
    pub token_amount: Option<f64>,
}

/// Per-account lamport and token deltas of an enhanced transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDelta {
    pub account: String,
    #[serde(default)]
    pub native_balance_change: i64,
    #[serde(default)]
    pub token_balance_changes: Vec<TokenBalanceChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalanceChange {
    pub mint: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default, alias = "tokenAccount")]
    pub account: Option<String>,
    /// Signed raw-unit delta, kept as sent (string or number).
    #[serde(default)]
    pub delta: Option<Value>,
    #[serde(default)]
    pub decimals: Option<u8>,
}

/// Transaction shape selected by `eventFormat=enhanced`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedTransaction {
    pub signature: String,
    #[serde(default)]
    pub slot: Option<u64>,
    #[serde(default)]
    pub commitment: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub fee: Option<u64>,
    #[serde(default)]
    pub fee_payer: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub native_transfers: Vec<NativeTransfer>,
    #[serde(default)]
    pub token_transfers: Vec<TokenTransfer>,
    #[serde(default)]
    pub account_data: Vec<AccountDelta>,
    #[serde(default)]
    pub logs: Option<Vec<String>>,
    #[serde(default)]
    pub instructions: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Transaction shape selected by `eventFormat=raw`: token deltas only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub signature: String,
    #[serde(default)]
    pub slot: Option<u64>,
    #[serde(default)]
    pub commitment: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub token_balance_changes: Vec<TokenBalanceChange>,
    #[serde(default)]
    pub logs: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEvent {
    #[serde(alias = "publicKey")]
    pub pubkey: String,
    #[serde(default)]
    pub lamports: Option<u64>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub slot: Option<u64>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotEvent {
    pub slot: u64,
    #[serde(default)]
    pub parent: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerEvent {
    pub base_mint: String,
    #[serde(default)]
    pub quote_mint: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEvent {
    pub items: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// =====================================================
// Inbound lifecycle events
// =====================================================

/// Lifecycle `op` values the server may send.
pub const LIFECYCLE_OPS: [&str; 5] = [
    "hello",
    "renewal_reminder",
    "payment_required",
    "renewed",
    "error",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum LifecycleEvent {
    #[serde(rename = "hello", rename_all = "camelCase")]
    Hello {
        client_id: String,
        expires_at: Timestamp,
        slice_seconds: u64,
    },
    #[serde(rename = "renewal_reminder", rename_all = "camelCase")]
    RenewalReminder {
        expires_at: Timestamp,
        ms_until_expiry: i64,
        #[serde(default)]
        renew: Option<Value>,
    },
    #[serde(rename = "payment_required")]
    PaymentRequired {
        reason: String,
        #[serde(default)]
        renew: Option<Value>,
    },
    #[serde(rename = "renewed", rename_all = "camelCase")]
    Renewed { expires_at: Timestamp, method: String },
    #[serde(rename = "error")]
    Error { message: String },
}

impl LifecycleEvent {
    pub fn op(&self) -> &'static str {
        match self {
            LifecycleEvent::Hello { .. } => "hello",
            LifecycleEvent::RenewalReminder { .. } => "renewal_reminder",
            LifecycleEvent::PaymentRequired { .. } => "payment_required",
            LifecycleEvent::Renewed { .. } => "renewed",
            LifecycleEvent::Error { .. } => "error",
        }
    }

    /// Reminders and expiry notices both ask the client to renew.
    pub fn requests_renewal(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::RenewalReminder { .. } | LifecycleEvent::PaymentRequired { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_options_wire_shape() {
        let msg = ClientMessage::SetOptions(OutputOptions {
            event_format: EventFormat::Raw,
            ..OutputOptions::default()
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "op": "setOptions",
                "eventFormat": "raw",
                "includeAccounts": true,
                "includeTokenBalanceChanges": true,
                "includeLogs": false,
                "includeInstructions": false,
                "filterTokenBalances": false,
            })
        );
    }

    #[test]
    fn test_control_message_ops() {
        assert_eq!(
            serde_json::to_value(ClientMessage::GetState).unwrap(),
            json!({"op": "getState"})
        );
        assert_eq!(
            serde_json::to_value(ClientMessage::RenewToken { token: "t1".into() }).unwrap(),
            json!({"op": "renew_token", "token": "t1"})
        );
        let inband = ClientMessage::RenewInband {
            payment_requirements: json!({"scheme": "exact"}),
            payment_payload: json!({"x402Version": 2}),
        };
        assert_eq!(
            serde_json::to_value(&inband).unwrap(),
            json!({
                "op": "renew_inband",
                "paymentRequirements": {"scheme": "exact"},
                "paymentPayload": {"x402Version": 2},
            })
        );
        assert_eq!(inband.op(), "renew_inband");
    }

    #[test]
    fn test_lifecycle_decoding() {
        let hello: LifecycleEvent = serde_json::from_value(json!({
            "op": "hello", "clientId": "c-1", "expiresAt": 1700000000000i64, "sliceSeconds": 300
        }))
        .unwrap();
        assert_eq!(
            hello,
            LifecycleEvent::Hello {
                client_id: "c-1".into(),
                expires_at: Timestamp::Millis(1700000000000),
                slice_seconds: 300,
            }
        );
        assert!(!hello.requests_renewal());

        let expired: LifecycleEvent = serde_json::from_value(json!({
            "op": "payment_required", "reason": "expired", "renew": {"url": "/v1/renew/stream/x"}
        }))
        .unwrap();
        assert!(expired.requests_renewal());
        assert_eq!(expired.op(), "payment_required");
    }

    #[test]
    fn test_timestamp_accepts_text() {
        let renewed: LifecycleEvent = serde_json::from_value(json!({
            "op": "renewed", "expiresAt": "2026-01-01T00:00:00Z", "method": "inband"
        }))
        .unwrap();
        match renewed {
            LifecycleEvent::Renewed { expires_at, .. } => {
                assert_eq!(expires_at.to_string(), "2026-01-01T00:00:00Z")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_event_format_parse() {
        assert_eq!("RAW".parse::<EventFormat>().unwrap(), EventFormat::Raw);
        assert_eq!(EventFormat::Enhanced.to_string(), "enhanced");
        assert!("json".parse::<EventFormat>().is_err());
    }
}
