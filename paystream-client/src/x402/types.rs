//! x402 wire types: the 402 challenge, the requirement we pick, and the signed payload

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const BASE_CHAIN_ID: u64 = 8453;

pub const BASE_SEPOLIA_CHAIN_ID: u64 = 84532;

/// x402 protocol version carried in payment payloads ("accepted" format)
pub const X402_VERSION: u8 = 2;

/// `base`, `base-sepolia`, ... or CAIP-2 `eip155:<id>`; unknown names fall back to Base
pub fn chain_id_for_network(network: &str) -> u64 {
    if let Some(id) = network.strip_prefix("eip155:").and_then(|id| id.parse().ok()) {
        return id;
    }
    match network {
        "base" => BASE_CHAIN_ID,
        "base-sepolia" => BASE_SEPOLIA_CHAIN_ID,
        "ethereum" => 1,
        "sepolia" => 11155111,
        _ => BASE_CHAIN_ID,
    }
}

/// Body (or decoded `payment-required` header) of a 402 response.
///
/// `accepts` is kept as raw JSON: the chosen entry is echoed back to the
/// server verbatim in `renew_inband`, so no field may be lost to parsing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    #[serde(default = "default_version")]
    pub x402_version: u8,
    #[serde(default)]
    pub accepts: Vec<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_version() -> u8 {
    X402_VERSION
}

/// The requirement picked from `accepts`, both as sent and as parsed.
#[derive(Debug, Clone)]
pub struct SelectedRequirement {
    pub raw: Value,
    pub requirements: PaymentRequirements,
}

impl PaymentRequired {
    /// Decode the base64 `payment-required` header value
    pub fn from_base64(encoded: &str) -> Result<Self, String> {
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded.trim())
            .map_err(|e| format!("payment-required header is not base64: {}", e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| format!("payment-required header is not a challenge: {}", e))
    }

    /// Take the first acceptable payment option. An empty list is an error.
    pub fn select_first(&self) -> Result<SelectedRequirement, String> {
        let raw = self
            .accepts
            .first()
            .cloned()
            .ok_or_else(|| "No payment options in 402 response".to_string())?;
        let requirements: PaymentRequirements = serde_json::from_value(raw.clone())
            .map_err(|e| format!("Invalid payment requirements: {}", e))?;
        Ok(SelectedRequirement { raw, requirements })
    }
}

/// Token details the server may attach to a requirement
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentExtra {
    pub address: Option<String>,
    pub decimals: Option<u8>,
    /// EIP-712 domain name, e.g. "USD Coin"
    pub name: Option<String>,
    /// EIP-712 domain version
    pub version: Option<String>,
    /// Spender for `permit`
    pub facilitator_signer: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    #[serde(alias = "amount")]
    pub max_amount_required: String,
    #[serde(alias = "payTo")]
    pub pay_to_address: String,
    pub asset: String,
    #[serde(default)]
    pub max_timeout_seconds: u64,
    #[serde(default)]
    pub extra: Option<PaymentExtra>,
}

/// EIP-712 domain inputs for the payment token
#[derive(Debug, Clone)]
pub struct TokenMetadata {
    pub name: String,
    pub version: String,
    pub address: String,
    pub chain_id: u64,
}

impl TokenMetadata {
    pub fn from_requirements(req: &PaymentRequirements) -> Self {
        let chain_id = chain_id_for_network(&req.network);
        let extra = req.extra.clone().unwrap_or_default();

        Self {
            name: extra.name.unwrap_or_else(|| "USD Coin".to_string()),
            version: extra.version.unwrap_or_else(|| "2".to_string()),
            address: extra.address.unwrap_or_else(|| req.asset.clone()),
            chain_id,
        }
    }
}

/// Signed payment, sent base64-encoded in `X-PAYMENT` or as JSON in `renew_inband`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u8,
    pub accepted: AcceptedPayment,
    pub payload: ExactEvmPayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedPayment {
    pub scheme: String,
    pub network: String,
    pub amount: String,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub asset: String,
}

impl AcceptedPayment {
    pub fn from_requirements(req: &PaymentRequirements) -> Self {
        Self {
            scheme: req.scheme.clone(),
            network: req.network.clone(),
            amount: req.max_amount_required.clone(),
            pay_to: req.pay_to_address.clone(),
            max_timeout_seconds: req.max_timeout_seconds.max(60),
            asset: req.asset.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    pub signature: String,
    pub authorization: EvmAuthorization,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EvmAuthorization {
    /// `permit` scheme
    Eip2612(Eip2612Authorization),
    /// `exact` scheme (transferWithAuthorization)
    Eip3009(Eip3009Authorization),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip2612Authorization {
    pub owner: String,
    pub spender: String,
    pub value: String,
    pub nonce: String,
    pub deadline: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip3009Authorization {
    pub from: String,
    pub to: String,
    pub value: String,
    pub valid_after: String,
    pub valid_before: String,
    pub nonce: String,
}

impl PaymentPayload {
    /// `X-PAYMENT` header value
    pub fn to_base64(&self) -> Result<String, String> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| format!("Failed to encode payment payload: {}", e))?;
        Ok(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes))
    }

    /// `paymentPayload` of `renew_inband`
    pub fn to_value(&self) -> Result<Value, String> {
        serde_json::to_value(self).map_err(|e| format!("Failed to encode payment payload: {}", e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PaymentStatus {
    /// Signed and sent, outcome unknown
    Pending,
    Confirmed,
    /// Server still answered 402
    Failed,
}

/// What one paid request cost, for logging
#[derive(Debug, Clone)]
pub struct X402PaymentInfo {
    /// e.g. "0.01" for 10000 raw units at 6 decimals
    pub amount_formatted: String,
    pub asset: String,
    pub pay_to: String,
    pub tx_hash: Option<String>,
    pub status: PaymentStatus,
}

impl X402PaymentInfo {
    pub fn from_requirements(req: &PaymentRequirements) -> Self {
        let decimals = req.extra.as_ref().and_then(|e| e.decimals).unwrap_or(6);
        Self {
            amount_formatted: format_token_amount(&req.max_amount_required, decimals),
            asset: req.asset.clone(),
            pay_to: req.pay_to_address.clone(),
            tx_hash: None,
            status: PaymentStatus::Pending,
        }
    }

    pub fn with_tx_hash(self, tx_hash: String) -> Self {
        Self {
            tx_hash: Some(tx_hash),
            status: PaymentStatus::Confirmed,
            ..self
        }
    }

    pub fn mark_confirmed(self) -> Self {
        Self {
            status: PaymentStatus::Confirmed,
            ..self
        }
    }

    pub fn mark_failed(self) -> Self {
        Self {
            status: PaymentStatus::Failed,
            ..self
        }
    }
}

/// Raw integer units to a decimal string without trailing zeros; non-numeric input is returned as is.
fn format_token_amount(raw: &str, decimals: u8) -> String {
    let Ok(value) = raw.parse::<u128>() else {
        return raw.to_string();
    };
    let scale = 10u128.pow(decimals as u32);
    let (whole, frac) = (value / scale, value % scale);
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{:0width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}
