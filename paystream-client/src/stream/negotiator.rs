//! Stream access negotiation: pay for the schema, get back a socket URL and token.

use paystream_types::StreamSchema;
use reqwest::StatusCode;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::config::mask;
use crate::x402::{X402Client, X402Response};

/// Query parameter carrying the access token in the socket URL
const TOKEN_PARAM: &str = "t";

/// Everything needed to open and later renew one stream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub endpoint_url: String,
    pub token: String,
    pub stream_id: String,
    pub schema_version: String,
}

#[derive(Debug)]
pub enum NegotiationError {
    /// Fetch or payment signing failed
    Request(String),
    /// Still 402 after one paid retry
    PaymentRequiredTwice,
    Status { status: u16, body: String },
    MalformedSchema(String),
    MissingToken { endpoint: String },
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationError::Request(e) => write!(f, "Schema request failed: {}", e),
            NegotiationError::PaymentRequiredTwice => {
                write!(f, "Schema request still requires payment after paying once")
            }
            NegotiationError::Status { status, body } => {
                write!(f, "Schema request returned {}: {}", status, body)
            }
            NegotiationError::MalformedSchema(e) => write!(f, "Malformed schema response: {}", e),
            NegotiationError::MissingToken { endpoint } => write!(
                f,
                "Schema endpoint '{}' carries no '{}' token parameter",
                endpoint, TOKEN_PARAM
            ),
        }
    }
}

impl std::error::Error for NegotiationError {}

pub struct PaymentNegotiator {
    client: Arc<X402Client>,
    base_url: String,
}

impl PaymentNegotiator {
    pub fn new(client: Arc<X402Client>, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch (and pay for) the schema at `schema_path`, returning the session descriptor.
    pub async fn acquire_session(
        &self,
        schema_path: &str,
    ) -> Result<SessionDescriptor, NegotiationError> {
        let url = format!("{}{}", self.base_url, schema_path);
        log::info!("[NEGOTIATE] Requesting stream schema {}", url);

        let X402Response { response, payment } = self
            .client
            .get_with_payment(&url)
            .await
            .map_err(NegotiationError::Request)?;

        let status = response.status();
        if status == StatusCode::PAYMENT_REQUIRED {
            return Err(NegotiationError::PaymentRequiredTwice);
        }
        let body = response
            .text()
            .await
            .map_err(|e| NegotiationError::Request(format!("Failed to read schema body: {}", e)))?;
        if !status.is_success() {
            return Err(NegotiationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if let Some(payment) = &payment {
            log::info!(
                "[NEGOTIATE] Paid {} {} to {} for stream access ({}, tx {})",
                payment.amount_formatted,
                payment.asset,
                payment.pay_to,
                payment.status,
                payment.tx_hash.as_deref().unwrap_or("unknown")
            );
        }

        let descriptor = self.descriptor_from_schema(schema_path, &body)?;
        log::info!(
            "[NEGOTIATE] Session for stream '{}' (schema {}), token {}",
            descriptor.stream_id,
            descriptor.schema_version,
            mask(&descriptor.token)
        );
        Ok(descriptor)
    }

    fn descriptor_from_schema(
        &self,
        schema_path: &str,
        body: &str,
    ) -> Result<SessionDescriptor, NegotiationError> {
        let schema: StreamSchema = serde_json::from_str(body)
            .map_err(|e| NegotiationError::MalformedSchema(e.to_string()))?;

        if schema.stream_id.trim().is_empty() {
            return Err(NegotiationError::MalformedSchema(
                "empty stream id".to_string(),
            ));
        }

        let endpoint_url = resolve_endpoint(&self.base_url, &schema.websocket_endpoint)
            .map_err(NegotiationError::MalformedSchema)?;

        let token = extract_token(&endpoint_url);
        if token.is_empty() {
            return Err(NegotiationError::MissingToken {
                endpoint: schema.websocket_endpoint,
            });
        }

        let schema_version = schema
            .version
            .filter(|v| !v.trim().is_empty())
            .or_else(|| version_from_path(schema_path))
            .ok_or_else(|| {
                NegotiationError::MalformedSchema("cannot determine schema version".to_string())
            })?;

        Ok(SessionDescriptor {
            endpoint_url,
            token,
            stream_id: schema.stream_id,
            schema_version,
        })
    }

    /// `{base}/{version}/renew/stream/{id}`
    pub fn renewal_url(&self, descriptor: &SessionDescriptor) -> String {
        format!(
            "{}/{}/renew/stream/{}",
            self.base_url, descriptor.schema_version, descriptor.stream_id
        )
    }
}

/// Read the `t` query parameter of an endpoint URL; empty when absent or unparsable.
pub fn extract_token(endpoint_url: &str) -> String {
    Url::parse(endpoint_url)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == TOKEN_PARAM)
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_default()
}

/// Make the endpoint absolute and socket-schemed (`http` -> `ws`, `https` -> `wss`).
fn resolve_endpoint(base_url: &str, endpoint: &str) -> Result<String, String> {
    let mut url = match Url::parse(endpoint) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(base_url)
            .and_then(|base| base.join(endpoint))
            .map_err(|e| format!("Invalid websocket endpoint '{}': {}", endpoint, e))?,
        Err(e) => return Err(format!("Invalid websocket endpoint '{}': {}", endpoint, e)),
    };

    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(url.to_string()),
        other => return Err(format!("Unsupported websocket scheme '{}'", other)),
    };
    url.set_scheme(scheme)
        .map_err(|_| format!("Cannot switch '{}' to {}", endpoint, scheme))?;
    Ok(url.to_string())
}

/// `/v1/schema/stream/x` -> `v1`
fn version_from_path(schema_path: &str) -> Option<String> {
    schema_path
        .split('/')
        .find(|segment| !segment.is_empty())
        .map(|segment| segment.to_string())
}
