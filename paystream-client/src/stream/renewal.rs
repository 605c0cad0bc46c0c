//! Token renewal strategies.
//!
//! `DirectRenewal` pays over HTTP and receives a fresh token in the response.
//! `ChallengeRenewal` only fetches and signs the challenge; the signed payload
//! is delivered over the live connection by the session.

use async_trait::async_trait;
use paystream_types::{RenewRequest, RenewResponse, Timestamp};
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::config::RenewalMethod;
use crate::x402::{check_payment_limit, read_payment_required, X402Client, X402Response};

/// The session's current authorization.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthToken {
    pub token: String,
    pub expires_at: Option<Timestamp>,
    pub slice_seconds: Option<u64>,
}

impl AuthToken {
    /// Token taken from the socket URL; expiry is learned from `hello`.
    pub fn unannounced(token: &str) -> Self {
        Self {
            token: token.to_string(),
            expires_at: None,
            slice_seconds: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RenewalOutcome {
    /// New token, to be pushed with `renew_token`
    Token(AuthToken),
    /// Selected requirement and signed payment, to be pushed with `renew_inband`
    Inband { requirement: Value, payload: Value },
}

#[derive(Debug)]
pub enum RenewalError {
    /// Network failure or payment signing failure
    Request(String),
    Status { status: u16, body: String },
    MalformedBody(String),
    /// The challenge endpoint answered without challenging
    UnexpectedStatus(u16),
    NoRequirements,
    Payment(String),
}

impl fmt::Display for RenewalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenewalError::Request(e) => write!(f, "Renewal request failed: {}", e),
            RenewalError::Status { status, body } => {
                write!(f, "Renewal returned {}: {}", status, body)
            }
            RenewalError::MalformedBody(e) => write!(f, "Malformed renewal response: {}", e),
            RenewalError::UnexpectedStatus(status) => write!(
                f,
                "Renewal endpoint answered {} instead of a payment challenge",
                status
            ),
            RenewalError::NoRequirements => {
                write!(f, "Renewal challenge offered no payment requirements")
            }
            RenewalError::Payment(e) => write!(f, "Renewal payment failed: {}", e),
        }
    }
}

impl std::error::Error for RenewalError {}

#[async_trait]
pub trait RenewalStrategy: Send + Sync {
    fn method(&self) -> RenewalMethod;

    async fn renew(&self, old_token: &str) -> Result<RenewalOutcome, RenewalError>;
}

/// Pick the strategy named by configuration.
pub fn strategy_for(
    method: RenewalMethod,
    client: Arc<X402Client>,
    renewal_url: String,
) -> Arc<dyn RenewalStrategy> {
    log::info!("[RENEW] Using {} renewal via {}", method, renewal_url);
    match method {
        RenewalMethod::Http => Arc::new(DirectRenewal::new(client, renewal_url)),
        RenewalMethod::Inband => Arc::new(ChallengeRenewal::new(client, renewal_url)),
    }
}

pub struct DirectRenewal {
    client: Arc<X402Client>,
    url: String,
}

impl DirectRenewal {
    pub fn new(client: Arc<X402Client>, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl RenewalStrategy for DirectRenewal {
    fn method(&self) -> RenewalMethod {
        RenewalMethod::Http
    }

    async fn renew(&self, old_token: &str) -> Result<RenewalOutcome, RenewalError> {
        let request = RenewRequest {
            token: old_token.to_string(),
        };
        let X402Response { response, payment } = self
            .client
            .post_with_payment(&self.url, &request)
            .await
            .map_err(RenewalError::Request)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RenewalError::Request(format!("Failed to read renewal body: {}", e)))?;
        if !status.is_success() {
            return Err(RenewalError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let renewed: RenewResponse = serde_json::from_str(&body)
            .map_err(|e| RenewalError::MalformedBody(e.to_string()))?;
        if renewed.token.is_empty() {
            return Err(RenewalError::MalformedBody("empty token".to_string()));
        }

        if let Some(payment) = payment {
            log::info!(
                "[RENEW] Paid {} {} for renewal",
                payment.amount_formatted,
                payment.asset
            );
        }

        Ok(RenewalOutcome::Token(AuthToken {
            token: renewed.token,
            expires_at: Some(renewed.expires_at),
            slice_seconds: Some(renewed.slice_seconds),
        }))
    }
}

pub struct ChallengeRenewal {
    client: Arc<X402Client>,
    url: String,
}

impl ChallengeRenewal {
    pub fn new(client: Arc<X402Client>, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl RenewalStrategy for ChallengeRenewal {
    fn method(&self) -> RenewalMethod {
        RenewalMethod::Inband
    }

    async fn renew(&self, old_token: &str) -> Result<RenewalOutcome, RenewalError> {
        let request = RenewRequest {
            token: old_token.to_string(),
        };
        let response = self
            .client
            .post_plain(&self.url, &request)
            .await
            .map_err(RenewalError::Request)?;

        if response.status() != StatusCode::PAYMENT_REQUIRED {
            return Err(RenewalError::UnexpectedStatus(response.status().as_u16()));
        }

        let challenge = read_payment_required(response)
            .await
            .map_err(RenewalError::MalformedBody)?;
        if challenge.accepts.is_empty() {
            return Err(RenewalError::NoRequirements);
        }
        let selected = challenge
            .select_first()
            .map_err(RenewalError::MalformedBody)?;

        check_payment_limit(&selected.requirements, self.client.max_payment())
            .map_err(RenewalError::Payment)?;
        let payload = self
            .client
            .signer()
            .sign_payment(&selected.requirements)
            .await
            .map_err(RenewalError::Payment)?
            .to_value()
            .map_err(RenewalError::Payment)?;

        log::info!(
            "[RENEW] Signed in-band payment of {} to {}",
            selected.requirements.max_amount_required,
            selected.requirements.pay_to_address
        );

        Ok(RenewalOutcome::Inband {
            requirement: selected.raw,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{payment_required_body, payment_requirement, spawn_http, test_client};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::Mutex;

    const RENEW_PATH: &str = "/v1/renew/stream/transactions";

    #[tokio::test]
    async fn test_direct_renewal_pays_and_returns_token() {
        let seen_tokens = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen = seen_tokens.clone();
        let router = Router::new().route(
            RENEW_PATH,
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let seen = seen.clone();
                async move {
                    if !headers.contains_key("x-payment") {
                        return (AxumStatus::PAYMENT_REQUIRED, Json(payment_required_body()));
                    }
                    seen.lock().unwrap().push(body["token"].as_str().unwrap().to_string());
                    (
                        AxumStatus::OK,
                        Json(json!({"token": "tok-1", "expiresAt": 1700000300000i64, "sliceSeconds": 300})),
                    )
                }
            }),
        );
        let base = spawn_http(router).await;

        let strategy = DirectRenewal::new(test_client(), format!("{}{}", base, RENEW_PATH));
        let outcome = strategy.renew("tok-0").await.unwrap();
        match outcome {
            RenewalOutcome::Token(token) => {
                assert_eq!(token.token, "tok-1");
                assert_eq!(token.expires_at, Some(Timestamp::Millis(1700000300000)));
                assert_eq!(token.slice_seconds, Some(300));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(*seen_tokens.lock().unwrap(), vec!["tok-0".to_string()]);
    }

    #[tokio::test]
    async fn test_direct_renewal_server_error() {
        let router = Router::new().route(
            RENEW_PATH,
            post(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = spawn_http(router).await;

        let strategy = DirectRenewal::new(test_client(), format!("{}{}", base, RENEW_PATH));
        let err = strategy.renew("tok-0").await.unwrap_err();
        assert!(matches!(err, RenewalError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_direct_renewal_malformed_body() {
        let router = Router::new().route(
            RENEW_PATH,
            post(|| async { Json(json!({"token": "tok-1"})) }),
        );
        let base = spawn_http(router).await;

        let strategy = DirectRenewal::new(test_client(), format!("{}{}", base, RENEW_PATH));
        let err = strategy.renew("tok-0").await.unwrap_err();
        assert!(matches!(err, RenewalError::MalformedBody(_)));
    }

    #[tokio::test]
    async fn test_challenge_renewal_signs_first_requirement() {
        let router = Router::new().route(
            RENEW_PATH,
            post(|headers: HeaderMap| async move {
                // must be a plain request
                assert!(!headers.contains_key("x-payment"));
                let mut body = payment_required_body();
                let mut second = payment_requirement();
                second["maxAmountRequired"] = json!("50000");
                body["accepts"].as_array_mut().unwrap().push(second);
                (AxumStatus::PAYMENT_REQUIRED, Json(body))
            }),
        );
        let base = spawn_http(router).await;

        let strategy = ChallengeRenewal::new(test_client(), format!("{}{}", base, RENEW_PATH));
        match strategy.renew("tok-0").await.unwrap() {
            RenewalOutcome::Inband { requirement, payload } => {
                assert_eq!(requirement, payment_requirement());
                assert_eq!(payload["accepted"]["amount"], "10000");
                assert!(payload["payload"]["signature"].is_string());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_challenge_renewal_rejects_non_402() {
        let router = Router::new().route(
            RENEW_PATH,
            post(|| async { Json(json!({"token": "free"})) }),
        );
        let base = spawn_http(router).await;

        let strategy = ChallengeRenewal::new(test_client(), format!("{}{}", base, RENEW_PATH));
        let err = strategy.renew("tok-0").await.unwrap_err();
        assert!(matches!(err, RenewalError::UnexpectedStatus(200)));
    }

    #[tokio::test]
    async fn test_challenge_renewal_requires_options() {
        let router = Router::new().route(
            RENEW_PATH,
            post(|| async {
                (
                    AxumStatus::PAYMENT_REQUIRED,
                    Json(json!({"x402Version": 2, "accepts": []})),
                )
            }),
        );
        let base = spawn_http(router).await;

        let strategy = ChallengeRenewal::new(test_client(), format!("{}{}", base, RENEW_PATH));
        let err = strategy.renew("tok-0").await.unwrap_err();
        assert!(matches!(err, RenewalError::NoRequirements));
    }

    #[test]
    fn test_strategy_for_method() {
        let client = test_client();
        let http = strategy_for(RenewalMethod::Http, client.clone(), "http://h/r".into());
        let inband = strategy_for(RenewalMethod::Inband, client, "http://h/r".into());
        assert_eq!(http.method(), RenewalMethod::Http);
        assert_eq!(inband.method(), RenewalMethod::Inband);
    }
}
