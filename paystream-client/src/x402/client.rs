//! x402-aware HTTP client

use reqwest::{header, Client, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::signer::PaymentSigner;
use super::types::{PaymentRequired, PaymentRequirements, SelectedRequirement, X402PaymentInfo};

/// Header carrying the base64 payment payload on the retried request
pub const PAYMENT_HEADER: &str = "X-PAYMENT";

/// Result of a request that may have required payment
pub struct X402Response {
    pub response: Response,
    pub payment: Option<X402PaymentInfo>,
}

/// HTTP client that automatically handles one x402 challenge/pay/retry cycle
pub struct X402Client {
    client: Client,
    signer: Arc<dyn PaymentSigner>,
    max_payment: Option<u128>,
}

impl X402Client {
    pub fn new(signer: Arc<dyn PaymentSigner>, max_payment: Option<u128>) -> Result<Self, String> {
        let client = Client::builder()
            .user_agent(concat!("paystream-client/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

        log::info!("[X402] Initialized with wallet address: {}", signer.address());

        Ok(Self {
            client,
            signer,
            max_payment,
        })
    }

    pub fn signer(&self) -> &Arc<dyn PaymentSigner> {
        &self.signer
    }

    pub fn max_payment(&self) -> Option<u128> {
        self.max_payment
    }

    /// Make a GET request with automatic x402 payment handling
    pub async fn get_with_payment(&self, url: &str) -> Result<X402Response, String> {
        log::info!("[X402] Making GET request to {}", url);

        let initial_response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        self.handle_402_response(initial_response, || self.client.get(url))
            .await
    }

    /// Make a POST request with automatic x402 payment handling
    pub async fn post_with_payment<T: Serialize>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<X402Response, String> {
        log::info!("[X402] Making POST request to {}", url);

        let initial_response = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        self.handle_402_response(initial_response, || {
            self.client
                .post(url)
                .header(header::CONTENT_TYPE, "application/json")
                .json(body)
        })
        .await
    }

    /// Make a POST request without x402 payment handling; a 402 is returned as-is
    pub async fn post_plain<T: Serialize>(&self, url: &str, body: &T) -> Result<Response, String> {
        log::info!("[X402] Making plain POST request to {} (no payment)", url);

        self.client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))
    }

    /// Handle 402 response and retry with payment if needed
    async fn handle_402_response<F>(
        &self,
        initial_response: Response,
        build_request: F,
    ) -> Result<X402Response, String>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        if initial_response.status() != StatusCode::PAYMENT_REQUIRED {
            log::debug!("[X402] No payment required, status: {}", initial_response.status());
            return Ok(X402Response {
                response: initial_response,
                payment: None,
            });
        }

        log::info!("[X402] Received 402 Payment Required");

        let payment_required = read_payment_required(initial_response).await?;
        log::debug!(
            "[X402] Challenge v{} with {} option(s): {}",
            payment_required.x402_version,
            payment_required.accepts.len(),
            payment_required.error.as_deref().unwrap_or("no reason given")
        );
        let selected = payment_required.select_first()?;
        let (header_value, payment_info) = self.sign_selected(&selected).await?;

        let paid_response = build_request()
            .header(PAYMENT_HEADER, header_value)
            .send()
            .await
            .map_err(|e| format!("Paid request failed: {}", e))?;

        log::info!("[X402] Payment sent, response status: {}", paid_response.status());

        let tx_hash = paid_response
            .headers()
            .get("x-payment-transaction")
            .or_else(|| paid_response.headers().get("x-transaction-hash"))
            .or_else(|| paid_response.headers().get("x-payment-tx"))
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        let payment_info = if let Some(hash) = tx_hash {
            log::info!("[X402] Received transaction hash: {}", hash);
            payment_info.with_tx_hash(hash)
        } else if paid_response.status().is_success() {
            payment_info.mark_confirmed()
        } else if paid_response.status() == StatusCode::PAYMENT_REQUIRED {
            log::warn!("[X402] Payment was not accepted (402 after paying)");
            payment_info.mark_failed()
        } else {
            log::warn!(
                "[X402] Payment response status: {}, keeping as pending",
                paid_response.status()
            );
            payment_info
        };

        Ok(X402Response {
            response: paid_response,
            payment: Some(payment_info),
        })
    }

    /// Check the ceiling, sign, and encode the `X-PAYMENT` header value
    async fn sign_selected(
        &self,
        selected: &SelectedRequirement,
    ) -> Result<(String, X402PaymentInfo), String> {
        let requirements = &selected.requirements;
        check_payment_limit(requirements, self.max_payment)?;

        let payment_info = X402PaymentInfo::from_requirements(requirements);
        let payload = self.signer.sign_payment(requirements).await?;
        let header_value = payload.to_base64()?;

        log::info!(
            "[X402] Signed payment for {} {} to {}",
            payment_info.amount_formatted,
            payment_info.asset,
            payment_info.pay_to
        );

        Ok((header_value, payment_info))
    }
}

/// Parse payment requirements from a 402 response.
///
/// Tries the base64 `payment-required` header first, then the JSON body.
pub fn parse_payment_required(
    headers: &header::HeaderMap,
    body: &str,
) -> Result<PaymentRequired, String> {
    if let Some(header_val) = headers
        .get("payment-required")
        .and_then(|v| v.to_str().ok())
    {
        return PaymentRequired::from_base64(header_val);
    }

    serde_json::from_str::<PaymentRequired>(body)
        .map_err(|e| format!("Failed to parse 402 payment requirements from body: {}", e))
}

/// Consume a 402 response and parse its payment requirements
pub async fn read_payment_required(response: Response) -> Result<PaymentRequired, String> {
    let headers = response.headers().clone();
    let body = response
        .text()
        .await
        .map_err(|e| format!("Failed to read 402 body: {}", e))?;
    parse_payment_required(&headers, &body)
}

/// Refuse to sign anything larger than the configured ceiling
pub fn check_payment_limit(
    requirements: &PaymentRequirements,
    max_payment: Option<u128>,
) -> Result<(), String> {
    let Some(max) = max_payment else {
        return Ok(());
    };
    let amount = requirements
        .max_amount_required
        .parse::<u128>()
        .map_err(|e| format!("Invalid payment amount '{}': {}", requirements.max_amount_required, e))?;
    if amount > max {
        return Err(format!(
            "Payment of {} {} exceeds the configured maximum of {}",
            amount, requirements.asset, max
        ));
    }
    Ok(())
}
