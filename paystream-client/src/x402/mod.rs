//! x402 payment primitives for the stream negotiator
//!
//! This module handles the x402 payment protocol flow:
//! 1. Make initial request
//! 2. If 402 returned, parse payment requirements (header or JSON body)
//! 3. Sign the first accepted requirement based on scheme:
//!    - "permit" (EIP-2612): Permit signature for facilitator to transfer tokens
//!    - "exact" (EIP-3009): TransferWithAuthorization for direct transfers
//! 4. Retry once with X-PAYMENT header
//!
//! In-band renewal reuses steps 2 and 3 without the retry: the signed payload
//! travels over the event connection instead.

mod client;
mod signer;
mod types;

pub use client::{check_payment_limit, read_payment_required, X402Client, X402Response};
pub use signer::{PaymentSigner, X402Signer};
