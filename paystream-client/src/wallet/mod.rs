//! Wallet Provider Abstraction
//!
//! Payment signing goes through a `WalletProvider` so the x402 signer never
//! touches key material directly. The only provider shipped here is
//! `EnvWalletProvider`, which holds a local secp256k1 key taken from the
//! process configuration.

mod env_provider;

pub use env_provider::EnvWalletProvider;

use async_trait::async_trait;
use ethers::types::{Signature, H256};

/// Trait for wallet providers - abstracts wallet access for signing payments
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Sign a raw 32-byte hash (EIP-712 digests are pre-computed by the signer)
    async fn sign_hash(&self, hash: H256) -> Result<Signature, String>;

    /// Get the wallet address (always available, cached)
    fn get_address(&self) -> String;

    /// Get the mode name for logging
    fn mode_name(&self) -> &'static str;
}
