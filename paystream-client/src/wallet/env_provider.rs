//! Local key wallet provider.
//!
//! Decodes the configured hex private key and signs locally with an ethers
//! `LocalWallet`.

use async_trait::async_trait;
use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Signature, H256};

use super::WalletProvider;

pub struct EnvWalletProvider {
    wallet: LocalWallet,
    address: String,
}

impl EnvWalletProvider {
    /// Create provider from a private key string (hex, with or without 0x prefix)
    pub fn from_private_key(private_key: &str) -> Result<Self, String> {
        let key_hex = private_key.strip_prefix("0x").unwrap_or(private_key);

        let key_bytes = hex::decode(key_hex)
            .map_err(|e| format!("Invalid private key hex: {}", e))?;
        if key_bytes.len() != 32 {
            return Err(format!(
                "Invalid private key: expected 32 bytes, got {}",
                key_bytes.len()
            ));
        }

        let signing_key = SigningKey::from_bytes(key_bytes.as_slice().into())
            .map_err(|e| format!("Invalid private key: {}", e))?;

        let wallet = LocalWallet::from(signing_key);
        let address = format!("{:?}", wallet.address()).to_lowercase();

        Ok(Self { wallet, address })
    }
}

#[async_trait]
impl WalletProvider for EnvWalletProvider {
    async fn sign_hash(&self, hash: H256) -> Result<Signature, String> {
        self.wallet
            .sign_hash(hash)
            .map_err(|e| format!("Failed to sign hash: {}", e))
    }

    fn get_address(&self) -> String {
        self.address.clone()
    }

    fn mode_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_derivation() {
        // Hardhat's first default account
        let provider = EnvWalletProvider::from_private_key(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        assert_eq!(
            provider.get_address(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(EnvWalletProvider::from_private_key("0xzz").is_err());
        assert!(EnvWalletProvider::from_private_key("abcd").is_err());
    }

    #[tokio::test]
    async fn test_sign_hash_recovers_address() {
        let provider = EnvWalletProvider::from_private_key(
            "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        let hash = H256::from([7u8; 32]);
        let signature = provider.sign_hash(hash).await.unwrap();
        let recovered = signature.recover(hash).unwrap();
        assert_eq!(
            format!("{:?}", recovered).to_lowercase(),
            provider.get_address()
        );
    }
}
