//! Turns a chosen x402 requirement into a signed payload.
//!
//! `exact` requirements get an EIP-3009 transferWithAuthorization straight to
//! `payTo`. `permit` requirements get an EIP-2612 permit naming the
//! facilitator as spender. Both are EIP-712 digests signed by the wallet.

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::*;
use crate::wallet::WalletProvider;

/// Anything that can turn a payment requirement into a signed payload.
#[async_trait]
pub trait PaymentSigner: Send + Sync {
    async fn sign_payment(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<PaymentPayload, String>;

    fn address(&self) -> String;
}

/// x402 payment signer backed by a WalletProvider
pub struct X402Signer {
    wallet: Arc<dyn WalletProvider>,
}

impl X402Signer {
    pub fn new(wallet: Arc<dyn WalletProvider>) -> Self {
        Self { wallet }
    }

    fn wallet_address(&self) -> Result<Address, String> {
        self.wallet
            .get_address()
            .parse()
            .map_err(|e| format!("Invalid wallet address: {}", e))
    }

    /// Generate a cryptographically secure nonce
    fn generate_nonce() -> Result<H256, String> {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| format!("Failed to generate random bytes: {}", e))?;
        Ok(H256::from(keccak256(bytes)))
    }

    /// Unix time the authorization stops being valid: the requirement's
    /// timeout from now, never less than a minute
    fn deadline(requirements: &PaymentRequirements) -> Result<u64, String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| format!("System clock before Unix epoch: {}", e))?;
        Ok(now.as_secs() + requirements.max_timeout_seconds.max(60))
    }

    async fn sign_permit(
        &self,
        requirements: &PaymentRequirements,
        token_metadata: &TokenMetadata,
    ) -> Result<PaymentPayload, String> {
        let spender = requirements
            .extra
            .as_ref()
            .and_then(|e| e.facilitator_signer.clone())
            .ok_or("permit requirement has no extra.facilitatorSigner to name as spender")?;

        let deadline = Self::deadline(requirements)?;
        let nonce = Self::generate_nonce()?;
        let domain = Eip712Domain::from_token_metadata(token_metadata)?;

        let message = PermitMessage {
            owner: self.wallet_address()?,
            spender: spender
                .parse()
                .map_err(|e| format!("Bad facilitatorSigner '{}': {}", spender, e))?,
            value: U256::from_dec_str(&requirements.max_amount_required)
                .map_err(|e| format!("Bad amount '{}': {}", requirements.max_amount_required, e))?,
            nonce: U256::from_big_endian(nonce.as_bytes()),
            deadline: U256::from(deadline),
        };

        let signature = self.sign_eip712(&domain, message.struct_hash()).await?;

        let authorization = EvmAuthorization::Eip2612(Eip2612Authorization {
            owner: self.wallet.get_address(),
            spender: spender.to_lowercase(),
            value: requirements.max_amount_required.clone(),
            nonce: format!("{:?}", nonce),
            deadline: deadline.to_string(),
        });

        Ok(PaymentPayload {
            x402_version: X402_VERSION,
            accepted: AcceptedPayment::from_requirements(requirements),
            payload: ExactEvmPayload {
                signature,
                authorization,
            },
        })
    }

    async fn sign_transfer_with_auth(
        &self,
        requirements: &PaymentRequirements,
        token_metadata: &TokenMetadata,
    ) -> Result<PaymentPayload, String> {
        let valid_before = Self::deadline(requirements)?;
        let nonce = Self::generate_nonce()?;
        let domain = Eip712Domain::from_token_metadata(token_metadata)?;

        let message = TransferWithAuthorizationMessage {
            from: self.wallet_address()?,
            to: requirements
                .pay_to_address
                .parse()
                .map_err(|e| format!("Bad payTo '{}': {}", requirements.pay_to_address, e))?,
            value: U256::from_dec_str(&requirements.max_amount_required)
                .map_err(|e| format!("Bad amount '{}': {}", requirements.max_amount_required, e))?,
            valid_after: U256::zero(),
            valid_before: U256::from(valid_before),
            nonce,
        };

        let signature = self.sign_eip712(&domain, message.struct_hash()).await?;

        let authorization = EvmAuthorization::Eip3009(Eip3009Authorization {
            from: self.wallet.get_address(),
            to: requirements.pay_to_address.to_lowercase(),
            value: requirements.max_amount_required.clone(),
            valid_after: "0".to_string(),
            valid_before: valid_before.to_string(),
            nonce: format!("{:?}", nonce),
        });

        Ok(PaymentPayload {
            x402_version: X402_VERSION,
            accepted: AcceptedPayment::from_requirements(requirements),
            payload: ExactEvmPayload {
                signature,
                authorization,
            },
        })
    }

    /// Sign EIP-712 typed data with a pre-computed struct hash
    async fn sign_eip712(&self, domain: &Eip712Domain, struct_hash: H256) -> Result<String, String> {
        let digest = eip712_digest(domain.separator(), struct_hash);
        let signature = self.wallet.sign_hash(digest).await?;
        Ok(format!("0x{}", hex::encode(signature.to_vec())))
    }
}

#[async_trait]
impl PaymentSigner for X402Signer {
    /// Chooses EIP-2612 (permit) or EIP-3009 (exact) based on scheme
    async fn sign_payment(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<PaymentPayload, String> {
        let token_metadata = TokenMetadata::from_requirements(requirements);

        match requirements.scheme.as_str() {
            "permit" => self.sign_permit(requirements, &token_metadata).await,
            "exact" | "eip3009" => {
                self.sign_transfer_with_auth(requirements, &token_metadata)
                    .await
            }
            other => Err(format!("Unsupported payment scheme: {}", other)),
        }
    }

    fn address(&self) -> String {
        self.wallet.get_address()
    }
}

/// keccak256("\x19\x01" ++ domainSeparator ++ structHash)
fn eip712_digest(domain_separator: H256, struct_hash: H256) -> H256 {
    let mut to_sign = Vec::with_capacity(66);
    to_sign.push(0x19);
    to_sign.push(0x01);
    to_sign.extend_from_slice(domain_separator.as_bytes());
    to_sign.extend_from_slice(struct_hash.as_bytes());
    H256::from(keccak256(&to_sign))
}

/// EIP-712 domain for token signatures
struct Eip712Domain {
    name: String,
    version: String,
    chain_id: u64,
    verifying_contract: Address,
}

impl Eip712Domain {
    fn from_token_metadata(metadata: &TokenMetadata) -> Result<Self, String> {
        Ok(Eip712Domain {
            name: metadata.name.clone(),
            version: metadata.version.clone(),
            chain_id: metadata.chain_id,
            verifying_contract: metadata
                .address
                .parse()
                .map_err(|e| format!("Invalid token address: {}", e))?,
        })
    }

    fn separator(&self) -> H256 {
        let type_hash = keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        );

        let encoded = ethers::abi::encode(&[
            ethers::abi::Token::FixedBytes(type_hash.to_vec()),
            ethers::abi::Token::FixedBytes(keccak256(self.name.as_bytes()).to_vec()),
            ethers::abi::Token::FixedBytes(keccak256(self.version.as_bytes()).to_vec()),
            ethers::abi::Token::Uint(U256::from(self.chain_id)),
            ethers::abi::Token::Address(self.verifying_contract),
        ]);

        H256::from(keccak256(&encoded))
    }
}

/// EIP-2612 Permit message
struct PermitMessage {
    owner: Address,
    spender: Address,
    value: U256,
    nonce: U256,
    deadline: U256,
}

impl PermitMessage {
    fn struct_hash(&self) -> H256 {
        let type_hash = keccak256(
            b"Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)",
        );

        let encoded = ethers::abi::encode(&[
            ethers::abi::Token::FixedBytes(type_hash.to_vec()),
            ethers::abi::Token::Address(self.owner),
            ethers::abi::Token::Address(self.spender),
            ethers::abi::Token::Uint(self.value),
            ethers::abi::Token::Uint(self.nonce),
            ethers::abi::Token::Uint(self.deadline),
        ]);

        H256::from(keccak256(&encoded))
    }
}

/// TransferWithAuthorization message for EIP-3009
struct TransferWithAuthorizationMessage {
    from: Address,
    to: Address,
    value: U256,
    valid_after: U256,
    valid_before: U256,
    nonce: H256,
}

impl TransferWithAuthorizationMessage {
    fn struct_hash(&self) -> H256 {
        let type_hash = keccak256(
            b"TransferWithAuthorization(address from,address to,uint256 value,uint256 validAfter,uint256 validBefore,bytes32 nonce)",
        );

        let encoded = ethers::abi::encode(&[
            ethers::abi::Token::FixedBytes(type_hash.to_vec()),
            ethers::abi::Token::Address(self.from),
            ethers::abi::Token::Address(self.to),
            ethers::abi::Token::Uint(self.value),
            ethers::abi::Token::Uint(self.valid_after),
            ethers::abi::Token::Uint(self.valid_before),
            ethers::abi::Token::FixedBytes(self.nonce.as_bytes().to_vec()),
        ]);

        H256::from(keccak256(&encoded))
    }
}
