/// Threshold-ECDSA signing for outgoing EVM transactions.
///
/// Signatures come from the management canister's `sign_with_ecdsa`
/// (secp256k1, derivation path `b"evm"`). The matching EVM address is derived
/// once from `ecdsa_public_key` and kept in the engine config so broadcasts
/// can name their sender without an extra call.
///
/// Host builds return a deterministic stand-in signature and address.
use crate::ports::SignerPort;
use crate::storage::stable;
use async_trait::async_trait;
use canlog::{log, GetLogFilter, LogFilter, LogPriorityLevels};
use sha3::{Digest, Keccak256};

#[cfg(target_arch = "wasm32")]
use ic_cdk::management_canister::{
    ecdsa_public_key, sign_with_ecdsa, EcdsaCurve, EcdsaKeyId, EcdsaPublicKeyArgs,
    SignWithEcdsaArgs,
};

#[cfg(target_arch = "wasm32")]
const EVM_DERIVATION_PATH: &[u8] = b"evm";

#[derive(Clone, Copy, Debug, LogPriorityLevels)]
enum SignerLogPriority {
    #[log_level(capacity = 200, name = "SIGNER_INFO")]
    Info,
    #[log_level(capacity = 200, name = "SIGNER_ERROR")]
    Error,
}

impl GetLogFilter for SignerLogPriority {
    fn get_log_filter() -> LogFilter {
        LogFilter::ShowAll
    }
}

#[derive(Clone, Debug)]
pub struct ThresholdSigner {
    key_name: String,
}

impl ThresholdSigner {
    pub fn new(key_name: String) -> Self {
        Self { key_name }
    }
}

#[async_trait(?Send)]
impl SignerPort for ThresholdSigner {
    /// Returns the 64-byte compact `r || s` signature as 0x-hex.
    async fn sign_message(&self, message_hash: &str) -> Result<String, String> {
        if self.key_name.trim().is_empty() {
            return Err("ecdsa key name is not configured".to_string());
        }
        if stable::evm_address().is_none() {
            return Err("evm address has not been derived yet".to_string());
        }
        let digest = parse_message_hash(message_hash)?;

        #[cfg(not(target_arch = "wasm32"))]
        {
            let mut signature = [0u8; 64];
            signature[..32].copy_from_slice(&digest);
            signature[32..].copy_from_slice(&Keccak256::digest(self.key_name.as_bytes()));
            return Ok(format!("0x{}", hex::encode(signature)));
        }

        #[cfg(target_arch = "wasm32")]
        {
            let response = sign_with_ecdsa(&SignWithEcdsaArgs {
                message_hash: digest.to_vec(),
                derivation_path: vec![EVM_DERIVATION_PATH.to_vec()],
                key_id: EcdsaKeyId {
                    curve: EcdsaCurve::Secp256k1,
                    name: self.key_name.clone(),
                },
            })
            .await
            .map_err(|error| format!("sign_with_ecdsa failed: {error}"))?;

            Ok(format!("0x{}", hex::encode(response.signature)))
        }
    }
}

/// Derives the canister's EVM address for `key_name` and stores it in the
/// engine config.
pub async fn derive_and_cache_evm_address(key_name: &str) -> Result<String, String> {
    match derive_evm_address(key_name).await {
        Ok(address) => {
            stable::set_evm_address(Some(address.clone()));
            log!(SignerLogPriority::Info, "evm_address_derived address={}", address);
            Ok(address)
        }
        Err(error) => {
            log!(
                SignerLogPriority::Error,
                "evm_address_derivation_failed key={} error={}",
                key_name,
                error
            );
            Err(error)
        }
    }
}

async fn derive_evm_address(key_name: &str) -> Result<String, String> {
    if key_name.trim().is_empty() {
        return Err("ecdsa key name cannot be empty".to_string());
    }

    #[cfg(not(target_arch = "wasm32"))]
    let address = {
        let digest = Keccak256::digest(key_name.trim().as_bytes());
        format!("0x{}", hex::encode(&digest[12..32]))
    };

    #[cfg(target_arch = "wasm32")]
    let address = {
        let response = ecdsa_public_key(&EcdsaPublicKeyArgs {
            canister_id: None,
            derivation_path: vec![EVM_DERIVATION_PATH.to_vec()],
            key_id: EcdsaKeyId {
                curve: EcdsaCurve::Secp256k1,
                name: key_name.trim().to_string(),
            },
        })
        .await
        .map_err(|error| format!("ecdsa_public_key failed: {error}"))?;
        address_from_sec1_public_key(&response.public_key)?
    };

    Ok(address)
}

fn parse_message_hash(raw: &str) -> Result<[u8; 32], String> {
    let hash = raw.trim();
    let digits = hash
        .strip_prefix("0x")
        .or_else(|| hash.strip_prefix("0X"))
        .ok_or_else(|| "message hash must be 0x-prefixed hex".to_string())?;
    if digits.len() != 64 {
        return Err("message hash must be exactly 32 bytes".to_string());
    }

    let mut out = [0u8; 32];
    hex::decode_to_slice(digits, &mut out)
        .map_err(|error| format!("message hash is not valid hex: {error}"))?;
    Ok(out)
}

#[cfg(target_arch = "wasm32")]
fn address_from_sec1_public_key(sec1: &[u8]) -> Result<String, String> {
    use k256::elliptic_curve::sec1::ToEncodedPoint;
    use k256::PublicKey;

    let public_key = PublicKey::from_sec1_bytes(sec1)
        .map_err(|error| format!("invalid sec1 public key: {error}"))?;
    let uncompressed = public_key.to_encoded_point(false);
    let bytes = uncompressed.as_bytes();
    if bytes.len() != 65 || bytes.first().copied() != Some(0x04) {
        return Err("unexpected uncompressed public key format".to_string());
    }

    let digest = Keccak256::digest(&bytes[1..]);
    Ok(format!("0x{}", hex::encode(&digest[12..32])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::block_on_with_spin;

    const HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    #[test]
    fn message_hash_must_be_prefixed_32_byte_hex() {
        assert!(parse_message_hash("deadbeef").is_err());
        assert!(parse_message_hash("0xdeadbeef").is_err());
        assert!(parse_message_hash(&format!("0x{}", "zz".repeat(32))).is_err());
        assert_eq!(parse_message_hash(HASH), Ok([0x11u8; 32]));
    }

    #[test]
    fn signing_requires_a_derived_address() {
        stable::init_storage();
        stable::set_evm_address(None);
        let signer = ThresholdSigner::new("dfx_test_key".to_string());
        let err = block_on_with_spin(signer.sign_message(HASH))
            .expect_err("signing without an address should fail");
        assert!(err.contains("not been derived"));

        let address = block_on_with_spin(derive_and_cache_evm_address("dfx_test_key"))
            .expect("host derivation should succeed");
        assert_eq!(address.len(), 42);
        assert_eq!(stable::evm_address(), Some(address));

        let signature = block_on_with_spin(signer.sign_message(HASH))
            .expect("host signing should succeed");
        assert_eq!(signature.len(), 2 + 128);
        assert!(signature.starts_with(&format!("0x{}", "11".repeat(32))));
    }

    #[test]
    fn empty_key_name_is_rejected() {
        assert!(block_on_with_spin(derive_and_cache_evm_address("  ")).is_err());
        let signer = ThresholdSigner::new(String::new());
        assert!(block_on_with_spin(signer.sign_message(HASH)).is_err());
    }
}
