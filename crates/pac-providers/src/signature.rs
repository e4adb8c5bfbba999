//! # Webhook Signatures
//!
//! HMAC and shared-token checks used by the providers' `validate`.
//!
//! All comparisons run in constant time. Secret values and signatures are
//! never logged.

use hmac::{Hmac, Mac};
use pac_core::provider::ProviderError;
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Hex HMAC-SHA256 of `payload`.
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String, ProviderError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
        ProviderError::InvalidSignature {
            message: format!("failed to create HMAC instance: {}", e),
        }
    })?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn hmac_sha1_hex(secret: &str, payload: &[u8]) -> Result<String, ProviderError> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).map_err(|e| {
        ProviderError::InvalidSignature {
            message: format!("failed to create HMAC instance: {}", e),
        }
    })?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string equality.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    // Length is not secret
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Checks a `sha256=<hex>` or `sha1=<hex>` signature header value.
pub fn verify_prefixed(signature: &str, payload: &[u8], secret: &str) -> Result<(), ProviderError> {
    let (expected, given) = if let Some(hex_sig) = signature.strip_prefix("sha256=") {
        (hmac_sha256_hex(secret, payload)?, hex_sig)
    } else if let Some(hex_sig) = signature.strip_prefix("sha1=") {
        (hmac_sha1_hex(secret, payload)?, hex_sig)
    } else {
        return Err(ProviderError::InvalidSignature {
            message: "signature must start with sha256= or sha1=".to_string(),
        });
    };

    if given.is_empty() {
        return Err(ProviderError::InvalidSignature {
            message: "signature is empty".to_string(),
        });
    }
    if constant_time_eq(&expected, &given.to_ascii_lowercase()) {
        Ok(())
    } else {
        Err(ProviderError::InvalidSignature {
            message: "payload signature check failed".to_string(),
        })
    }
}

/// Checks a bare hex HMAC-SHA256 signature, as sent by Gitea.
pub fn verify_hex_sha256(signature: &str, payload: &[u8], secret: &str) -> Result<(), ProviderError> {
    let expected = hmac_sha256_hex(secret, payload)?;
    if constant_time_eq(&expected, &signature.trim().to_ascii_lowercase()) {
        Ok(())
    } else {
        Err(ProviderError::InvalidSignature {
            message: "payload signature check failed".to_string(),
        })
    }
}

/// Checks a shared token header, as sent by GitLab.
pub fn verify_token(token: &str, secret: &str) -> Result<(), ProviderError> {
    if constant_time_eq(token, secret) {
        Ok(())
    } else {
        Err(ProviderError::InvalidSignature {
            message: "webhook token does not match".to_string(),
        })
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
