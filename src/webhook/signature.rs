use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

fn mac_for(secret: &str, payload: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::WebhookVerification(format!("Invalid HMAC key: {e}")))?;
    mac.update(payload);
    Ok(mac)
}

/// The `X-Hub-Signature-256` value GitHub would send for `payload`.
pub fn sign(secret: &str, payload: &[u8]) -> Result<String> {
    let digest = mac_for(secret, payload)?.finalize().into_bytes();
    Ok(format!("{PREFIX}{}", hex::encode(digest)))
}

/// Check a release delivery against the shared secret.
///
/// The header looks like `sha256=<hex>`; comparison is constant time.
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> Result<()> {
    let signature_hex = signature_header
        .trim()
        .strip_prefix(PREFIX)
        .ok_or_else(|| AppError::WebhookVerification("Missing sha256= prefix".to_string()))?;

    let expected = hex::decode(signature_hex)
        .map_err(|e| AppError::WebhookVerification(format!("Invalid hex in signature: {e}")))?;

    mac_for(secret, payload)?
        .verify_slice(&expected)
        .map_err(|_| AppError::WebhookVerification("Signature mismatch".to_string()))
}
