//! Webhook and API request authentication.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::errors::WebhookError;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// `X-Hub-Signature` value for `body` signed with `secret`.
pub fn github_signature(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha1={}", hex::encode(mac.finalize().into_bytes())))
}

/// Check a GitHub `X-Hub-Signature: sha1=<hex>` header against the raw body.
pub fn verify_github(secret: &str, header: Option<&str>, body: &[u8]) -> Result<(), WebhookError> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(WebhookError::SignatureMissing)?;
    let (method, digest) = header
        .split_once('=')
        .ok_or(WebhookError::SignatureInvalid)?;
    if method != "sha1" {
        return Err(WebhookError::SignatureInvalid);
    }
    let expected = hex::decode(digest).map_err(|_| WebhookError::SignatureInvalid)?;
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::SignatureInvalid)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::SignatureInvalid)
}

/// Check a Gitee `X-Gitee-Token` header, which carries the secret in plain text.
pub fn verify_gitee(secret: &str, token: Option<&str>) -> Result<(), WebhookError> {
    match token {
        Some(token) if secrets_match(secret, token, secret) => Ok(()),
        _ => Err(WebhookError::TokenInvalid),
    }
}

/// Expected `X-Rtfd-Sign` value for the build endpoint: hex SHA-256 of the secret.
pub fn api_sign(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

pub fn verify_api_sign(secret: &str, header: Option<&str>) -> bool {
    header.is_some_and(|h| secrets_match(secret, h.trim(), &api_sign(secret)))
}

// Both sides are MACed under `key` so the comparison runs through the
// constant-time `verify_slice` and never leaks the length of `expected`.
fn secrets_match(key: &str, presented: &str, expected: &str) -> bool {
    let tag = |value: &str| {
        HmacSha256::new_from_slice(key.as_bytes()).map(|mut mac| {
            mac.update(value.as_bytes());
            mac
        })
    };
    match (tag(presented), tag(expected)) {
        (Ok(presented), Ok(expected)) => presented
            .verify_slice(&expected.finalize().into_bytes())
            .is_ok(),
        _ => false,
    }
}
