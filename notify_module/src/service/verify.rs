use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Check the webhook signature: base64 of an HMAC-SHA256 over the exact raw
/// body bytes, keyed with the tenant's channel secret. Comparison happens in
/// constant time via the MAC itself.
pub(crate) fn verify_signature(secret: &str, signature: &str, body: &[u8]) -> bool {
    let Ok(provided) = base64::engine::general_purpose::STANDARD.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}
