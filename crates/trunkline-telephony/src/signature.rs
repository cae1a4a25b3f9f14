//! Carrier webhook signature verification.
//!
//! Two schemes, both failing closed:
//!
//! - **Twilio**: `HMAC-SHA1(auth_token, url + sorted key+value params)`,
//!   base64-encoded, compared against the `X-Twilio-Signature` header in
//!   constant time.
//! - **Telnyx**: Ed25519 over the raw request body, verified against the
//!   carrier's hex-encoded public key and hex-encoded signature.
//!
//! Any failure inside the verification machinery — undecodable base64 or
//! hex, wrong key length, malformed signature — is a failed verification,
//! never a pass.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::BTreeMap;

type HmacSha1 = Hmac<Sha1>;

/// Builds the Twilio signing string: the full webhook URL followed by
/// every POST parameter's key and value, concatenated in sorted-key
/// order.
pub fn twilio_signing_string(url: &str, params: &BTreeMap<String, String>) -> String {
    let mut signing = String::from(url);
    for (key, value) in params {
        signing.push_str(key);
        signing.push_str(value);
    }
    signing
}

/// Computes the expected `X-Twilio-Signature` value for a request.
pub fn twilio_signature(auth_token: &str, url: &str, params: &BTreeMap<String, String>) -> String {
    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(twilio_signing_string(url, params).as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Verifies a Twilio webhook signature.
///
/// The comparison runs in constant time via the MAC's own verifier, so
/// a forged signature learns nothing from timing.
pub fn verify_twilio(
    auth_token: &str,
    url: &str,
    params: &BTreeMap<String, String>,
    signature: &str,
) -> bool {
    let Ok(claimed) = BASE64.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha1::new_from_slice(auth_token.as_bytes()) else {
        return false;
    };
    mac.update(twilio_signing_string(url, params).as_bytes());
    mac.verify_slice(&claimed).is_ok()
}

/// Verifies a Telnyx webhook signature: Ed25519 over the raw request
/// body, hex-encoded key and signature.
pub fn verify_telnyx(public_key_hex: &str, signature_hex: &str, payload: &[u8]) -> bool {
    let Ok(key_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(key_array) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_array) else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_array);

    verifying_key.verify(payload, &signature).is_ok()
}
