use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::ports::SignatureVerifier;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

/// Verifies a hex-encoded HMAC-SHA256 of the raw request body.
#[derive(Clone)]
pub struct HmacSignatureVerifier {
    secret: String,
}

impl HmacSignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC key length is unrestricted"))
    }
}

impl SignatureVerifier for HmacSignatureVerifier {
    fn verify(&self, body: &[u8], signature: Option<&str>) -> bool {
        let Some(signature) = signature else {
            return false;
        };
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };

        let mut mac = self.mac();
        mac.update(body);
        // verify_slice compares in constant time
        mac.verify_slice(&expected).is_ok()
    }
}
