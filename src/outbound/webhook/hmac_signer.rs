use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Prefix naming the signature scheme in `X-Webhook-Signature`.
/// Changing the scheme means introducing a new prefix.
pub const SIGNATURE_SCHEME: &str = "sha256";

const SECRET_PREFIX: &str = "whsec_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Invalid signature header format: {0}")]
    InvalidFormat(String),

    #[error("Signature is not valid hex")]
    InvalidEncoding,

    #[error("Invalid signature")]
    Mismatch,
}

/// HMAC-SHA256 signer for webhook authentication.
///
/// The signature covers the exact request body bytes, so the receiver can
/// recompute it from the raw body and its copy of the secret.
pub struct HmacSigner {
    secret: String,
}

impl HmacSigner {
    /// New HMAC signer with the given secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Sign a payload, returning the lowercase hex digest
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify a hex digest against a payload in constant time
    pub fn verify(&self, payload: &[u8], signature: &str) -> Result<(), SignatureError> {
        let expected = hex::decode(signature).map_err(|_| SignatureError::InvalidEncoding)?;
        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)
    }

    /// Verify the value of an `X-Webhook-Signature` header
    pub fn verify_header(&self, payload: &[u8], header: &str) -> Result<(), SignatureError> {
        let signature = parse_signature_header(header)?;
        self.verify(payload, &signature)
    }

    fn mac(&self) -> HmacSha256 {
        match HmacSha256::new_from_slice(self.secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC key can be of any size, as per crate documentation"),
        }
    }
}

/// Sign `payload` with `secret` and format the result for the header
pub fn sign(payload: &[u8], secret: &str) -> String {
    format_signature_header(&HmacSigner::new(secret).sign(payload))
}

/// Helper function to format signature for HTTP header
pub fn format_signature_header(signature: &str) -> String {
    format!("{SIGNATURE_SCHEME}={signature}")
}

/// Helper function to parse signature from HTTP header
pub fn parse_signature_header(header: &str) -> Result<String, SignatureError> {
    header
        .strip_prefix(SIGNATURE_SCHEME)
        .and_then(|rest| rest.strip_prefix('='))
        .map(str::to_string)
        .ok_or_else(|| SignatureError::InvalidFormat(header.to_string()))
}

/// Generate a fresh subscription secret: `whsec_` plus 32 random bytes in hex
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", hex::encode(bytes))
}
