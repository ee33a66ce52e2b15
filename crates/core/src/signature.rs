use std::{fmt, sync::Arc};

use hmac::{digest::InvalidLength, Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Authentication failures surfaced by [`SignatureVerifier::verify`].
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("missing signature")]
    MissingSignature,
    #[error("invalid signature")]
    InvalidSignature,
}

/// Authenticates raw webhook bodies with the `X-Hub-Signature-256` scheme:
/// `sha256=` followed by the lowercase hex HMAC-SHA256 of the body.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Arc<[u8]>,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<Arc<[u8]>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Computes the signature header value the host would send for `body`.
    pub fn sign(&self, body: &[u8]) -> Result<String, InvalidLength> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret)?;
        mac.update(body);
        Ok(format!(
            "{SIGNATURE_PREFIX}{}",
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    /// Verifies `claimed` against the exact raw `body` bytes.
    pub fn verify(&self, body: &[u8], claimed: Option<&str>) -> Result<(), AuthenticationError> {
        let claimed = claimed.ok_or(AuthenticationError::MissingSignature)?;
        let expected = self
            .sign(body)
            .map_err(|_| AuthenticationError::InvalidSignature)?;

        if expected.as_bytes().ct_eq(claimed.as_bytes()).into() {
            Ok(())
        } else {
            Err(AuthenticationError::InvalidSignature)
        }
    }
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"<redacted>")
            .finish()
    }
}
