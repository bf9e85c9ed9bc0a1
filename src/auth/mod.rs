//! Authentication: credential bundles and per-account request signing.
//!
//! Credentials are opaque to the core. Applications load them from wherever
//! they keep them and hand a [`Credentials`] bundle to [`RequestSigner::new`].
//! Each account gets exactly one signer; every private envelope for that
//! account carries an `Arc` to it and is signed at dispatch time.

pub mod signer;

pub use signer::RequestSigner;

use serde::Deserialize;

/// API key material for one account on a signing backend.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// Account (client) identifier.
    pub client_id: String,
    /// Public API key, sent with every signed request.
    pub api_key: String,
    /// HMAC secret. Never logged.
    pub secret: String,
}

impl Credentials {
    pub fn new(
        client_id: impl Into<String>,
        api_key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            api_key: api_key.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("42", "KEY", "hunter2");
        let shown = format!("{creds:?}");
        assert!(shown.contains("KEY"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_credentials_from_json() {
        let creds: Credentials = serde_json::from_str(
            r#"{"client_id":"42","api_key":"KEY","secret":"s"}"#,
        )
        .unwrap();
        assert_eq!(creds.client_id, "42");
    }
}
