//! Nonce-and-HMAC request signing.
//!
//! Message = `nonce ‖ client_id ‖ api_key`, signature = upper-case hex of
//! HMAC-SHA256 over the message keyed by the account secret. The signed
//! parameters are `key`, `signature`, and `nonce`.

use super::Credentials;
use crate::error::SignerError;
use crate::request::Payload;
use crate::shared::unix_millis;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::{Mutex, MutexGuard};

type HmacSha256 = Hmac<Sha256>;

struct NonceState {
    next: u64,
    invalidated: bool,
}

/// Per-account signer. Signing is serialized so each nonce is used once and
/// nonces increase by exactly 1 per signed request.
pub struct RequestSigner {
    credentials: Credentials,
    state: Mutex<NonceState>,
}

impl RequestSigner {
    /// Seed the nonce from the wall clock so a restarted process does not
    /// replay nonces the backend has already seen.
    pub fn new(credentials: Credentials) -> Self {
        Self::with_nonce(credentials, unix_millis())
    }

    pub fn with_nonce(credentials: Credentials, nonce: u64) -> Self {
        Self {
            credentials,
            state: Mutex::new(NonceState {
                next: nonce,
                invalidated: false,
            }),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.credentials.client_id
    }

    /// Sign `payload`, returning a copy with `key`, `signature`, and `nonce`
    /// appended. Consumes one nonce.
    pub fn sign(&self, payload: &Payload) -> Result<Payload, SignerError> {
        let mut state = self.lock();
        if state.invalidated {
            return Err(SignerError::SessionInvalidated);
        }
        let nonce = state.next;
        let signature = self.signature(nonce)?;
        state.next += 1;
        drop(state);

        let mut signed = payload.clone();
        signed.insert("key".to_string(), self.credentials.api_key.clone());
        signed.insert("signature".to_string(), signature);
        signed.insert("nonce".to_string(), nonce.to_string());
        Ok(signed)
    }

    /// The nonce the next `sign` will use.
    pub fn next_nonce(&self) -> u64 {
        self.lock().next
    }

    /// Mark the session dead after the backend rejected a signature or nonce.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        if !state.invalidated {
            tracing::error!(
                client_id = %self.credentials.client_id,
                nonce = state.next,
                "Signing session invalidated"
            );
        }
        state.invalidated = true;
    }

    pub fn is_invalidated(&self) -> bool {
        self.lock().invalidated
    }

    /// Re-seed after the caller recovered the backend's nonce position.
    /// Never moves the counter backwards. Clears invalidation.
    pub fn resync(&self, nonce: u64) {
        let mut state = self.lock();
        state.next = state.next.max(nonce);
        state.invalidated = false;
        tracing::info!(
            client_id = %self.credentials.client_id,
            nonce = state.next,
            "Signing session resynchronized"
        );
    }

    fn signature(&self, nonce: u64) -> Result<String, SignerError> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret.as_bytes())
            .map_err(|_| SignerError::InvalidKey)?;
        mac.update(nonce.to_string().as_bytes());
        mac.update(self.credentials.client_id.as_bytes());
        mac.update(self.credentials.api_key.as_bytes());
        Ok(hex::encode_upper(mac.finalize().into_bytes()))
    }

    fn lock(&self) -> MutexGuard<'_, NonceState> {
        // A panic while holding the lock cannot leave the counter half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("client_id", &self.credentials.client_id)
            .field("next_nonce", &self.next_nonce())
            .finish()
    }
}
