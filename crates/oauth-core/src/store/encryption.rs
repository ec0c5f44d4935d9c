//! At-rest encryption for token fields (spec §4.2: "encrypt `access_token`,
//! `refresh_token`, `id_token` fields in place via the EncryptionService").
//!
//! AES-256-GCM with a random 96-bit nonce prepended to the ciphertext,
//! base64-encoded for storage alongside the rest of the JSON token record.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key};
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{OAuthError, OAuthResult};
use crate::types::TokenData;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Symmetric encryption/decryption of token secret fields.
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Build the service from a 32-byte key, typically loaded from a
    /// secrets manager or `OAUTH_ENCRYPTION_KEY`.
    pub fn new(key: &SecretString) -> OAuthResult<Self> {
        let raw = key.expose_secret().as_bytes();
        if raw.len() != 32 {
            return Err(OAuthError::DecryptFailed("encryption key must be 32 bytes".into()));
        }
        let key = Key::<Aes256Gcm>::from_slice(raw);
        Ok(Self { cipher: Aes256Gcm::new(key) })
    }

    fn encrypt_field(&self, plaintext: &str) -> OAuthResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| OAuthError::DecryptFailed(format!("encrypt failed: {e}")))?;
        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(B64.encode(out))
    }

    fn decrypt_field(&self, encoded: &str) -> OAuthResult<String> {
        let raw = B64
            .decode(encoded)
            .map_err(|e| OAuthError::DecryptFailed(format!("invalid base64: {e}")))?;
        if raw.len() < 12 {
            return Err(OAuthError::DecryptFailed("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = raw.split_at(12);
        let plaintext = self
            .cipher
            .decrypt(nonce.into(), ciphertext)
            .map_err(|e| OAuthError::DecryptFailed(format!("decrypt failed: {e}")))?;
        String::from_utf8(plaintext).map_err(|e| OAuthError::DecryptFailed(format!("invalid utf8: {e}")))
    }

    /// Encrypt `access_token`, `refresh_token`, and `id_token` in place.
    pub fn encrypt_in_place(&self, token: &mut TokenData) -> OAuthResult<()> {
        token.access_token = self.encrypt_field(&token.access_token)?;
        if let Some(rt) = &token.refresh_token {
            token.refresh_token = Some(self.encrypt_field(rt)?);
        }
        if let Some(it) = &token.id_token {
            token.id_token = Some(self.encrypt_field(it)?);
        }
        Ok(())
    }

    /// Decrypt `access_token`, `refresh_token`, and `id_token` in place.
    pub fn decrypt_in_place(&self, token: &mut TokenData) -> OAuthResult<()> {
        token.access_token = self.decrypt_field(&token.access_token)?;
        if let Some(rt) = &token.refresh_token {
            token.refresh_token = Some(self.decrypt_field(rt)?);
        }
        if let Some(it) = &token.id_token {
            token.id_token = Some(self.decrypt_field(it)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> TokenData {
        let now = Utc::now();
        TokenData {
            server_name: "svc".into(),
            user_id: "user".into(),
            provider_type: crate::types::ProviderType::Github,
            tenant_id: None,
            access_token: "secret-access".into(),
            refresh_token: Some("secret-refresh".into()),
            id_token: None,
            token_type: "Bearer".into(),
            issued_at: now,
            expires_at: now + chrono::Duration::hours(1),
            refresh_at: now + chrono::Duration::minutes(50),
            last_used: None,
            scopes: vec![],
            storage_tier: crate::types::StorageTier::LocalSecretsDir,
            usage_count: 0,
        }
    }

    #[test]
    fn round_trips_token_fields() {
        let svc = EncryptionService::new(&SecretString::from("0".repeat(32))).unwrap();
        let mut token = sample();
        let original_access = token.access_token.clone();
        let original_refresh = token.refresh_token.clone();

        svc.encrypt_in_place(&mut token).unwrap();
        assert_ne!(token.access_token, original_access);

        svc.decrypt_in_place(&mut token).unwrap();
        assert_eq!(token.access_token, original_access);
        assert_eq!(token.refresh_token, original_refresh);
    }

    #[test]
    fn rejects_short_key() {
        assert!(EncryptionService::new(&SecretString::from("short")).is_err());
    }
}
