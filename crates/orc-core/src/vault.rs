//! Credential Vault (C1, §4.1).
//!
//! Resolves credentials for a `(domain, credential_type)` pair from, in
//! priority order: an in-memory cache, an environment variable (optionally
//! `enc:`-prefixed and encrypted), or a deterministic placeholder. Placeholder
//! generation is disallowed when the caller's [`AuthorizationMode`] is
//! `Internal` — production automation must supply real credentials.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use md5::Md5;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::crypto::{self, VaultKey};
use crate::error::{CredentialError, KeystoreError};
use crate::job::AuthorizationMode;

/// Where a resolved credential value came from. Surfaced in logs/audit
/// context so a placeholder never silently passes as a real secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Env,
    Vault,
    Placeholder,
}

/// Storage seam for the encrypted-keystore credential tier, keyed
/// `vault:<domain>:<credential_type>`. A real implementation (Redis) may
/// return raw bytes that are either ciphertext produced by [`crypto::encrypt`]
/// or, for values written without a vault key configured, plaintext.
#[async_trait]
pub trait KeystoreStore: Send + Sync {
    async fn get(&self, domain: &str, credential_type: &str) -> Result<Option<Vec<u8>>, KeystoreError>;
}

#[derive(Clone)]
struct CacheEntry {
    value: String,
    source: CredentialSource,
    expires_at: Instant,
}

/// Resolves credentials for browser automation jobs.
pub struct CredentialVault {
    env_prefix: &'static str,
    cache_ttl: Duration,
    cache: Mutex<HashMap<(String, String), CacheEntry>>,
    key: Option<VaultKey>,
    keystore: Option<Arc<dyn KeystoreStore>>,
}

impl CredentialVault {
    #[must_use]
    pub fn new(key: Option<VaultKey>) -> Self {
        Self {
            env_prefix: "CRED_",
            cache_ttl: Duration::from_secs(300),
            cache: Mutex::new(HashMap::new()),
            key,
            keystore: None,
        }
    }

    /// Configure the encrypted-keystore tier consulted between the
    /// environment lookup and the placeholder fallback.
    #[must_use]
    pub fn with_keystore(mut self, keystore: Arc<dyn KeystoreStore>) -> Self {
        self.keystore = Some(keystore);
        self
    }

    /// Canonicalize `(domain, credential_type)` into `CRED_<DOMAIN>_<TYPE>`.
    ///
    /// Dots and hyphens in the domain become underscores; everything is
    /// upper-cased, matching the Python prototype's `_domain_to_env_key`.
    #[must_use]
    pub fn env_key(&self, domain: &str, credential_type: &str) -> String {
        let domain_clean = domain.replace(['.', '-'], "_").to_uppercase();
        let type_clean = credential_type.replace('-', "_").to_uppercase();
        format!("{}{domain_clean}_{type_clean}", self.env_prefix)
    }

    /// Resolve one credential, consulting the cache, then the environment,
    /// then the encrypted keystore (if one is configured), then falling back
    /// to a deterministic placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFoundPlaceholderDisallowed`] if no
    /// credential is on file and `mode` is [`AuthorizationMode::Internal`].
    /// Returns [`CredentialError::Decryption`] if an `enc:` value fails to
    /// decrypt, or [`CredentialError::NoKeyConfigured`] if one is present but
    /// no vault key was configured.
    pub async fn get_credential(
        &self,
        domain: &str,
        credential_type: &str,
        mode: AuthorizationMode,
    ) -> Result<(String, CredentialSource), CredentialError> {
        let cache_key = (domain.to_owned(), credential_type.to_owned());

        if let Some(entry) = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(&cache_key) {
            if entry.expires_at > Instant::now() {
                return Ok((entry.value.clone(), entry.source));
            }
        }

        let env_key = self.env_key(domain, credential_type);
        if let Ok(raw) = std::env::var(&env_key) {
            let value = if raw.starts_with("enc:") {
                let key = self.key.as_ref().ok_or(CredentialError::NoKeyConfigured)?;
                let ciphertext = crypto::decode_enc_value(&raw)?;
                let plaintext = crypto::decrypt(key, &ciphertext)?;
                String::from_utf8(plaintext).map_err(|e| CredentialError::Decryption { reason: e.to_string() })?
            } else {
                raw
            };
            self.insert_cache(cache_key, value.clone(), CredentialSource::Env);
            return Ok((value, CredentialSource::Env));
        }

        if let Some(value) = self.lookup_keystore(domain, credential_type).await {
            self.insert_cache(cache_key, value.clone(), CredentialSource::Vault);
            return Ok((value, CredentialSource::Vault));
        }

        if mode == AuthorizationMode::Internal {
            return Err(CredentialError::NotFoundPlaceholderDisallowed {
                domain: domain.to_owned(),
                credential_type: credential_type.to_owned(),
                mode: "internal".to_owned(),
            });
        }

        let placeholder = Self::generate_placeholder(domain, credential_type);
        self.insert_cache(cache_key, placeholder.clone(), CredentialSource::Placeholder);
        Ok((placeholder, CredentialSource::Placeholder))
    }

    /// Consult the configured keystore, decrypting the stored bytes when a
    /// vault key is present. A keystore miss, an unconfigured keystore, or a
    /// store-level failure all fall through to the next tier rather than
    /// failing the whole lookup — the keystore is an optional accelerant over
    /// the environment/placeholder tiers, not a required dependency.
    async fn lookup_keystore(&self, domain: &str, credential_type: &str) -> Option<String> {
        let keystore = self.keystore.as_ref()?;
        let raw = keystore.get(domain, credential_type).await.ok().flatten()?;

        let plaintext = match self.key.as_ref() {
            Some(key) => crypto::decrypt(key, &raw).unwrap_or(raw),
            None => raw,
        };
        String::from_utf8(plaintext).ok()
    }

    fn insert_cache(&self, key: (String, String), value: String, source: CredentialSource) {
        let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.insert(key, CacheEntry { value, source, expires_at: Instant::now() + self.cache_ttl });
    }

    /// Deterministic placeholder values, one scheme per credential type, so
    /// a placeholder is recognizable on sight and reproducible across runs.
    #[must_use]
    pub fn generate_placeholder(domain: &str, credential_type: &str) -> String {
        let seed = format!("{domain}:{credential_type}");
        match credential_type {
            "username" => format!("user_{}", &hex_digest::<Md5>(&seed)[..8]),
            "password" => format!("pwd_{}", &hex_digest::<Sha256>(&seed)[..16]),
            "api_key" => format!("api_{}", &hex_digest::<Sha512>(&seed)[..32]),
            "token" => format!("tok_{}", &hex_digest::<Sha384>(&seed)[..48]),
            _ => format!("cred_{}", &hex_digest::<Md5>(&seed)[..12]),
        }
    }
}

fn hex_digest<D: Digest + Default>(input: &str) -> String {
    let mut hasher = D::default();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_key_canonicalization() {
        let vault = CredentialVault::new(None);
        assert_eq!(vault.env_key("my-site.example.com", "api_key"), "CRED_MY_SITE_EXAMPLE_COM_API_KEY");
    }

    #[test]
    fn placeholder_is_deterministic() {
        let a = CredentialVault::generate_placeholder("example.com", "password");
        let b = CredentialVault::generate_placeholder("example.com", "password");
        assert_eq!(a, b);
        assert!(a.starts_with("pwd_"));
    }

    #[tokio::test]
    async fn internal_mode_rejects_placeholder() {
        let vault = CredentialVault::new(None);
        // SAFETY-free: no actual unsafe env mutation needed, this key is
        // assumed absent in the test environment.
        let result = vault.get_credential("nonexistent-test-domain.invalid", "password", AuthorizationMode::Internal).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn public_mode_falls_back_to_placeholder() {
        let vault = CredentialVault::new(None);
        let (value, source) = vault
            .get_credential("nonexistent-test-domain.invalid", "password", AuthorizationMode::Public)
            .await
            .expect("placeholder");
        assert_eq!(source, CredentialSource::Placeholder);
        assert!(value.starts_with("pwd_"));
    }

    struct FakeKeystore {
        value: Option<Vec<u8>>,
    }

    #[async_trait]
    impl KeystoreStore for FakeKeystore {
        async fn get(&self, _domain: &str, _credential_type: &str) -> Result<Option<Vec<u8>>, KeystoreError> {
            Ok(self.value.clone())
        }
    }

    #[tokio::test]
    async fn keystore_hit_takes_priority_over_placeholder() {
        let vault = CredentialVault::new(None).with_keystore(Arc::new(FakeKeystore { value: Some(b"s3cr3t".to_vec()) }));
        let (value, source) =
            vault.get_credential("kept-in-vault.example.com", "api_key", AuthorizationMode::Public).await.expect("vault hit");
        assert_eq!(source, CredentialSource::Vault);
        assert_eq!(value, "s3cr3t");
    }

    #[tokio::test]
    async fn keystore_miss_falls_back_to_placeholder() {
        let vault = CredentialVault::new(None).with_keystore(Arc::new(FakeKeystore { value: None }));
        let (value, source) =
            vault.get_credential("not-in-vault.example.com", "api_key", AuthorizationMode::Public).await.expect("placeholder");
        assert_eq!(source, CredentialSource::Placeholder);
        assert!(value.starts_with("api_"));
    }

    #[tokio::test]
    async fn keystore_value_decrypted_with_configured_key() {
        let key = VaultKey::derive(b"operator-passphrase", b"fixed-salt");
        let ciphertext = crypto::encrypt(&key, b"rotated-secret").expect("encrypt");
        let vault = CredentialVault::new(Some(key)).with_keystore(Arc::new(FakeKeystore { value: Some(ciphertext) }));
        let (value, source) =
            vault.get_credential("encrypted.example.com", "token", AuthorizationMode::Public).await.expect("vault hit");
        assert_eq!(source, CredentialSource::Vault);
        assert_eq!(value, "rotated-secret");
    }
}
