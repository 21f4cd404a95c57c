//! Redis-backed encrypted keystore tier for the Credential Vault (C1, §4.1).

use async_trait::async_trait;
use orc_core::error::KeystoreError;
use orc_core::vault::KeystoreStore;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Stores/reads the raw (possibly ciphertext) bytes at `vault:<domain>:<type>`,
/// matching the original prototype's Redis-backed keystore tier. Decryption
/// happens one layer up, in `CredentialVault`, which is the only place that
/// holds the vault key.
#[derive(Clone)]
pub struct RedisKeystoreStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisKeystoreStore {
    #[must_use]
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self { conn, key_prefix: key_prefix.into() }
    }

    fn key(&self, domain: &str, credential_type: &str) -> String {
        format!("{}:{domain}:{credential_type}", self.key_prefix)
    }
}

#[async_trait]
impl KeystoreStore for RedisKeystoreStore {
    async fn get(&self, domain: &str, credential_type: &str) -> Result<Option<Vec<u8>>, KeystoreError> {
        let mut conn = self.conn.clone();
        conn.get(self.key(domain, credential_type)).await.map_err(|e| KeystoreError::StoreUnavailable(e.to_string()))
    }
}
