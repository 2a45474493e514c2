use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("no API key configured for provider `{0}`")]
    NotFound(String),

    #[error("secret store backend error: {0}")]
    Backend(String),
}

/// Plaintext provider-key lookup, consumed by the node runner's
/// `get_api_key` (§6). Encryption of stored secrets is explicitly out of
/// scope for this crate (§1) — a production deployment wraps a real
/// encrypted store behind this trait; the engine only ever sees plaintext.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_key(&self, user_id: Uuid, provider: &str) -> Result<String, SecretError>;
}

/// In-memory secret store for tests and for bootstrapping a worker without a
/// real secrets backend wired in.
#[derive(Default)]
pub struct InMemorySecretStore {
    keys: RwLock<HashMap<(Uuid, String), String>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key(&self, user_id: Uuid, provider: &str, key: impl Into<String>) {
        self.keys.write().unwrap().insert((user_id, provider.to_string()), key.into());
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_key(&self, user_id: Uuid, provider: &str) -> Result<String, SecretError> {
        self.keys
            .read()
            .unwrap()
            .get(&(user_id, provider.to_string()))
            .cloned()
            .ok_or_else(|| SecretError::NotFound(provider.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_errors() {
        let store = InMemorySecretStore::new();
        let err = store.get_key(Uuid::new_v4(), "gemini").await.unwrap_err();
        assert!(matches!(err, SecretError::NotFound(_)));
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let store = InMemorySecretStore::new();
        let user = Uuid::new_v4();
        store.set_key(user, "groq", "gsk-test");
        assert_eq!(store.get_key(user, "groq").await.unwrap(), "gsk-test");
    }
}
