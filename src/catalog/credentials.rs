use dashmap::DashMap;
use thiserror::Error;

/// Entry holding the bearer token.
pub const ACCESS_TOKEN: &str = "accessToken";

/// Entry holding the signed-in user as JSON.
pub const ACTIVE_USER: &str = "activeUser";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to access credential {key}: {reason}")]
    Access { key: String, reason: String },
}

/// A secure key-value store for session credentials.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored value, or `None` if the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError>;

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError>;

    /// Removes the key. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), CredentialError>;
}

/// In-process credential store for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: DashMap<String, String>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        Ok(self.values.get(key).map(|value| value.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CredentialError> {
        self.values.remove(key);
        Ok(())
    }
}
