//! Connection resolver — turns a value-or-reference credential into the
//! connection string it denotes.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use tablewright_core::ValueOrValueFrom;
use tablewright_store::{ObjectKey, ResourceStore, StoreError};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("value and valueFrom cannot both be empty")]
    MissingCredential,

    #[error("secret {name} not found")]
    SecretNotFound { name: String },

    #[error("secret {name} has no key {key}")]
    SecretKeyMissing { name: String, key: String },

    #[error("key {key} of secret {name} is not valid UTF-8")]
    InvalidEncoding { name: String, key: String },

    #[error("failed to read connection secret: {0}")]
    SecretAccess(#[source] StoreError),
}

impl ConnectionError {
    /// Misconfigurations that no amount of waiting will fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ConnectionError::MissingCredential | ConnectionError::InvalidEncoding { .. }
        )
    }

    /// The credential may resolve later, once its Secret shows up or is
    /// filled in.
    pub fn is_transient_absence(&self) -> bool {
        matches!(
            self,
            ConnectionError::SecretNotFound { .. } | ConnectionError::SecretKeyMissing { .. }
        )
    }
}

pub struct ConnectionResolver {
    store: Arc<dyn ResourceStore>,
}

impl ConnectionResolver {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Resolve `credential` against Secrets in `namespace`.
    ///
    /// A non-empty inline value always wins over a reference.
    pub async fn resolve(
        &self,
        namespace: &str,
        credential: &ValueOrValueFrom,
    ) -> Result<String, ConnectionError> {
        if !credential.value.is_empty() {
            return Ok(credential.value.clone());
        }

        let Some(secret_ref) = credential.secret_key_ref() else {
            return Err(ConnectionError::MissingCredential);
        };

        let key = ObjectKey::new(namespace, &secret_ref.name);
        debug!(secret = %key, key = %secret_ref.key, "reading connection secret");

        let secret = self
            .store
            .get_secret(&key)
            .await
            .map_err(ConnectionError::SecretAccess)?
            .ok_or_else(|| ConnectionError::SecretNotFound {
                name: secret_ref.name.clone(),
            })?;

        if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(&secret_ref.key)) {
            return String::from_utf8(bytes.0.clone()).map_err(|_| {
                ConnectionError::InvalidEncoding {
                    name: secret_ref.name.clone(),
                    key: secret_ref.key.clone(),
                }
            });
        }

        if let Some(value) = secret
            .string_data
            .as_ref()
            .and_then(|d| d.get(&secret_ref.key))
        {
            return Ok(value.clone());
        }

        Err(ConnectionError::SecretKeyMissing {
            name: secret_ref.name.clone(),
            key: secret_ref.key.clone(),
        })
    }
}
