use thiserror::Error;

use crate::{
    domain::error::DomainError,
    infra::{crypto::CryptoError, error::InfraError, storage::StorageError},
};

/// Why a container could not be attached.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("persist key for container `{container}` must not be empty")]
    EmptyKey { container: String },
    #[error("persistence requires a running tokio runtime")]
    NoRuntime,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Why stored state was not restored into a container.
#[derive(Debug, Error)]
pub enum HydrateError {
    #[error("reading persisted state failed: {0}")]
    Storage(#[from] StorageError),
    #[error("decrypting persisted state failed: {0}")]
    Crypto(#[from] CryptoError),
    #[error("persisted state is not valid json: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("persisted state must be a json object, found {found}")]
    NotAnObject { found: &'static str },
}

impl HydrateError {
    /// True when the stored payload was tampered with or sealed under another secret.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Crypto(err) if err.is_authentication_failure())
    }
}

/// Why one write attempt was abandoned.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("serializing state failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("encrypting state failed: {0}")]
    Encrypt(#[from] CryptoError),
    #[error("writing state failed: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cipher_rejections_count_as_authentication_failures() {
        assert!(HydrateError::Crypto(CryptoError::Authentication).is_authentication_failure());
        assert!(!HydrateError::Crypto(CryptoError::Truncated { len: 3 }).is_authentication_failure());
        assert!(!HydrateError::NotAnObject { found: "array" }.is_authentication_failure());
    }

    #[test]
    fn storage_errors_surface_through_app_error() {
        let err = AppError::from(StorageError::Unavailable("offline".into()));
        assert_eq!(err.to_string(), "storage unavailable: offline");
    }
}
