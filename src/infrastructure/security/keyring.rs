use crate::domain::error::{AppError, Result};
use keyring::Entry;

const KEYCHAIN_USER: &str = "sqlroute";

/// OS keychain access for database passwords.
///
/// Entries are stored as `(service = key name, user = "sqlroute")`.
pub struct KeyringManager;

impl KeyringManager {
    pub fn set_secret(key: &str, secret: &str) -> Result<()> {
        let entry = Self::entry(key)?;
        entry
            .set_password(secret)
            .map_err(|e| AppError::ConfigError(format!("Failed to set password: {}", e)))
    }

    pub fn get_secret(key: &str) -> Result<String> {
        let entry = Self::entry(key)?;
        entry.get_password().map_err(|e| {
            AppError::ConfigError(format!(
                "Failed to retrieve password from keychain: {}",
                e
            ))
        })
    }

    pub fn delete_secret(key: &str) -> Result<()> {
        let entry = Self::entry(key)?;
        entry
            .delete_credential()
            .map_err(|e| AppError::ConfigError(format!("Failed to delete password: {}", e)))
    }

    fn entry(key: &str) -> Result<Entry> {
        Entry::new(key, KEYCHAIN_USER)
            .map_err(|e| AppError::ConfigError(format!("Failed to access keychain: {}", e)))
    }
}

/// Resolve a password reference from configuration.
///
/// - `env:VAR` reads an environment variable
/// - `keychain:key` reads the OS keychain
/// - `plain:secret` and anything without a prefix is the password itself
pub fn resolve_password(password_ref: &str) -> Result<String> {
    if let Some(env_key) = password_ref.strip_prefix("env:") {
        std::env::var(env_key).map_err(|_| {
            AppError::ConfigError(format!(
                "Environment variable '{}' not found for password",
                env_key
            ))
        })
    } else if let Some(key_name) = password_ref.strip_prefix("keychain:") {
        KeyringManager::get_secret(key_name)
    } else if let Some(secret) = password_ref.strip_prefix("plain:") {
        Ok(secret.to_string())
    } else {
        Ok(password_ref.to_string())
    }
}
