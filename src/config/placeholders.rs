//! `${NAME}` secret placeholders in configuration values.
//!
//! A value that is exactly `${NAME}` is replaced by the environment variable
//! `NAME`, or failing that by the secret stored under `NAME` in a
//! [`SecretVault`]. Anything else is taken literally.

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::domain::ConfigError;
use crate::storage::SecretVault;

/// Returns `NAME` if `value` is a `${NAME}` placeholder.
pub fn placeholder_name(value: &str) -> Option<&str> {
    let name = value.trim().strip_prefix("${")?.strip_suffix('}')?.trim();
    (!name.is_empty()).then_some(name)
}

fn from_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn unresolved(name: &str) -> ConfigError {
    ConfigError::new(format!("unresolved secret placeholder ${{{name}}}"))
}

/// Resolves a placeholder from the environment only.
///
/// # Errors
///
/// Returns [`ConfigError`] if `value` is a placeholder whose variable is unset.
pub fn resolve_env(value: &str) -> Result<String, ConfigError> {
    match placeholder_name(value) {
        Some(name) => from_env(name).ok_or_else(|| unresolved(name)),
        None => Ok(value.to_string()),
    }
}

/// Resolves a placeholder from the environment, then from `vault`.
///
/// # Errors
///
/// Returns [`ConfigError`] if neither source has the secret or the vault
/// cannot be read.
pub async fn resolve_value(value: &str, vault: Option<&dyn SecretVault>) -> Result<String, ConfigError> {
    let Some(name) = placeholder_name(value) else {
        return Ok(value.to_string());
    };
    if let Some(found) = from_env(name) {
        return Ok(found);
    }
    if let Some(vault) = vault {
        match vault.retrieve(name).await {
            Ok(Some(secret)) => return Ok(secret),
            Ok(None) => {}
            Err(e) => {
                return Err(ConfigError::new(format!(
                    "could not read secret {name} from vault: {e}"
                )))
            }
        }
    }
    Err(unresolved(name))
}

/// Resolves every string placeholder in a JSON document, recursing through
/// objects and arrays.
pub fn resolve_document<'a>(
    document: Value,
    vault: Option<&'a dyn SecretVault>,
) -> BoxFuture<'a, Result<Value, ConfigError>> {
    Box::pin(async move {
        match document {
            Value::String(text) => Ok(Value::String(resolve_value(&text, vault).await?)),
            Value::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(resolve_document(item, vault).await?);
                }
                Ok(Value::Array(resolved))
            }
            Value::Object(fields) => {
                let mut resolved = Map::with_capacity(fields.len());
                for (key, item) in fields {
                    resolved.insert(key, resolve_document(item, vault).await?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other),
        }
    })
}
