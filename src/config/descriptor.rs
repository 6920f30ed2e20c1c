//! Raw provider descriptors as they appear in configuration documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::placeholders::{resolve_document, resolve_env};
use crate::domain::{ConfigError, ProviderConfig, ProviderKind};
use crate::storage::SecretVault;

/// Consumer block. `secret` and `token` may be JSON strings or inline objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerBlock {
    #[serde(default)]
    pub secret: Value,
    #[serde(default)]
    pub token: Value,
}

/// Enterprise block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterpriseBlock {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
}

/// Provider selection plus per-kind parameter blocks.
///
/// ```json
/// {"provider": "enterprise", "enterprise": {"tenant_id": "...", "app_id": "...", "app_secret": "${EXCHANGE_CLIENT_SECRET}"}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ConsumerBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise: Option<EnterpriseBlock>,
}

impl ProviderDescriptor {
    /// Declared kind; consumer when absent.
    pub fn kind(&self) -> ProviderKind {
        self.provider.unwrap_or(ProviderKind::Consumer)
    }

    /// Builds the validated configuration for the declared kind, resolving
    /// placeholders from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the block for the declared kind is missing,
    /// a field is empty or a placeholder cannot be resolved.
    pub fn into_config(self) -> Result<ProviderConfig, ConfigError> {
        let kind = self.kind();
        match kind {
            ProviderKind::Consumer => {
                let block = self.consumer.ok_or_else(|| missing_block(kind))?;
                ProviderConfig::consumer(
                    resolve_env(&document_text(&block.secret))?,
                    resolve_env(&document_text(&block.token))?,
                )
            }
            ProviderKind::Enterprise => {
                let block = self.enterprise.ok_or_else(|| missing_block(kind))?;
                ProviderConfig::enterprise(
                    resolve_env(&block.tenant_id)?,
                    resolve_env(&block.app_id)?,
                    resolve_env(&block.app_secret)?,
                )
            }
        }
    }

    /// Like [`into_config`](Self::into_config), but placeholders missing from
    /// the environment are looked up in `vault`.
    pub async fn resolve(self, vault: &dyn SecretVault) -> Result<ProviderConfig, ConfigError> {
        let document = serde_json::to_value(&self)
            .map_err(|e| ConfigError::new(format!("invalid provider descriptor: {e}")))?;
        let document = resolve_document(document, Some(vault)).await?;
        let resolved: Self = serde_json::from_value(document)
            .map_err(|e| ConfigError::new(format!("invalid provider descriptor: {e}")))?;
        resolved.into_config()
    }
}

fn missing_block(kind: ProviderKind) -> ConfigError {
    ConfigError::new(format!("missing `{kind}` configuration block"))
}

/// Strings are taken as-is; inline objects are re-encoded as JSON text.
fn document_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
