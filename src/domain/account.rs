//! Provider kinds and their validated configurations.
//!
//! A [`ProviderConfig`] can only be built through constructors that check
//! every required field, so an adapter never sees an incomplete one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variables read by [`EnterpriseParams::from_env`].
pub const ENV_TENANT_ID: &str = "EXCHANGE_TENANT_ID";
pub const ENV_CLIENT_ID: &str = "EXCHANGE_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "EXCHANGE_CLIENT_SECRET";

/// A configuration was missing a required field or named an unknown kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("configuration error: {0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Which back end a provider talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Consumer mail API (Gmail).
    #[serde(alias = "gmail")]
    Consumer,
    /// Enterprise directory-backed mail API (Exchange via Microsoft Graph).
    #[serde(alias = "exchange")]
    Enterprise,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consumer => "consumer",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "consumer" | "gmail" => Ok(Self::Consumer),
            "enterprise" | "exchange" => Ok(Self::Enterprise),
            other => Err(ConfigError::new(format!(
                "unsupported provider kind: {other}"
            ))),
        }
    }
}

fn required(block: &str, field: &str, value: impl Into<String>) -> Result<String, ConfigError> {
    let value = value.into().trim().to_string();
    if value.is_empty() {
        return Err(ConfigError::new(format!(
            "{block} configuration field `{field}` must be non-empty"
        )));
    }
    Ok(value)
}

/// Consumer back end parameters: OAuth client secrets and the user token.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerParams {
    secret: String,
    token: String,
}

impl ConsumerParams {
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either value is empty after trimming.
    pub fn new(secret: impl Into<String>, token: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            secret: required("consumer", "secret", secret)?,
            token: required("consumer", "token", token)?,
        })
    }

    /// Client-secrets document.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Authorized-user token document.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_complete(&self) -> bool {
        !self.secret.is_empty() && !self.token.is_empty()
    }
}

impl fmt::Debug for ConsumerParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerParams")
            .field("secret", &"<redacted>")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Enterprise back end parameters: directory tenant and registered application.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct EnterpriseParams {
    tenant_id: String,
    app_id: String,
    app_secret: String,
}

impl EnterpriseParams {
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first empty field.
    pub fn new(
        tenant_id: impl Into<String>,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            tenant_id: required("enterprise", "tenant_id", tenant_id)?,
            app_id: required("enterprise", "app_id", app_id)?,
            app_secret: required("enterprise", "app_secret", app_secret)?,
        })
    }

    /// Reads the parameters from `EXCHANGE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] listing every variable that is unset or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let tenant = read(ENV_TENANT_ID);
        let client = read(ENV_CLIENT_ID);
        let secret = read(ENV_CLIENT_SECRET);

        match (tenant, client, secret) {
            (Some(tenant), Some(client), Some(secret)) => Self::new(tenant, client, secret),
            (tenant, client, secret) => {
                let missing: Vec<&str> = [
                    (tenant.is_none(), ENV_TENANT_ID),
                    (client.is_none(), ENV_CLIENT_ID),
                    (secret.is_none(), ENV_CLIENT_SECRET),
                ]
                .into_iter()
                .filter_map(|(absent, name)| absent.then_some(name))
                .collect();
                Err(ConfigError::new(format!(
                    "Missing required environment variables: {}",
                    missing.join(", ")
                )))
            }
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn app_secret(&self) -> &str {
        &self.app_secret
    }

    pub fn is_complete(&self) -> bool {
        !self.tenant_id.is_empty() && !self.app_id.is_empty() && !self.app_secret.is_empty()
    }
}

impl fmt::Debug for EnterpriseParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnterpriseParams")
            .field("tenant_id", &self.tenant_id)
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

/// Provider kind plus exactly the parameter set that kind needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    Consumer(ConsumerParams),
    Enterprise(EnterpriseParams),
}

impl ProviderConfig {
    /// Builds a validated consumer configuration.
    pub fn consumer(
        secret: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        ConsumerParams::new(secret, token).map(Self::Consumer)
    }

    /// Builds a validated enterprise configuration.
    pub fn enterprise(
        tenant_id: impl Into<String>,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        EnterpriseParams::new(tenant_id, app_id, app_secret).map(Self::Enterprise)
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Consumer(_) => ProviderKind::Consumer,
            Self::Enterprise(_) => ProviderKind::Enterprise,
        }
    }

    /// Local completeness check; never touches the network.
    pub fn is_complete(&self) -> bool {
        match self {
            Self::Consumer(params) => params.is_complete(),
            Self::Enterprise(params) => params.is_complete(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_names_and_aliases() {
        assert_eq!("consumer".parse::<ProviderKind>().unwrap(), ProviderKind::Consumer);
        assert_eq!("Gmail".parse::<ProviderKind>().unwrap(), ProviderKind::Consumer);
        assert_eq!(" exchange ".parse::<ProviderKind>().unwrap(), ProviderKind::Enterprise);
        assert!("imap".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn kind_serde_accepts_aliases() {
        let kind: ProviderKind = serde_json::from_str("\"exchange\"").unwrap();
        assert_eq!(kind, ProviderKind::Enterprise);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"enterprise\"");
    }

    #[test]
    fn enterprise_params_trim_and_require_values() {
        let params = EnterpriseParams::new("  tenant ", "app", "secret").unwrap();
        assert_eq!(params.tenant_id(), "tenant");

        let err = EnterpriseParams::new("tenant", "   ", "secret").unwrap_err();
        assert!(err.to_string().contains("app_id"));
    }

    #[test]
    fn consumer_params_require_both_values() {
        assert!(ConsumerParams::new("{}", "").is_err());
        assert!(ConsumerParams::new("", "{}").is_err());
        assert!(ConsumerParams::new("{}", "{}").unwrap().is_complete());
    }

    #[test]
    fn config_reports_kind() {
        let config = ProviderConfig::enterprise("t", "a", "s").unwrap();
        assert_eq!(config.kind(), ProviderKind::Enterprise);
        assert!(config.is_complete());

        let config = ProviderConfig::consumer("secret", "token").unwrap();
        assert_eq!(config.kind(), ProviderKind::Consumer);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let params = EnterpriseParams::new("tenant", "app", "super-secret").unwrap();
        let rendered = format!("{params:?}");
        assert!(rendered.contains("tenant"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn config_serialization_is_tagged() {
        let config = ProviderConfig::enterprise("t", "a", "s").unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "enterprise");
        assert_eq!(json["tenant_id"], "t");
    }
}
