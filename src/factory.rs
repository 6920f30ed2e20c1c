//! Builds provider adapters from configuration.
//!
//! The factory owns the shared collaborators (HTTP transport, token cache
//! store, device-code prompt and retry policy) and hands them to whichever
//! adapter the configuration selects. Configuration problems are reported as
//! [`ProviderError::Config`] before any collaborator is touched.

use std::sync::Arc;

use crate::auth::{ConsolePrompt, CredentialManager, DevicePrompt};
use crate::config::{ProviderDescriptor, Settings};
use crate::domain::{ProviderConfig, ProviderKind};
use crate::providers::{
    ExchangeProvider, Executor, GmailProvider, HttpTransport, MailProvider, ProviderError,
    ReqwestTransport, Result, RetryPolicy,
};
use crate::storage::{FileTokenStore, SecretVault, TokenCacheStore};

/// Selects and constructs [`MailProvider`] adapters.
pub struct ProviderFactory {
    transport: Arc<dyn HttpTransport>,
    store: Option<Arc<dyn TokenCacheStore>>,
    prompt: Arc<dyn DevicePrompt>,
    policy: RetryPolicy,
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderFactory {
    /// Factory with the reqwest transport, console prompt, default policy and
    /// the per-user token cache file.
    pub fn new() -> Self {
        Self {
            transport: Arc::new(ReqwestTransport::new()),
            store: None,
            prompt: Arc::new(ConsolePrompt),
            policy: RetryPolicy::default(),
        }
    }

    /// Factory configured from persisted settings: retry policy from `http`,
    /// token cache at `token_cache_path` when given.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut factory = Self::new().with_policy(settings.http.to_policy());
        if let Some(path) = &settings.token_cache_path {
            factory = factory.with_token_store(Arc::new(FileTokenStore::new(path.clone())));
        }
        factory
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_token_store(mut self, store: Arc<dyn TokenCacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn DevicePrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// True when `config` is complete and belongs to `kind`. Purely local.
    pub fn validate(kind: ProviderKind, config: &ProviderConfig) -> bool {
        config.kind() == kind && config.is_complete()
    }

    /// True when `descriptor` yields a complete configuration for its kind.
    /// Placeholders are resolved from the environment only.
    pub fn validate_descriptor(descriptor: &ProviderDescriptor) -> bool {
        descriptor.clone().into_config().is_ok()
    }

    /// Builds the adapter for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if `config` is incomplete, belongs to
    /// another kind, or no token cache location is available.
    pub fn create(&self, kind: ProviderKind, config: &ProviderConfig) -> Result<Box<dyn MailProvider>> {
        if config.kind() != kind {
            return Err(ProviderError::Config(format!(
                "{kind} provider cannot be built from a {} configuration",
                config.kind()
            )));
        }
        if !config.is_complete() {
            return Err(ProviderError::Config(format!(
                "incomplete {kind} configuration"
            )));
        }

        let executor = Executor::new(self.transport.clone(), self.policy.clone());
        let provider: Box<dyn MailProvider> = match config {
            ProviderConfig::Consumer(params) => {
                Box::new(GmailProvider::new(params.clone(), executor))
            }
            ProviderConfig::Enterprise(params) => {
                let credentials = CredentialManager::new(
                    params.clone(),
                    executor.clone(),
                    self.token_store()?,
                    self.prompt.clone(),
                );
                Box::new(ExchangeProvider::new(Arc::new(credentials), executor))
            }
        };
        tracing::debug!(kind = %kind, "provider created");
        Ok(provider)
    }

    /// Builds the adapter a descriptor declares, resolving placeholders from
    /// the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] for any descriptor problem.
    pub fn from_descriptor(&self, descriptor: ProviderDescriptor) -> Result<Box<dyn MailProvider>> {
        let kind = descriptor.kind();
        let config = descriptor.into_config()?;
        self.create(kind, &config)
    }

    /// Like [`from_descriptor`](Self::from_descriptor), with placeholders
    /// missing from the environment looked up in `vault`.
    pub async fn from_descriptor_with_vault(
        &self,
        descriptor: ProviderDescriptor,
        vault: &dyn SecretVault,
    ) -> Result<Box<dyn MailProvider>> {
        let kind = descriptor.kind();
        let config = descriptor.resolve(vault).await?;
        self.create(kind, &config)
    }

    fn token_store(&self) -> Result<Arc<dyn TokenCacheStore>> {
        match &self.store {
            Some(store) => Ok(store.clone()),
            None => {
                let store = FileTokenStore::default_location()
                    .map_err(|e| ProviderError::Config(format!("token cache: {e}")))?;
                Ok(Arc::new(store))
            }
        }
    }
}
