//! Credential lifecycle for the enterprise back end.
//!
//! [`CredentialManager`] owns the token cache for one registered application.
//! Each request for credentials walks the same state machine per
//! (account, tenant):
//!
//! `NoCache -> SilentRefreshAttempted -> {Authenticated | DeviceFlowPending} -> Authenticated`
//!
//! The cache is loaded from its store at the start of every request and
//! written back at most once at the end, and only if its change flag is set.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{Duration as ChronoDuration, Utc};

use super::device_code::{
    authorization_error, parse_token_grant, DeviceCodeConfig, DeviceCodeFlow, DevicePrompt,
    TokenGrant,
};
use super::token_cache::{CachedAccount, TokenCache};
use crate::domain::EnterpriseParams;
use crate::providers::executor::{ApiRequest, ApiResponse, Executor};
use crate::providers::{ProviderError, Result};
use crate::storage::TokenCacheStore;

/// Default authorization server.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Delegated permissions the enterprise adapter needs.
pub const GRAPH_SCOPES: [&str; 4] = [
    "https://graph.microsoft.com/Mail.ReadWrite",
    "https://graph.microsoft.com/Mail.Send",
    "https://graph.microsoft.com/Calendars.ReadWrite",
    "https://graph.microsoft.com/User.Read",
];

const GRAPH_RESOURCE: &str = "https://graph.microsoft.com/";
const OFFLINE_ACCESS: &str = "offline_access";

// Cached access tokens closer than this to expiry are refreshed instead.
const EXPIRY_SKEW_SECS: i64 = 300;

/// Position in the per-account credential state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    NoCache,
    SilentRefreshAttempted,
    DeviceFlowPending,
    Authenticated,
}

/// An access token and what came with it.
///
/// Request fresh credentials for every logical operation; the manager is
/// the cache.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    /// Declared lifetime in seconds.
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub scopes: Vec<String>,
}

impl Credentials {
    /// Whether every `required` scope was granted.
    ///
    /// The Graph resource prefix and letter case are ignored.
    pub fn has_scopes(&self, required: &[&str]) -> bool {
        let granted: Vec<String> = self.scopes.iter().map(|s| scope_key(s)).collect();
        required.iter().all(|r| granted.contains(&scope_key(r)))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("scopes", &self.scopes)
            .finish()
    }
}

fn scope_key(scope: &str) -> String {
    scope
        .trim()
        .trim_start_matches(GRAPH_RESOURCE)
        .to_ascii_lowercase()
}

/// Obtains, caches and refreshes access tokens for the enterprise back end.
pub struct CredentialManager {
    params: EnterpriseParams,
    authority: String,
    executor: Executor,
    store: Arc<dyn TokenCacheStore>,
    prompt: Arc<dyn DevicePrompt>,
    phases: Mutex<HashMap<String, AuthPhase>>,
    // Serializes acquisitions so one process never runs two device flows.
    gate: tokio::sync::Mutex<()>,
}

impl CredentialManager {
    pub fn new(
        params: EnterpriseParams,
        executor: Executor,
        store: Arc<dyn TokenCacheStore>,
        prompt: Arc<dyn DevicePrompt>,
    ) -> Self {
        Self {
            params,
            authority: DEFAULT_AUTHORITY.to_string(),
            executor,
            store,
            prompt,
            phases: Mutex::new(HashMap::new()),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Points the manager at another authorization server.
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into().trim_end_matches('/').to_string();
        self
    }

    pub fn params(&self) -> &EnterpriseParams {
        &self.params
    }

    /// Last known state-machine position for `account`.
    pub fn phase(&self, account: &str) -> AuthPhase {
        self.phases
            .lock()
            .ok()
            .and_then(|phases| phases.get(&account.to_ascii_lowercase()).copied())
            .unwrap_or(AuthPhase::NoCache)
    }

    /// Returns credentials for `account`, silently when possible and through
    /// the device flow otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Authentication`] if `account` is empty
    /// (before any network call) or if both silent acquisition and the
    /// device flow fail; the server's error description is attached.
    pub async fn acquire(&self, account: &str) -> Result<Credentials> {
        let account = self.require_account(account)?;
        let _gate = self.gate.lock().await;

        let mut cache = self.load_cache().await;
        let outcome = self.acquire_with(&mut cache, account).await;
        self.persist(&mut cache).await;

        if outcome.is_ok() {
            self.set_phase(account, AuthPhase::Authenticated);
        }
        outcome
    }

    /// Silent acquisition only.
    ///
    /// Returns `None` when the cache holds no entry for `account`.
    pub async fn refresh(&self, account: &str) -> Result<Option<Credentials>> {
        let account = self.require_account(account)?;
        let _gate = self.gate.lock().await;

        let mut cache = self.load_cache().await;
        let Some(entry) = cache.find(account, self.params.tenant_id()).cloned() else {
            tracing::debug!(account, "no cached account to refresh");
            self.set_phase(account, AuthPhase::NoCache);
            return Ok(None);
        };

        self.set_phase(account, AuthPhase::SilentRefreshAttempted);
        let outcome = self.acquire_silent(&mut cache, &entry).await;
        self.persist(&mut cache).await;

        let credentials = outcome?;
        self.set_phase(account, AuthPhase::Authenticated);
        Ok(Some(credentials))
    }

    fn require_account<'a>(&self, account: &'a str) -> Result<&'a str> {
        let account = account.trim();
        if account.is_empty() || !self.params.is_complete() {
            return Err(ProviderError::Authentication(
                "All authentication parameters (account, tenant id, app id, app secret) are required"
                    .to_string(),
            ));
        }
        Ok(account)
    }

    async fn acquire_with(&self, cache: &mut TokenCache, account: &str) -> Result<Credentials> {
        match cache.find(account, self.params.tenant_id()).cloned() {
            Some(entry) => {
                self.set_phase(account, AuthPhase::SilentRefreshAttempted);
                match self.acquire_silent(cache, &entry).await {
                    Ok(credentials) => return Ok(credentials),
                    Err(e) => {
                        tracing::warn!(account, error = %e, "silent token acquisition failed");
                    }
                }
            }
            None => {
                self.set_phase(account, AuthPhase::NoCache);
                tracing::debug!(account, "no cached account");
            }
        }

        self.set_phase(account, AuthPhase::DeviceFlowPending);
        self.acquire_interactive(cache, account).await
    }

    async fn acquire_silent(
        &self,
        cache: &mut TokenCache,
        entry: &CachedAccount,
    ) -> Result<Credentials> {
        if let Some(remaining) = entry.remaining_lifetime(Utc::now(), EXPIRY_SKEW_SECS) {
            if let Some(access_token) = entry.access_token.clone() {
                tracing::debug!(account = %entry.username, "using cached access token");
                return Ok(Credentials {
                    access_token,
                    expires_in: remaining,
                    refresh_token: entry.refresh_token.clone(),
                    scopes: entry.scopes.clone(),
                });
            }
        }

        let refresh_token = entry.refresh_token.as_deref().ok_or_else(|| {
            ProviderError::Authentication("cached account has no refresh token".to_string())
        })?;

        let scope = self.requested_scopes().join(" ");
        let request = ApiRequest::post_form(
            self.endpoint("token"),
            &[
                ("grant_type", "refresh_token"),
                ("client_id", self.params.app_id()),
                ("client_secret", self.params.app_secret()),
                ("refresh_token", refresh_token),
                ("scope", scope.as_str()),
            ],
        );

        let response = match self.executor.execute(&request).await {
            Ok(response) => response,
            Err(ProviderError::Api { status, body }) => {
                return Err(authorization_error(
                    "token refresh failed",
                    &ApiResponse::new(status, body),
                ));
            }
            Err(e) => return Err(e),
        };
        let grant = parse_token_grant(&response)?;

        tracing::debug!(account = %entry.username, "access token refreshed");
        Ok(self.record_grant(cache, &entry.username, grant, entry.refresh_token.clone()))
    }

    async fn acquire_interactive(
        &self,
        cache: &mut TokenCache,
        account: &str,
    ) -> Result<Credentials> {
        let flow = DeviceCodeFlow::new(
            DeviceCodeConfig {
                client_id: self.params.app_id().to_string(),
                client_secret: Some(self.params.app_secret().to_string()),
                device_auth_url: self.endpoint("devicecode"),
                token_url: self.endpoint("token"),
                scopes: self.requested_scopes(),
            },
            self.executor.clone(),
        );

        let code = flow.request_device_code().await?;
        self.prompt.present(&code);
        let grant = flow.poll_for_token(&code).await?;

        tracing::info!(account, "device authorization completed");
        Ok(self.record_grant(cache, account, grant, None))
    }

    fn record_grant(
        &self,
        cache: &mut TokenCache,
        account: &str,
        grant: TokenGrant,
        previous_refresh: Option<String>,
    ) -> Credentials {
        let scopes = if grant.scopes.is_empty() {
            GRAPH_SCOPES.iter().map(|s| s.to_string()).collect()
        } else {
            grant.scopes
        };
        let refresh_token = grant.refresh_token.or(previous_refresh);
        let lifetime = i64::try_from(grant.expires_in).unwrap_or(i64::MAX);

        cache.upsert(CachedAccount {
            username: account.to_string(),
            tenant_id: self.params.tenant_id().to_string(),
            client_id: self.params.app_id().to_string(),
            access_token: Some(grant.access_token.clone()),
            expires_at: Utc::now().checked_add_signed(ChronoDuration::seconds(lifetime)),
            refresh_token: refresh_token.clone(),
            scopes: scopes.clone(),
        });

        Credentials {
            access_token: grant.access_token,
            expires_in: grant.expires_in,
            refresh_token,
            scopes,
        }
    }

    async fn load_cache(&self) -> TokenCache {
        let bytes = match self.store.load().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return TokenCache::new(),
            Err(e) => {
                tracing::warn!(error = %e, "could not read token cache, starting cold");
                return TokenCache::new();
            }
        };
        TokenCache::deserialize(&bytes).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "discarding unreadable token cache");
            TokenCache::new()
        })
    }

    async fn persist(&self, cache: &mut TokenCache) {
        if !cache.has_state_changed() {
            return;
        }
        let written = match cache.serialize() {
            Ok(bytes) => self.store.save(&bytes).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match written {
            Ok(()) => cache.mark_persisted(),
            Err(error) => tracing::error!(error = %error, "failed to persist token cache"),
        }
    }

    fn requested_scopes(&self) -> Vec<String> {
        GRAPH_SCOPES
            .iter()
            .copied()
            .chain(std::iter::once(OFFLINE_ACCESS))
            .map(String::from)
            .collect()
    }

    fn endpoint(&self, name: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/{}",
            self.authority,
            self.params.tenant_id(),
            name
        )
    }

    fn set_phase(&self, account: &str, phase: AuthPhase) {
        tracing::debug!(account, ?phase, "credential state");
        if let Ok(mut phases) = self.phases.lock() {
            phases.insert(account.to_ascii_lowercase(), phase);
        }
    }
}
