//! Enterprise credential management.
//!
//! - [`token_cache`] - the serializable token cache and its change flag
//! - [`device_code`] - the RFC 8628 device authorization grant
//! - [`credentials`] - [`CredentialManager`], which combines the two with
//!   silent refresh

pub mod credentials;
pub mod device_code;
pub mod token_cache;

pub use credentials::{AuthPhase, CredentialManager, Credentials, DEFAULT_AUTHORITY, GRAPH_SCOPES};
pub use device_code::{ConsolePrompt, DeviceCode, DeviceCodeConfig, DeviceCodeFlow, DevicePrompt};
pub use token_cache::{CachedAccount, TokenCache, TokenCacheError};
