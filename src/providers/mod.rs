//! Mail provider implementations.
//!
//! This module contains the provider trait and its two back ends:
//!
//! - [`gmail`] - consumer mail (Gmail API + Google Calendar)
//! - [`exchange`] - enterprise mail (Microsoft Graph)
//! - [`executor`] - the retry, rate-limit and pagination layer both use

pub mod exchange;
pub mod executor;
pub mod gmail;
mod traits;

pub use exchange::ExchangeProvider;
pub use executor::{
    ApiRequest, ApiResponse, Executor, HttpTransport, ReqwestTransport, RetryPolicy,
    TransportFailure,
};
pub use gmail::GmailProvider;
pub use traits::{MailProvider, ProviderError, Result};
