//! mailbridge - one mail and calendar surface over unrelated back ends
//!
//! This crate lets a workflow treat a consumer mail API and an enterprise
//! directory-backed mail API as interchangeable sources of email and calendar
//! data. It provides the provider abstraction, OAuth credential handling for
//! the enterprise back end, a resilient HTTP executor, and normalization into
//! one canonical model.

pub mod auth;
pub mod config;
pub mod domain;
pub mod factory;
pub mod normalize;
pub mod providers;
pub mod storage;

pub use domain::{CalendarEvent, CanonicalEmail, InviteRequest, ProviderConfig, ProviderKind};
pub use factory::ProviderFactory;
pub use providers::{MailProvider, ProviderError, Result};
