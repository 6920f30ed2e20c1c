//! Canonical data model.
//!
//! Provider-agnostic email and calendar records, identifiers, and the
//! validated provider configuration shared by the rest of the crate.

mod account;
mod email;
mod event;
mod types;

pub use account::{
    ConfigError, ConsumerParams, EnterpriseParams, ProviderConfig, ProviderKind, ENV_CLIENT_ID,
    ENV_CLIENT_SECRET, ENV_TENANT_ID,
};
pub use email::{is_valid_address, Address, CanonicalEmail, EmailFields, NO_BODY};
pub use event::{
    parse_wall_clock, CalendarEvent, EventTiming, InviteError, InviteRequest, ValidatedInvite,
    ZonedDateTime,
};
pub use types::{EmailId, ThreadId};
