//! Configuration loading and provider descriptors.
//!
//! Settings are stored in the user's config directory as JSON. Secret values
//! may be given as `${NAME}` placeholders resolved from the environment or the
//! secret vault.

mod descriptor;
pub mod placeholders;
mod settings;

pub use descriptor::{ConsumerBlock, EnterpriseBlock, ProviderDescriptor};
pub use settings::{HttpSettings, Settings, CONFIG_FILE};
