//! Layered configuration for the Hub.
//!
//! # Module structure
//!
//! - [`types`]: the root [`HubConfig`] struct
//! - [`logging`]: [`LoggingConfig`], [`LogFormat`], [`LogLevel`]
//! - [`defaults`]: one function per field, referenced by `#[serde(default = "...")]`
//! - [`loader`]: defaults, config-file, and environment-variable precedence
//! - [`validation`]: range/sanity checks run before the Hub binds a port

pub mod defaults;
pub mod loader;
pub mod logging;
pub mod types;
pub mod validation;

pub use loader::load;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use types::HubConfig;
pub use validation::validate;
