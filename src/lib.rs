pub mod config;
pub mod core;

// Re-export commonly used items for convenience
pub use crate::config::{AppConfig, ConfigError, CredentialSource};
pub use crate::core::*;
