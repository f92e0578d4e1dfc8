pub mod config;
pub mod error;
pub mod types;

pub use config::QuiesceConfig;
pub use error::{ActuationError, ConfigError, ProviderError};
pub use types::*;
