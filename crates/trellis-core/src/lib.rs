pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{AppConfig, AuditConfig, ModelConfig};
pub use error::{Result, TrellisError};
pub use types::*;
