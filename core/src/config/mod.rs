//! Orchestrator configuration
//!
//! Layered the usual way:
//! 1. Defaults (from code)
//! 2. Config file (twintrack.toml)
//! 3. Environment variables (TWINTRACK_* prefix, `__` between nested keys)
//!
//! # Example
//!
//! ```no_run
//! use twintrack_core::config::ConfigLoader;
//!
//! let config = ConfigLoader::load_default().expect("Failed to load config");
//!
//! let config = ConfigLoader::new()
//!     .with_file("./my-config.toml")
//!     .load()
//!     .expect("Failed to load config");
//! ```

pub mod error;
pub mod loader;
pub mod validator;

pub use error::{ConfigError, Result, SchemaViolation};
pub use loader::{ConcurrencyConfig, ConfigLoader, OrchestratorConfig, StoreConfig, TimeoutConfig};
pub use validator::SchemaValidator;
