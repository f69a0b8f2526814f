//! # strata-core
//!
//! Core types for the strata migration engine. This crate has no engine
//! dependencies and provides the foundation the other crates build on.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy and result alias
//! - [`settings`] - Engine settings with TOML loading
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;

// Re-export the most commonly used types at the crate root.
pub use error::{StrataError, StrataResult};
pub use settings::Settings;
