//! Configuration module
//!
//! Loads and validates controller configuration files: the intersection
//! topology, the default rotation, strategy tuning and emergency windows.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning, LoaderOptions};
pub use schema::*;
pub use validation::{ValidationResult, Validator};
