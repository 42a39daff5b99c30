//! Utility modules for TaskPulse.
//!
//! # Modules
//!
//! - [`project_name`]: Project-name derivation from working directories

pub mod project_name;

pub use project_name::{derive_project_name, DEFAULT_PROJECT_NAME};
