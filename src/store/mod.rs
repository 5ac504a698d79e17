//! Persistence for automove rules and installed credentials.

pub mod json_backend;
pub mod traits;

pub use json_backend::JsonSettingsStore;
pub use traits::{SettingsStore, StoredCredentials, check_conflict};
