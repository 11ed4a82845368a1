//! # veil-settings
//!
//! Configuration for the veil relay, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`VeilSettings::default()`]
//! 2. **User file**: `~/.veil/settings.json` or an explicit path
//! 3. **Environment variables**: `VEIL_*` overrides (highest priority)
//!
//! Settings are loaded once by the binary and passed down by value; there is
//! no process-wide singleton.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
