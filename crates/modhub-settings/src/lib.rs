//! # modhub-settings
//!
//! Layered configuration for the module hub.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HubSettings::default()`]
//! 2. **Settings file**: `./modhub.json` or `--config <path>` (deep-merged over defaults)
//! 3. **Environment variables**: `MODHUB_*` overrides (highest priority)
//!
//! There is no global instance. The binary loads settings once and passes
//! them down.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, load_settings_with,
    settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = HubSettings::default();
        assert_eq!(settings_path().to_str(), Some("modhub.json"));
    }
}
