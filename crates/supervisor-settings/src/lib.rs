//! # supervisor-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SupervisorSettings::default()`]
//! 2. **Settings file**: `~/.supervisor/settings.json`, or the path in
//!    `SUPERVISOR_CONFIG` (deep-merged over defaults)
//! 3. **Environment variables**: `SUPERVISOR_*` overrides (highest priority)
//!
//! ```no_run
//! use supervisor_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("listening on port {}", settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
