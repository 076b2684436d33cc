//! Layered configuration.
//!
//! Settings are merged field by field from, lowest priority first:
//! 1. **Defaults** - built in
//! 2. **Project** - `./consulator.yaml`
//! 3. **User** - `<config dir>/consulator/config.yaml`
//! 4. **Environment** - `CONSULATOR_*` variables
//!
//! Command-line flags are applied on top by the binary.
//!
//! ## Environment Variables
//! - `CONSULATOR_CONFIG_PATH` - Explicit config file (replaces project and user files)
//! - `CONSULATOR_PROJECT_DIR` - Directory holding `consulator.yaml` (default: `.`)
//! - `CONSULATOR_USER_DIR` - User config directory
//! - `CONSULATOR_PREFIX`, `CONSULATOR_GLUE`, `CONSULATOR_CONCURRENCY` - Setting overrides
//!
//! The Consul connection itself is configured with the standard
//! `CONSUL_HTTP_*` variables, see [`crate::sync::consul`].

mod loader;
mod merge;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, ConfigTier, PROJECT_FILE};
pub use merge::{deep_merge, deep_merge_all};
pub use types::Settings;
