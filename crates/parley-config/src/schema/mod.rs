//! Configuration schema types for Parley.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod api;
mod generation;
mod logging;

pub use api::*;
pub use generation::*;
pub use logging::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration for Parley.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub api: ApiConfig,
    pub generation: GenerationConfig,
    pub logging: LoggingConfig,
}
