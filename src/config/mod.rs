//! Configuration module — settings structs, TOML persistence, app paths.
//!
//! [`AppConfig`] is the single source of configuration for the pipeline:
//! provider endpoints and models ([`ApiConfig`]) plus microphone selection
//! ([`AudioConfig`]).  [`AppPaths`] resolves the platform directories for the
//! settings file and the two single-slot audio working files.

pub mod paths;
pub mod settings;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use paths::AppPaths;
pub use settings::{ApiConfig, AppConfig, AudioConfig};
