//! Configuration loading and env substitution.
//!
//! Config files: `timetable.toml`, `timetable.yaml`, or `timetable.json`
//! Searched in `./` then `~/.config/timetable/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file, followed by `TIMETABLE_*` environment overrides.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{DatabaseConfig, MetricsConfig, ServerConfig, TimetableConfig, UnmatchedRoutes},
};
