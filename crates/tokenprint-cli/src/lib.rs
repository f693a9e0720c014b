//! tokenprint CLI — command implementations behind the `tokenprint` binary.

pub mod commands;

pub use commands::{
    load_run_config, render_plan_files, run_manifest, validate_config_file, ManifestRun, EXIT_ABORTED,
    EXIT_FAILURE,
};
