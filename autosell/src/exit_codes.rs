//! Stable exit codes for the `autosell` CLI.

/// Command succeeded (for `simulate`: the run finished successfully).
pub const OK: i32 = 0;
/// Invalid input, configuration or data files.
pub const INVALID: i32 = 1;
/// `autosell simulate` ran, but the run failed or was aborted.
pub const RUN_FAILED: i32 = 2;
