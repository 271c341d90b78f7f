//! Exit code constants for the pipeline-runner CLI.

/// Exit code constants
pub mod codes {
    /// Success - the run completed (including all-skipped runs)
    pub const SUCCESS: i32 = 0;

    /// The run terminated in the `failed` state
    pub const RUN_FAILED: i32 = 1;

    /// Configuration error - invalid CLI arguments or pipeline declaration
    pub const CONFIG: i32 = 2;
}
