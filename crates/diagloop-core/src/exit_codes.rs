//! Process exit codes for the `diagloop` binary.

/// Console clean and tests passed (or skipped).
pub const OK: i32 = 0;
/// Any failure: unreachable endpoint, protocol error, console errors, failing or missing tests.
pub const FAILURE: i32 = 1;
