//! Central configuration constants for runtime limits and defaults.

/// Binary invoked for every synchronization session.
pub const DEFAULT_RSYNC_BINARY: &str = "rsync";

/// Flags passed before the source/target pair.
/// Recursive, links, times, compressed, and prune files gone from the remote.
pub const DEFAULT_RSYNC_FLAGS: &[&str] = &["-rltz", "--delete"];

/// Deadline for a single session, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// URL scheme used to address the synchronization endpoint.
pub const RSYNC_SCHEME: &str = "rsync";

/// Prefix for temporary staging directories.
pub const STAGING_PREFIX: &str = "syncload-";

/// Default number of simulated users.
pub const DEFAULT_USERS: usize = 1;

/// Minimum allowed simulated users.
pub const MIN_USERS: usize = 1;

/// Maximum allowed simulated users.
pub const MAX_USERS: usize = 1024;

/// Default lower bound of the pause between two tasks of one user (ms).
pub const DEFAULT_WAIT_MIN_MS: u64 = 1_000;

/// Default upper bound of the pause between two tasks of one user (ms).
pub const DEFAULT_WAIT_MAX_MS: u64 = 3_000;

/// Bytes of process output kept per session. Output past this is dropped.
pub const MAX_CAPTURED_OUTPUT_BYTES: usize = 1024 * 1024;

/// How long to wait for output pipes to drain after the process is gone.
pub const OUTPUT_DRAIN_GRACE_MS: u64 = 250;

/// Convenience function to clamp a user count into allowed range.
pub fn clamp_users(v: usize) -> usize {
    v.clamp(MIN_USERS, MAX_USERS)
}

/// Default flag set as owned strings.
pub fn default_flags() -> Vec<String> {
    DEFAULT_RSYNC_FLAGS.iter().map(|f| f.to_string()).collect()
}
