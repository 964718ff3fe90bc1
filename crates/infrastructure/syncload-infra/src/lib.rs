pub mod session;

// Re-exports for convenience
pub use session::{ProcessSession, SessionError, SessionRunner};
