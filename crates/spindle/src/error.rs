//! Event loop error types.

/// Errors surfaced from event loop construction.
///
/// Everything past construction is infallible by contract: submissions to a
/// terminated loop are dropped (with a log record), and callback failures are
/// contained at the dispatcher boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The loop thread or its backend could not be brought up.
    #[error("event loop backend failed to initialize: {0}")]
    BackendInit(#[from] std::io::Error),
}
