use thiserror::Error;

/// Error taxonomy for the execution engine.
///
/// Most variants surface at the point of synchronous observation: on
/// `Future::await_execution`, on `Engine::check_exceptions`, or as a logged
/// warning. `Shutdown` is internal signalling and should only reach a caller
/// that races a shutdown.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Raised by queue operations after the queue has been shut down.
    #[error("queue has been shut down")]
    Shutdown,

    /// An event was submitted, or its retry budget exhausted and it was
    /// dequeued again, after it had already finished executing.
    #[error("event was already executed")]
    AlreadyExecuted,

    /// `await_data` was called with coordinates the event's declared
    /// iterator provably cannot produce.
    #[error("coordinates {0} are outside the event's declared iterator")]
    InvalidCoordinates(String),

    /// An exception raised by user-provided device code, captured with its
    /// display message (subject to the event's retry budget before this is
    /// surfaced).
    #[error("device error: {0}")]
    Device(String),

    /// A bounded wait (`await_execution`, `await_data`) expired.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// A device id or data coordinate lookup failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// More than one exception accumulated in the engine's exception log
    /// since the last `check_exceptions` call.
    #[error("{} exceptions occurred: {}", .0.len(), join_messages(.0))]
    Multiple(Vec<EngineError>),
}

fn join_messages(errors: &[EngineError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

// "Possibly invalid coordinates" has no dedicated variant here: it is a
// warning (logged via `tracing::warn!` at the `await_data` call site), not
// a value returned to the caller, since the wait proceeds regardless.
