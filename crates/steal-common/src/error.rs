use thiserror::Error;

/// Error types for the stolen-time accounting runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StealError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The virtualization layer failed to answer a runstate query.
    ///
    /// Fatal during initialization; transient during steady-state sampling
    /// (the affected CPU contributes nothing for that cycle).
    #[error("runstate query failed for cpu {cpu}: hypercall returned {code}")]
    Hypercall {
        /// Logical CPU whose query failed.
        cpu: u32,
        /// Raw status code reported by the virtualization layer.
        code: i32,
    },

    /// The sampling thread did not acknowledge a stop request in time.
    #[error("sampling thread did not acknowledge stop within {waited_ms}ms")]
    StopTimeout {
        /// How long the caller waited, in milliseconds.
        waited_ms: u64,
    },

    /// Invalid sampling-loop state transition attempted.
    #[error("invalid sampling-loop transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Lifecycle event outside the supported set (load/unload).
    #[error("unsupported module event: {0}")]
    Unsupported(String),
}

/// Convenience type alias for accounting operations.
pub type StealResult<T> = Result<T, StealError>;
