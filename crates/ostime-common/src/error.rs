use thiserror::Error;

/// Clock error types covering configuration and the services around the reader.
///
/// Reading the clock never fails; these errors come from building,
/// configuring and driving the time service.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClockError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Rebase interval does not fit inside one counter wrap.
    #[error("rebase interval {interval_ns}ns must be shorter than the counter wrap period {wrap_ns}ns")]
    RebaseInterval {
        /// Configured rebase interval in nanoseconds.
        interval_ns: u128,
        /// Counter wrap period in nanoseconds.
        wrap_ns: u128,
    },

    /// Synchronisation strategy cannot exclude the configured writer.
    #[error("sync strategy {strategy} cannot exclude {writer}")]
    IncompatibleSync {
        /// Selected synchronisation strategy.
        strategy: String,
        /// The writer it would fail to exclude.
        writer: String,
    },

    /// Rebase timer lifecycle error.
    #[error("timer service error: {0}")]
    TimerService(String),
}

/// Convenience type alias for clock operations.
pub type ClockResult<T> = Result<T, ClockError>;
