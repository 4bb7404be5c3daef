//! Logger initialisation errors.

/// Error returned by [`init`](crate::init).
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The filter directives could not be parsed.
    #[error("invalid log filter `{directives}`: {message}")]
    Filter {
        /// The rejected directives.
        directives: String,
        /// Parser message.
        message: String,
    },

    /// A global subscriber is already installed.
    #[error("logger already initialized: {0}")]
    AlreadyInitialized(String),
}
