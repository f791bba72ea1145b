use thiserror::Error;

/// Errors surfaced synchronously by the public API.
///
/// `NotFound`-shaped lookups are not part of this enum; they return
/// `bool`/`Option` at the call site instead (see e.g. `remove_observer`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TerminalError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("terminal is busy (reentrant call during event dispatch)")]
    Busy,
}

pub type Result<T> = std::result::Result<T, TerminalError>;
