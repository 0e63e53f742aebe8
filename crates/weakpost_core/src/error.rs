//! Error taxonomy for handler, registry and loop operations.
//!
//! # Responsibility
//! - Define the failures that are fatal to a single call.
//! - Keep recoverable scheduler outcomes out of the error channel.
//!
//! # Invariants
//! - A rejected submission is reported as `Ok(false)`, never as an error.
//! - A stale proxy or a collected message handler is not an error at all.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub type HandlerResult<T> = Result<T, HandlerError>;

/// Call-level failures surfaced by the registry and the handler facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// A required argument was absent. Retrying with the same input fails again.
    InvalidArgument(&'static str),
    /// A loop-bound constructor was called off any loop thread.
    NoCurrentLoop,
    /// Registry link structure failed validation.
    LinkInvariant(String),
}

impl Display for HandlerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(what) => write!(f, "invalid argument: {what} can't be absent"),
            Self::NoCurrentLoop => write!(f, "current thread is not running a loop"),
            Self::LinkInvariant(detail) => write!(f, "registry link invariant violated: {detail}"),
        }
    }
}

impl Error for HandlerError {}
