use std::fmt;

use resv::ReserveError;

/// Why a buffer could not be reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyReason {
    /// A CPU writer has claimed the buffer.
    CpuWriters,
    /// The reservation is held and the acquisition was not allowed to wait.
    Contended,
}

impl fmt::Display for BusyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusyReason::CpuWriters => write!(f, "claimed by a CPU writer"),
            BusyReason::Contended => write!(f, "reservation contended"),
        }
    }
}

/// Typed errors for validation-set reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExecbufError {
    /// A buffer in the set cannot be used right now.
    #[error("buffer busy: {reason}")]
    Busy {
        /// What made it busy.
        reason: BusyReason,
    },
    /// A wait was interrupted by a signal. Restart the submission.
    #[error("interrupted, submission must be restarted")]
    Interrupted,
    /// Lost a ticket conflict. Resolved internally by backing off; only
    /// surfaces if a ticketless batch is wounded, which cannot happen.
    #[error("gave up to avoid a deadlock")]
    Deadlock,
    /// Any other reservation failure.
    #[error(transparent)]
    Reserve(ReserveError),
}

impl ExecbufError {
    /// Whether the caller should simply retry the whole submission.
    pub fn is_restartable(&self) -> bool {
        matches!(self, ExecbufError::Interrupted)
    }
}

impl From<ReserveError> for ExecbufError {
    fn from(err: ReserveError) -> Self {
        match err {
            ReserveError::WouldWound => ExecbufError::Deadlock,
            ReserveError::Busy => ExecbufError::Busy {
                reason: BusyReason::Contended,
            },
            ReserveError::Interrupted => ExecbufError::Interrupted,
            other => ExecbufError::Reserve(other),
        }
    }
}
