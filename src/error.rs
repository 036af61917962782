// Error taxonomy for traffic shaping operations

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShapeError {
    /// iproute2 (`tc`) is not installed or not runnable
    #[error("traffic control unavailable: {0} (install iproute2)")]
    DependencyMissing(String),

    #[error("malformed address: {0:?}")]
    InvalidAddress(String),

    #[error("malformed rate: {0:?}")]
    InvalidRate(String),

    /// Host octets whose class id collides with the root hierarchy
    #[error("host octet {0} maps to a reserved class id")]
    ReservedHost(u8),

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("no htb root qdisc on {0}")]
    NoRootQdisc(String),

    #[error("`{command}` exited with {status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl ShapeError {
    /// Validation failures are raised before any kernel command is issued
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ShapeError::InvalidAddress(_)
                | ShapeError::InvalidRate(_)
                | ShapeError::ReservedHost(_)
                | ShapeError::UnknownDevice(_)
        )
    }
}
