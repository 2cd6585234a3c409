//! Top-level error taxonomy (spec §7) mapped to process exit codes.

use thiserror::Error;

/// Exit code for a usage error (bad `--allow`, missing target command).
pub const EXIT_USAGE: i32 = 2;
/// Exit code for setup/privilege/runtime-fatal failures.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("privilege error: {0}")]
    Privilege(String),

    #[error("setup error: {0}")]
    Setup(#[source] anyhow::Error),

    #[error("runtime error: {0}")]
    RuntimeFatal(#[source] anyhow::Error),
}

impl BoundaryError {
    pub fn exit_code(&self) -> i32 {
        match self {
            BoundaryError::Usage(_) => EXIT_USAGE,
            BoundaryError::Privilege(_) | BoundaryError::Setup(_) | BoundaryError::RuntimeFatal(_) => {
                EXIT_FAILURE
            }
        }
    }
}
