// SPDX-License-Identifier: Apache-2.0 OR MIT
// Error taxonomy for lifecycle and control-path operations

use std::time::Duration;

use thiserror::Error;

/// Errors returned by lifecycle and configuration operations.
///
/// The hot path never surfaces these: `Logger::log` reports internal
/// failures by incrementing the logger's `dropped` counter and returning
/// `false`.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation rejected because the manager or pool is not in the
    /// required lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Caller passed an argument the engine cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A bounded resource is out of slots.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// A flush or shutdown deadline expired before the pipeline drained.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A sink reported an I/O failure. Counted per sink, never fatal to
    /// the pipeline.
    #[error("sink error: {0}")]
    Sink(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
