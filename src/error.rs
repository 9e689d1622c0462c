use thiserror::Error;

/// Producer-visible failure kinds. Mixer-thread code never returns one of
/// these (see module docs on [`crate::mixer`]); unrecoverable mixer-thread
/// state is a panic, not a `MixError`.
#[derive(Debug, Error)]
pub enum MixError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("resource exhausted")]
    ResourceExhausted,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("audio endpoint failure: {0}")]
    Endpoint(String),

    /// The device dropped out from under the endpoint (unplugged,
    /// format changed by another exclusive-mode client, etc). Distinct
    /// from [`MixError::Endpoint`]: `AudioHost`'s run loop treats this
    /// as a request to renegotiate and keep running rather than a
    /// fatal error.
    #[error("audio device invalidated: {0}")]
    DeviceInvalidated(String),
}

pub type MixResult<T> = Result<T, MixError>;
