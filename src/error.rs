//! Error types for NV200 communication.
//!
//! All failures surface as [`Nv200Error`]. The variants map one-to-one onto
//! the failure classes of the wire protocol:
//!
//! - **`Connection`** - the transport could not be opened or was closed
//!   underneath us; fatal for the current command channel.
//! - **`Io`** - a read or write on an open transport failed.
//! - **`Timeout`** - no complete response frame arrived within the configured
//!   window, or a completion wait exceeded its budget.
//! - **`Protocol`** - the echoed keyword did not match the command that was
//!   just sent, which means the stream is desynchronized. The caller should
//!   reconnect; retrying on a desynchronized stream compounds the error.
//! - **`Value`** - a response token could not be converted to the requested
//!   type. Local to one call, the channel stays usable.
//! - **`Device`** - the controller answered with an `error,<code>` frame.
//!
//! No variant is retried internally; resilience is the caller's job.

use crate::types::ErrorCode;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, Nv200Error>;

/// Primary error type for NV200 device communication.
#[derive(Error, Debug)]
pub enum Nv200Error {
    /// Transport could not be opened or is no longer open.
    #[error("connection error: {0}")]
    Connection(String),

    /// I/O failure on an open transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No response frame within the timeout window.
    ///
    /// `keyword` names the command that was waiting for a reply, or the
    /// operation being polled; it is empty when the timeout occurred below
    /// the command layer.
    #[error("timeout after {waited_ms} ms waiting for response to '{keyword}'")]
    Timeout {
        /// Command keyword or polled operation that timed out.
        keyword: String,
        /// How long was waited, in milliseconds.
        waited_ms: u64,
    },

    /// Echoed keyword mismatch or malformed frame - stream desynchronization.
    #[error("protocol error: sent '{sent}' but device echoed '{got}' (frame: {frame:?})")]
    Protocol {
        /// Keyword that was sent.
        sent: String,
        /// Keyword the device echoed back.
        got: String,
        /// The raw decoded frame, for diagnosis without re-running traced.
        frame: String,
    },

    /// A response token could not be converted to the requested type.
    #[error("invalid value {token:?} in response to '{keyword}': {reason}")]
    Value {
        /// Command keyword whose response failed to convert.
        keyword: String,
        /// The offending token.
        token: String,
        /// What went wrong.
        reason: String,
    },

    /// A command was rejected locally before transmission.
    #[error("invalid command '{keyword}': {reason}")]
    Command {
        /// The rejected keyword.
        keyword: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The controller reported an error code.
    #[error("device error: {0}")]
    Device(ErrorCode),
}
