use crate::session::SessionId;
use thiserror::Error;

/// Error type for engine control operations.
///
/// Only setup-time and lookup failures surface here; runtime socket errors on
/// live sessions travel as [`Error` notifications](crate::notify::EventKind::Error)
/// instead, carrying the negative errno.
#[derive(Error, Debug)]
pub enum Error {
    /// No session with this ID exists in the engine.
    #[error("no session with id {0}")]
    SessionNotFound(SessionId),

    /// The session is not in a state that can accept outbound data
    /// (e.g. still connecting, or a listener).
    #[error("session {0} cannot accept a send request in its current state")]
    SessionNotReady(SessionId),

    /// Length-prefixed frames carry a 16-bit length; larger payloads cannot
    /// be framed.
    #[error("payload of {0} bytes exceeds the 65535-byte length-prefix limit")]
    PayloadTooLarge(usize),

    /// Hostname resolution produced no usable IPv4 address.
    #[error("could not resolve '{0}' to an IPv4 address")]
    HostResolution(String),

    /// Socket setup error (creation, options, bind, listen, connect).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
