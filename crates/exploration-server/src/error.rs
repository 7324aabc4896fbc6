//! Error types for the socket server, the protocol core seam and signal setup.

use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Result type for socket server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised by [`crate::socket_server::SocketServer`].
#[derive(Error, Debug)]
pub enum ServerError {
    /// A zero-sized read buffer was requested
    #[error("read buffer capacity must be greater than zero")]
    InvalidBufferCapacity,

    /// The read buffer could not be allocated
    #[error("memory allocation error ({capacity} bytes)")]
    Allocation { capacity: usize },

    /// socket(AF_INET, SOCK_STREAM, 0) failed
    #[error("socket(): {0}")]
    Socket(#[source] Errno),

    /// bind() on the listen port failed
    #[error("bind() to port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: Errno,
    },

    /// listen() failed
    #[error("listen() on port {port}: {source}")]
    Listen {
        port: u16,
        #[source]
        source: Errno,
    },

    /// accept() failed or was interrupted by a signal
    #[error("accept(): {0}")]
    Accept(#[source] Errno),

    /// No client is connected
    #[error("no client connected")]
    NotConnected,

    /// The peer performed an orderly close
    #[error("client disconnected")]
    Disconnected,

    /// read() on the client socket failed
    #[error("read(): {0}")]
    Read(#[source] io::Error),

    /// poll() on the client socket failed
    #[error("poll(): {0}")]
    Poll(#[source] Errno),

    /// poll() reported POLLERR on the client socket
    #[error("socket error reported by poll")]
    SocketError,

    /// write() transferred fewer bytes than requested
    #[error("short write ({written} of {requested} bytes)")]
    ShortWrite { written: usize, requested: usize },

    /// write() on the client socket failed
    #[error("write(): {0}")]
    Write(#[source] io::Error),
}

impl ServerError {
    /// Setup errors are fatal to process startup; everything else only ends
    /// the current session.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidBufferCapacity
                | ServerError::Allocation { .. }
                | ServerError::Socket(_)
                | ServerError::Bind { .. }
                | ServerError::Listen { .. }
        )
    }

    /// True when the failure came from a signal interrupting a blocking call.
    pub fn is_interrupted(&self) -> bool {
        match self {
            ServerError::Accept(errno) | ServerError::Poll(errno) => *errno == Errno::EINTR,
            ServerError::Read(err) => err.kind() == io::ErrorKind::Interrupted,
            _ => false,
        }
    }
}

/// Failure of one protocol core step. Ends the session, never the process.
#[derive(Error, Debug)]
pub enum CoreError {
    /// More command bytes arrived than the input buffer holds
    #[error("command input overflow (buffer holds {capacity} bytes)")]
    InputOverflow { capacity: usize },

    #[error("{0}")]
    Other(String),
}

/// Installing the process signal dispositions failed.
#[derive(Error, Debug)]
#[error("sigaction({signal}): {source}")]
pub struct SignalError {
    pub signal: &'static str,
    #[source]
    pub source: Errno,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_errors_are_classified() {
        assert!(ServerError::Allocation { capacity: 8 }.is_setup());
        assert!(ServerError::Bind {
            port: 6110,
            source: Errno::EADDRINUSE
        }
        .is_setup());
        assert!(!ServerError::Disconnected.is_setup());
        assert!(!ServerError::Accept(Errno::EINTR).is_setup());
    }

    #[test]
    fn interrupted_errors_are_detected() {
        assert!(ServerError::Accept(Errno::EINTR).is_interrupted());
        assert!(ServerError::Poll(Errno::EINTR).is_interrupted());
        assert!(ServerError::Read(io::Error::from(io::ErrorKind::Interrupted)).is_interrupted());
        assert!(!ServerError::Accept(Errno::EBADF).is_interrupted());
        assert!(!ServerError::SocketError.is_interrupted());
    }

    #[test]
    fn bind_error_message_names_port() {
        let err = ServerError::Bind {
            port: 16110,
            source: Errno::EADDRINUSE,
        };
        assert!(err.to_string().contains("16110"));
    }
}
