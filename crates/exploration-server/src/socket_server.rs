//! Single-client TCP socket server.
//!
//! Owns the listening socket, at most one client socket, and a fixed-size
//! read buffer that is reused for every read. All suspension happens in
//! [`SocketServer::wait_for_client`] (accept) and
//! [`SocketServer::poll_events`] (readiness wait); both return `EINTR`
//! failures to the caller instead of restarting, so a delivered signal
//! always unblocks them.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use log::{debug, info, trace, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{self, sockopt, AddressFamily, Backlog, SockFlag, SockType, SockaddrIn};

use crate::error::{ServerError, ServerResult};
use crate::protocol::{DataWriter, InboundHandler};

// ── Constants ────────────────────────────────────────────────────────

pub const DEFAULT_PORT: u16 = 6110;
pub const LISTEN_BACKLOG: i32 = 10;
pub const SEND_BUFFER_SIZE: usize = 200_000;

// ── Types ────────────────────────────────────────────────────────────

/// What a successful [`SocketServer::poll_events`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// `n` bytes were read and handed to the inbound handler.
    Data(usize),
    /// The wait elapsed without a socket event.
    TimedOut,
    /// A signal interrupted the wait before any event.
    Interrupted,
}

/// Byte counters for the current client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

pub struct SocketServer {
    listener: TcpListener,
    client: Option<TcpStream>,
    buffer: Vec<u8>,
    handler: Option<Box<dyn InboundHandler>>,
    stats: TransferStats,
}

impl std::fmt::Debug for SocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketServer")
            .field("listener", &self.listener)
            .field("client", &self.client)
            .field("buffer_capacity", &self.buffer.len())
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl SocketServer {
    /// Bind `0.0.0.0:port` and start listening.
    ///
    /// `port` 0 asks the OS for an ephemeral port; see [`Self::local_addr`].
    /// On failure everything allocated so far is released before returning.
    pub fn open(port: u16, buffer_capacity: usize) -> ServerResult<Self> {
        if buffer_capacity == 0 {
            return Err(ServerError::InvalidBufferCapacity);
        }

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(buffer_capacity)
            .map_err(|_| ServerError::Allocation {
                capacity: buffer_capacity,
            })?;
        buffer.resize(buffer_capacity, 0);

        let fd = socket::socket(
            AddressFamily::Inet,
            SockType::Stream,
            SockFlag::empty(),
            None,
        )
        .map_err(ServerError::Socket)?;

        if let Err(errno) = socket::setsockopt(&fd, sockopt::ReuseAddr, &true) {
            warn!("setsockopt(SO_REUSEADDR): {}", errno);
        }

        let addr = SockaddrIn::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        socket::bind(fd.as_raw_fd(), &addr).map_err(|source| ServerError::Bind { port, source })?;

        let backlog =
            Backlog::new(LISTEN_BACKLOG).map_err(|source| ServerError::Listen { port, source })?;
        socket::listen(&fd, backlog).map_err(|source| ServerError::Listen { port, source })?;

        let listener = TcpListener::from(fd);
        debug!(
            "listening on {:?} (backlog {}, buffer {} bytes)",
            listener.local_addr().ok(),
            LISTEN_BACKLOG,
            buffer_capacity
        );

        Ok(Self {
            listener,
            client: None,
            buffer,
            handler: None,
            stats: TransferStats::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.client.as_ref().and_then(|c| c.peer_addr().ok())
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    /// Register the inbound handler, replacing any previous one.
    pub fn set_inbound_handler(
        &mut self,
        handler: Box<dyn InboundHandler>,
    ) -> Option<Box<dyn InboundHandler>> {
        self.handler.replace(handler)
    }

    /// Block until a client connects.
    ///
    /// Fails when accept errors or is interrupted by a signal; callers retry
    /// from their outer loop. Socket tuning is best-effort.
    pub fn wait_for_client(&mut self) -> ServerResult<()> {
        self.close_client();

        let raw = socket::accept(self.listener.as_raw_fd()).map_err(ServerError::Accept)?;
        // SAFETY: accept returned a fresh descriptor that nothing else owns.
        let stream = TcpStream::from(unsafe { OwnedFd::from_raw_fd(raw) });

        tune_client_socket(&stream);

        info!(
            "client connected from {}",
            stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "<unknown>".to_string())
        );
        self.client = Some(stream);
        self.stats = TransferStats::default();
        Ok(())
    }

    /// Close the client socket if there is one. Idempotent.
    pub fn close_client(&mut self) {
        if let Some(stream) = self.client.take() {
            debug!("closing client socket {}", stream.as_raw_fd());
        }
    }

    /// Wait for a socket event and service it.
    ///
    /// With `blocking` the wait has no timeout; otherwise it lasts at most
    /// `timeout`, rounded up to the poll resolution. Readable data is read
    /// into the reusable buffer and handed to the inbound handler before
    /// returning. Disconnects, read errors and `POLLERR` close the client
    /// and fail.
    pub fn poll_events(&mut self, blocking: bool, timeout: Duration) -> ServerResult<PollOutcome> {
        let Some(stream) = self.client.as_mut() else {
            return Err(ServerError::NotConnected);
        };

        let wait = if blocking {
            PollTimeout::NONE
        } else {
            poll_timeout(timeout)
        };

        let revents = {
            let mut fds = [PollFd::new(stream.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, wait) {
                Ok(0) => return Ok(PollOutcome::TimedOut),
                Ok(_) => fds[0].revents().unwrap_or_else(PollFlags::empty),
                Err(Errno::EINTR) => return Ok(PollOutcome::Interrupted),
                Err(errno) => return Err(ServerError::Poll(errno)),
            }
        };

        let result = if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
            Err(ServerError::SocketError)
        } else if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP) {
            match stream.read(&mut self.buffer) {
                Ok(0) => Err(ServerError::Disconnected),
                Ok(n) => {
                    trace!("read {} bytes", n);
                    self.stats.bytes_in += n as u64;
                    if let Some(handler) = self.handler.as_mut() {
                        handler.on_data(&self.buffer[..n]);
                    }
                    Ok(PollOutcome::Data(n))
                }
                Err(err) => Err(ServerError::Read(err)),
            }
        } else {
            Ok(PollOutcome::TimedOut)
        };

        if result.is_err() {
            self.close_client();
        }
        result
    }

    /// Write all of `data` to the client in one call.
    ///
    /// A short or failed write closes the client: output is never buffered
    /// or retried. Without a client this is a no-op returning `NotConnected`.
    pub fn write_data(&mut self, data: &[u8]) -> ServerResult<()> {
        let Some(stream) = self.client.as_mut() else {
            return Err(ServerError::NotConnected);
        };

        let err = match stream.write(data) {
            Ok(n) if n == data.len() => {
                self.stats.bytes_out += n as u64;
                return Ok(());
            }
            Ok(n) => ServerError::ShortWrite {
                written: n,
                requested: data.len(),
            },
            Err(err) => ServerError::Write(err),
        };

        warn!("dropping client: {}", err);
        self.close_client();
        Err(err)
    }

    /// Close the client and the listening socket and release the buffer.
    pub fn close(mut self) {
        self.close_client();
        debug!("closing listening socket {}", self.listener.as_raw_fd());
    }
}

impl DataWriter for SocketServer {
    fn send(&mut self, data: &[u8]) {
        // Failures have already dropped the client and been logged.
        let _ = self.write_data(data);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn tune_client_socket(stream: &TcpStream) {
    if let Err(errno) = socket::setsockopt(stream, sockopt::KeepAlive, &true) {
        warn!("setsockopt(SO_KEEPALIVE): {}", errno);
    }
    if let Err(errno) = socket::setsockopt(stream, sockopt::TcpNoDelay, &true) {
        warn!("setsockopt(TCP_NODELAY): {}", errno);
    }
    if let Err(errno) = socket::setsockopt(stream, sockopt::SndBuf, &SEND_BUFFER_SIZE) {
        warn!("setsockopt(SO_SNDBUF): {}", errno);
    }
}

/// Millisecond poll timeout, rounded up so a timed wait never ends before
/// `timeout`. Waits beyond the representable range are capped.
fn poll_timeout(timeout: Duration) -> PollTimeout {
    let millis = timeout.as_micros().div_ceil(1000);
    PollTimeout::from(u16::try_from(millis).unwrap_or(u16::MAX))
}
