//! Single-client TCP front-end for an embedded sensor protocol core.
//!
//! A [`SocketServer`] owns the listening socket, at most one client and a
//! reusable read buffer. A [`SessionController`] accepts clients one at a
//! time and, per iteration, asks the [`ProtocolCore`] for its state to decide
//! between a blocking wait and a timed poll. Everything runs on one thread;
//! SIGINT sets a [`ShutdownFlag`] and interrupts whichever wait is active.

pub mod clock;
pub mod config;
pub mod demo_core;
pub mod error;
pub mod protocol;
pub mod session;
pub mod shutdown;
pub mod socket_server;
pub mod status;

pub use clock::{MonotonicClock, TickSource};
pub use demo_core::DemoCore;
pub use error::{CoreError, ServerError, ServerResult, SignalError};
pub use protocol::{CommandBuffer, DataWriter, InboundHandler, ProtocolCore, SessionState, Step};
pub use session::{SessionController, SessionEnd};
pub use shutdown::{install_signal_handlers, ShutdownFlag};
pub use socket_server::{PollOutcome, SocketServer, TransferStats};
pub use status::StatusFile;
