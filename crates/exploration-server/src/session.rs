//! Accept/command loop driving the protocol core.
//!
//! One thread, one outstanding wait at a time. The wait is chosen by the
//! state the core reports on each iteration:
//!
//! - `Waiting`: block on the client socket with no timeout.
//! - `Streaming`: poll with the core's requested cadence as timeout, so a
//!   command can cut the wait short but the core still runs on time.
//! - `Stopped`: raise the shutdown flag and leave without polling.

use std::time::Duration;

use log::{debug, error, info, warn};

use crate::clock::{MonotonicClock, TickSource};
use crate::protocol::{ProtocolCore, SessionState};
use crate::shutdown::ShutdownFlag;
use crate::socket_server::{SocketServer, TransferStats};
use crate::status::StatusFile;

/// Why [`SessionController::serve_session`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Disconnect, read/poll error, or the client was dropped after a failed write.
    ClientLost,
    /// The core's step failed.
    CoreFailed,
    /// The core reported `Stopped`; the shutdown flag is now set.
    Stopped,
    /// The shutdown flag was observed between iterations.
    Shutdown,
}

pub struct SessionController<C: ProtocolCore> {
    server: SocketServer,
    core: C,
    clock: MonotonicClock,
    shutdown: ShutdownFlag,
    status: Option<StatusFile>,
    client: Option<String>,
    sessions_served: u64,
}

impl<C: ProtocolCore> SessionController<C> {
    /// Wire `core` to `server`: the core's inbound handler is registered on
    /// the server and stays there for the server's lifetime.
    pub fn new(mut server: SocketServer, core: C, shutdown: ShutdownFlag) -> Self {
        server.set_inbound_handler(core.inbound());
        Self {
            server,
            core,
            clock: MonotonicClock::new(),
            shutdown,
            status: None,
            client: None,
            sessions_served: 0,
        }
    }

    pub fn with_status_file(mut self, mut status: StatusFile) -> Self {
        status.update(|_| {});
        self.status = Some(status);
        self
    }

    pub fn server(&self) -> &SocketServer {
        &self.server
    }

    pub fn sessions_served(&self) -> u64 {
        self.sessions_served
    }

    /// Serve clients one after another until shutdown, then close the client
    /// and listening sockets.
    pub fn run(mut self) {
        while !self.shutdown.is_set() {
            info!("waiting for new connections...");

            self.server.close_client();
            self.client = None;
            self.core.stop_streaming();
            self.update_status(None);

            if let Err(err) = self.server.wait_for_client() {
                if err.is_interrupted() {
                    debug!("accept interrupted");
                } else {
                    warn!("accept failed: {}", err);
                }
                continue;
            }

            self.sessions_served += 1;
            self.client = self.server.peer_addr().map(|a| a.to_string());
            info!("got new connection, listening for commands");

            let end = self.serve_session();
            let stats = self.server.stats();
            info!(
                "session {} ended ({:?}): {} bytes in, {} bytes out",
                self.sessions_served, end, stats.bytes_in, stats.bytes_out
            );
            self.record_session_end(stats);
        }

        self.server.close_client();
        if let Some(status) = self.status.as_mut() {
            status.update(|s| {
                s.state = None;
                s.client = None;
                s.shutting_down = true;
            });
        }
        self.server.close();
        info!("shutdown complete");
    }

    /// Run the per-client loop on the currently connected client.
    pub fn serve_session(&mut self) -> SessionEnd {
        while !self.shutdown.is_set() {
            let step = match self.core.step(&mut self.server, &self.clock) {
                Ok(step) => step,
                Err(err) => {
                    error!("protocol core step failed: {}", err);
                    return SessionEnd::CoreFailed;
                }
            };

            self.update_status(Some(step.state));

            let (blocking, timeout) = match step.state {
                SessionState::Stopped => {
                    info!("stop requested by protocol core");
                    self.shutdown.trigger();
                    return SessionEnd::Stopped;
                }
                SessionState::Waiting => (true, Duration::ZERO),
                SessionState::Streaming => {
                    (false, self.clock.ticks_to_duration(step.ticks_until_next))
                }
            };

            if let Err(err) = self.server.poll_events(blocking, timeout) {
                info!("client lost: {}", err);
                return SessionEnd::ClientLost;
            }
        }
        SessionEnd::Shutdown
    }

    /// Flush when the state, the client or the session count changed.
    /// Runs every iteration, so the unchanged case must stay cheap.
    fn update_status(&mut self, state: Option<SessionState>) {
        let Some(status) = self.status.as_mut() else {
            return;
        };
        let current = status.status();
        if current.state == state
            && current.client == self.client
            && current.sessions_served == self.sessions_served
        {
            return;
        }
        let client = self.client.clone();
        let served = self.sessions_served;
        status.update(|s| {
            s.state = state;
            s.client = client;
            s.sessions_served = served;
        });
    }

    /// Byte counters are only written once the session is over.
    fn record_session_end(&mut self, stats: TransferStats) {
        self.client = None;
        if let Some(status) = self.status.as_mut() {
            status.update(|s| {
                s.state = None;
                s.client = None;
                s.bytes_in = stats.bytes_in;
                s.bytes_out = stats.bytes_out;
            });
        }
    }
}
