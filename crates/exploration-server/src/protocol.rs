//! The seam between the session controller and the protocol core.
//!
//! The controller never looks inside the core. Each iteration it calls
//! [`ProtocolCore::step`] and only inspects the returned [`Step`]: the
//! logical session state and how many ticks may pass before the core wants
//! to run again.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::clock::TickSource;
use crate::error::CoreError;

// ── Session state ───────────────────────────────────────────────────

/// Logical state reported by the core, re-derived every iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Idle: nothing to send, waiting for a command.
    Waiting,
    /// Periodic output pending.
    Streaming,
    /// The core requested shutdown of the whole server.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Waiting => "waiting",
            SessionState::Streaming => "streaming",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Result of one core iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub state: SessionState,
    /// Ticks until the core wants to be invoked again. Only meaningful while
    /// streaming.
    pub ticks_until_next: u32,
}

impl Step {
    pub fn waiting() -> Self {
        Self {
            state: SessionState::Waiting,
            ticks_until_next: 0,
        }
    }

    pub fn streaming(ticks_until_next: u32) -> Self {
        Self {
            state: SessionState::Streaming,
            ticks_until_next,
        }
    }

    pub fn stopped() -> Self {
        Self {
            state: SessionState::Stopped,
            ticks_until_next: 0,
        }
    }
}

// ── Transport capabilities ──────────────────────────────────────────

/// Outbound byte sink given to the core during a step.
///
/// Writes are synchronous and never buffered. A sink may drop its client
/// on a failed write, after which further writes are silently discarded.
pub trait DataWriter {
    fn send(&mut self, data: &[u8]);
}

impl DataWriter for Vec<u8> {
    fn send(&mut self, data: &[u8]) {
        self.extend_from_slice(data);
    }
}

/// Receives inbound bytes, synchronously, in socket order.
pub trait InboundHandler {
    fn on_data(&mut self, data: &[u8]);
}

impl<F: FnMut(&[u8])> InboundHandler for F {
    fn on_data(&mut self, data: &[u8]) {
        self(data)
    }
}

// ── Protocol core ───────────────────────────────────────────────────

/// An opaque, single-threaded protocol core.
pub trait ProtocolCore {
    /// Handler feeding client bytes into the core. Registered on the socket
    /// server once, before the first client is accepted.
    fn inbound(&self) -> Box<dyn InboundHandler>;

    /// Run one iteration: consume pending input, emit output through
    /// `writer`, and report the resulting state.
    fn step(&mut self, writer: &mut dyn DataWriter, clock: &dyn TickSource)
        -> Result<Step, CoreError>;

    /// Abort any active streaming. Called before every accept.
    fn stop_streaming(&mut self);
}

// ── Command buffer ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CommandBufferInner {
    lines: Vec<Vec<u8>>,
    partial: Vec<u8>,
    capacity: usize,
    overflowed: bool,
}

/// Line-splitting input buffer shared between the socket server's inbound
/// handler and the core that drains it.
///
/// `capacity` bounds a single line, not the total: any number of complete
/// lines may be queued between two drains. Single-threaded by construction:
/// the handler runs on the controller thread, inside `poll_events`, never
/// concurrently with `step`.
#[derive(Debug, Clone)]
pub struct CommandBuffer {
    inner: Rc<RefCell<CommandBufferInner>>,
}

impl CommandBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CommandBufferInner {
                lines: Vec::new(),
                partial: Vec::with_capacity(capacity),
                capacity,
                overflowed: false,
            })),
        }
    }

    /// Pending bytes, queued lines and the unterminated tail together.
    pub fn len(&self) -> usize {
        let inner = self.inner.borrow();
        inner.lines.iter().map(Vec::len).sum::<usize>() + inner.partial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split `bytes` into lines as they arrive. A line longer than
    /// `capacity` is discarded and the overflow is remembered until the next
    /// drain; nothing more is accepted until then.
    pub fn push(&self, bytes: &[u8]) {
        let mut inner = self.inner.borrow_mut();
        if inner.overflowed {
            return;
        }

        let mut rest = bytes;
        loop {
            let (segment, terminated) = match rest.iter().position(|&b| b == b'\n') {
                Some(pos) => (&rest[..pos], true),
                None => (rest, false),
            };
            if inner.partial.len() + segment.len() > inner.capacity {
                inner.overflowed = true;
                inner.partial.clear();
                return;
            }
            inner.partial.extend_from_slice(segment);
            if !terminated {
                return;
            }

            let mut line = std::mem::take(&mut inner.partial);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            inner.lines.push(line);
            rest = &rest[segment.len() + 1..];
        }
    }

    /// Remove and return every complete newline-terminated line, without the
    /// terminator. A trailing partial line stays buffered.
    pub fn take_lines(&self) -> Result<Vec<Vec<u8>>, CoreError> {
        let mut inner = self.inner.borrow_mut();
        if inner.overflowed {
            inner.overflowed = false;
            inner.lines.clear();
            inner.partial.clear();
            return Err(CoreError::InputOverflow {
                capacity: inner.capacity,
            });
        }
        Ok(std::mem::take(&mut inner.lines))
    }

    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.lines.clear();
        inner.partial.clear();
        inner.overflowed = false;
    }
}

impl InboundHandler for CommandBuffer {
    fn on_data(&mut self, data: &[u8]) {
        self.push(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_buffer_splits_complete_lines() {
        let buf = CommandBuffer::new(64);
        buf.push(b"first\nsec");
        let lines = buf.take_lines().unwrap();
        assert_eq!(lines, vec![b"first".to_vec()]);
        assert_eq!(buf.len(), 3);

        buf.push(b"ond\r\nthird\n");
        let lines = buf.take_lines().unwrap();
        assert_eq!(lines, vec![b"second".to_vec(), b"third".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn command_buffer_overflow_reports_once() {
        let buf = CommandBuffer::new(4);
        buf.push(b"abcdef");
        assert!(buf.is_empty());
        buf.push(b"gh\n");
        assert!(matches!(
            buf.take_lines(),
            Err(CoreError::InputOverflow { capacity: 4 })
        ));
        assert!(buf.is_empty());
        buf.push(b"ok\n");
        assert_eq!(buf.take_lines().unwrap(), vec![b"ok".to_vec()]);
    }

    #[test]
    fn command_buffer_bounds_each_line_not_the_total() {
        let buf = CommandBuffer::new(8);
        // Three full-size lines and a tail in one push, well past 8 bytes.
        buf.push(b"aaaaaaaa\nbbbbbbbb\ncccccc\r\ndd");
        assert_eq!(buf.len(), 24);
        buf.push(b"dddddd\n");
        let lines = buf.take_lines().unwrap();
        assert_eq!(
            lines,
            vec![
                b"aaaaaaaa".to_vec(),
                b"bbbbbbbb".to_vec(),
                b"cccccc".to_vec(),
                b"dddddddd".to_vec(),
            ]
        );

        // A tail carried over between pushes still counts against its line.
        buf.push(b"eeee");
        buf.push(b"eeeee\n");
        assert!(buf.take_lines().is_err());
    }

    #[test]
    fn command_buffer_clones_share_storage() {
        let buf = CommandBuffer::new(16);
        let mut handler: Box<dyn InboundHandler> = Box::new(buf.clone());
        handler.on_data(b"x\n");
        assert_eq!(buf.take_lines().unwrap(), vec![b"x".to_vec()]);
    }

    #[test]
    fn closures_are_inbound_handlers() {
        let mut seen = Vec::new();
        {
            let mut handler = |data: &[u8]| seen.extend_from_slice(data);
            handler.on_data(b"PING\n");
        }
        assert_eq!(seen, b"PING\n");
    }

    #[test]
    fn session_state_display() {
        assert_eq!(SessionState::Waiting.to_string(), "waiting");
        assert_eq!(SessionState::Streaming.to_string(), "streaming");
        assert_eq!(SessionState::Stopped.to_string(), "stopped");
    }
}
