//! Built-in stand-in for the sensor protocol core.
//!
//! Speaks newline-delimited JSON. Every command is an object with a `cmd`
//! field and gets exactly one JSON line back:
//!
//! ```text
//! {"cmd":"get_system_info"}                    -> {"status":"ok","system_info":{...}}
//! {"cmd":"start_streaming","update_rate":20}   -> {"status":"start"}
//! {"cmd":"stop_streaming"}                     -> {"status":"stop"}
//! {"cmd":"stop_server"}                        -> {"status":"ok"}
//! ```
//!
//! While streaming, one synthetic `{"result":{...}}` line is emitted per
//! period. The payload is a plain sawtooth; no signal processing happens
//! here.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::clock::TickSource;
use crate::error::CoreError;
use crate::protocol::{CommandBuffer, DataWriter, InboundHandler, ProtocolCore, Step};

pub const DEFAULT_UPDATE_RATE_HZ: f64 = 10.0;
pub const MAX_UPDATE_RATE_HZ: f64 = 1000.0;
pub const FRAME_LEN: usize = 16;

// ── Wire messages ────────────────────────────────────────────────────

#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Command {
    GetSystemInfo,
    StartStreaming {
        #[serde(default = "default_update_rate")]
        update_rate: f64,
    },
    StopStreaming,
    StopServer,
}

fn default_update_rate() -> f64 {
    DEFAULT_UPDATE_RATE_HZ
}

#[derive(Serialize)]
struct SystemInfo<'a> {
    name: &'a str,
    version: &'a str,
    ticks_per_second: u32,
    max_update_rate: f64,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Response<'a> {
    Status {
        status: &'a str,
    },
    Info {
        status: &'a str,
        system_info: SystemInfo<'a>,
    },
    Error {
        status: &'a str,
        message: String,
    },
    Result {
        result: FrameResult,
    },
}

#[derive(Serialize)]
struct FrameResult {
    seq: u64,
    tick: u32,
    data: Vec<u16>,
}

// ── Core ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Stream {
    period_ticks: u32,
    next_tick: u32,
    seq: u64,
}

#[derive(Debug)]
pub struct DemoCore {
    input: CommandBuffer,
    stream: Option<Stream>,
    stop_requested: bool,
}

impl DemoCore {
    /// `command_capacity` bounds the bytes of not-yet-terminated command text.
    pub fn new(command_capacity: usize) -> Self {
        Self {
            input: CommandBuffer::new(command_capacity),
            stream: None,
            stop_requested: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    fn execute(&mut self, command: Command, writer: &mut dyn DataWriter, clock: &dyn TickSource) {
        debug!("command {:?}", command);
        match command {
            Command::GetSystemInfo => respond(
                writer,
                &Response::Info {
                    status: "ok",
                    system_info: SystemInfo {
                        name: env!("CARGO_PKG_NAME"),
                        version: env!("CARGO_PKG_VERSION"),
                        ticks_per_second: clock.ticks_per_second(),
                        max_update_rate: MAX_UPDATE_RATE_HZ,
                    },
                },
            ),
            Command::StartStreaming { update_rate } => {
                if !(update_rate > 0.0 && update_rate <= MAX_UPDATE_RATE_HZ) {
                    respond(
                        writer,
                        &Response::Error {
                            status: "error",
                            message: format!(
                                "update_rate must be in (0, {}] Hz, got {}",
                                MAX_UPDATE_RATE_HZ, update_rate
                            ),
                        },
                    );
                    return;
                }
                let period_ticks =
                    ((f64::from(clock.ticks_per_second()) / update_rate).round() as u32).max(1);
                info!("start streaming at {} Hz", update_rate);
                self.stream = Some(Stream {
                    period_ticks,
                    next_tick: clock.ticks(),
                    seq: 0,
                });
                respond(writer, &Response::Status { status: "start" });
            }
            Command::StopStreaming => {
                if self.stream.take().is_some() {
                    info!("stop streaming");
                }
                respond(writer, &Response::Status { status: "stop" });
            }
            Command::StopServer => {
                info!("stop requested by client");
                self.stream = None;
                self.stop_requested = true;
                respond(writer, &Response::Status { status: "ok" });
            }
        }
    }
}

impl ProtocolCore for DemoCore {
    fn inbound(&self) -> Box<dyn InboundHandler> {
        Box::new(self.input.clone())
    }

    fn step(
        &mut self,
        writer: &mut dyn DataWriter,
        clock: &dyn TickSource,
    ) -> Result<Step, CoreError> {
        for line in self.input.take_lines()? {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<Command>(&line) {
                Ok(command) => self.execute(command, writer, clock),
                Err(err) => respond(
                    writer,
                    &Response::Error {
                        status: "error",
                        message: err.to_string(),
                    },
                ),
            }
            if self.stop_requested {
                return Ok(Step::stopped());
            }
        }

        let Some(stream) = self.stream.as_mut() else {
            return Ok(Step::waiting());
        };

        let now = clock.ticks();
        if ticks_reached(now, stream.next_tick) {
            respond(
                writer,
                &Response::Result {
                    result: FrameResult {
                        seq: stream.seq,
                        tick: now,
                        data: sawtooth(stream.seq),
                    },
                },
            );
            stream.seq += 1;
            stream.next_tick = stream.next_tick.wrapping_add(stream.period_ticks);
            if ticks_reached(now, stream.next_tick) {
                // Fell a whole period behind; restart the cadence from now.
                stream.next_tick = now.wrapping_add(stream.period_ticks);
            }
        }

        Ok(Step::streaming(stream.next_tick.wrapping_sub(now)))
    }

    fn stop_streaming(&mut self) {
        self.stream = None;
        self.input.clear();
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// True when `now` is at or past `deadline` on the wrapping tick counter.
fn ticks_reached(now: u32, deadline: u32) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}

fn sawtooth(seq: u64) -> Vec<u16> {
    (0..FRAME_LEN)
        .map(|i| ((seq as usize + i) % FRAME_LEN * 1024) as u16)
        .collect()
}

fn respond(writer: &mut dyn DataWriter, response: &Response<'_>) {
    // Serializing these shapes cannot fail.
    if let Ok(mut line) = serde_json::to_vec(response) {
        line.push(b'\n');
        writer.send(&line);
    }
}
