//! Reusable test harness for exploration-server integration tests.
//!
//! Provides helpers for spawning the binary on a free port, connecting over
//! TCP, and exchanging newline-delimited JSON with the built-in core.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde_json::Value;

// ── ServerHandle ────────────────────────────────────────────────────

/// Handle to a running exploration-server process. Cleans up on drop.
pub struct ServerHandle {
    pub child: Child,
    pub port: u16,
    pub status_path: PathBuf,
    // Held for its Drop: removes the status file directory.
    _dir: tempfile::TempDir,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl ServerHandle {
    /// Deliver SIGINT to the server process.
    pub fn interrupt(&self) {
        unsafe {
            libc::kill(self.child.id() as libc::pid_t, libc::SIGINT);
        }
    }

    /// Wait up to `timeout` for the process to exit.
    pub fn wait_exit(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20))
                }
                _ => return None,
            }
        }
    }

    pub fn connect(&self) -> io::Result<LineClient> {
        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, self.port))?;
        Ok(LineClient::new(stream))
    }

    /// Read and parse the status JSON file.
    pub fn status(&self) -> io::Result<Value> {
        let content = std::fs::read_to_string(&self.status_path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

// ── LineClient ──────────────────────────────────────────────────────

/// Client wrapper for a connected TCP socket with line-level read/write.
pub struct LineClient {
    stream: TcpStream,
    read_buf: Vec<u8>,
}

impl LineClient {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: Vec::new(),
        }
    }

    pub fn send_raw(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)
    }

    /// Send one JSON command line.
    pub fn send_command(&mut self, command: Value) -> io::Result<()> {
        let mut line = command.to_string().into_bytes();
        line.push(b'\n');
        self.send_raw(&line)
    }

    /// Read the next line. Returns None on timeout or disconnect.
    pub fn recv_line(&mut self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(pos) = self.read_buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.read_buf.drain(..=pos).collect();
                return Some(String::from_utf8_lossy(&line[..pos]).into_owned());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            self.stream
                .set_read_timeout(Some(remaining.max(Duration::from_millis(10))))
                .ok();

            let mut buf = [0u8; 65536];
            match self.stream.read(&mut buf) {
                Ok(0) => return None, // disconnected
                Ok(n) => self.read_buf.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn recv_json(&mut self, timeout: Duration) -> Option<Value> {
        let line = self.recv_line(timeout)?;
        serde_json::from_str(&line).ok()
    }

    /// Wait for a reply carrying `"status"`, skipping streamed frames.
    pub fn recv_status(&mut self, timeout: Duration) -> Option<Value> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let value = self.recv_json(remaining)?;
            if value.get("status").is_some() {
                return Some(value);
            }
        }
    }

    /// Collect all JSON lines that arrive within `timeout`.
    pub fn collect(&mut self, timeout: Duration) -> Vec<Value> {
        let deadline = Instant::now() + timeout;
        let mut values = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv_json(remaining) {
                Some(value) => values.push(value),
                None => break,
            }
        }
        values
    }

    /// True once the server has closed the connection.
    pub fn is_closed(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.stream.set_read_timeout(Some(remaining)).ok();
            let mut buf = [0u8; 4096];
            match self.stream.read(&mut buf) {
                Ok(0) => return true,
                Ok(_) => continue,
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return false
                }
                Err(_) => return true,
            }
        }
    }
}

// ── Spawn helpers ───────────────────────────────────────────────────

fn binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_exploration-server"))
}

/// Ask the OS for a currently free TCP port.
pub fn free_port() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

/// Spawn a server on a free port.
pub fn spawn_server() -> io::Result<ServerHandle> {
    spawn_server_with_args(&[])
}

/// Spawn a server with extra command-line arguments.
/// Returns once the status file exists, i.e. the listener is up.
pub fn spawn_server_with_args(args: &[&str]) -> io::Result<ServerHandle> {
    let bin = binary_path();
    let dir = tempfile::tempdir()?;
    let status_path = dir.path().join("status.json");
    let port = free_port()?;

    let child = Command::new(&bin)
        .arg("--port")
        .arg(port.to_string())
        .arg("--status-file")
        .arg(&status_path)
        .arg("--log-level")
        .arg("debug")
        .args(args)
        .stdin(Stdio::null())
        .spawn()?;

    let mut handle = ServerHandle {
        child,
        port,
        status_path,
        _dir: dir,
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while !handle.status_path.exists() {
        if let Ok(Some(status)) = handle.child.try_wait() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("server exited during startup: {}", status),
            ));
        }
        if Instant::now() > deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "Status file did not appear within 5 seconds",
            ));
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    Ok(handle)
}

/// Run the binary to completion with `args` and return its exit status.
pub fn run_to_exit(args: &[&str]) -> io::Result<ExitStatus> {
    Command::new(binary_path())
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}
