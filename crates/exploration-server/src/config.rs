//! Command-line configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::LevelFilter;

use crate::socket_server::DEFAULT_PORT;

/// Largest command the core buffers, and the socket read buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 10 * 1024;

#[derive(Parser, Debug)]
#[command(name = "exploration-server")]
#[command(version)]
#[command(about = "Single-client TCP command and streaming server")]
pub struct Cli {
    /// The TCP/IP port to listen on
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_PORT,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub port: u16,

    /// The log level
    #[arg(short, long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Read buffer and command buffer size in bytes
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE, value_parser = parse_buffer_size)]
    pub buffer_size: usize,

    /// Write a JSON status document to this path
    #[arg(long)]
    pub status_file: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Verbose,
    Debug,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Verbose => LevelFilter::Debug,
            LogLevel::Debug => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub buffer_capacity: usize,
}

impl Cli {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            buffer_capacity: self.buffer_size,
        }
    }
}

fn parse_buffer_size(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("buffer size must be greater than zero".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}
