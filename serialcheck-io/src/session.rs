//! Deadline-bounded byte channel.
//!
//! Every read is bounded by the session timeout. Bytes that arrive past a
//! delimiter stay buffered for the next read.

use serialport::{DataBits, FlowControl, SerialPort};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Baud rate the device CLI runs at.
pub const DEFAULT_BAUD_RATE: u32 = 230_400;

/// Default deadline for a single read operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-syscall read timeout. The session deadline is enforced on top of it.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

const READ_CHUNK: usize = 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {address}: {source}")]
    Connection {
        address: String,
        source: serialport::Error,
    },

    #[error("timed out after {waited:?} waiting for {delimiter:?} ({buffered} bytes buffered)")]
    Timeout {
        delimiter: String,
        waited: Duration,
        buffered: usize,
    },

    #[error("channel closed")]
    Closed,

    #[error("transport I/O: {0}")]
    Io(#[from] io::Error),
}

/// Configuration for a Serial Connection
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub flow_control: bool,
    pub timeout: Duration,
}

impl SerialConfig {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            flow_control: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

fn data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

/// A single owned channel to the device.
///
/// Generic over the underlying stream so anything `Read + Write` can stand in
/// for the serial port.
pub struct TransportSession<S = Box<dyn SerialPort>> {
    address: String,
    stream: Option<S>,
    pending: Vec<u8>,
    timeout: Duration,
}

impl<S> std::fmt::Debug for TransportSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("address", &self.address)
            .field("open", &self.stream.is_some())
            .field("pending", &self.pending.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TransportSession<Box<dyn SerialPort>> {
    /// Open the serial port at `address`.
    pub fn open(address: &str, baud_rate: u32, timeout: Duration) -> Result<Self, TransportError> {
        Self::open_with(&SerialConfig {
            port_name: address.to_string(),
            baud_rate,
            timeout,
            ..SerialConfig::default()
        })
    }

    pub fn open_with(config: &SerialConfig) -> Result<Self, TransportError> {
        let flow = if config.flow_control {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };

        let port = serialport::new(&config.port_name, config.baud_rate)
            .data_bits(data_bits(config.data_bits))
            .flow_control(flow)
            .timeout(POLL_INTERVAL.min(config.timeout))
            .open()
            .map_err(|source| TransportError::Connection {
                address: config.port_name.clone(),
                source,
            })?;

        tracing::info!(
            "Opened {} at {} baud (timeout {:?})",
            config.port_name,
            config.baud_rate,
            config.timeout
        );
        Ok(Self::from_stream(config.port_name.clone(), port, config.timeout))
    }
}

impl<S> TransportSession<S> {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Release the channel. Safe to call more than once.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Closed {}", self.address);
        }
        self.pending.clear();
    }
}

impl<S: Read + Write> TransportSession<S> {
    pub fn from_stream(address: impl Into<String>, stream: S, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            stream: Some(stream),
            pending: Vec::new(),
            timeout,
        }
    }

    /// Send raw bytes. No framing is added.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    /// Block until `n` bytes arrive or the deadline passes.
    ///
    /// A timeout or a closed channel yields a short read, not an error.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + self.timeout;

        while self.pending.len() < n && Instant::now() < deadline {
            match self.pull() {
                Ok(_) => {}
                Err(TransportError::Closed) => break,
                Err(e) => return Err(e),
            }
        }

        let take = n.min(self.pending.len());
        if take < n {
            tracing::debug!("Short read on {}: {} of {} bytes", self.address, take, n);
        }
        Ok(self.pending.drain(..take).collect())
    }

    /// Accumulate bytes until `delimiter` is seen.
    ///
    /// Fails with [`TransportError::Timeout`] when the deadline passes first;
    /// buffered bytes are kept for the next read.
    pub fn read_until(
        &mut self,
        delimiter: &[u8],
        keep_delimiter: bool,
    ) -> Result<Vec<u8>, TransportError> {
        if delimiter.is_empty() {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + self.timeout;
        let mut scanned = 0;

        loop {
            if let Some(pos) = find(&self.pending[scanned..], delimiter) {
                let start = scanned + pos;
                let mut out: Vec<u8> = self.pending.drain(..start + delimiter.len()).collect();
                if !keep_delimiter {
                    out.truncate(start);
                }
                return Ok(out);
            }
            // The delimiter may straddle the next chunk.
            scanned = self.pending.len().saturating_sub(delimiter.len() - 1);

            if Instant::now() >= deadline {
                return Err(TransportError::Timeout {
                    delimiter: String::from_utf8_lossy(delimiter).into_owned(),
                    waited: self.timeout,
                    buffered: self.pending.len(),
                });
            }

            self.pull()?;
        }
    }

    /// One read from the stream. Returns the number of bytes buffered, zero
    /// when the port was merely idle.
    fn pull(&mut self) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let mut chunk = [0u8; READ_CHUNK];

        match stream.read(&mut chunk) {
            Ok(0) => Err(TransportError::Closed),
            Ok(n) => {
                self.pending.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            // A serial hangup (unplugged device) shows up as a broken pipe.
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::BrokenPipe
                        | io::ErrorKind::UnexpectedEof
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                ) =>
            {
                tracing::debug!("{} hung up: {}", self.address, e);
                Err(TransportError::Closed)
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

impl<S> Drop for TransportSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
