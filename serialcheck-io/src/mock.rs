//! In-memory stand-in for the device CLI.
//!
//! `MockLink` is cheap to clone; every clone shares the same state, so a test
//! can keep one handle while the session owns another and inspect what was
//! written once the session is gone.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::ABORT_BYTE;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Mode {
    #[default]
    Command,
    Echo,
}

#[derive(Debug, Default)]
struct MockState {
    rx: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    mode: Mode,
    line: Vec<u8>,
    replies: HashMap<String, Vec<u8>>,
    echo_commands: HashMap<String, Vec<u8>>,
    echoed: usize,
    corrupt_at: Option<usize>,
    idle_as_timeout: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only means another test thread panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `reply` whenever `command` followed by `\r` is written.
    pub fn reply_to(self, command: &str, reply: impl AsRef<[u8]>) -> Self {
        self.state()
            .replies
            .insert(command.to_string(), reply.as_ref().to_vec());
        self
    }

    /// `command` switches the link into echo mode after sending `reply`.
    pub fn echo_on(self, command: &str, reply: impl AsRef<[u8]>) -> Self {
        self.state()
            .echo_commands
            .insert(command.to_string(), reply.as_ref().to_vec());
        self
    }

    /// Flip the bits of the echoed byte at absolute echo offset `offset`.
    pub fn corrupt_echo_at(self, offset: usize) -> Self {
        self.state().corrupt_at = Some(offset);
        self
    }

    /// Report an idle link as a read timeout instead of end of stream.
    pub fn idle_as_timeout(self) -> Self {
        self.state().idle_as_timeout = true;
        self
    }

    /// Make bytes available to the reader right away.
    pub fn push_rx(&self, bytes: impl AsRef<[u8]>) {
        self.state().rx.extend(bytes.as_ref());
    }

    /// Every `write` call in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    /// All written bytes concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.state().writes.concat()
    }

    pub fn in_echo_mode(&self) -> bool {
        self.state().mode == Mode::Echo
    }
}

impl MockState {
    fn feed(&mut self, bytes: &[u8]) {
        for &b in bytes {
            let mode = self.mode;
            match mode {
                Mode::Echo if b == ABORT_BYTE => {
                    self.mode = Mode::Command;
                    self.line.clear();
                }
                Mode::Echo => {
                    let out = if self.corrupt_at == Some(self.echoed) {
                        !b
                    } else {
                        b
                    };
                    self.echoed += 1;
                    self.rx.push_back(out);
                }
                Mode::Command if b == ABORT_BYTE => self.line.clear(),
                Mode::Command if b == b'\r' => {
                    let command = String::from_utf8_lossy(&self.line).into_owned();
                    self.line.clear();
                    self.dispatch(command.trim());
                }
                Mode::Command => self.line.push(b),
            }
        }
    }

    fn dispatch(&mut self, command: &str) {
        if let Some(reply) = self.echo_commands.get(command) {
            self.rx.extend(reply);
            self.mode = Mode::Echo;
        } else if let Some(reply) = self.replies.get(command) {
            self.rx.extend(reply);
        } else {
            let reply = format!("{command}: command not found, type help\r\n>: ");
            self.rx.extend(reply.as_bytes());
        }
    }
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.rx.is_empty() {
            if state.idle_as_timeout {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "idle"));
            }
            return Ok(0);
        }

        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        state.writes.push(buf.to_vec());
        state.feed(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
