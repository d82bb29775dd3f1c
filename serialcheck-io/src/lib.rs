//! # serialcheck IO
//!
//! The Hardware Bridge.
//! A blocking, deadline-bounded byte channel to the device CLI, plus the
//! collaborators that sit around it: port resolution and bounded retry.

pub mod discovery;
#[cfg(feature = "mock")]
pub mod mock;
pub mod retry;
pub mod session;

pub use discovery::{AUTO_SELECTOR, PortResolver, UsbPortResolver, select_port};
pub use retry::{Backoff, RetryPolicy};
pub use session::{
    DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT, SerialConfig, TransportError, TransportSession,
};

/// ASCII ETX (Ctrl+C). Interrupts whatever the remote CLI is doing.
pub const ABORT_BYTE: u8 = 0x03;

/// Trailing marker of every CLI prompt.
pub const PROMPT: &[u8] = b">: ";
