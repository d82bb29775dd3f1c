//! # serialcheck Core
//!
//! Two ways to exercise a device over its serial CLI:
//! - [`BlockIntegrityProbe`]: echo loopback, byte-exact verification, throughput.
//! - [`LogStreamParser`]: remote unit-test run, summary markers pulled out of
//!   a noisy log stream into a [`TestRunResult`].
//!
//! One mode per session; both own the session for the whole run and close it
//! on every exit path.

pub mod error;
pub mod probe;
pub mod report;
pub mod runtime;

pub use error::{SessionError, StreamEnd};
pub use probe::{BlockIntegrityProbe, BlockMismatch, ProbeConfig, ProbeReport};
pub use report::TestRunResult;
pub use runtime::markers::{CapturedMarker, MarkerAccumulator, MarkerKind};
pub use runtime::parser::{LogStreamParser, ParseState, ParserConfig};
pub use runtime::sanitize::{LogLine, sanitize};
