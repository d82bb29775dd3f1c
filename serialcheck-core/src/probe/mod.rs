//! Block integrity probe.
//!
//! Puts the remote CLI into echo mode, pushes deterministic blocks through
//! it and checks every byte comes back unchanged. The first mismatch ends
//! the run: a misaligned stream cannot resynchronize.

pub mod generator;

use serde::Serialize;
use serialcheck_io::{ABORT_BYTE, PROMPT, TransportSession};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::SessionError;
use crate::runtime::markers::COMMAND_NOT_FOUND;
pub use generator::{BlockGenerator, DeterministicBlocks, GeneratorKind, RandomBlocks};

pub const ECHO_COMMAND: &[u8] = b"echo\r";
pub const DEFAULT_BLOCK_SIZE: usize = 1024;
pub const DEFAULT_TOTAL_LEN: usize = 1024 * 1024;

pub const SENT_BLOCK_FILE: &str = "block.bin";
pub const RETURNED_BLOCK_FILE: &str = "return_block.bin";

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub total_len: usize,
    pub block_size: usize,
    pub generator: GeneratorKind,
    /// Where mismatching blocks are written. `None` keeps them in memory only.
    pub artifact_dir: Option<PathBuf>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            total_len: DEFAULT_TOTAL_LEN,
            block_size: DEFAULT_BLOCK_SIZE,
            generator: GeneratorKind::Deterministic,
            artifact_dir: None,
        }
    }
}

/// Ephemeral bookkeeping for one transfer.
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub total_len: usize,
    /// Bytes not yet written to the device.
    pub bytes_remaining: usize,
    pub block_size: usize,
    pub blocks_verified: usize,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
    pub success: bool,
}

impl TransferSession {
    pub fn begin(total_len: usize, block_size: usize) -> Self {
        Self {
            total_len,
            bytes_remaining: total_len,
            block_size,
            blocks_verified: 0,
            started_at: Instant::now(),
            finished_at: None,
            success: false,
        }
    }

    /// Size of the next block; the last one carries the remainder.
    pub fn next_block_len(&self) -> usize {
        self.block_size.min(self.bytes_remaining)
    }

    pub fn finish(&mut self, success: bool) {
        self.finished_at = Some(Instant::now());
        self.success = success;
    }

    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .unwrap_or_else(Instant::now)
            .duration_since(self.started_at)
    }

    pub fn report(&self) -> ProbeReport {
        let elapsed = self.elapsed();
        // Zero-length transfers have no meaningful rate.
        let throughput = (self.total_len > 0)
            .then(|| self.total_len as f64 / elapsed.as_secs_f64().max(f64::EPSILON));

        ProbeReport {
            total_len: self.total_len,
            block_size: self.block_size,
            blocks_verified: self.blocks_verified,
            elapsed,
            throughput,
        }
    }
}

/// Outcome of a successful probe run.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub total_len: usize,
    pub block_size: usize,
    pub blocks_verified: usize,
    pub elapsed: Duration,
    /// Bytes per second.
    pub throughput: Option<f64>,
}

impl ProbeReport {
    pub fn kib_per_sec(&self) -> Option<f64> {
        self.throughput.map(|bps| bps / 1024.0)
    }
}

/// A block that did not survive the round trip.
#[derive(Debug, Clone)]
pub struct BlockMismatch {
    pub sent: Vec<u8>,
    pub received: Vec<u8>,
    /// First differing index; the shorter length for a short read.
    pub offset: usize,
    pub artifacts: Option<(PathBuf, PathBuf)>,
}

impl BlockMismatch {
    pub fn new(sent: Vec<u8>, received: Vec<u8>) -> Self {
        let offset = sent
            .iter()
            .zip(&received)
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| sent.len().min(received.len()));

        Self {
            sent,
            received,
            offset,
            artifacts: None,
        }
    }

    pub fn is_short_read(&self) -> bool {
        self.received.len() < self.sent.len()
    }

    /// Write both blocks into `dir` for offline inspection.
    pub fn persist(&mut self, dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let sent_path = dir.join(SENT_BLOCK_FILE);
        let returned_path = dir.join(RETURNED_BLOCK_FILE);
        std::fs::write(&sent_path, &self.sent)?;
        std::fs::write(&returned_path, &self.received)?;
        self.artifacts = Some((sent_path, returned_path));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BlockIntegrityProbe {
    config: ProbeConfig,
}

impl BlockIntegrityProbe {
    pub fn new(config: ProbeConfig) -> Result<Self, SessionError> {
        if config.block_size == 0 {
            return Err(SessionError::Config("block size must be positive".into()));
        }
        Ok(Self { config })
    }

    /// Run the probe to completion. The session is consumed and closed on
    /// every path.
    pub fn run<S: Read + Write>(
        &self,
        mut session: TransportSession<S>,
    ) -> Result<ProbeReport, SessionError> {
        let outcome = self.transfer(&mut session);

        // Always leave echo mode, even after a failed transfer.
        if let Err(e) = session.write(&[ABORT_BYTE]) {
            tracing::warn!("Failed to send abort byte: {}", e);
        }
        session.close();

        outcome
    }

    fn enter_loopback<S: Read + Write>(
        session: &mut TransportSession<S>,
    ) -> Result<(), SessionError> {
        session.write(ECHO_COMMAND)?;
        for _ in 0..2 {
            let reply = session.read_until(PROMPT, false)?;
            let text = String::from_utf8_lossy(&reply);
            if let Some(line) = text.lines().find(|l| l.contains(COMMAND_NOT_FOUND)) {
                tracing::error!("Echo mode unavailable: {}", line);
                return Err(SessionError::Protocol {
                    line: line.trim().to_string(),
                });
            }
        }
        Ok(())
    }

    fn transfer<S: Read + Write>(
        &self,
        session: &mut TransportSession<S>,
    ) -> Result<ProbeReport, SessionError> {
        Self::enter_loopback(session)?;

        let mut generator = self.config.generator.build();
        let mut transfer = TransferSession::begin(self.config.total_len, self.config.block_size);
        tracing::info!(
            "Transferring {} bytes in blocks of {}. Hang tight...",
            transfer.total_len,
            transfer.block_size
        );

        while transfer.bytes_remaining > 0 {
            let actual = transfer.next_block_len();
            let block = generator.generate(actual);

            session.write(&block)?;
            transfer.bytes_remaining -= actual;
            let echoed = session.read_exact(actual)?;

            if echoed != block {
                transfer.finish(false);
                return Err(self.mismatch(transfer.bytes_remaining, block, echoed));
            }
            transfer.blocks_verified += 1;
        }

        transfer.finish(true);
        let report = transfer.report();
        match report.kib_per_sec() {
            Some(speed) => tracing::info!("Speed: {:.2} KiB/s", speed),
            None => tracing::info!("Nothing to transfer"),
        }
        Ok(report)
    }

    fn mismatch(&self, bytes_remaining: usize, sent: Vec<u8>, received: Vec<u8>) -> SessionError {
        let mut mismatch = BlockMismatch::new(sent, received);

        if let Some(dir) = &self.config.artifact_dir {
            match mismatch.persist(dir) {
                Ok(()) => tracing::error!(
                    "Incorrect block received. Saved to {} and {}.",
                    SENT_BLOCK_FILE,
                    RETURNED_BLOCK_FILE
                ),
                Err(e) => tracing::error!("Incorrect block received; saving it failed: {}", e),
            }
        } else {
            tracing::error!("Incorrect block received at offset {}", mismatch.offset);
        }
        tracing::error!("{} bytes left. Aborting.", bytes_remaining);

        SessionError::TransferIntegrity {
            bytes_remaining,
            mismatch: Box::new(mismatch),
        }
    }
}
