// serialcheck-core/src/bin/serialcheck/main.rs

mod args;

use anyhow::{Context, Result, anyhow};
use args::{AwaitArgs, Cli, Command, PerfArgs, RunUnitsArgs};
use clap::Parser;
use serialcheck_core::probe::GeneratorKind;
use serialcheck_core::{
    BlockIntegrityProbe, LogStreamParser, ParserConfig, ProbeConfig, SessionError,
};
use serialcheck_io::{
    DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT, PortResolver, RetryPolicy, TransportSession,
    UsbPortResolver,
};
use std::process::ExitCode;
use std::time::Duration;

/// Pause between finding a port and opening it while the device enumerates.
const SETTLE_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let command = Cli::parse().command;

    // Serial I/O is blocking; keep it off the async workers.
    let task = tokio::task::spawn_blocking(move || execute(command));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n[serialcheck] Ctrl+C received, exiting…");
            // The worker may sit in a bounded read; don't wait for it.
            std::process::exit(130);
        }

        joined = task => match joined {
            Ok(Ok(true)) => ExitCode::SUCCESS,
            Ok(Ok(false)) => ExitCode::FAILURE,
            Ok(Err(e)) => {
                tracing::error!("{:#}", e);
                ExitCode::FAILURE
            }
            Err(e) => {
                tracing::error!("worker task failed: {}", e);
                ExitCode::FAILURE
            }
        }
    }
}

fn execute(command: Command) -> Result<bool> {
    match command {
        Command::Perf(args) => perf(args),
        Command::RunUnits(args) => run_units(args),
        Command::AwaitDevice(args) => await_device(args),
    }
}

fn connect(selector: &str, policy: RetryPolicy) -> Result<TransportSession> {
    let resolver = UsbPortResolver::default();
    tracing::info!(
        "Attempting to find device with {} attempts.",
        policy.attempts
    );

    let port = policy
        .with_settle(SETTLE_DELAY)
        .find(|_| resolver.resolve(selector))
        .ok_or_else(|| {
            anyhow!("No device found for {selector:?}. Is it connected via USB and not in DFU mode?")
        })?;

    TransportSession::open(&port, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT)
        .map_err(SessionError::from)
        .with_context(|| format!("Failed to open {port}"))
}

fn perf(args: PerfArgs) -> Result<bool> {
    let generator = if args.random {
        GeneratorKind::Random { seed: None }
    } else {
        GeneratorKind::Deterministic
    };
    let probe = BlockIntegrityProbe::new(ProbeConfig {
        total_len: args.length,
        block_size: args.block_size,
        generator,
        artifact_dir: Some(args.artifacts),
    })?;

    let session = connect(&args.device.port, RetryPolicy::default())?;
    println!("Transferring {} bytes. Hang tight...", args.length);

    match probe.run(session) {
        Ok(report) => {
            if let Some(speed) = report.kib_per_sec() {
                println!("Speed: {:.2} KiB/s", speed);
            }
            Ok(true)
        }
        // Already logged with the saved block paths.
        Err(SessionError::TransferIntegrity { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn run_units(args: RunUnitsArgs) -> Result<bool> {
    let session = connect(
        &args.device.port,
        RetryPolicy::fixed(10, Duration::from_secs(1)),
    )?;

    let parser = LogStreamParser::new(ParserConfig {
        line_timeout: Duration::from_secs(args.timeout_secs),
        ..ParserConfig::default()
    });
    let result = parser.run(session)?;

    std::fs::write(&args.output, result.full_output())
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    let json_path = args.output.with_extension("json");
    std::fs::write(&json_path, result.to_json()?)
        .with_context(|| format!("Failed to write {}", json_path.display()))?;

    println!("{}", result.notice_line());

    if !result.success() {
        tracing::error!("Got {} failed tests.", result.failed_tests());
        tracing::error!("Leaked (not failing on this stat): {}", result.leak_bytes());
        tracing::error!("Status: {}", result.status());
        tracing::error!("Time: {} seconds", result.elapsed_secs());
        return Ok(false);
    }

    tracing::info!("Leaked (not failing on this stat): {}", result.leak_bytes());
    tracing::info!(
        "Tests ran successfully! Time elapsed {} seconds. Passed {} tests.",
        result.elapsed_secs(),
        result.total_tests()
    );
    Ok(true)
}

fn await_device(args: AwaitArgs) -> Result<bool> {
    let mut session = connect(
        &args.device.port,
        RetryPolicy::fixed(args.attempts, Duration::from_secs(1)),
    )?;
    tracing::info!("Device started at {}", session.address());
    session.close();
    Ok(true)
}
