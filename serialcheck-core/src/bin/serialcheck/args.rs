use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand};
use serialcheck_core::probe::{DEFAULT_BLOCK_SIZE, DEFAULT_TOTAL_LEN};
use serialcheck_io::AUTO_SELECTOR;
use std::path::PathBuf;

pub const PORT_ENV: &str = "SERIALCHECK_PORT";
pub const TIMEOUT_ENV: &str = "SERIALCHECK_TIMEOUT";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Serial CLI loopback check and unit-test runner", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Echo loopback integrity and throughput check
    Perf(PerfArgs),

    /// Run the device unit tests and collect the summary
    #[command(alias = "run_units")]
    RunUnits(RunUnitsArgs),

    /// Wait for the device to show up
    #[command(alias = "await_flipper")]
    AwaitDevice(AwaitArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct DeviceArgs {
    /// Port path or 'auto'
    #[arg(short, long, env = PORT_ENV, default_value = AUTO_SELECTOR)]
    pub port: String,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct PerfArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Bytes to transfer
    #[arg(short, long, default_value_t = DEFAULT_TOTAL_LEN)]
    pub length: usize,

    /// Block size in bytes
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_BLOCK_SIZE,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub block_size: usize,

    /// Random blocks instead of the deterministic pattern
    #[arg(long)]
    pub random: bool,

    /// Where mismatching blocks are saved
    #[arg(short, long, default_value = ".")]
    pub artifacts: PathBuf,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct RunUnitsArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Seconds to wait for each log line
    #[arg(short = 't', long = "timeout", env = TIMEOUT_ENV, default_value_t = 10)]
    pub timeout_secs: u64,

    /// Transcript file; the JSON result is written next to it
    #[arg(short, long, default_value = "unit_tests_output.txt")]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct AwaitArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Attempts, one per second
    #[arg(short = 't', long = "timeout", env = TIMEOUT_ENV, default_value_t = 10)]
    pub attempts: u32,
}
