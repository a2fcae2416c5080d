//! # dex-runtime
//!
//! Runtime support for a managed-code execution engine: the routines compiled method bodies
//! call to allocate objects, resolve constant-pool references to types, fields, methods and
//! strings, cooperate with thread suspension, and cross into native methods and back.
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

pub mod demo;
pub mod error;
pub mod resolve;
pub mod types;
pub mod utils;
pub mod value;
pub mod vm;

use error::CliError;
use vm::{config::RuntimeConfig, Runtime};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Runtime support layer for a dex-style managed runtime"
)]
pub struct Args {
    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Skip validation of references returned by native methods.
    #[arg(long)]
    pub no_check_jni: bool,
    /// Maximum number of live heap objects.
    #[arg(long, value_name = "OBJECTS")]
    pub heap_capacity: Option<usize>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve, allocate and dispatch against a small sample class path.
    Demo,
    /// Stop the world repeatedly while worker threads allocate.
    SuspendStress {
        #[arg(long, default_value_t = 4)]
        threads: usize,
        #[arg(long, default_value_t = 50)]
        rounds: usize,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "dex_runtime=debug",
        _ => "dex_runtime=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(args: Args) -> Result<(), CliError> {
    let mut config = RuntimeConfig::from_env()?;
    if args.no_check_jni {
        config = config.with_check_jni(false);
    }
    if let Some(capacity) = args.heap_capacity {
        config = config.with_heap_capacity(capacity);
    }
    let runtime = Runtime::new(config);
    match args.command {
        Command::Demo => demo::run_demo(&runtime),
        Command::SuspendStress { threads, rounds } => {
            demo::run_suspend_stress(&runtime, threads, rounds)
        }
    }
}

pub fn run_cli() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}
