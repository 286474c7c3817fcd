//! `tacc`: the Tacit compiler back end's command-line front door (§4.8).
//!
//! Each subcommand takes IR tuple-syntax files directly; there is no
//! project-manifest concept to load first (Non-goals scope out a build
//! system, so the `seen_cli` project/config layer has no counterpart here).

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

/// The Tacit compiler back end: IR validation, scalarization, and
/// C/x86-64 lowering.
#[derive(Parser)]
#[command(name = "tacc")]
#[command(about = "Validate, scalarize, and lower Tacit IR tuple-syntax programs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all but error logging
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse, infer, and check every file; report success or the first error
    Check {
        /// IR tuple-syntax source files, one function/module per file
        files: Vec<PathBuf>,
    },

    /// Re-emit a checked linkage as IR tuple syntax (round-trip, §6.2)
    EmitIr {
        files: Vec<PathBuf>,

        /// Write to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Lower a checked linkage to portable C99
    EmitC {
        files: Vec<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Lower a checked linkage to NASM-flavored x86-64 assembly
    EmitX64 {
        files: Vec<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// native, linux, or windows
        #[arg(long, default_value = "native")]
        target: String,
    },

    /// Run the scalarization pass before lowering to C (useful for
    /// inspecting the array-wise-to-loop rewrite)
    ScalarizeEmitC {
        files: Vec<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if cli.quiet {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    match cli.command {
        Commands::Check { files } => commands::check(files),
        Commands::EmitIr { files, output } => commands::emit_ir(files, output),
        Commands::EmitC { files, output } => commands::emit_c(files, output),
        Commands::EmitX64 { files, output, target } => commands::emit_x64(files, output, target),
        Commands::ScalarizeEmitC { files, output } => commands::scalarize_emit_c(files, output),
    }
}
