use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fileforge")]
#[command(author, version, about = "Declarative file-processing pipelines")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline over the given files
    Run {
        /// Service definition (TOML or JSON); defaults to `service_file` from config
        #[arg(short, long)]
        service: Option<PathBuf>,

        /// Pipeline to run
        #[arg(short, long)]
        pipeline: String,

        /// Run stages one after another instead of concurrently
        #[arg(long)]
        sequential: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Input files (may be empty when the pipeline reads its own input)
        files: Vec<PathBuf>,
    },

    /// Run a pipeline repeatedly, with no initial input
    Worker {
        /// Service definition (TOML or JSON); defaults to `service_file` from config
        #[arg(short, long)]
        service: Option<PathBuf>,

        /// Pipeline to run
        #[arg(short, long)]
        pipeline: String,

        /// Seconds between runs (overrides `worker.interval_secs`)
        #[arg(long)]
        interval: Option<u64>,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Validate a service definition
    Validate {
        /// Service definition to validate (uses `service_file` from config if not specified)
        service: Option<PathBuf>,
    },

    /// List the built-in operations
    List,

    /// Display version information
    Version,
}
