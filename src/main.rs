mod cli;

use fileforge::{config, runner};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use ff_core::config::{Config, RunMode};
use ff_pipeline::{HandlerRegistry, LocalContext, ProcessableItem, Service};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "fileforge=trace,ff_pipeline=trace,ff_core=debug".to_string()
        } else {
            "fileforge=info,ff_pipeline=info,ff_core=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            service,
            pipeline,
            sequential,
            json,
            files,
        } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_pipeline(
                &config, service, &pipeline, sequential, json, files,
            ))
        }
        Commands::Worker {
            service,
            pipeline,
            interval,
            once,
        } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_worker(&config, service, &pipeline, interval, once))
        }
        Commands::Validate { service } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            validate_service(&config, service)
        }
        Commands::List => list_operations(),
        Commands::Version => {
            println!("fileforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn build_service(config: &Config, service: Option<PathBuf>) -> Result<Service> {
    let path = config::service_path(service, config)?;
    let definition = config::load_service(&path)?;
    Service::new(definition, Arc::new(HandlerRegistry::builtin()))
        .with_context(|| format!("Invalid service definition: {:?}", path))
}

async fn run_pipeline(
    config: &Config,
    service: Option<PathBuf>,
    pipeline: &str,
    sequential: bool,
    json: bool,
    files: Vec<PathBuf>,
) -> Result<()> {
    let service = build_service(config, service)?;
    let mut processor = service.processor(pipeline)?;

    for file in &files {
        if !file.exists() {
            anyhow::bail!("Input file does not exist: {:?}", file);
        }
    }
    let items: Vec<ProcessableItem> = files.into_iter().map(ProcessableItem::from_path).collect();

    let mode = if sequential {
        RunMode::Sequential
    } else {
        RunMode::Concurrent
    };
    let ctx = LocalContext::new(&config.secrets_dir);

    tracing::info!(
        "Running pipeline '{}' of service '{}' over {} file(s)",
        pipeline,
        service.name(),
        items.len()
    );
    let report = runner::run_once(&mut processor, &ctx, items, mode).await?;
    if json {
        runner::print_json(&report)?;
    } else {
        runner::print_report(&report);
    }
    runner::release(report.output);
    Ok(())
}

async fn run_worker(
    config: &Config,
    service: Option<PathBuf>,
    pipeline: &str,
    interval: Option<u64>,
    once: bool,
) -> Result<()> {
    let service = build_service(config, service)?;
    let processor = service.processor(pipeline)?;
    let interval = Duration::from_secs(interval.unwrap_or(config.worker.interval_secs));
    let ctx = Arc::new(LocalContext::new(&config.secrets_dir));

    runner::run_worker(processor, ctx, interval, config.worker.mode, once).await
}

fn validate_service(config: &Config, service: Option<PathBuf>) -> Result<()> {
    let path = config::service_path(service, config)?;
    println!("Validating service: {:?}", path);
    let service = build_service(config, Some(path))?;

    println!("✓ Service '{}' is valid", service.name());
    for pipeline in &service.definition().pipelines {
        println!("  {} ({} operation(s))", pipeline.name, pipeline.operations.len());
        for (i, op) in pipeline.operations.iter().enumerate() {
            println!("    {}. {}", i + 1, op.name);
        }
    }
    Ok(())
}

fn list_operations() -> Result<()> {
    let registry = HandlerRegistry::builtin();
    println!("Built-in operations:");
    for name in registry.names() {
        println!("  {}", name);
    }
    Ok(())
}
