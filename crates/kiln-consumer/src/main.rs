//! Queue consumer service.
//!
//! Wires the container manager, the file store, the execution record store
//! and the configured queue backend together, then drains compile requests
//! until a shutdown signal arrives. One instance is bound to one docker
//! daemon.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bollard::Docker;
use clap::Parser;
use log::LevelFilter;

use kiln_core::files::LocalFileStore;
use kiln_core::languages;
use kiln_core::queue::{self, LocalBrokerConfig, Pipeline, QueueConfig};
use kiln_core::repository::EphemeralExecutionRepository;
use kiln_core::sandbox::manager::ContainerManager;

#[derive(Parser, Debug)]
#[clap(
    name = "kiln-consumer",
    version,
    about = "Compile-and-run sandbox queue consumer"
)]
struct Cli {
    #[clap(
        long,
        default_value_t = 4,
        help = "Maximum number of concurrently executing sandboxes"
    )]
    max_in_flight: usize,

    #[clap(long, help = "SQS queue URL; the local broker is used when unset")]
    sqs_queue: Option<String>,

    #[clap(long, default_value_t = 10, help = "Long-poll wait for the cloud queue")]
    sqs_wait_time_seconds: i32,

    #[clap(long, default_value = "executions", help = "Local broker topic")]
    topic: String,

    #[clap(long, default_value = "consumer", help = "Local broker channel")]
    channel: String,

    #[clap(
        long,
        help = "Force the local broker even when an SQS queue is configured"
    )]
    force_local_mode: bool,

    #[clap(
        long,
        help = "Root directory of the local file store; defaults under the temp directory"
    )]
    files_root: Option<PathBuf>,

    #[clap(long, short, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(LevelFilter::from_str(&cli.log_level).unwrap_or(LevelFilter::Info))
        .init();

    log::info!("starting kiln consumer");

    for (code, display_name) in languages::supported() {
        log::info!("language enabled code={} name={}", code, display_name);
    }

    // Forces the template registry to load so languages without a starter
    // template are reported once, at startup.
    log::info!("loaded {} starter templates", languages::TEMPLATES.len());

    let docker = Docker::connect_with_local_defaults()
        .context("failed to connect to the docker daemon")?;

    let manager = Arc::new(ContainerManager::new(docker, cli.max_in_flight));

    let event_loop = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start().await })
    };

    let files_root = cli
        .files_root
        .unwrap_or_else(|| std::env::temp_dir().join("executions").join("store"));
    let files = Arc::new(LocalFileStore::new(files_root));

    let repository = Arc::new(EphemeralExecutionRepository::new());

    let pipeline = Arc::new(Pipeline::new(manager.clone(), repository, files));

    let queue = queue::connect(
        QueueConfig {
            sqs_queue: cli.sqs_queue,
            force_local_mode: cli.force_local_mode,
            local: LocalBrokerConfig {
                topic: cli.topic,
                channel: cli.channel,
                max_in_flight: cli.max_in_flight,
            },
            wait_time_seconds: cli.sqs_wait_time_seconds,
        },
        pipeline,
    )
    .await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;

    log::info!("shutdown signal received");

    queue.stop();
    manager.stop();

    event_loop
        .await
        .context("container manager event loop aborted")?;

    Ok(())
}
