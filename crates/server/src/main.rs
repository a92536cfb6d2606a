use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;

use sfnpool_common::arn::activity_region;
use sfnpool_common::config::LogLevel;

use sfnpool_server::config::{self, CliOverrides};
use sfnpool_server::lifecycle::{self, ShutdownFlag};
use sfnpool_server::pool::{PoolSettings, ProcessLauncher, WorkerPool};
use sfnpool_server::server::Server;
use sfnpool_server::sfn::SfnClient;
use sfnpool_server::worker::entry::{self, WorkerChildArgs};

/// Run an activity worker pool against a hosted state machine.
#[derive(Parser)]
#[command(name = "sfnpool", version)]
struct Cli {
    /// TOML config file; CLI flags override its keys.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Registry name of the task handler. Overrides the config setting.
    #[arg(long)]
    worker: Option<String>,

    /// Activity ARN to poll. Overrides the config setting.
    #[arg(long = "activity-arn")]
    activity_arn: Option<String>,

    /// Worker process count; 0 uses the CPU count. Overrides the config
    /// setting.
    #[arg(long)]
    processes: Option<u32>,

    /// Loglevel: debug, info, warning, error or critical. Overrides the
    /// config setting.
    #[arg(long)]
    loglevel: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Internal: one worker process serving pool tasks over stdio.
    #[command(name = "worker-child", hide = true)]
    WorkerChild(WorkerChildArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(Command::WorkerChild(args)) = cli.command {
        run_worker_child(args).await;
        return;
    }

    let config = match config::load_config(
        cli.config.as_deref(),
        CliOverrides {
            worker: cli.worker,
            activity_arn: cli.activity_arn,
            processes: cli.processes,
            loglevel: cli.loglevel,
        },
    ) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(config.loglevel, false);

    if let Some(server) = config.server.as_deref() {
        if !server.is_empty() {
            tracing::warn!(server, "Custom server classes are not supported; ignoring");
        }
    }

    // Install Prometheus metrics recorder.
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    // The activity's region drives the client endpoint, here and in every
    // worker process.
    let activity_arn = config.activity_arn.clone().unwrap_or_default();
    let region = activity_region(&activity_arn).map(str::to_string);

    let service = match SfnClient::new(region.as_deref()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build activity client — refusing to start");
            std::process::exit(1);
        }
    };

    let launcher = match ProcessLauncher::from_config(&config, region.as_deref()) {
        Ok(launcher) => Arc::new(launcher),
        Err(e) => {
            tracing::error!(error = %e, "Failed to prepare worker launcher — refusing to start");
            std::process::exit(1);
        }
    };

    let processes = config::resolved_processes(&config);

    tracing::info!(
        worker = config.worker.as_deref().unwrap_or_default(),
        activity_arn = %activity_arn,
        processes,
        "Starting activity worker pool"
    );

    let pool = WorkerPool::start(
        PoolSettings {
            processes,
            max_tasks_per_child: config.max_tasks_per_child(),
        },
        launcher,
    );

    let shutdown = ShutdownFlag::new();
    lifecycle::spawn_signal_listener(shutdown.clone());

    if let Some(port) = config.healthcheck_port() {
        match lifecycle::bind_healthcheck(port).await {
            Ok(listener) => {
                tokio::spawn(lifecycle::serve_healthcheck(
                    listener,
                    metrics_handle.clone(),
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start healthcheck — refusing to start");
                std::process::exit(1);
            }
        }
    }

    let server = Server::new(
        service,
        pool,
        processes,
        activity_arn,
        &config.name,
        shutdown,
        config.server_config.clone(),
    );

    tracing::info!(server_name = server.server_name(), "Server running");

    server.run().await;

    tracing::info!("Server exiting");
}

async fn run_worker_child(args: WorkerChildArgs) {
    // Worker stdout carries the task protocol; logs go to stderr.
    init_tracing(args.loglevel(), true);

    if let Err(e) = entry::run(args).await {
        tracing::error!(error = %e, "Worker process failed");
        std::process::exit(1);
    }
}

fn init_tracing(loglevel: LogLevel, to_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(loglevel.as_directive());

    if to_stderr {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    }
}
