use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use task_broker::broker::Broker;
use task_broker::config::{BrokerConfig, ConfigFile};
use task_broker::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "task-broker")]
#[command(version)]
#[command(about = "Distributes batches of job tasks to polling workers")]
struct Args {
    /// TOML config file; command-line flags take precedence over it
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// Seconds to wait after a job's last delivery before redelivering
    /// tasks that were never reported complete
    #[arg(long)]
    redelivery_grace_secs: Option<u64>,

    /// Maximum number of live jobs
    #[arg(long)]
    max_jobs: Option<usize>,

    /// Largest batch a worker may request in a single poll
    #[arg(long)]
    max_batch_size: Option<usize>,
}

fn build_config(args: Args) -> Result<BrokerConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => BrokerConfig::load(path)?,
        None => BrokerConfig::default(),
    };

    // flags win over the file
    config.apply(ConfigFile {
        bind: args.bind,
        port: args.port,
        redelivery_grace_secs: args.redelivery_grace_secs,
        max_jobs: args.max_jobs,
        max_batch_size: args.max_batch_size,
    });
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // first line of each log file is unique, so rotated logs can be told apart
    tracing::info!("Starting task broker at {}", chrono::Utc::now().to_rfc3339());

    let config = build_config(Args::parse())?;
    tracing::info!(
        listen_addr = %config.listen_addr,
        redelivery_grace_secs = config.redelivery_grace.as_secs(),
        max_jobs = config.max_jobs,
        max_batch_size = config.max_batch_size,
        "Broker configured"
    );

    let shutdown = install_shutdown_handler()?;
    Broker::new(config).run(shutdown).await
}
