//! chainscore binary.
//!
//! - `chainscore serve`: score chain streams, one task per connection,
//!   logging through the log aggregator into a rotated log file
//! - `chainscore send`: generate chains in parallel, stream them to a
//!   server and store chains and results on disk

use chainscore::client;
use chainscore::config::{ClientConfig, Config, Mode, ServerConfig};
use chainscore::logging::{rotate_log_file, AggregatorLayer, LogAggregator};
use chainscore::server::Server;
use std::fs::File;
use std::io::BufWriter;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.mode {
        Mode::Serve(server_config) => serve(server_config, filter).await,
        Mode::Send(client_config) => send(client_config, filter).await,
    }
}

async fn serve(config: ServerConfig, filter: EnvFilter) -> Result<(), Box<dyn std::error::Error>> {
    let rotated = rotate_log_file(&config.log_file)?;
    let log_file = File::create(&config.log_file)?;
    let aggregator = LogAggregator::spawn(BufWriter::new(log_file))?;

    let console = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(AggregatorLayer::new(aggregator.handle()))
        .with(console)
        .init();

    if let Some(rotated) = rotated {
        info!(previous = %rotated.display(), "Rotated previous log file");
    }
    info!(
        listen = %config.listen,
        buffer_size = config.buffer_size,
        max_connections = config.max_connections,
        "Starting chainscore server"
    );

    let result = match Server::bind(config).await {
        Ok(server) => {
            server
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!(error = %e, "Failed to listen for Ctrl-C");
                        std::future::pending::<()>().await;
                    }
                })
                .await
        }
        Err(e) => Err(e),
    };
    if let Err(ref e) = result {
        tracing::error!(error = %e, "Server is shutting down because of an error");
    }

    // Everything queued so far is written before the aggregator exits.
    aggregator.shutdown()?;
    result?;
    Ok(())
}

async fn send(config: ClientConfig, filter: EnvFilter) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        address = %config.address,
        chains = config.chains,
        chunk_size = config.chunk_size,
        workers = config.workers,
        "Starting chainscore client"
    );

    let report = client::run(&config).await?;
    info!(
        chains = report.chains_sent,
        results = report.results_received,
        chains_file = %config.chains_file.display(),
        results_file = %config.results_file.display(),
        "Done"
    );
    Ok(())
}
