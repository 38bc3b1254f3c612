use clap::Parser;
use contact_harvester::{setup_logging, Cli, CliRunner, Config, PrometheusExporter};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting contact-harvester v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;

    // The recorder must be installed before the service registers its metric handles
    if let Some(port) = args.metrics_port {
        PrometheusExporter::new(port).start()?;
    }

    let cli_runner = CliRunner::new(config, &args).await?;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);
    let _shutdown_handler = setup_shutdown_handler(shutdown_tx);

    let result = tokio::select! {
        result = cli_runner.run(args.command) => {
            info!("Application completed");
            result
        }
        _ = shutdown_rx.recv() => {
            info!("Received shutdown signal");
            Ok(())
        }
    };

    // Graceful shutdown
    cli_runner.service.shutdown().await;

    if let Err(e) = result {
        error!("Application error: {}", e);
        std::process::exit(1);
    }

    info!("contact-harvester stopped");
    Ok(())
}

fn load_config(args: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };

    config.validate()?;

    info!("Configuration loaded successfully");
    info!(
        "Pipeline workers: {}, queue capacity: {}",
        config.pipeline.worker_count, config.pipeline.queue_capacity
    );
    info!("Fork-join parallelism: {}", config.fork_join.parallelism);
    info!("Fetch timeout: {:?}", config.fetch.timeout);

    Ok(config)
}

fn setup_shutdown_handler(
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT");
                let _ = shutdown_tx.send(());
            }
            Err(e) => {
                error!("Could not listen for shutdown signal: {}", e);
                // keep the sender alive so the receiver never sees a closed channel
                std::future::pending::<()>().await;
            }
        }
    })
}
