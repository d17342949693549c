use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vis_server::{VehicleInformationService, VisConfig};

fn print_help() {
    eprintln!(
        r#"Vehicle Information Service - websocket broker for vehicle signals

USAGE:
    vis-server [OPTIONS]

OPTIONS:
    --config <PATH>     Load configuration from JSON file
    --help              Print this help message

ENVIRONMENT VARIABLES:
    HOST                Server host (overrides the configuration)
    PORT                Server port (overrides the configuration)
    RUST_LOG            Log level filter

EXAMPLES:
    # Run the built-in simulated vehicle
    vis-server

    # Run with config file
    vis-server --config vis.json

    # Run with custom port
    PORT=9000 vis-server
"#
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vis_server=info,vis_adapters=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
                config_path = Some(args[i].clone());
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            VisConfig::from_file(&path)?
        }
        None => {
            tracing::info!("Using built-in configuration");
            VisConfig::builtin()?
        }
    };

    if let Ok(host) = std::env::var("HOST") {
        config.server.host = host;
    }
    if let Ok(port) = std::env::var("PORT") {
        config.server.port = port.parse()?;
    }

    tracing::info!("Service: {}", config.name);
    tracing::info!("Adapters: {}", config.adapters.len());

    let service = VehicleInformationService::from_config(config).await?;

    tracing::info!(
        "WebSocket: ws://{}:{}{}",
        service.config.server.host,
        service.config.server.port,
        service.config.server.path
    );
    tracing::info!("Signals: {}", service.registry().len());
    tracing::info!("Actions: authorize, get, set, subscribe, unsubscribe, unsubscribeAll");

    service.run().await?;
    Ok(())
}
