use std::process::ExitCode;

use tracing::{error, info};

use chatrelay::web::shutdown_signal;
use chatrelay::{ChatServer, Config};

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration
    let mut config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };
    config.apply_env_overrides();

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    // Initialize logging
    if let Err(e) = chatrelay::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        chatrelay::logging::init_console_only(&config.logging.level);
    }

    info!("chatrelay - real-time chat relay");
    info!(
        "Server configured on {}:{}",
        config.server.host, config.server.port
    );

    let server = match ChatServer::bind(&config).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to start server");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run_until(shutdown_signal()).await {
        error!(error = %e, "Server error");
        return ExitCode::FAILURE;
    }

    info!("chatrelay stopped");
    ExitCode::SUCCESS
}
