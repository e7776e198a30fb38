use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use videoingest::configuration::config::{CommandLine, Config};
use videoingest::session_management::{MemoryRegistry, SessionManager};
use videoingest::transcode::FfmpegCommandBuilder;
use videoingest::web_interface::WebServer;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    println!(
        "
==============================================================================
            videoingest v{}: live video ingest for an external transcoder
==============================================================================
",
        env!("CARGO_PKG_VERSION")
    );

    info!("Importing configuration");

    let args = CommandLine::parse();

    let config = match Config::from_command_line(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration imported successfully");

    let addr = match config.bind_address() {
        Ok(addr) => addr,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    for dir in [&config.transcode.output_path, &config.transcode.log_file_path] {
        if let Err(e) = std::fs::create_dir_all(dir) {
            error!("Unable to create directory {}: {}", dir.display(), e);
            std::process::exit(1);
        }
    }

    let registry = Arc::new(MemoryRegistry::new());
    let builder = Arc::new(FfmpegCommandBuilder::new(&config.transcode));
    let manager = Arc::new(SessionManager::new(
        config.session_settings(),
        builder,
        registry,
        config.server.max_sessions,
    ));

    let retention = config.session_retention();
    let cleanup_manager = manager.clone();
    let cleanup = tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            cleanup_manager.cleanup_finished_sessions(retention);
        }
    });

    let server = WebServer::new(manager.clone());
    tokio::select! {
        result = server.start(addr) => {
            if let Err(e) = result {
                error!("Web server stopped: {}", e);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Received interrupt, shutting down"),
                Err(e) => warn!("Unable to listen for interrupt: {}", e),
            }
        }
    }

    cleanup.abort();
    manager.shutdown_all_sessions().await;
    info!("All sessions closed, exiting");
}
