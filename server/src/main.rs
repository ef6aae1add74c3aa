use clap::Parser;
use log::{error, info};
use server::{log_lobby_events, Server, ServerCommand, ServerConfig};

/// Parses command-line arguments, then runs the lobby until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::parse();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    let server = Server::bind(config).await?;
    let commands = server.command_sender();
    tokio::spawn(log_lobby_events(server.subscribe()));

    let mut server_handle = tokio::spawn(server.run());

    tokio::select! {
        result = &mut server_handle => {
            match result {
                Ok(Err(e)) => error!("Server stopped: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            if commands.send(ServerCommand::Shutdown).is_err() {
                error!("Server loop already stopped");
            }
            if let Ok(Err(e)) = server_handle.await {
                error!("Server stopped: {}", e);
            }
        }
    }

    Ok(())
}
