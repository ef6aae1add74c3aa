use clap::Parser;
use client::{ClientError, LobbyClient};
use log::{info, warn};
use shared::Packet;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:50000")]
    server: String,

    /// Name to log in with
    #[arg(short = 'u', long)]
    username: String,

    /// Mark the player ready right after login
    #[arg(short = 'r', long)]
    ready: bool,

    /// Seconds to wait for each server reply
    #[arg(short = 't', long, default_value = "30")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout);

    info!("Connecting to: {}", args.server);
    let mut lobby = LobbyClient::connect(&args.server).await?;
    lobby.login(&args.username, timeout).await?;

    if args.ready {
        lobby.set_ready(true).await?;
    }

    tokio::select! {
        result = follow_lobby(&mut lobby) => {
            match result {
                Err(ClientError::Closed) => {
                    warn!("Server closed the connection");
                    return Ok(());
                }
                other => other?,
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, leaving the lobby...");
        }
    }

    lobby.disconnect().await?;
    Ok(())
}

/// Logs lobby traffic until the match ends
async fn follow_lobby(lobby: &mut LobbyClient) -> Result<(), ClientError> {
    loop {
        match lobby.recv().await? {
            Packet::NotifyConnect {
                player_id,
                username,
            } => info!("Player {} ('{}') joined", player_id, username),
            Packet::NotifyReady {
                player_id,
                is_ready,
            } => info!(
                "Player {} is {}",
                player_id,
                if is_ready { "ready" } else { "not ready" }
            ),
            Packet::NotifyDisconnect { player_id } => info!("Player {} left", player_id),
            Packet::GameStart {
                controlled_entity_id,
            } => info!("Match started, controlling entity {}", controlled_entity_id),
            Packet::GameEnd { winning_player_id } => {
                info!("Match over, winner: player {}", winning_player_id);
                return Ok(());
            }
            other => warn!("Unexpected {:?} from server", other.op_code()),
        }
    }
}
