use log::{debug, info, warn};
use shared::{ConnectStatus, EncodeError, EntityId, FrameDecoder, FramingError, Packet, PlayerId};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

const READ_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode packet: {0}")]
    Encode(#[from] EncodeError),
    #[error("server stream is unreadable: {0}")]
    Framing(#[from] FramingError),
    #[error("connection closed by server")]
    Closed,
    #[error("timed out waiting for the server")]
    Timeout,
    #[error("login rejected: {0:?}")]
    Rejected(ConnectStatus),
}

/// Lobby session over any byte stream, normally a [`TcpStream`]
pub struct LobbyClient<S = TcpStream> {
    stream: S,
    decoder: FrameDecoder,
    player_id: Option<PlayerId>,
}

impl LobbyClient<TcpStream> {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", stream.peer_addr()?);
        Ok(Self::from_stream(stream))
    }
}

impl<S> LobbyClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::default(),
            player_id: None,
        }
    }

    /// Player ID assigned by the last successful login
    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<(), ClientError> {
        let frame = packet.encode()?;
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    /// Writes bytes untouched, for testing the server with hand-made frames
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Next well-formed packet from the server. Malformed packets are skipped.
    pub async fn recv(&mut self) -> Result<Packet, ClientError> {
        loop {
            while let Some(frame) = self.decoder.next_frame()? {
                match frame.decode() {
                    Ok(packet) => return Ok(packet),
                    Err(e) => warn!("Skipping malformed packet: {}", e),
                }
            }

            let mut buffer = [0u8; READ_BUFFER_SIZE];
            let read = self.stream.read(&mut buffer).await?;
            if read == 0 {
                return Err(ClientError::Closed);
            }
            self.decoder.extend(&buffer[..read]);
        }
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Packet, ClientError> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    /// Receives until a packet satisfies `wanted`, skipping the rest
    pub async fn recv_until<F>(
        &mut self,
        timeout: Duration,
        mut wanted: F,
    ) -> Result<Packet, ClientError>
    where
        F: FnMut(&Packet) -> bool,
    {
        let wait = async {
            loop {
                let packet = self.recv().await?;
                if wanted(&packet) {
                    return Ok::<_, ClientError>(packet);
                }
                debug!("Skipping {:?} while waiting", packet.op_code());
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    /// Sends `CONNECT_REQ` and waits for the matching `CONNECT_ACK`
    pub async fn login(
        &mut self,
        username: &str,
        timeout: Duration,
    ) -> Result<PlayerId, ClientError> {
        self.send(&Packet::ConnectReq {
            username: username.to_string(),
        })
        .await?;

        let ack = self
            .recv_until(timeout, |p| matches!(p, Packet::ConnectAck { .. }))
            .await?;

        match ack {
            Packet::ConnectAck {
                player_id,
                status: ConnectStatus::Ok,
            } => {
                info!("Logged in as '{}' (player {})", username, player_id);
                self.player_id = Some(player_id);
                Ok(player_id)
            }
            Packet::ConnectAck { status, .. } => Err(ClientError::Rejected(status)),
            _ => Err(ClientError::Closed),
        }
    }

    pub async fn set_ready(&mut self, is_ready: bool) -> Result<(), ClientError> {
        self.send(&Packet::ReadyStatus { is_ready }).await
    }

    /// Waits for `GAME_START` and returns the entity this player controls
    pub async fn wait_for_game_start(
        &mut self,
        timeout: Duration,
    ) -> Result<EntityId, ClientError> {
        match self
            .recv_until(timeout, |p| matches!(p, Packet::GameStart { .. }))
            .await?
        {
            Packet::GameStart {
                controlled_entity_id,
            } => Ok(controlled_entity_id),
            _ => Err(ClientError::Closed),
        }
    }

    /// Drains packets until the server closes the stream
    pub async fn wait_for_close(&mut self, timeout: Duration) -> Result<(), ClientError> {
        let wait = async {
            loop {
                match self.recv().await {
                    Ok(packet) => debug!("Ignoring {:?} before close", packet.op_code()),
                    Err(ClientError::Closed) => return Ok(()),
                    Err(ClientError::Io(e)) if e.kind() == io::ErrorKind::ConnectionReset => {
                        return Ok(())
                    }
                    Err(e) => return Err(e),
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    /// Announces departure and closes our side of the stream
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        self.send(&Packet::DisconnectReq).await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn frame(packet: Packet) -> Vec<u8> {
        packet.encode().unwrap()
    }

    #[tokio::test]
    async fn test_login_accepts_ok_ack() {
        let stream = Builder::new()
            .write(&frame(Packet::ConnectReq {
                username: "Alice".to_string(),
            }))
            .read(&frame(Packet::ConnectAck {
                player_id: 3,
                status: ConnectStatus::Ok,
            }))
            .build();
        let mut client = LobbyClient::from_stream(stream);

        assert_eq!(client.login("Alice", TIMEOUT).await.unwrap(), 3);
        assert_eq!(client.player_id(), Some(3));
    }

    #[tokio::test]
    async fn test_login_reports_rejection() {
        let stream = Builder::new()
            .write(&frame(Packet::ConnectReq {
                username: "Bob".to_string(),
            }))
            .read(&frame(Packet::ConnectAck {
                player_id: 0,
                status: ConnectStatus::ServerFull,
            }))
            .build();
        let mut client = LobbyClient::from_stream(stream);

        assert!(matches!(
            client.login("Bob", TIMEOUT).await,
            Err(ClientError::Rejected(ConnectStatus::ServerFull))
        ));
        assert_eq!(client.player_id(), None);
    }

    #[tokio::test]
    async fn test_recv_skips_unknown_opcode() {
        let mut bytes = vec![0x42, 2, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 9, 9];
        bytes.extend(frame(Packet::NotifyDisconnect { player_id: 2 }));
        let stream = Builder::new().read(&bytes).build();
        let mut client = LobbyClient::from_stream(stream);

        assert_eq!(
            client.recv().await.unwrap(),
            Packet::NotifyDisconnect { player_id: 2 }
        );
    }

    #[tokio::test]
    async fn test_wait_for_game_start_skips_lobby_traffic() {
        let mut bytes = frame(Packet::NotifyReady {
            player_id: 1,
            is_ready: true,
        });
        bytes.extend(frame(Packet::GameStart {
            controlled_entity_id: 7,
        }));
        let stream = Builder::new().read(&bytes).build();
        let mut client = LobbyClient::from_stream(stream);

        assert_eq!(client.wait_for_game_start(TIMEOUT).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_recv_reports_close() {
        let stream = Builder::new().build();
        let mut client = LobbyClient::from_stream(stream);
        assert!(matches!(client.recv().await, Err(ClientError::Closed)));
    }
}
