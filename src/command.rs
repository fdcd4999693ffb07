//! Local command socket. Other processes connect and inject relay writes
//! that end up on the device through the device loop.
use crate::consts::peer_op;
use crate::error::PeerError;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Request forwarded to the device loop.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct RelayRequest {
    pub on: bool,
    pub peer: SocketAddr,
}

/// Single decoded peer message.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PeerCommand {
    Relay(bool),
    Close,
}

/// Read one command. `Ok(None)` on clean end of stream between commands.
pub async fn read_command<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<PeerCommand>, PeerError> {
    let code = match reader.read_u8().await {
        Ok(code) => code,
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    match code {
        peer_op::RELAY => {
            let state = reader.read_u8().await?;
            Ok(Some(PeerCommand::Relay(state != 0)))
        }
        peer_op::CLOSE => Ok(Some(PeerCommand::Close)),
        other => Err(PeerError::UnknownCommand(other)),
    }
}

async fn serve_peer(
    mut stream: TcpStream,
    peer: SocketAddr,
    requests: mpsc::Sender<RelayRequest>,
) -> Result<(), PeerError> {
    while let Some(command) = read_command(&mut stream).await? {
        debug!("Command from {}: {:?}", peer, command);
        match command {
            PeerCommand::Relay(on) => {
                requests
                    .send(RelayRequest { on, peer })
                    .await
                    .map_err(|_| PeerError::CoreGone)?;
            }
            PeerCommand::Close => break,
        }
    }
    Ok(())
}

pub struct CommandServer {
    listener: TcpListener,
    /// Currently connected peers.
    peers: HashSet<SocketAddr>,
    requests: mpsc::Sender<RelayRequest>,
}

impl CommandServer {
    pub async fn bind(addr: &str, requests: mpsc::Sender<RelayRequest>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Command socket listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            peers: HashSet::new(),
            requests,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve peers until shutdown. Peer failures only drop that
    /// peer; the listener stays up.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut tasks: JoinSet<(SocketAddr, Result<(), PeerError>)> = JoinSet::new();
        while !*shutdown.borrow() {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("Command peer connected: {}", peer);
                        self.peers.insert(peer);
                        let requests = self.requests.clone();
                        tasks.spawn(async move {
                            let result = serve_peer(stream, peer, requests).await;
                            (peer, result)
                        });
                    }
                    Err(err) => warn!("Accept failed: {}", err),
                },
                Some(joined) = tasks.join_next() => match joined {
                    Ok((peer, result)) => {
                        self.peers.remove(&peer);
                        match result {
                            Ok(()) => info!("Command peer {} closed", peer),
                            Err(err) => warn!("Dropping command peer {}: {}", peer, err),
                        }
                    }
                    Err(err) => warn!("Command peer task failed: {}", err),
                },
            }
        }
        tasks.shutdown().await;
        info!("Command socket closing ({} peers dropped)", self.peers.len());
    }
}
