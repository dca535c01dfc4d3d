//! Server network layer: WebSocket sessions over TCP
//!
//! Each accepted connection gets two tasks. The connection task reads intents
//! and applies them to the world; a writer task drains the session's bounded
//! outbound queue into the socket. Every accepted mutation is followed by a
//! broadcast tick and a queued write of the touched entity record.

use crate::broadcast::BroadcastEngine;
use crate::config::ServerConfig;
use crate::error::{PersistenceError, TransportError};
use crate::persistence::{PersistenceGateway, RecordWriter};
use crate::world::{Departure, MoveOutcome, World};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{Entity, EntityId, Handshake, Intent, ServerMessage, WS_PATH};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// How long a finished connection waits for its writer to flush queued
/// frames and the close frame.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Handles shared by every connection task.
#[derive(Clone)]
pub struct ServerContext {
    pub world: Arc<RwLock<World>>,
    pub broadcaster: Arc<BroadcastEngine>,
    pub gateway: PersistenceGateway,
    pub records: RecordWriter,
    pub queue_depth: usize,
}

pub struct Server {
    listener: TcpListener,
    context: ServerContext,
}

impl Server {
    pub async fn bind(
        config: &ServerConfig,
        world: World,
        gateway: PersistenceGateway,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on ws://{}{}", listener.local_addr()?, WS_PATH);
        let (records, _) = RecordWriter::spawn(gateway.clone());

        Ok(Server {
            listener,
            context: ServerContext {
                world: Arc::new(RwLock::new(world)),
                broadcaster: Arc::new(BroadcastEngine::new(config.view_radius)),
                gateway,
                records,
                // room for the handshake and the first snapshot
                queue_depth: config.queue_depth.max(2),
            },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn world(&self) -> Arc<RwLock<World>> {
        Arc::clone(&self.context.world)
    }

    /// Accepts connections until the listener fails irrecoverably.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Server started successfully");

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let context = self.context.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(context, stream, addr).await {
                            warn!("Connection from {} ended: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    /// Writes the map under the snapshot key.
    pub async fn save_snapshot(&self) -> Result<usize, PersistenceError> {
        save_world_snapshot(&self.context.world, &self.context.gateway).await
    }

    /// Ends every session as if it had disconnected, waits for the record
    /// writes that causes, then saves the final snapshot.
    pub async fn shutdown(&self) -> Result<usize, PersistenceError> {
        let ids = self.context.world.read().await.sessions().ids();
        if !ids.is_empty() {
            info!("Closing {} sessions", ids.len());
        }
        for id in ids {
            disconnect(&self.context, id).await;
        }

        self.context.records.drained().await;
        self.save_snapshot().await
    }

    /// Writes a snapshot every `every`, in addition to the one at shutdown.
    pub fn spawn_snapshot_timer(&self, every: Duration) -> JoinHandle<()> {
        let world = Arc::clone(&self.context.world);
        let gateway = self.context.gateway.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // Skip the first tick since it fires immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                match save_world_snapshot(&world, &gateway).await {
                    Ok(count) => debug!("Periodic snapshot: {} entities", count),
                    Err(e) => error!("Periodic snapshot failed: {}", e),
                }
            }
        })
    }
}

/// Copies the storable part of the registry under the read lock and writes
/// it on the blocking pool.
pub async fn save_world_snapshot(
    world: &RwLock<World>,
    gateway: &PersistenceGateway,
) -> Result<usize, PersistenceError> {
    let registry = world.read().await.persistent_registry();
    let gateway = gateway.clone();

    tokio::task::spawn_blocking(move || gateway.save_snapshot(&registry))
        .await
        .map_err(|e| PersistenceError::Storage(format!("snapshot task failed: {}", e)))?
}

fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == WS_PATH {
        return Ok(response);
    }
    let mut rejection = ErrorResponse::new(Some(format!(
        "no endpoint at {}",
        request.uri().path()
    )));
    *rejection.status_mut() = StatusCode::NOT_FOUND;
    Err(rejection)
}

async fn handle_connection(
    context: ServerContext,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), TransportError> {
    let ws_stream = accept_hdr_async(stream, check_path)
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();
    let (sender, mut receiver) = mpsc::channel::<String>(context.queue_depth);

    let session_id = {
        let mut world = context.world.write().await;
        let entity = match world.add_session(addr, sender.clone()) {
            Ok(entity) => entity,
            Err(e) => {
                drop(world);
                warn!("Refusing connection from {}: {}", addr, e);
                let frame = CloseFrame {
                    code: CloseCode::Again,
                    reason: e.to_string().into(),
                };
                let _ = write.send(Message::Close(Some(frame))).await;
                return Ok(());
            }
        };

        queue_handshake(&mut world, &entity, &sender)?;

        let world = world.downgrade();
        context.broadcaster.tick(&world);
        context.records.save(entity.clone());
        entity.id
    };
    // The session table now owns the only sender; dropping it there ends the writer.
    drop(sender);

    let mut writer = tokio::spawn(async move {
        while let Some(payload) = receiver.recv().await {
            if let Err(e) = write.send(Message::Text(payload)).await {
                debug!("Write to session {} failed: {}", session_id, e);
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => handle_command(&context, session_id, &text).await,
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => handle_command(&context, session_id, text).await,
                Err(_) => warn!("Non-text command from session {}", session_id),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Error reading from session {}: {}", session_id, e);
                break;
            }
        }
    }

    disconnect(&context, session_id).await;
    if timeout(WRITER_GRACE, &mut writer).await.is_err() {
        debug!("Writer of session {} did not finish, aborting", session_id);
        writer.abort();
    }
    Ok(())
}

/// Queues the handshake of a just-registered session. If that fails the
/// session and its entity are discarded before the error is returned.
fn queue_handshake(
    world: &mut World,
    entity: &Entity,
    sender: &mpsc::Sender<String>,
) -> Result<(), TransportError> {
    let queued = ServerMessage::Welcome(Handshake {
        client_id: entity.id,
    })
    .encode()
    .map_err(|e| TransportError::Encode(e.to_string()))
    .and_then(|handshake| {
        sender.try_send(handshake).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull(entity.id),
            TrySendError::Closed(_) => TransportError::ChannelClosed(entity.id),
        })
    });

    if queued.is_err() {
        world.discard_session(entity.id);
    }
    queued
}

/// Decodes one command token and applies it. Unknown tokens change nothing.
async fn handle_command(context: &ServerContext, session_id: EntityId, token: &str) {
    let Some(intent) = Intent::parse(token) else {
        warn!("Unknown command from session {}: {:?}", session_id, token);
        return;
    };

    let mut world = context.world.write().await;
    if let MoveOutcome::Moved(entity) = world.apply_intent(session_id, intent) {
        let world = world.downgrade();
        context.broadcaster.tick(&world);
        context.records.save(entity);
    }
}

async fn disconnect(context: &ServerContext, session_id: EntityId) {
    let mut world = context.world.write().await;
    let departure = world.remove_session(session_id);
    let world = world.downgrade();

    match departure {
        Departure::Unknown => {}
        Departure::Removed(entity) => {
            context.broadcaster.tick(&world);
            context.records.remove(entity.id);
        }
        Departure::LeftBehind(entity) => {
            context.broadcaster.tick(&world);
            info!(
                "Entity {} left at ({}, {}) as a static occupant",
                entity.id, entity.x, entity.y
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn request(path: &str) -> Request {
        Request::builder()
            .uri(format!("ws://127.0.0.1:8080{}", path))
            .body(())
            .unwrap()
    }

    #[test]
    fn test_check_path_accepts_ws_endpoint() {
        let response = Response::new(());
        assert!(check_path(&request("/ws"), response).is_ok());
    }

    #[test]
    fn test_check_path_rejects_other_paths() {
        let rejection = check_path(&request("/other"), Response::new(())).unwrap_err();
        assert_eq!(rejection.status(), StatusCode::NOT_FOUND);
    }

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn test_handshake_is_queued() {
        let mut world = World::new(&ServerConfig::default());
        let (tx, mut rx) = mpsc::channel(2);
        let entity = world.add_session(test_addr(), tx.clone()).unwrap();

        queue_handshake(&mut world, &entity, &tx).unwrap();

        let payload = rx.try_recv().unwrap();
        match ServerMessage::decode(&payload).unwrap() {
            ServerMessage::Welcome(handshake) => assert_eq!(handshake.client_id, entity.id),
            other => panic!("expected handshake, got {:?}", other),
        }
        assert!(world.sessions().contains(entity.id));
    }

    #[test]
    fn test_closed_queue_discards_new_session() {
        let mut world = World::new(&ServerConfig::default());
        let (tx, rx) = mpsc::channel(2);
        let entity = world.add_session(test_addr(), tx.clone()).unwrap();
        drop(rx);

        let result = queue_handshake(&mut world, &entity, &tx);

        assert!(matches!(result, Err(TransportError::ChannelClosed(1))));
        assert!(world.sessions().is_empty());
        assert!(world.registry().is_empty());

        // the spawn cell is free for the next connection
        let (tx, _rx) = mpsc::channel(2);
        assert!(world.add_session(test_addr(), tx).is_ok());
    }

    #[test]
    fn test_full_queue_discards_new_session() {
        let mut world = World::new(&ServerConfig {
            on_disconnect: crate::config::DisconnectPolicy::KeepStatic,
            ..ServerConfig::default()
        });
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send("stale".to_string()).unwrap();
        let entity = world.add_session(test_addr(), tx.clone()).unwrap();

        let result = queue_handshake(&mut world, &entity, &tx);

        assert!(matches!(result, Err(TransportError::QueueFull(1))));
        assert!(!world.registry().contains(entity.id));
        assert!(world.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_forgets_session_entities() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };
        let gateway = PersistenceGateway::new(Arc::new(MemoryStore::new()));
        let mut world = World::new(&config);
        world.seed_random(2, 4, 4, &mut rand::thread_rng());
        let (tx, _rx) = mpsc::channel(8);
        let me = world.add_session(test_addr(), tx).unwrap();
        gateway.save_entity(&me).unwrap();

        let server = Server::bind(&config, world, gateway.clone()).await.unwrap();
        assert_eq!(server.shutdown().await.unwrap(), 2);

        assert_eq!(gateway.load_entity(me.id).unwrap(), None);
        let restored = gateway.restore_registry().unwrap().unwrap();
        assert_eq!(restored.len(), 2);
        assert!(!restored.is_occupied(0, 0));
        assert!(server.world().read().await.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_bind_and_snapshot() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };
        let gateway = PersistenceGateway::new(Arc::new(MemoryStore::new()));
        let mut world = World::new(&config);
        world.seed_random(3, 5, 5, &mut rand::thread_rng());

        let server = Server::bind(&config, world, gateway.clone())
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        assert_eq!(server.save_snapshot().await.unwrap(), 3);
        let restored = gateway.restore_registry().unwrap().unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(server.world().read().await.registry().len(), 3);
    }
}
