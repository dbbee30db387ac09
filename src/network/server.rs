//! WebSocket Game Server
//!
//! Async WebSocket server for player connections. Bets and cashouts are
//! forwarded to the round owner; round events are fanned out to every
//! connection.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::Instant;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::env_parse;
use crate::core::clock::Clock;
use crate::game::bet::UserId;
use crate::game::error::GameError;
use crate::game::events::RoundEvent;
use crate::game::owner::RoundHandle;
use crate::ledger::BalanceStore;
use crate::network::protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Close connections silent for this long.
    pub idle_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(120),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_parse("CRASH_BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_connections: env_parse("CRASH_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            idle_timeout: env_parse::<u64>("CRASH_IDLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            version: defaults.version,
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state.
#[derive(Debug)]
struct ConnectedClient {
    /// Users this connection has bet for.
    users: BTreeSet<UserId>,
    /// Connection time.
    connected_at: Instant,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// Shared per-connection context.
#[derive(Clone)]
struct Context {
    round: RoundHandle,
    ledger: Arc<dyn BalanceStore>,
    clock: Arc<dyn Clock>,
    clients: Clients,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Round owner handle.
    round: RoundHandle,
    /// Balance store (balance and faucet requests).
    ledger: Arc<dyn BalanceStore>,
    /// Clock for pongs and faucet claims.
    clock: Arc<dyn Clock>,
    /// Round event fan-out.
    events: broadcast::Sender<RoundEvent>,
    /// Connected clients.
    clients: Clients,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(
        config: ServerConfig,
        round: RoundHandle,
        ledger: Arc<dyn BalanceStore>,
        clock: Arc<dyn Clock>,
        events: broadcast::Sender<RoundEvent>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            round,
            ledger,
            clock,
            events,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Crash server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Ask the accept loop and every connection to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let ctx = Context {
            round: self.round.clone(),
            ledger: self.ledger.clone(),
            clock: self.clock.clone(),
            clients: self.clients.clone(),
        };
        let idle_timeout = self.config.idle_timeout;
        let mut events_rx = self.events.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            // Register client
            {
                let mut clients = ctx.clients.write().await;
                clients.insert(addr, ConnectedClient {
                    users: BTreeSet::new(),
                    connected_at: Instant::now(),
                });
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let mut last_activity = Instant::now();

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                last_activity = Instant::now();
                                let reply = match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => Self::handle_client_message(addr, client_msg, &ctx).await,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        ServerMessage::Error(ServerError::new(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        ))
                                    }
                                };
                                if msg_tx.send(reply).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                                last_activity = Instant::now();
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    event = events_rx.recv() => {
                        match event {
                            Ok(event) => {
                                let forward = {
                                    let clients = ctx.clients.read().await;
                                    let users = clients.get(&addr).map(|c| &c.users);
                                    filter_event(&event, users)
                                };
                                if let Some(msg) = forward {
                                    if msg_tx.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!("Client {} lagged, skipped {} round events", addr, skipped);
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                let _ = msg_tx.send(ServerMessage::Shutdown {
                                    reason: "Round owner stopped".to_string(),
                                }).await;
                                break;
                            }
                        }
                    }
                    _ = tokio::time::sleep_until(last_activity + idle_timeout) => {
                        debug!("Client {} idle, closing", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Let queued frames flush, then close.
            drop(msg_tx);
            let _ = tokio::time::timeout(Duration::from_secs(1), sender_task).await;

            // Remove client
            let removed = ctx.clients.write().await.remove(&addr);
            if let Some(client) = removed {
                info!(
                    "Client {} cleaned up after {:?} ({} users)",
                    addr,
                    client.connected_at.elapsed(),
                    client.users.len()
                );
            }
        });
    }

    /// Handle a client message, producing exactly one reply.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        ctx: &Context,
    ) -> ServerMessage {
        match msg {
            ClientMessage::PlaceBet(place) => {
                let request = match place.to_request() {
                    Ok(r) => r,
                    Err(e) => return error_reply(&e),
                };
                let user_id = request.user_id.clone();
                match ctx.round.place_bet(request).await {
                    Ok(bet) => {
                        if let Some(client) = ctx.clients.write().await.get_mut(&addr) {
                            client.users.insert(user_id);
                        }
                        ServerMessage::BetAccepted {
                            user_id: bet.user_id,
                            round_id: bet.round_id,
                            bet_amount: bet.amount,
                            auto_cashout: bet.auto_cashout,
                        }
                    }
                    Err(e) => error_reply(&e),
                }
            }
            ClientMessage::Cashout { user_id } => {
                let user_id = UserId::new(user_id);
                match ctx.round.cashout(user_id.clone()).await {
                    Ok(receipt) => ServerMessage::CashoutResult {
                        user_id,
                        round_id: receipt.round_id,
                        multiplier: receipt.multiplier,
                        win_amount: receipt.win_amount,
                        auto: false,
                    },
                    Err(e) => error_reply(&e),
                }
            }
            ClientMessage::Balance { user_id } => {
                let user_id = UserId::new(user_id);
                match ctx.ledger.balance(&user_id).await {
                    Ok(balance) => ServerMessage::Balance { user_id, balance },
                    Err(e) => ServerMessage::Error(ServerError::from(&e)),
                }
            }
            ClientMessage::Claim { user_id } => {
                let user_id = UserId::new(user_id);
                match ctx.ledger.claim(&user_id, ctx.clock.now_ms()).await {
                    Ok(balance) => ServerMessage::Balance { user_id, balance },
                    Err(e) => ServerMessage::Error(ServerError::from(&e)),
                }
            }
            ClientMessage::ClientSeed {
                user_id,
                client_seed,
            } => {
                let user_id = UserId::new(user_id);
                match ctx
                    .round
                    .contribute_client_seed(user_id.clone(), client_seed)
                    .await
                {
                    Ok((round_id, seed_hash)) => ServerMessage::ClientSeedAccepted {
                        user_id,
                        round_id,
                        seed_hash,
                    },
                    Err(e) => error_reply(&e),
                }
            }
            ClientMessage::Sync => match ctx.round.snapshot().await {
                Ok(Some(snapshot)) => ServerMessage::RoundState(snapshot.into()),
                Ok(None) => error_reply(&GameError::RoundNotRunning),
                Err(e) => error_reply(&e),
            },
            ClientMessage::Ping { timestamp } => ServerMessage::Pong {
                timestamp,
                server_time: ctx.clock.now_ms(),
            },
        }
    }
}

fn error_reply(err: &GameError) -> ServerMessage {
    ServerMessage::Error(ServerError::from(err))
}

/// Decide whether a connection sees `event`.
///
/// Round start and crash go to everyone. Auto-cashout results go only to
/// connections that bet for that user; manual cashouts were already
/// answered directly.
fn filter_event(event: &RoundEvent, users: Option<&BTreeSet<UserId>>) -> Option<ServerMessage> {
    match event {
        RoundEvent::CashedOut { user_id, auto, .. } => {
            if *auto && users.map_or(false, |u| u.contains(user_id)) {
                ServerMessage::from_round_event(event)
            } else {
                None
            }
        }
        _ => ServerMessage::from_round_event(event),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_tungstenite::connect_async;

    use crate::core::clock::TokioClock;
    use crate::core::units::{CrashPoint, Multiplier, Tokens};
    use crate::fairness::audit::MemoryAuditStore;
    use crate::fairness::seed::{FixedSeedSource, SeedCommitment};
    use crate::game::engine::{EngineConfig, RoundEngine};
    use crate::game::owner::{OwnerConfig, RoundOwner};
    use crate::ledger::InMemoryBalanceStore;

    fn cashed_out(user: &str, auto: bool) -> RoundEvent {
        RoundEvent::CashedOut {
            user_id: UserId::new(user),
            round_id: 1,
            multiplier: Multiplier::from_thousandths(2000),
            win_amount: Tokens::whole(2),
            auto,
        }
    }

    #[test]
    fn test_auto_cashout_only_to_bettor_connections() {
        let mut users = BTreeSet::new();
        users.insert(UserId::new("alice"));

        assert!(filter_event(&cashed_out("alice", true), Some(&users)).is_some());
        assert!(filter_event(&cashed_out("bob", true), Some(&users)).is_none());
        assert!(filter_event(&cashed_out("alice", false), Some(&users)).is_none());
        assert!(filter_event(&cashed_out("alice", true), None).is_none());
    }

    #[test]
    fn test_round_events_go_to_everyone() {
        let start = RoundEvent::RoundStarted {
            round_id: 2,
            seed_hash: SeedCommitment::from_hex("ab"),
            client_seed: "abc".into(),
            contributions: Vec::new(),
            next_seed_hash: Some(SeedCommitment::from_hex("cd")),
            start_time: 0,
        };
        let crash = RoundEvent::RoundCrashed {
            round_id: 2,
            crash_point: CrashPoint::MIN,
            server_seed: String::new(),
            client_seed: String::new(),
            nonce: 0,
            end_time: 0,
        };
        assert!(filter_event(&start, None).is_some());
        assert!(filter_event(&crash, None).is_some());
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_connections, 1000);
    }

    async fn next_reply<S>(ws: &mut S) -> ServerMessage
    where
        S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection closed")
                .expect("websocket error");
            if let Message::Text(text) = frame {
                let msg = ServerMessage::from_json(&text).unwrap();
                // Skip round broadcasts; callers want the direct reply.
                if !matches!(msg, ServerMessage::RoundStart { .. } | ServerMessage::RoundCrash { .. }) {
                    return msg;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_bet_and_cashout_over_websocket() {
        let config = EngineConfig {
            client_seed: "abc".into(),
            first_nonce: 1,
            ..EngineConfig::default()
        };
        let engine = RoundEngine::new(
            config,
            Box::new(FixedSeedSource::new(vec!["0".repeat(64); 8])),
        );
        let ledger = Arc::new(InMemoryBalanceStore::new());
        ledger.set_balance(&UserId::new("alice"), Tokens::whole(50)).await;

        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let (events_tx, _) = broadcast::channel(64);
        let (handle, _owner) = RoundOwner::spawn(
            engine,
            clock.clone(),
            ledger.clone(),
            Arc::new(MemoryAuditStore::new()),
            Arc::new(events_tx.clone()),
            OwnerConfig::default(),
        );

        let server = Arc::new(GameServer::new(
            ServerConfig::default(),
            handle,
            ledger.clone(),
            clock,
            events_tx,
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let runner = server.clone();
        let serve = tokio::spawn(async move { runner.serve(listener).await });

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        ws.send(Message::Text(
            r#"{"type":"place_bet","user_id":"alice","bet_amount":10}"#.to_string(),
        ))
        .await
        .unwrap();
        match next_reply(&mut ws).await {
            ServerMessage::BetAccepted { user_id, round_id, bet_amount, .. } => {
                assert_eq!(user_id.as_str(), "alice");
                assert_eq!(round_id, 1);
                assert_eq!(bet_amount, Tokens::whole(10));
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(server.connection_count().await, 1);

        ws.send(Message::Text(
            r#"{"type":"place_bet","user_id":"alice","bet_amount":10}"#.to_string(),
        ))
        .await
        .unwrap();
        match next_reply(&mut ws).await {
            ServerMessage::Error(err) => assert_eq!(err.code, ErrorCode::DuplicateBet),
            other => panic!("unexpected reply {:?}", other),
        }

        ws.send(Message::Text(r#"{"type":"cashout","user_id":"alice"}"#.to_string()))
            .await
            .unwrap();
        match next_reply(&mut ws).await {
            ServerMessage::CashoutResult { win_amount, auto, .. } => {
                assert!(!auto);
                assert!(win_amount >= Tokens::whole(10));
            }
            other => panic!("unexpected reply {:?}", other),
        }

        ws.send(Message::Text(r#"{"type":"sync"}"#.to_string())).await.unwrap();
        assert!(matches!(next_reply(&mut ws).await, ServerMessage::RoundState(_)));

        ws.send(Message::Text(
            r#"{"type":"client_seed","user_id":"alice","client_seed":"lucky"}"#.to_string(),
        ))
        .await
        .unwrap();
        match next_reply(&mut ws).await {
            ServerMessage::ClientSeedAccepted { user_id, round_id, .. } => {
                assert_eq!(user_id.as_str(), "alice");
                assert!(round_id >= 2);
            }
            other => panic!("unexpected reply {:?}", other),
        }

        ws.send(Message::Text(
            r#"{"type":"client_seed","user_id":"alice","client_seed":""}"#.to_string(),
        ))
        .await
        .unwrap();
        match next_reply(&mut ws).await {
            ServerMessage::Error(err) => assert_eq!(err.code, ErrorCode::InvalidClientSeed),
            other => panic!("unexpected reply {:?}", other),
        }

        ws.send(Message::Text("not json".to_string())).await.unwrap();
        match next_reply(&mut ws).await {
            ServerMessage::Error(err) => assert_eq!(err.code, ErrorCode::InvalidInput),
            other => panic!("unexpected reply {:?}", other),
        }

        ws.close(None).await.unwrap();
        let mut remaining = server.connection_count().await;
        for _ in 0..50 {
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            remaining = server.connection_count().await;
        }
        assert_eq!(remaining, 0);

        server.shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(5), serve).await;
    }
}
