//! Server Event Loop
//!
//! This module implements the loop that owns the listening socket, the set of
//! active sessions and the registry. It waits until something is actionable,
//! services it, and waits again:
//!
//! ```text
//!              ┌──────────────────────────────┐
//!              │   Idle: select! over         │
//!              │   shutdown, accept, events   │
//!              └──────┬─────────┬─────────────┘
//!        accept ready │         │ session event
//!                     ▼         ▼
//!          ┌──────────────┐  ┌─────────────────────────────┐
//!          │ new Session  │  │ Message -> CommandHandler   │
//!          │ into the set │  │   Reply -> write response   │
//!          └──────────────┘  │   Disconnect -> remove      │
//!                            │ Closed / Failed -> remove   │
//!                            └─────────────────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! The loop runs every command to completion before it waits again, so the
//! registry is only ever touched by one command at a time. Reader tasks only
//! read sockets and send events over a channel. With a `current_thread`
//! runtime the whole server runs on one OS thread.
//!
//! A read or write failure ends only the affected session; other clients keep
//! being served.
//!
//! ## Known Limitations
//!
//! - Silent peers keep their slot forever; there are no idle timeouts.
//! - Responses are written inline by the loop. A peer that pipelines many
//!   commands and never reads the answers can fill its socket buffer, and the
//!   loop then stalls on that write, holding up every other session until the
//!   peer reads or disconnects.

use crate::commands::{CommandHandler, Outcome};
use crate::connection::{
    ConnectionStats, Framing, Session, SessionEvent, SessionEventKind, SessionId,
};
use crate::storage::Registry;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Capacity of the channel between reader tasks and the loop
const EVENT_QUEUE_SIZE: usize = 1024;

/// Why a session left the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Bye,
    Eof,
    Error,
}

/// The registry server.
pub struct Server {
    listener: TcpListener,
    handler: CommandHandler,
    framing: Framing,

    /// Active set: every connected session, keyed by id
    sessions: BTreeMap<SessionId, Session>,
    next_id: SessionId,

    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,

    stats: Arc<ConnectionStats>,
}

impl Server {
    /// Creates a server that serves `registry` on an already bound listener.
    pub fn new(listener: TcpListener, registry: Registry, framing: Framing) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);

        Self {
            listener,
            handler: CommandHandler::new(registry),
            framing,
            sessions: BTreeMap::new(),
            next_id: 1,
            events_tx,
            events_rx,
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns a handle to the connection statistics.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Number of sessions currently in the active set.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Serves clients until `shutdown` completes, then closes every session
    /// and hands the registry back.
    pub async fn run_until<F>(mut self, shutdown: F) -> Registry
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => self.handle_accept(accepted),
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            }
        }

        self.shutdown()
    }

    /// Serves clients until Ctrl+C is pressed.
    pub async fn run_until_ctrl_c(self) -> Registry {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received, stopping server...");
        })
        .await
    }

    fn handle_accept(&mut self, result: std::io::Result<(TcpStream, SocketAddr)>) {
        let (stream, peer) = match result {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                return;
            }
        };

        let id = self.next_id;
        self.next_id += 1;

        let session = Session::spawn(
            id,
            stream,
            peer,
            self.framing,
            self.events_tx.clone(),
            Arc::clone(&self.stats),
        );
        self.sessions.insert(id, session);

        info!(peer = %peer, session = id, "Client connected");
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        let SessionEvent { id, kind } = event;

        match kind {
            SessionEventKind::Message(message) => self.handle_message(id, &message).await,
            SessionEventKind::Closed => self.remove_session(id, CloseReason::Eof),
            SessionEventKind::Failed(e) => {
                warn!(session = id, error = %e, "Read failed, closing session");
                self.remove_session(id, CloseReason::Error);
            }
        }
    }

    async fn handle_message(&mut self, id: SessionId, message: &[u8]) {
        let Some(session) = self.sessions.get_mut(&id) else {
            // queued before the session was removed
            trace!(session = id, "Dropping message for closed session");
            return;
        };

        self.stats.command_processed();

        let result = match self.handler.execute(message) {
            Outcome::Reply(response) => {
                debug!(
                    peer = %session.peer(),
                    error = response.is_error(),
                    "Command executed"
                );
                session.send(&response).await
            }
            Outcome::Disconnect => {
                self.remove_session(id, CloseReason::Bye);
                return;
            }
        };

        if let Err(e) = result {
            warn!(session = id, error = %e, "Write failed, closing session");
            self.remove_session(id, CloseReason::Error);
        }
    }

    fn remove_session(&mut self, id: SessionId, reason: CloseReason) {
        if let Some(session) = self.sessions.remove(&id) {
            info!(
                peer = %session.peer(),
                session = id,
                reason = ?reason,
                "Client disconnected"
            );
        }
    }

    fn shutdown(self) -> Registry {
        let Server {
            handler,
            sessions,
            stats,
            ..
        } = self;

        drop(sessions);

        let registry = handler.into_registry();
        let registry_stats = registry.stats();
        info!(
            connections = stats.connections_accepted.load(Ordering::Relaxed),
            commands = stats.commands_processed.load(Ordering::Relaxed),
            entries = registry.len(),
            hits = registry_stats.hits,
            misses = registry_stats.misses,
            inserts = registry_stats.inserts,
            updates = registry_stats.updates,
            rejected = registry_stats.rejected,
            "Server stopped"
        );

        registry
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("framing", &self.framing)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::UpdatePolicy;
    use bytes::Bytes;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout, Duration};

    struct TestServer {
        addr: SocketAddr,
        stats: Arc<ConnectionStats>,
        shutdown: oneshot::Sender<()>,
        handle: JoinHandle<Registry>,
    }

    impl TestServer {
        async fn stop(self) -> Registry {
            let _ = self.shutdown.send(());
            self.handle.await.unwrap()
        }
    }

    async fn create_test_server(policy: UpdatePolicy, framing: Framing) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut registry = Registry::new(policy);
        registry
            .put("Hungary".to_string(), Bytes::from("Budapest"))
            .unwrap();

        let server = Server::new(listener, registry, framing);
        let addr = server.local_addr().unwrap();
        let stats = server.stats();
        let (shutdown, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        TestServer {
            addr,
            stats,
            shutdown,
            handle,
        }
    }

    struct Client {
        reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
        writer: tokio::net::tcp::OwnedWriteHalf,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read_half, writer) = stream.into_split();
            Self {
                reader: BufReader::new(read_half),
                writer,
            }
        }

        async fn send(&mut self, data: &str) {
            self.writer.write_all(data.as_bytes()).await.unwrap();
        }

        async fn read_line(&mut self) -> String {
            let mut line = String::new();
            timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for response")
                .unwrap();
            line
        }

        async fn request(&mut self, data: &str) -> String {
            self.send(data).await;
            self.read_line().await
        }
    }

    #[tokio::test]
    async fn test_get_and_put() {
        let server = create_test_server(UpdatePolicy::Allow, Framing::Lines).await;
        let mut client = Client::connect(server.addr).await;

        assert_eq!(client.request("GET Hungary\n").await, "[Hungary] => [Budapest]\n");
        assert_eq!(client.request("PUT Japan Tokyo\n").await, "[Japan] <= [Tokyo]\n");
        assert_eq!(client.request("get Japan\n").await, "[Japan] => [Tokyo]\n");
        assert_eq!(
            client.request("GET Narnia\n").await,
            "Key [Narnia] not found in registry\n"
        );
        assert_eq!(client.request("HELLO\n").await, "???\n");

        let registry = server.stop().await;
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_update() {
        let server = create_test_server(UpdatePolicy::Strict, Framing::Lines).await;
        let mut client = Client::connect(server.addr).await;

        assert_eq!(
            client.request("PUT Hungary Pest\n").await,
            "Key [Hungary] already exists, updating keys are not allowed\n"
        );
        assert_eq!(client.request("GET Hungary\n").await, "[Hungary] => [Budapest]\n");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_bye_closes_without_response() {
        let server = create_test_server(UpdatePolicy::Allow, Framing::Lines).await;
        let mut client = Client::connect(server.addr).await;

        client.send("bye\n").await;

        let mut buf = [0u8; 64];
        let n = timeout(Duration::from_secs(2), client.reader.read(&mut buf))
            .await
            .expect("timed out waiting for close")
            .unwrap();
        assert_eq!(n, 0);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 0);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_commands_after_bye_are_not_served() {
        let server = create_test_server(UpdatePolicy::Allow, Framing::Lines).await;
        let mut client = Client::connect(server.addr).await;

        // same segment: BYE, then a PUT that must never run
        client.send("BYE\nPUT Late value\n").await;

        let mut buf = [0u8; 64];
        let n = timeout(Duration::from_secs(2), client.reader.read(&mut buf))
            .await
            .expect("timed out waiting for close")
            .unwrap();
        assert_eq!(n, 0);

        let registry = server.stop().await;
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_pipelined_commands_get_one_response_each() {
        let server = create_test_server(UpdatePolicy::Allow, Framing::Lines).await;
        let mut client = Client::connect(server.addr).await;

        client.send("PUT Peru Lima\nGET Peru\nGET Hungary\n").await;

        assert_eq!(client.read_line().await, "[Peru] <= [Lima]\n");
        assert_eq!(client.read_line().await, "[Peru] => [Lima]\n");
        assert_eq!(client.read_line().await, "[Hungary] => [Budapest]\n");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_split_command_is_reassembled() {
        let server = create_test_server(UpdatePolicy::Allow, Framing::Lines).await;
        let mut client = Client::connect(server.addr).await;

        client.send("GET Hun").await;
        sleep(Duration::from_millis(50)).await;
        client.send("gary\n").await;

        assert_eq!(client.read_line().await, "[Hungary] => [Budapest]\n");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_unterminated_command_is_answered() {
        let server = create_test_server(UpdatePolicy::Allow, Framing::Lines).await;
        let mut client = Client::connect(server.addr).await;

        // one-shot client: no newline, then wait for the answer
        client.send("GET Hungary").await;
        assert_eq!(client.read_line().await, "[Hungary] => [Budapest]\n");

        // the session keeps working afterwards
        assert_eq!(client.request("PUT Peru Lima").await, "[Peru] <= [Lima]\n");
        assert_eq!(client.request("GET Peru\n").await, "[Peru] => [Lima]\n");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_single_read_framing() {
        let server = create_test_server(UpdatePolicy::Allow, Framing::SingleRead).await;
        let mut client = Client::connect(server.addr).await;

        assert_eq!(client.request("GET Hungary\n").await, "[Hungary] => [Budapest]\n");
        assert_eq!(client.request("PUT A b\n").await, "[A] <= [b]\n");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_clients_share_registry() {
        let server = create_test_server(UpdatePolicy::Allow, Framing::Lines).await;
        let mut alice = Client::connect(server.addr).await;
        let mut bob = Client::connect(server.addr).await;

        assert_eq!(alice.request("PUT Chile Santiago\n").await, "[Chile] <= [Santiago]\n");
        assert_eq!(bob.request("GET Chile\n").await, "[Chile] => [Santiago]\n");

        // one client leaving does not affect the other
        drop(alice);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(bob.request("GET Hungary\n").await, "[Hungary] => [Budapest]\n");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let server = create_test_server(UpdatePolicy::Allow, Framing::Lines).await;

        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = Client::connect(server.addr).await;
        client.request("GET Hungary\n").await;

        assert_eq!(server.stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(server.stats.commands_processed.load(Ordering::Relaxed), 1);
        assert!(server.stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(server.stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 0);

        server.stop().await;
    }
}
