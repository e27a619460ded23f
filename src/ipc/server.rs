//! Unix domain socket server for IPC
//!
//! Lets a UI press the start button, query the dialogue status and
//! subscribe to transition notifications.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::dialogue::{DialogueInput, Session};
use crate::events::DialogueEvent;

use super::protocol::{read_frame, write_frame, DialogueStatus, Notification, Request, Response};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    shutdown_tx: broadcast::Sender<()>,
    context: ClientContext,
}

/// Shared server state
struct ServerState {
    status: DialogueStatus,
    start_time: std::time::Instant,
}

/// Everything a client handler needs
#[derive(Clone)]
struct ClientContext {
    state: Arc<RwLock<ServerState>>,
    /// Route for UI inputs into the dialogue machine
    input_tx: mpsc::Sender<DialogueInput>,
    /// Source of notifications for subscribed clients
    event_tx: broadcast::Sender<DialogueEvent>,
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        input_tx: mpsc::Sender<DialogueInput>,
        event_tx: broadcast::Sender<DialogueEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path)
            .context("failed to bind Unix socket")?;

        // Owner-only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            status: DialogueStatus::default(),
            start_time: std::time::Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            shutdown_tx,
            context: ClientContext {
                state,
                input_tx,
                event_tx,
            },
        })
    }

    /// Record the latest dialogue state reported by the machine
    pub async fn set_status(&self, state: &str, session: &Session) {
        let mut server_state = self.context.state.write().await;
        if server_state.status.state != state {
            debug!(
                from = %server_state.status.state,
                to = %state,
                "IPC server: dialogue state updated"
            );
        }
        server_state.status.state = state.to_string();
        server_state.status.session = session.clone();
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref()
            .context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = self.context.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, context: ClientContext) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        // Frames are read on their own task so a partial read is never
        // interrupted by an outgoing notification
        let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(8);
        let read_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(frame)) => {
                        if frame_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("client disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(?e, "failed to read frame, disconnecting");
                        break;
                    }
                }
            }
        });

        let mut events: Option<broadcast::Receiver<DialogueEvent>> = None;

        let result = loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else { break Ok(()) };

                    let response = match serde_json::from_slice::<Request>(&frame) {
                        Ok(request) => {
                            debug!(?request, "received request");
                            let (response, subscribe) = Self::process_request(request, &context).await;
                            if subscribe && events.is_none() {
                                events = Some(context.event_tx.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            response
                        }
                        Err(e) => Response::error("bad_request", e.to_string()),
                    };

                    if let Err(e) = write_frame(&mut writer, &response).await {
                        break Err(e);
                    }
                }

                event = next_event(&mut events) => match event {
                    Ok(event) => {
                        if let Err(e) = write_frame(&mut writer, &Notification::Dialogue { event }).await {
                            break Err(e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "notification receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        events = None;
                    }
                },
            }
        };

        read_task.abort();
        result
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, context: &ClientContext) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let mut state = context.state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                (Response::Status(state.status.clone()), false)
            }

            Request::Click => (Self::forward(DialogueInput::Click, context).await, false),

            Request::Stop => (Self::forward(DialogueInput::Stop, context).await, false),

            Request::Subscribe => (Response::Subscribed, true),
        }
    }

    async fn forward(input: DialogueInput, context: &ClientContext) -> Response {
        info!(?input, "UI input via IPC");
        match context.input_tx.send(input).await {
            Ok(()) => Response::Accepted,
            Err(_) => Response::error("dialogue_stopped", "the dialogue machine is not running"),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Next notification, or never when not subscribed
async fn next_event(
    events: &mut Option<broadcast::Receiver<DialogueEvent>>,
) -> Result<DialogueEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        server: Arc<Server>,
        input_rx: mpsc::Receiver<DialogueInput>,
        event_tx: broadcast::Sender<DialogueEvent>,
        socket_path: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn start_server() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("run").join("dialogue.sock");
        let (input_tx, input_rx) = mpsc::channel(8);
        let (event_tx, _) = broadcast::channel(16);

        let server = Arc::new(Server::new(&socket_path, input_tx, event_tx.clone()).unwrap());
        let running = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = running.run().await;
        });

        Harness {
            server,
            input_rx,
            event_tx,
            socket_path,
            _dir: dir,
        }
    }

    async fn call(stream: &mut UnixStream, request: &Request) -> Response {
        write_frame(stream, request).await.unwrap();
        let frame = read_frame(stream).await.unwrap().unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let harness = start_server();
        let mut client = UnixStream::connect(&harness.socket_path).await.unwrap();

        assert_eq!(call(&mut client, &Request::Ping).await, Response::Pong);
    }

    #[tokio::test]
    async fn test_click_reaches_machine() {
        let mut harness = start_server();
        let mut client = UnixStream::connect(&harness.socket_path).await.unwrap();

        assert_eq!(call(&mut client, &Request::Click).await, Response::Accepted);
        assert_eq!(harness.input_rx.recv().await, Some(DialogueInput::Click));
    }

    #[tokio::test]
    async fn test_click_without_machine() {
        let harness = start_server();
        drop(harness.input_rx);
        let mut client = UnixStream::connect(&harness.socket_path).await.unwrap();

        match call(&mut client, &Request::Click).await {
            Response::Error { code, .. } => assert_eq!(code, "dialogue_stopped"),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_status_reflects_last_transition() {
        let harness = start_server();
        let session = Session {
            person: Some("Rasmus Blanck".into()),
            ..Session::default()
        };
        harness.server.set_status("AskDay", &session).await;

        let mut client = UnixStream::connect(&harness.socket_path).await.unwrap();
        match call(&mut client, &Request::GetStatus).await {
            Response::Status(status) => {
                assert_eq!(status.state, "AskDay");
                assert_eq!(status.session, session);
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_notifications() {
        let harness = start_server();
        let mut client = UnixStream::connect(&harness.socket_path).await.unwrap();

        assert_eq!(call(&mut client, &Request::Subscribe).await, Response::Subscribed);

        let event = DialogueEvent::Transition {
            from: "WaitToStart".into(),
            to: "Greeting".into(),
            session: Session::default(),
        };
        harness.event_tx.send(event.clone()).unwrap();

        let frame = read_frame(&mut client).await.unwrap().unwrap();
        let notification: Notification = serde_json::from_slice(&frame).unwrap();
        assert_eq!(notification, Notification::Dialogue { event });
    }

    #[tokio::test]
    async fn test_malformed_request() {
        let harness = start_server();
        let mut client = UnixStream::connect(&harness.socket_path).await.unwrap();

        write_frame(&mut client, &serde_json::json!({ "type": "dance" })).await.unwrap();
        let frame = read_frame(&mut client).await.unwrap().unwrap();
        let response: Response = serde_json::from_slice(&frame).unwrap();
        assert!(matches!(response, Response::Error { ref code, .. } if code == "bad_request"));

        // Connection stays usable
        assert_eq!(call(&mut client, &Request::Ping).await, Response::Pong);
    }

    #[tokio::test]
    async fn test_shutdown_removes_socket() {
        let harness = start_server();
        assert!(harness.socket_path.exists());

        harness.server.shutdown().await;
        assert!(!harness.socket_path.exists());
    }
}
