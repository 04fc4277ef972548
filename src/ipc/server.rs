//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications of
//! engine events to subscribed clients. Recognizer bridges feed capture
//! signals into the engine through the same connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::net::UnixStream;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::capture::{RecognizerGuard, RecognizerRegistry};
use crate::commands::CommandEntry;
use crate::capture::CaptureSignal;
use crate::engine::{EngineInput, VoiceSnapshot};
use crate::events::EngineEvent;

use super::protocol::{Notification, Request, Response, VoiceStatus, MAX_FRAME_LEN};

/// Channels connecting the server to the voice engine
#[derive(Clone)]
pub struct EngineLink {
    pub input_tx: mpsc::Sender<EngineInput>,
    pub event_tx: broadcast::Sender<EngineEvent>,
    pub recognizers: RecognizerRegistry,
    pub commands: Arc<Vec<CommandEntry>>,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
    link: EngineLink,
}

/// Shared server state
struct ServerState {
    status: VoiceStatus,
    start_time: Instant,
}

/// Everything a client handler needs
#[derive(Clone)]
struct ClientContext {
    state: Arc<RwLock<ServerState>>,
    link: EngineLink,
}

/// Per-connection subscription state
#[derive(Default)]
struct Subscription {
    events: Option<broadcast::Receiver<EngineEvent>>,
    recognizer: Option<RecognizerGuard>,
}

/// A frame read from a client
enum Incoming {
    Request(Request),
    Malformed(String),
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, link: EngineLink) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            status: VoiceStatus::default(),
            start_time: Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
            link,
        })
    }

    /// Update the published voice status
    pub async fn set_snapshot(&self, snapshot: VoiceSnapshot) {
        let mut state = self.state.write().await;
        let old_status = state.status.status;
        let new_status = snapshot.status;
        state.status.apply(snapshot);

        if old_status != new_status {
            info!(from = %old_status, to = %new_status, "IPC server: status updated");
        }
    }

    /// Keep the published status in sync with engine snapshots
    pub async fn sync_status(&self, mut event_rx: broadcast::Receiver<EngineEvent>) {
        loop {
            match event_rx.recv().await {
                Ok(EngineEvent::StatusChanged { snapshot }) => {
                    self.set_snapshot(snapshot).await;
                }
                Ok(event) => {
                    debug!(%event, "engine event observed");
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "status receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let ctx = ClientContext {
                        state: Arc::clone(&self.state),
                        link: self.link.clone(),
                    };
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, ctx) => {
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
    async fn handle_client(stream: UnixStream, ctx: ClientContext) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (incoming_tx, mut incoming_rx) = mpsc::channel::<Incoming>(16);

        // Reading happens on its own task so pushes never cut a frame in half
        let reader_task = tokio::spawn(async move {
            if let Err(e) = Self::read_requests(&mut reader, incoming_tx).await {
                debug!(?e, "client reader stopped");
            }
        });

        let mut subscription = Subscription::default();

        let result = loop {
            tokio::select! {
                incoming = incoming_rx.recv() => {
                    let response = match incoming {
                        Some(Incoming::Request(request)) => {
                            debug!(?request, "received request");
                            Self::process_request(request, &ctx, &mut subscription).await
                        }
                        Some(Incoming::Malformed(message)) => {
                            Response::error("bad_request", message)
                        }
                        None => {
                            debug!("client disconnected");
                            break Ok(());
                        }
                    };
                    if let Err(e) = send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                event = next_event(&mut subscription.events) => {
                    match notification_for(event) {
                        Some(notification) => {
                            if let Err(e) = send_message(&mut writer, &notification).await {
                                break Err(e);
                            }
                        }
                        None => subscription.events = None,
                    }
                }
            }
        };

        reader_task.abort();

        // A session owned by this bridge can no longer receive signals
        if let Some(guard) = subscription.recognizer.take() {
            let orphaned = guard.owned_session();
            drop(guard);
            if let Some(session) = orphaned {
                warn!(%session, "recognizer bridge disconnected mid-session");
                let signal = CaptureSignal::error(session, "recognizer disconnected");
                if ctx.link.input_tx.send(EngineInput::Capture(signal)).await.is_err() {
                    debug!("engine gone, orphaned session not reported");
                }
            }
        }

        result
    }

    /// Read frames until EOF, forwarding parsed requests
    async fn read_requests<R>(reader: &mut R, incoming_tx: mpsc::Sender<Incoming>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        while let Some(body) = read_frame(reader).await? {
            let incoming = match serde_json::from_slice::<Request>(&body) {
                Ok(request) => Incoming::Request(request),
                Err(e) => {
                    warn!(error = %e, "failed to parse request");
                    Incoming::Malformed(e.to_string())
                }
            };
            if incoming_tx.send(incoming).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Process a request and return a response
    async fn process_request(
        request: Request,
        ctx: &ClientContext,
        subscription: &mut Subscription,
    ) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let mut state = ctx.state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                state.status.recognizers = ctx.link.recognizers.attached();
                Response::Status(state.status.clone())
            }

            Request::ListCommands => Response::Commands {
                entries: ctx.link.commands.to_vec(),
            },

            Request::Subscribe { recognizer } => {
                if subscription.events.is_none() {
                    subscription.events = Some(ctx.link.event_tx.subscribe());
                    debug!("client subscribed to notifications");
                }
                if recognizer && subscription.recognizer.is_none() {
                    let guard = ctx.link.recognizers.register();
                    info!(bridge = %guard.id(), "recognizer bridge attached");
                    subscription.recognizer = Some(guard);
                }
                Response::Subscribed {
                    bridge: subscription.recognizer.as_ref().map(RecognizerGuard::id),
                }
            }

            Request::Start => Self::forward(ctx, EngineInput::Start).await,
            Request::Stop => Self::forward(ctx, EngineInput::Stop).await,
            Request::Toggle => Self::forward(ctx, EngineInput::Toggle).await,

            capture @ (Request::CaptureTranscript { .. }
            | Request::CaptureError { .. }
            | Request::CaptureEnded { .. }) => {
                let Some(signal) = capture.into_capture_signal() else {
                    return Response::error("bad_request", "not a capture signal");
                };
                let bridge = subscription.recognizer.as_ref().map(RecognizerGuard::id);
                match bridge {
                    Some(bridge) if ctx.link.recognizers.owns(bridge, signal.token) => {
                        Self::forward(ctx, EngineInput::Capture(signal)).await
                    }
                    _ => {
                        debug!(session = %signal.token, ?bridge, "rejecting capture signal from non-owner");
                        Response::error(
                            "not_recognizer",
                            format!("client is not the recognizer for session {}", signal.token),
                        )
                    }
                }
            }
        }
    }

    /// Queue an input for the engine
    async fn forward(ctx: &ClientContext, input: EngineInput) -> Response {
        match ctx.link.input_tx.send(input).await {
            Ok(()) => Response::Accepted,
            Err(_) => Response::error("engine_unavailable", "voice engine is not running"),
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

async fn next_event(
    events: &mut Option<broadcast::Receiver<EngineEvent>>,
) -> Result<EngineEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Map a bus receive to the notification a subscriber gets; `None` once closed
fn notification_for(
    received: Result<EngineEvent, broadcast::error::RecvError>,
) -> Option<Notification> {
    match received {
        Ok(event) => Some(Notification::Event { event }),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "subscriber lagged, events dropped");
            Some(Notification::Lagged { skipped })
        }
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

/// Read one length-prefixed frame; `None` on clean EOF
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {len} bytes exceeds limit");
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .context("truncated frame")?;
    Ok(Some(body))
}

/// Send a length-prefixed JSON message
pub async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use tokio::time::timeout;
    use tokio_test::assert_ok;

    use super::*;
    use crate::capture::{CaptureOptions, RemoteCapture};
    use crate::commands::{CommandTable, EventActions};
    use crate::engine::VoiceEngine;
    use crate::events::EVENT_BUS_CAPACITY;

    fn frame(json: &str) -> Vec<u8> {
        let mut bytes = (json.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(json.as_bytes());
        bytes
    }

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "portfolio-voice-{}-{}.sock",
            std::process::id(),
            name
        ))
    }

    #[tokio::test]
    async fn test_read_frame() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&frame(r#"{"type":"ping"}"#))
            .build();

        let body = assert_ok!(read_frame(&mut mock).await).unwrap();
        let request: Request = serde_json::from_slice(&body).unwrap();
        assert_eq!(request, Request::Ping);
        assert!(assert_ok!(read_frame(&mut mock).await).is_none());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized() {
        let len = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes();
        let mut mock = tokio_test::io::Builder::new().read(&len).build();
        assert!(read_frame(&mut mock).await.is_err());
    }

    #[tokio::test]
    async fn test_send_message() {
        let mut mock = tokio_test::io::Builder::new()
            .write(&frame(r#"{"type":"pong"}"#))
            .build();
        assert_ok!(send_message(&mut mock, &Response::Pong).await);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_is_told_to_resync() {
        let (tx, mut rx) = broadcast::channel(2);
        for n in 0..5 {
            tx.send(EngineEvent::Help {
                text: format!("help {n}"),
            })
            .unwrap();
        }

        let lagged = notification_for(rx.recv().await);
        assert_eq!(lagged, Some(Notification::Lagged { skipped: 3 }));

        let next = notification_for(rx.recv().await);
        assert!(matches!(
            next,
            Some(Notification::Event { event: EngineEvent::Help { ref text } }) if text == "help 3"
        ));

        drop(tx);
        assert!(notification_for(rx.recv().await).is_some());
        assert_eq!(notification_for(rx.recv().await), None);
    }

    struct Client {
        stream: UnixStream,
    }

    impl Client {
        async fn connect(path: &Path) -> Self {
            Self {
                stream: UnixStream::connect(path).await.unwrap(),
            }
        }

        async fn send(&mut self, json: &str) {
            self.stream.write_all(&frame(json)).await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let body = timeout(Duration::from_secs(5), read_frame(&mut self.stream))
                .await
                .expect("timed out waiting for frame")
                .unwrap()
                .expect("connection closed");
            serde_json::from_slice(&body).unwrap()
        }

        /// Skip frames until one matches
        async fn recv_until(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
            loop {
                let value = self.recv().await;
                if pred(&value) {
                    return value;
                }
            }
        }
    }

    fn is_event(value: &Value, kind: &str) -> bool {
        value["type"] == "event" && value["event"]["type"] == kind
    }

    async fn spawn_daemon(name: &str) -> (Arc<Server>, PathBuf) {
        let path = socket_path(name);
        let (input_tx, input_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let recognizers = RecognizerRegistry::new();

        let mut engine = VoiceEngine::new(
            Box::new(RemoteCapture::new(recognizers.clone())),
            Box::new(EventActions::new(event_tx.clone())),
            CaptureOptions::default(),
            event_tx.clone(),
        );
        let link = EngineLink {
            input_tx,
            event_tx: event_tx.clone(),
            recognizers,
            commands: Arc::new(CommandTable::builtin().entries().to_vec()),
        };
        let server = Arc::new(Server::new(&path, link).unwrap());

        let status_rx = event_tx.subscribe();
        tokio::spawn(async move { engine.run(input_rx).await });
        let sync = Arc::clone(&server);
        tokio::spawn(async move { sync.sync_status(status_rx).await });
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });

        (server, path)
    }

    #[tokio::test]
    async fn test_ping_and_commands() {
        let (server, path) = spawn_daemon("ping").await;
        let mut client = Client::connect(&path).await;

        client.send(r#"{"type":"ping"}"#).await;
        assert_eq!(client.recv().await["type"], "pong");

        client.send(r#"{"type":"list_commands"}"#).await;
        let listing = client.recv().await;
        assert_eq!(listing["type"], "commands");
        assert_eq!(listing["entries"].as_array().unwrap().len(), 14);
        assert_eq!(listing["entries"][0]["phrase"], "go home");

        client.send("not json").await;
        assert_eq!(client.recv().await["code"], "bad_request");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_without_recognizer_reports_error() {
        let (server, path) = spawn_daemon("norecognizer").await;
        let mut client = Client::connect(&path).await;

        client.send(r#"{"type":"subscribe"}"#).await;
        assert_eq!(client.recv().await["type"], "subscribed");

        client.send(r#"{"type":"start"}"#).await;
        let changed = client
            .recv_until(|v| is_event(v, "status_changed") && v["event"]["snapshot"]["status"] == "error")
            .await;
        assert_eq!(
            changed["event"]["snapshot"]["error"],
            "no speech recognizer is attached"
        );

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_recognizer_bridge_drives_navigation() {
        let (server, path) = spawn_daemon("bridge").await;
        let mut bridge = Client::connect(&path).await;

        bridge.send(r#"{"type":"subscribe","recognizer":true}"#).await;
        assert_eq!(bridge.recv().await["type"], "subscribed");

        bridge.send(r#"{"type":"toggle"}"#).await;
        let started = bridge.recv_until(|v| is_event(v, "listening_started")).await;
        let session = started["event"]["session"].as_u64().unwrap();
        assert_eq!(started["event"]["options"]["language"], "en-US");

        bridge
            .send(&format!(
                r#"{{"type":"capture_transcript","session":{session},"text":"Go to Contact","is_final":false}}"#
            ))
            .await;
        let navigate = bridge.recv_until(|v| is_event(v, "navigate")).await;
        assert_eq!(navigate["event"]["path"], "/contact");

        bridge
            .send(&format!(r#"{{"type":"capture_ended","session":{session}}}"#))
            .await;
        bridge
            .recv_until(|v| is_event(v, "listening_stopped") && v["event"]["reason"] == "ended")
            .await;
        bridge
            .recv_until(|v| is_event(v, "status_changed") && v["event"]["snapshot"]["status"] == "idle")
            .await;

        // The status task applies snapshots on its own receiver
        let status = loop {
            bridge.send(r#"{"type":"get_status"}"#).await;
            let status = bridge.recv_until(|v| v["type"] == "status").await;
            if status["status"] == "idle" && status["transcript"] == "go to contact" {
                break status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(status["transcript"], "go to contact");
        assert_eq!(status["recognizers"], 1);
        assert_eq!(status["supported"], true);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_bridge_cannot_double_fire() {
        let (server, path) = spawn_daemon("twobridges").await;
        let mut first = Client::connect(&path).await;
        let mut second = Client::connect(&path).await;

        first.send(r#"{"type":"subscribe","recognizer":true}"#).await;
        let first_id = first.recv().await["bridge"].as_u64().unwrap();
        second.send(r#"{"type":"subscribe","recognizer":true}"#).await;
        let second_id = second.recv().await["bridge"].as_u64().unwrap();
        assert_ne!(first_id, second_id);

        first.send(r#"{"type":"toggle"}"#).await;
        let started = first.recv_until(|v| is_event(v, "listening_started")).await;
        second.recv_until(|v| is_event(v, "listening_started")).await;
        let session = started["event"]["session"].as_u64().unwrap();
        let owner_id = started["event"]["recognizer"].as_u64().unwrap();

        let (mut owner, mut other) = if owner_id == first_id {
            (first, second)
        } else {
            assert_eq!(owner_id, second_id);
            (second, first)
        };

        let transcript = format!(
            r#"{{"type":"capture_transcript","session":{session},"text":"go to contact","is_final":true}}"#
        );
        other.send(&transcript).await;
        let rejected = other.recv_until(|v| v["type"] == "error").await;
        assert_eq!(rejected["code"], "not_recognizer");

        owner.send(&transcript).await;
        owner.recv_until(|v| v["type"] == "accepted").await;
        owner
            .send(&format!(r#"{{"type":"capture_ended","session":{session}}}"#))
            .await;

        let mut navigations = 0;
        loop {
            let frame = owner.recv().await;
            if is_event(&frame, "navigate") {
                navigations += 1;
            }
            if is_event(&frame, "listening_stopped") {
                break;
            }
        }
        assert_eq!(navigations, 1);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_recognizer_capture_rejected() {
        let (server, path) = spawn_daemon("injector").await;
        let mut bridge = Client::connect(&path).await;
        let mut viewer = Client::connect(&path).await;

        bridge.send(r#"{"type":"subscribe","recognizer":true}"#).await;
        bridge.recv().await;
        viewer.send(r#"{"type":"subscribe"}"#).await;
        let subscribed = viewer.recv().await;
        assert_eq!(subscribed["type"], "subscribed");
        assert!(subscribed.get("bridge").is_none());

        bridge.send(r#"{"type":"start"}"#).await;
        let started = viewer.recv_until(|v| is_event(v, "listening_started")).await;
        let session = started["event"]["session"].as_u64().unwrap();

        viewer
            .send(&format!(
                r#"{{"type":"capture_transcript","session":{session},"text":"go to projects","is_final":true}}"#
            ))
            .await;
        let rejected = viewer.recv_until(|v| v["type"] == "error").await;
        assert_eq!(rejected["code"], "not_recognizer");

        viewer.send(r#"{"type":"get_status"}"#).await;
        let status = viewer.recv_until(|v| v["type"] == "status").await;
        assert_eq!(status["transcript"], "");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_bridge_disconnect_ends_session() {
        let (server, path) = spawn_daemon("disconnect").await;
        let mut bridge = Client::connect(&path).await;
        let mut viewer = Client::connect(&path).await;

        bridge.send(r#"{"type":"subscribe","recognizer":true}"#).await;
        bridge.recv().await;
        viewer.send(r#"{"type":"subscribe"}"#).await;
        viewer.recv().await;

        viewer.send(r#"{"type":"start"}"#).await;
        viewer.recv_until(|v| is_event(v, "listening_started")).await;

        drop(bridge);

        viewer
            .recv_until(|v| is_event(v, "listening_stopped") && v["event"]["reason"] == "error")
            .await;
        let changed = viewer
            .recv_until(|v| is_event(v, "status_changed") && v["event"]["snapshot"]["status"] == "error")
            .await;
        assert_eq!(changed["event"]["snapshot"]["error"], "recognizer disconnected");

        let status = loop {
            viewer.send(r#"{"type":"get_status"}"#).await;
            let status = viewer.recv_until(|v| v["type"] == "status").await;
            if status["status"] == "error" {
                break status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(status["recognizers"], 0);

        server.shutdown().await;
    }
}
