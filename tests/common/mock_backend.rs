//! In-process stand-in for the tracing backend.
//!
//! Serves `GET /api/sync`, `POST /api/app_start` and a push channel on
//! `/api/ws`. Frames pushed with [`MockBackend::push`] go to every connected
//! client; messages clients send are queued for [`MockBackend::next_message`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

struct MockState {
    sync: Mutex<Value>,
    fail_sync: AtomicBool,
    frames: broadcast::Sender<String>,
    kick: broadcast::Sender<()>,
    received: mpsc::UnboundedSender<String>,
    connections: AtomicUsize,
    app_starts: AtomicUsize,
}

pub struct MockBackend {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    received: mpsc::UnboundedReceiver<String>,
    task: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        Self::serve(listener)
    }

    /// Start on a specific address (used to bring a backend up late).
    pub async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.expect("bind mock backend");
        Self::serve(listener)
    }

    fn serve(listener: TcpListener) -> Self {
        let addr = listener.local_addr().expect("mock backend address");
        let (frames, _) = broadcast::channel(256);
        let (kick, _) = broadcast::channel(4);
        let (received_tx, received) = mpsc::unbounded_channel();
        let state = Arc::new(MockState {
            sync: Mutex::new(serde_json::json!({"nodes": [], "timeline": [], "timeline_id": null})),
            fail_sync: AtomicBool::new(false),
            frames,
            kick,
            received: received_tx,
            connections: AtomicUsize::new(0),
            app_starts: AtomicUsize::new(0),
        });

        let router = Router::new()
            .route("/api/ws", get(ws_handler))
            .route("/api/sync", get(sync_handler))
            .route("/api/app_start", post(app_start_handler))
            .with_state(state.clone());

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            addr,
            state,
            received,
            task,
        }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/api/ws", self.addr)
    }

    pub async fn set_sync(&self, payload: Value) {
        *self.state.sync.lock().await = payload;
    }

    pub fn fail_sync(&self, fail: bool) {
        self.state.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Send a frame to every connected client.
    pub fn push(&self, frame: Value) {
        let _ = self.state.frames.send(frame.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.state.frames.send(text.to_string());
    }

    /// Close every open push-channel connection from the server side.
    pub fn disconnect_all(&self) {
        let _ = self.state.kick.send(());
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn app_starts(&self) -> usize {
        self.state.app_starts.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` clients have connected in total.
    pub async fn wait_for_connections(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.connections() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("client never connected");
    }

    /// Next message a client sent, parsed as JSON.
    pub async fn next_message(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("timed out waiting for client message")
            .expect("mock backend closed");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<MockState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<MockState>) {
    let mut frames = state.frames.subscribe();
    let mut kick = state.kick.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            },
            _ = kick.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = state.received.send(text.as_str().to_string());
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn sync_handler(State(state): State<Arc<MockState>>) -> Response {
    if state.fail_sync.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "sync unavailable").into_response();
    }
    Json(state.sync.lock().await.clone()).into_response()
}

async fn app_start_handler(State(state): State<Arc<MockState>>) -> StatusCode {
    state.app_starts.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}
