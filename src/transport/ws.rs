//! Reconnecting WebSocket push channel.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::protocol::{encode, ClientMessage};

use super::error::TransportError;

/// Capped exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor per failed attempt; `1.0` gives a fixed delay
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(5000),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Clamp the multiplier to at least 1 and the cap to at least the initial delay.
    pub fn normalized(self) -> Self {
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        Self {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay.max(self.initial_delay),
            multiplier,
        }
    }

    /// Delay before reconnect attempt number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let policy = self.normalized();
        let exponent = attempt.min(64) as i32;
        let scaled = policy.initial_delay.as_secs_f64() * policy.multiplier.powi(exponent);
        let max = policy.max_delay.as_secs_f64();
        Duration::from_secs_f64(scaled.min(max))
    }
}

/// Observable state of the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected { generation: u64 },
    Disconnected,
    /// Torn down; no further reconnects
    Closed,
}

/// Events delivered to the owner of the channel, tagged with the connection
/// generation they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A new connection is up; anything from older generations is stale.
    Connected { generation: u64 },
    Disconnected { generation: u64, reason: String },
    Frame { generation: u64, text: String },
}

/// Handle to the push channel's background task.
pub struct PushChannel {
    outbound: mpsc::UnboundedSender<String>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Start the push channel. It keeps reconnecting until [`PushChannel::shutdown`]
/// is called or the handle is dropped; the returned receiver ends at teardown.
pub fn connect(
    url: impl Into<String>,
    policy: ReconnectPolicy,
) -> (PushChannel, mpsc::UnboundedReceiver<TransportEvent>) {
    let url = url.into();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run(
        url,
        policy.normalized(),
        cancel.clone(),
        outbound_rx,
        events_tx,
        state_tx,
    ));

    let channel = PushChannel {
        outbound: outbound_tx,
        state: state_rx,
        cancel,
        task: Some(task),
    };
    (channel, events_rx)
}

impl PushChannel {
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state.borrow(), ConnectionState::Connected { .. })
    }

    pub fn generation(&self) -> Option<u64> {
        match *self.state.borrow() {
            ConnectionState::Connected { generation } => Some(generation),
            _ => None,
        }
    }

    /// Queue a message for the current connection.
    ///
    /// Fails with [`TransportError::NotConnected`] (logged) while no connection
    /// is up; nothing is buffered for later connections.
    pub fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            tracing::warn!(?message, "Dropping outbound message: push channel not connected");
            return Err(TransportError::NotConnected);
        }
        let text = encode(message)?;
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    /// Stop reconnecting and close the socket. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "Push channel task failed");
                }
            }
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum PumpExit {
    Cancelled,
    ReceiverGone,
    Closed(String),
}

async fn run(
    url: String,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut generation = 0u64;
    let mut attempt = 0u32;

    loop {
        state_tx.send_replace(ConnectionState::Connecting);
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((ws_stream, _)) => {
                generation += 1;
                attempt = 0;

                // Messages queued for a previous connection are assumed lost
                let mut discarded = 0usize;
                while outbound_rx.try_recv().is_ok() {
                    discarded += 1;
                }
                if discarded > 0 {
                    tracing::debug!(generation, discarded, "Discarded stale outbound messages");
                }

                tracing::info!(generation, url = %url, "Push channel connected");
                state_tx.send_replace(ConnectionState::Connected { generation });
                if events_tx
                    .send(TransportEvent::Connected { generation })
                    .is_err()
                {
                    break;
                }

                let exit = pump(ws_stream, generation, &mut outbound_rx, &events_tx, &cancel).await;
                state_tx.send_replace(ConnectionState::Disconnected);
                match exit {
                    PumpExit::Cancelled | PumpExit::ReceiverGone => break,
                    PumpExit::Closed(reason) => {
                        tracing::info!(generation, reason = %reason, "Push channel disconnected");
                        if events_tx
                            .send(TransportEvent::Disconnected { generation, reason })
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, url = %url, "Push channel connect failed");
                state_tx.send_replace(ConnectionState::Disconnected);
            }
        }

        let delay = policy.delay_for(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    state_tx.send_replace(ConnectionState::Closed);
    tracing::info!("Push channel closed");
}

async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    generation: u64,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    events_tx: &mpsc::UnboundedSender<TransportEvent>,
    cancel: &CancellationToken,
) -> PumpExit {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Deliver what was queued on this connection before closing
                while let Ok(text) = outbound_rx.try_recv() {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = sink.send(Message::Close(None)).await;
                return PumpExit::Cancelled;
            }
            outbound = outbound_rx.recv() => {
                let Some(text) = outbound else {
                    return PumpExit::Cancelled;
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    return PumpExit::Closed(e.to_string());
                }
            }
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::warn!(generation, "Dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        return PumpExit::Closed(reason);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return PumpExit::Closed(e.to_string()),
                    None => return PumpExit::Closed("stream ended".to_string()),
                };

                tracing::trace!(generation, frame = %text, "Push frame");
                if events_tx.send(TransportEvent::Frame { generation, text }).is_err() {
                    return PumpExit::ReceiverGone;
                }
            }
        }
    }
}
