use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use boutique_types::api::Claims;
use boutique_types::events::{ChannelCommand, DeliveryMessage};
use boutique_types::models::UserId;

use crate::auth::{AuthError, TokenVerifier};
use crate::registry::{ChannelHandle, SharedChannelLayer};

/// Per-connection behaviour knobs, filled from server config.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Server sends a Ping this often; 2 missed Pongs drop the connection.
    pub heartbeat_interval: Duration,
    /// How long an unauthenticated socket may wait before sending `identify`.
    pub identify_timeout: Duration,
    /// Accept `send_notification` frames from the client and echo them back.
    pub allow_client_push: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            identify_timeout: Duration::from_secs(10),
            allow_client_push: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Registry bookkeeping for one connection.
///
/// Registration happens only on `Connecting -> Open`; unregistration happens
/// exactly once, on the first transition to `Closed` from `Open`.
pub struct DeliveryChannel {
    layer: SharedChannelLayer,
    handle: ChannelHandle,
    recipient: Option<UserId>,
    state: ChannelState,
}

impl DeliveryChannel {
    pub fn new(layer: SharedChannelLayer) -> Self {
        Self {
            layer,
            handle: ChannelHandle::new(),
            recipient: None,
            state: ChannelState::Connecting,
        }
    }

    pub fn handle(&self) -> ChannelHandle {
        self.handle
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn recipient(&self) -> Option<UserId> {
        self.recipient
    }

    /// Register under `recipient` and return the outbound queue.
    /// Returns `None` unless the channel is still connecting.
    pub async fn open(&mut self, recipient: UserId) -> Option<mpsc::UnboundedReceiver<DeliveryMessage>> {
        if self.state != ChannelState::Connecting {
            return None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.layer.register_channel(recipient, self.handle, tx).await;
        self.recipient = Some(recipient);
        self.state = ChannelState::Open;
        Some(rx)
    }

    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, ChannelState::Closed);
        if previous != ChannelState::Open {
            return;
        }
        if let Some(recipient) = self.recipient {
            self.layer.unregister_channel(recipient, self.handle).await;
        }
    }
}

impl Drop for DeliveryChannel {
    fn drop(&mut self) {
        if self.state != ChannelState::Open {
            return;
        }
        let Some(recipient) = self.recipient else {
            return;
        };

        // Connection future was cancelled mid-session; finish the close off-thread.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let layer = self.layer.clone();
            let handle = self.handle;
            runtime.spawn(async move {
                layer.unregister_channel(recipient, handle).await;
            });
        }
    }
}

/// Handle a WebSocket whose token was already checked at the HTTP upgrade.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    layer: SharedChannelLayer,
    claims: Claims,
    options: ChannelOptions,
) {
    let (sender, receiver) = socket.split();
    let channel = DeliveryChannel::new(layer);
    run_channel(sender, receiver, channel, claims, options).await;
}

/// Handle a WebSocket that must authenticate with an `identify` frame first.
pub async fn handle_connection(
    socket: WebSocket,
    layer: SharedChannelLayer,
    verifier: TokenVerifier,
    options: ChannelOptions,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut channel = DeliveryChannel::new(layer);

    let claims = match wait_for_identify(&mut receiver, &verifier, options.identify_timeout).await {
        Ok(claims) => claims,
        Err(e) => {
            warn!("notification channel {} refused: {}", channel.handle(), e);
            channel.close().await;
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: Utf8Bytes::from_static("authentication failed"),
                })))
                .await;
            return;
        }
    };

    run_channel(sender, receiver, channel, claims, options).await;
}

async fn run_channel(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut channel: DeliveryChannel,
    claims: Claims,
    options: ChannelOptions,
) {
    let recipient = claims.sub;
    let username = claims.username;

    let Some(mut outbound_rx) = channel.open(recipient).await else {
        return;
    };
    let handle = channel.handle();
    info!("{} ({}) opened notification channel {}", username, recipient, handle);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let heartbeat_interval = options.heartbeat_interval;
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = outbound_rx.recv() => {
                    let Some(message) = result else { break };
                    let text = match message.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("dropping unencodable frame on {}: {}", handle, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout on {} (missed {} pongs), dropping connection", handle, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let layer = channel.layer.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ChannelCommand>(&text) {
                    Ok(ChannelCommand::SendNotification { notification }) => {
                        if !options.allow_client_push {
                            warn!("{} ({}) attempted client push on {}, ignored", username_recv, recipient, handle);
                            continue;
                        }
                        // Routed through the registry so it queues behind earlier pushes
                        let message = DeliveryMessage::notification(notification);
                        if let Err(e) = layer.publish_to(recipient, handle, message).await {
                            warn!("client push on {}: {}", handle, e);
                        }
                    }
                    Ok(ChannelCommand::Identify { .. }) => {
                        debug!("{} ({}) re-identified on {}, ignored", username_recv, recipient, handle);
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad frame: {} -- raw: {}",
                            username_recv,
                            recipient,
                            e,
                            truncate(&text, 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    channel.close().await;
    info!("{} ({}) closed notification channel {}", username, recipient, handle);
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    verifier: &TokenVerifier,
    timeout: Duration,
) -> Result<Claims, AuthError> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Ok(ChannelCommand::Identify { token }) =
                        serde_json::from_str::<ChannelCommand>(&text)
                    {
                        return verifier.verify(&token);
                    }
                    debug!("ignoring frame before identify");
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(AuthError::Disconnected)
    };

    tokio::time::timeout(timeout, identify)
        .await
        .map_err(|_| AuthError::IdentifyTimeout(timeout))?
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
