use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout};

use crate::config::KeepaliveConfig;
use crate::state::AppState;
use crate::ws::ConnectionSender;

/// Close code sent to a second connection for an identity that is already connected.
pub const CLOSE_ALREADY_CONNECTED: u16 = 4009;

/// Close code sent when the client stops answering pings.
const CLOSE_GOING_AWAY: u16 = 1001;

/// How long the writer gets to flush queued frames after the reader stops.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Run one client connection until it closes, errors, or stops answering pings.
///
/// The socket is split: a writer task owns the sink and drains the bounded
/// outbound queue, while this task reads frames and routes them one at a time.
/// The queue sender is what the registry hands to broadcasters.
pub async fn run_connection(mut socket: WebSocket, state: AppState, user_id: String) {
    let (tx, rx) = mpsc::channel::<Message>(state.connection_queue_capacity.max(1));

    if !state.connections.attach(&user_id, tx.clone()) {
        tracing::warn!(user_id = %user_id, "User already connected, refusing new connection");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_ALREADY_CONNECTED,
                reason: "User already connected".into(),
            })))
            .await;
        // The existing entry belongs to the other connection; leave it alone
        return;
    }

    tracing::info!(user_id = %user_id, connections = state.connections.len(), "User connected");

    // Writer task: forwards queued frames to the WebSocket sink
    let (ws_sender, mut ws_receiver) = socket.split();
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Keepalive task: pings on an interval and reports a missed pong
    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let (timeout_tx, mut timeout_rx) = oneshot::channel::<()>();
    let ping_handle = tokio::spawn(keepalive_task(
        tx.clone(),
        pong_rx,
        timeout_tx,
        state.keepalive.clone(),
        user_id.clone(),
    ));

    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            signal = &mut timeout_rx => {
                match signal {
                    Ok(()) => tracing::warn!(user_id = %user_id, "Pong timeout, closing connection"),
                    Err(_) => tracing::debug!(user_id = %user_id, "Keepalive stopped, outbound queue closed"),
                }
                break;
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                route_frame(&state, &tx, &user_id, text.as_bytes()).await;
            }
            Some(Ok(Message::Binary(data))) => {
                route_frame(&state, &tx, &user_id, &data).await;
            }
            Some(Ok(Message::Pong(_))) => {
                // Notify the keepalive task
                let _ = pong_tx.send(());
            }
            Some(Ok(Message::Ping(data))) => {
                // Respond to client pings with pong
                let _ = tx.try_send(Message::Pong(data));
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(user_id = %user_id, reason = ?frame, "Client initiated close");
                break;
            }
            Some(Err(e)) => {
                tracing::warn!(user_id = %user_id, error = %e, "Error reading message");
                break;
            }
            None => {
                // Stream ended, client disconnected
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: stop pinging and free the identity
    ping_handle.abort();
    state.connections.detach(&user_id);

    // With the registry entry and our own sender gone the writer drains and exits
    drop(tx);
    if timeout(WRITER_DRAIN, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::info!(user_id = %user_id, connections = state.connections.len(), "User disconnected");
}

/// Hand one inbound payload to the router and report any error to this client only.
async fn route_frame(state: &AppState, tx: &ConnectionSender, user_id: &str, payload: &[u8]) {
    if let Err(e) = state.router.route(user_id, payload).await {
        if tx.try_send(Message::Text(e.to_frame().into())).is_err() {
            tracing::warn!(user_id = %user_id, "Could not queue error frame");
        }
    }
}

/// Forward queued frames to the socket until the queue closes or a write fails.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
    let _ = ws_sender.close().await;
}

/// Ping every interval and fire `timed_out` if a pong does not follow in time.
async fn keepalive_task(
    tx: ConnectionSender,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    timed_out: oneshot::Sender<()>,
    keepalive: KeepaliveConfig,
    user_id: String,
) {
    let mut ping_timer = interval(Duration::from_secs(keepalive.ping_interval_secs.max(1)));
    let pong_timeout = Duration::from_secs(keepalive.pong_timeout_secs.max(1));
    // First tick fires immediately
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Pongs that arrived late for an earlier ping don't count
        while pong_rx.try_recv().is_ok() {}

        // Send ping
        match tx.try_send(Message::Ping(vec![1, 2, 3, 4].into())) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Writer is backed up; no ping went out, so no pong is owed
                tracing::debug!(user_id = %user_id, "Outbound queue full, skipping ping");
                continue;
            }
            // Writer task has died, connection is gone
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }

        // Wait for pong within timeout
        match timeout(pong_timeout, pong_rx.recv()).await {
            // Pong received, continue
            Ok(Some(())) => {}
            // Reader is gone
            Ok(None) => break,
            Err(_) => {
                tracing::debug!(user_id = %user_id, "No pong within deadline");
                let _ = tx.try_send(Message::Close(Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: "Pong timeout".into(),
                })));
                let _ = timed_out.send(());
                break;
            }
        }
    }
}
