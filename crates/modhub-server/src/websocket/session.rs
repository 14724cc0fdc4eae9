//! Module session lifecycle: one connected module from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use metrics::histogram;
use modhub_core::{ConnectionId, Response};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ModuleConnection;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::metrics::HUB_CONNECTION_DURATION_SECONDS;

/// How long the writer may take to flush queued frames once the session ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-session limits taken from the server configuration.
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Outbound queue depth.
    pub send_queue_capacity: usize,
    /// Interval between server Ping frames and liveness checks.
    pub ping_interval: Duration,
    /// Silence after which the module is disconnected. Also the time a
    /// connection gets to send its first authenticated frame.
    pub heartbeat_timeout: Duration,
}

impl From<&ServerConfig> for SessionOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            send_queue_capacity: config.send_queue_capacity,
            ping_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
        }
    }
}

/// Run a session for a module that declared `identity`.
///
/// 1. Attaches the connection to the hub (closing the socket if that fails)
/// 2. Dispatches inbound frames one at a time, in arrival order
/// 3. Forwards queued outbound frames and sends periodic Pings
/// 4. Disconnects on close, read error, heartbeat or authentication timeout,
///    a kick from the hub, or shutdown
/// 5. Detaches from the hub and lets the writer flush what is queued
#[instrument(skip_all, fields(module = %identity))]
pub async fn run_module_session(
    ws: WebSocket,
    identity: String,
    hub: Arc<Hub>,
    options: SessionOptions,
    shutdown: CancellationToken,
) {
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(options.send_queue_capacity);
    let connection = Arc::new(ModuleConnection::new(ConnectionId::new(), identity, send_tx));
    let (mut ws_tx, mut ws_rx) = ws.split();

    if let Err(e) = hub.open(connection.clone()) {
        // Admission changed between the pre-upgrade check and now.
        warn!(error = %e, "rejecting module connection");
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: e.to_string().into(),
            })))
            .await;
        return;
    }

    let ping_interval = options.ping_interval;
    let drain = CancellationToken::new();
    let drain_signal = drain.clone();
    let mut outbound = tokio::spawn(async move {
        let mut pings = tokio::time::interval(ping_interval);
        // Skip the immediate first tick
        let _ = pings.tick().await;

        loop {
            tokio::select! {
                biased;
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        return;
                    }
                }
                () = drain_signal.cancelled() => {
                    send_rx.close();
                    while let Some(text) = send_rx.recv().await {
                        if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                            return;
                        }
                    }
                    break;
                }
                _ = pings.tick() => {
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        return;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let heartbeat_cancel = shutdown.child_token();
    let mut heartbeat = tokio::spawn(run_heartbeat(
        connection.clone(),
        options.ping_interval,
        options.heartbeat_timeout,
        heartbeat_cancel.clone(),
    ));

    let auth_deadline = tokio::time::sleep(options.heartbeat_timeout);
    tokio::pin!(auth_deadline);
    let mut authenticated = false;

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read failed");
                        break;
                    }
                    None => break,
                };
                connection.mark_alive();

                let reply = match msg {
                    Message::Text(text) => hub.handle_frame(&connection, text.as_str()).await,
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => hub.handle_frame(&connection, text).await,
                        Err(_) => {
                            debug!(len = data.len(), "non-UTF8 binary frame");
                            Some(Response::signature_verification_error(None))
                        }
                    },
                    Message::Close(_) => {
                        info!("module sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => None,
                };

                if let Some(reply) = reply {
                    if !connection.send_text(reply.to_json()) {
                        warn!(
                            dropped = connection.drop_count(),
                            "failed to enqueue response (channel full or closed)"
                        );
                    }
                }
            }
            result = &mut heartbeat => {
                match result {
                    Ok(HeartbeatResult::TimedOut) => {
                        warn!(timeout = ?options.heartbeat_timeout, "module unresponsive, disconnecting");
                    }
                    Ok(HeartbeatResult::Cancelled) => info!("closing session for shutdown"),
                    Err(e) => warn!(error = %e, "heartbeat task failed"),
                }
                break;
            }
            () = &mut auth_deadline, if !authenticated => {
                if hub.registry().is_confirmed(&connection.id) {
                    authenticated = true;
                } else {
                    warn!(timeout = ?options.heartbeat_timeout, "module never authenticated, disconnecting");
                    break;
                }
            }
            () = connection.kicked() => {
                info!("session ended by hub");
                break;
            }
        }
    }

    heartbeat_cancel.cancel();
    hub.close(&connection.id);
    histogram!(HUB_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());

    drain.cancel();
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut outbound).await.is_err() {
        debug!("writer did not drain in time");
        outbound.abort();
    }
}

#[cfg(test)]
mod tests {
    // Session behavior needs a real socket; see tests/integration.rs.
    use super::*;

    #[test]
    fn options_follow_server_config() {
        let config = ServerConfig {
            send_queue_capacity: 8,
            heartbeat_interval_secs: 5,
            heartbeat_timeout_secs: 15,
            ..ServerConfig::default()
        };
        let options = SessionOptions::from(&config);
        assert_eq!(options.send_queue_capacity, 8);
        assert_eq!(options.ping_interval, Duration::from_secs(5));
        assert_eq!(options.heartbeat_timeout, Duration::from_secs(15));
    }
}
