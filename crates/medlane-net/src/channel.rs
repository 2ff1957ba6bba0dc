//! Transport channel: one websocket, one task, typed channels.
//!
//! The socket loop runs in a dedicated tokio task.  External code talks to it
//! through a command channel and receives lifecycle plus server events back
//! through a notification channel, keeping the transport fully asynchronous
//! and decoupled from the sync engine.
//!
//! A completed websocket handshake is reported as `Lifecycle(Connected)`; the
//! server's own `connected` ack frame is redundant confirmation and is only
//! logged, so the engine sees exactly one `Connected` per physical connect.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use medlane_shared::protocol::{ClientCommand, ServerEvent};
use medlane_shared::types::ConnectionStatus;

use crate::config::ChannelConfig;
use crate::reconnect::{ConnectionFsm, FsmInput, ReconnectPolicy};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the transport task.
#[derive(Debug)]
pub enum ChannelCommand {
    /// Serialize a protocol command and write it as a text frame.
    Emit(ClientCommand),
    /// Close the socket and end the task.
    Shutdown,
}

/// Notifications sent *from* the transport task to the engine.
#[derive(Debug, Clone)]
pub enum ChannelNotification {
    /// Connection lifecycle change, synthesized from socket state.
    Lifecycle(LifecycleEvent),
    /// A normalized server event.
    Event(ServerEvent),
}

/// Lifecycle signals.  These never travel as wire frames; the task derives
/// them from socket state and the retry machine.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// First dial is underway.
    Connecting,
    /// Handshake completed; the session is live.
    Connected,
    /// The connection dropped; dial attempt `attempt` is scheduled.
    Reconnecting { attempt: u32 },
    /// Orderly shutdown, or terminal state after giving up.
    Disconnected,
    /// Every retry failed; the channel has given up.
    ReconnectFailed,
    /// The server rejected the credential.  No retry follows.
    AuthRejected { reason: String },
}

/// How a live session ended.
enum SessionEnd {
    /// Socket dropped or errored; the retry machine decides what happens.
    Dropped,
    /// Server sent an auth-error frame.
    AuthRejected(String),
    /// Shutdown was requested from our side.
    Shutdown,
}

/// Spawn the websocket loop in a background tokio task.
///
/// Returns channels for sending commands and receiving notifications.  Fails
/// fast, without spawning anything, when the configuration is unusable
/// (empty credential token, unparseable URL).
pub fn spawn_channel(
    config: ChannelConfig,
) -> anyhow::Result<(
    mpsc::Sender<ChannelCommand>,
    mpsc::Receiver<ChannelNotification>,
)> {
    config.validate()?;
    let url = config.connect_url()?;

    let (cmd_tx, cmd_rx) = mpsc::channel::<ChannelCommand>(config.command_capacity);
    let (notif_tx, notif_rx) = mpsc::channel::<ChannelNotification>(config.notification_capacity);

    tokio::spawn(run_channel(url, config.reconnect, cmd_rx, notif_tx));

    Ok((cmd_tx, notif_rx))
}

async fn run_channel(
    url: Url,
    policy: ReconnectPolicy,
    mut cmd_rx: mpsc::Receiver<ChannelCommand>,
    notif_tx: mpsc::Sender<ChannelNotification>,
) {
    let mut fsm = ConnectionFsm::new(policy);
    fsm.apply(FsmInput::ConnectRequested);
    let _ = notif_tx
        .send(ChannelNotification::Lifecycle(LifecycleEvent::Connecting))
        .await;

    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                fsm.apply(FsmInput::HandshakeOk);
                info!(host = ?url.host_str(), "WebSocket connected");
                let _ = notif_tx
                    .send(ChannelNotification::Lifecycle(LifecycleEvent::Connected))
                    .await;

                match drive_session(stream, &mut cmd_rx, &notif_tx).await {
                    SessionEnd::Shutdown => {
                        info!("Transport shutdown requested");
                        let _ = notif_tx
                            .send(ChannelNotification::Lifecycle(LifecycleEvent::Disconnected))
                            .await;
                        break;
                    }
                    SessionEnd::AuthRejected(reason) => {
                        warn!(reason = %reason, "Credential rejected by server");
                        fsm.apply(FsmInput::AuthRejected);
                        let _ = notif_tx
                            .send(ChannelNotification::Lifecycle(LifecycleEvent::AuthRejected {
                                reason,
                            }))
                            .await;
                        break;
                    }
                    SessionEnd::Dropped => {
                        fsm.apply(FsmInput::Dropped);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "WebSocket connect failed");
                fsm.apply(FsmInput::Dropped);
            }
        }

        match fsm.state().clone() {
            ConnectionStatus::Reconnecting { attempt } => {
                let delay = fsm.next_delay();
                warn!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
                let _ = notif_tx
                    .send(ChannelNotification::Lifecycle(LifecycleEvent::Reconnecting {
                        attempt,
                    }))
                    .await;

                if !wait_for_retry(delay, &mut cmd_rx).await {
                    info!("Transport shutdown requested while waiting to retry");
                    let _ = notif_tx
                        .send(ChannelNotification::Lifecycle(LifecycleEvent::Disconnected))
                        .await;
                    break;
                }
            }
            _ => {
                error!("Reconnect attempts exhausted, giving up");
                let _ = notif_tx
                    .send(ChannelNotification::Lifecycle(LifecycleEvent::ReconnectFailed))
                    .await;
                break;
            }
        }
    }

    info!("Transport task terminated");
}

/// Run one live session to completion.
async fn drive_session(
    stream: WsStream,
    cmd_rx: &mut mpsc::Receiver<ChannelCommand>,
    notif_tx: &mpsc::Sender<ChannelNotification>,
) -> SessionEnd {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            // --- Outbound commands ---
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ChannelCommand::Emit(command)) => {
                        match command.to_text() {
                            Ok(text) => {
                                debug!(frame = %text, "Sending frame");
                                if let Err(e) = write.send(Message::Text(text.into())).await {
                                    error!(error = %e, "WebSocket send failed");
                                    return SessionEnd::Dropped;
                                }
                            }
                            Err(e) => error!(error = %e, "Command serialization failed"),
                        }
                    }
                    Some(ChannelCommand::Shutdown) => {
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                    None => {
                        // All senders dropped.
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                }
            }

            // --- Socket frames ---
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match ServerEvent::from_text(&text) {
                            Ok(ServerEvent::Connected) => {
                                debug!("Server acknowledged session");
                            }
                            Ok(ServerEvent::AuthError { reason }) => {
                                return SessionEnd::AuthRejected(reason);
                            }
                            Ok(event) => {
                                if notif_tx
                                    .send(ChannelNotification::Event(event))
                                    .await
                                    .is_err()
                                {
                                    return SessionEnd::Shutdown;
                                }
                            }
                            // A single bad frame is dropped, never fatal.
                            Err(e) => warn!(error = %e, frame = %text, "Dropping malformed frame"),
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Server closed the connection");
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Pong is handled by tungstenite itself.
                    }
                    Some(Ok(_)) => {
                        // Binary and pong frames are not part of the protocol.
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket read error");
                        return SessionEnd::Dropped;
                    }
                    None => {
                        return SessionEnd::Dropped;
                    }
                }
            }
        }
    }
}

/// Sleep out the retry delay while still honoring shutdown.  Returns `false`
/// when the task should stop instead of redialing.
async fn wait_for_retry(
    delay: std::time::Duration,
    cmd_rx: &mut mpsc::Receiver<ChannelCommand>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                Some(ChannelCommand::Shutdown) | None => return false,
                Some(ChannelCommand::Emit(command)) => {
                    // The engine rejects sends while down; anything that
                    // still lands here is dropped, not queued.
                    warn!(?command, "Dropping command while offline");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(max_attempts: u32, delay: Duration) -> ChannelConfig {
        ChannelConfig {
            // Nothing listens here; every dial fails immediately.
            ws_url: "ws://127.0.0.1:1/ws".to_string(),
            token: "test-token".to_string(),
            reconnect: ReconnectPolicy {
                max_attempts,
                delay,
            },
            ..Default::default()
        }
    }

    async fn next_lifecycle(rx: &mut mpsc::Receiver<ChannelNotification>) -> Option<LifecycleEvent> {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(ChannelNotification::Lifecycle(event))) => return Some(event),
                Ok(Some(ChannelNotification::Event(_))) => continue,
                Ok(None) => return None,
                Err(_) => panic!("timed out waiting for a lifecycle event"),
            }
        }
    }

    #[tokio::test]
    async fn test_spawn_fails_fast_without_token() {
        let config = ChannelConfig {
            ws_url: "ws://127.0.0.1:1/ws".to_string(),
            ..Default::default()
        };
        assert!(spawn_channel(config).is_err());
    }

    #[tokio::test]
    async fn test_bounded_retry_sequence() {
        let (_cmd_tx, mut rx) = spawn_channel(test_config(2, Duration::from_millis(10))).unwrap();

        assert_eq!(next_lifecycle(&mut rx).await, Some(LifecycleEvent::Connecting));
        assert_eq!(
            next_lifecycle(&mut rx).await,
            Some(LifecycleEvent::Reconnecting { attempt: 1 })
        );
        assert_eq!(
            next_lifecycle(&mut rx).await,
            Some(LifecycleEvent::Reconnecting { attempt: 2 })
        );
        assert_eq!(next_lifecycle(&mut rx).await, Some(LifecycleEvent::ReconnectFailed));
        // Task is gone afterwards.
        assert_eq!(next_lifecycle(&mut rx).await, None);
    }

    #[tokio::test]
    async fn test_shutdown_while_waiting_to_retry() {
        let (cmd_tx, mut rx) = spawn_channel(test_config(5, Duration::from_secs(30))).unwrap();

        assert_eq!(next_lifecycle(&mut rx).await, Some(LifecycleEvent::Connecting));
        assert_eq!(
            next_lifecycle(&mut rx).await,
            Some(LifecycleEvent::Reconnecting { attempt: 1 })
        );

        cmd_tx.send(ChannelCommand::Shutdown).await.unwrap();
        assert_eq!(next_lifecycle(&mut rx).await, Some(LifecycleEvent::Disconnected));
        assert_eq!(next_lifecycle(&mut rx).await, None);
    }
}
