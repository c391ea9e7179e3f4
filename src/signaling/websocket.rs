//! WebSocket signaling client
//!
//! Connects to the signaling backend over a WebSocket and exchanges JSON
//! frames. A writer task drains the outbound queue and keeps the
//! connection alive with pings; a reader task parses inbound frames and fans
//! them out to subscriptions.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{SignalingEvent, SignalingMessage};
use super::transport::{SignalingTransport, SubscriberSet, Subscription};
use crate::config::SignalingConfig;
use crate::error::{CallError, Result};

/// Signaling transport over a WebSocket connection
pub struct WsSignalingClient {
    outbound: mpsc::UnboundedSender<Message>,
    subscribers: Arc<SubscriberSet>,
    shutdown: CancellationToken,
}

impl WsSignalingClient {
    /// Connect to the configured signaling server
    pub async fn connect(config: &SignalingConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| CallError::Config("signaling.url is not set".to_string()))?;

        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| CallError::Signaling(format!("Failed to connect to {}: {}", url, e)))?;

        info!("Signaling connected: {}", url);

        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let subscribers = Arc::new(SubscriberSet::new());
        let shutdown = CancellationToken::new();

        // Writer: outbound queue + heartbeat
        let heartbeat = Duration::from_secs(config.heartbeat_secs.max(1));
        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    msg = outbound_rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = sink.send(msg).await {
                            warn!("Signaling send failed: {}", e);
                            writer_shutdown.cancel();
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if sink.send(Message::Ping(Vec::new())).await.is_err() {
                            warn!("Signaling heartbeat failed");
                            writer_shutdown.cancel();
                            break;
                        }
                    }
                }
            }
            debug!("Signaling writer stopped");
        });

        // Reader: parse frames and fan out
        let reader_subscribers = subscribers.clone();
        let reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_shutdown.cancelled() => break,
                    frame = source.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                handle_frame(&text, &reader_subscribers);
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!("Signaling connection closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("Signaling receive error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
            reader_shutdown.cancel();
            reader_subscribers.close_all();
            debug!("Signaling reader stopped");
        });

        Ok(Self {
            outbound,
            subscribers,
            shutdown,
        })
    }

    /// Whether the connection is still up
    pub fn is_connected(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Close the connection and all subscriptions
    pub fn close(&self) {
        self.shutdown.cancel();
        self.subscribers.close_all();
    }
}

impl SignalingTransport for WsSignalingClient {
    fn send(&self, message: SignalingMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(CallError::Signaling("connection closed".to_string()));
        }

        let frame = message.to_frame()?;
        debug!("Signaling send: {}", message.name());
        self.outbound
            .send(Message::Text(frame))
            .map_err(|_| CallError::Signaling("connection closed".to_string()))
    }

    fn subscribe(&self) -> Subscription {
        self.subscribers.subscribe()
    }
}

impl Drop for WsSignalingClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Parse one inbound text frame and publish it
///
/// Malformed frames are logged and skipped.
fn handle_frame(text: &str, subscribers: &SubscriberSet) -> bool {
    match SignalingEvent::from_frame(text) {
        Ok(event) => {
            debug!("Signaling recv: {} (call {})", event.name(), event.call_id());
            subscribers.publish(&event);
            true
        }
        Err(e) => {
            warn!("Ignoring malformed signaling frame: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallId;

    #[tokio::test]
    async fn test_handle_frame_publishes() {
        let subscribers = SubscriberSet::new();
        let mut sub = subscribers.subscribe();

        assert!(handle_frame(
            r#"{"type":"callAccepted","payload":{"callId":"12"}}"#,
            &subscribers
        ));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.name(), "callAccepted");
        assert_eq!(event.call_id(), &CallId::from(12));
    }

    #[test]
    fn test_handle_frame_skips_garbage() {
        let subscribers = SubscriberSet::new();
        let mut sub = subscribers.subscribe();

        assert!(!handle_frame("not json", &subscribers));
        assert!(!handle_frame(r#"{"type":"unknown","payload":{}}"#, &subscribers));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_connect_requires_url() {
        let config = SignalingConfig::default();
        let result = WsSignalingClient::connect(&config).await;
        assert!(matches!(result, Err(CallError::Config(_))));
    }
}
