//! Production connector: HTTP target discovery plus a WebSocket frame pump.

use agent_relay_core::config::DiscoveryConfig;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::{
    CdpError,
    connection::{Connector, FrameChannel},
    discovery::{Target, fetch_targets},
};

/// Connects to the host's loopback inspection endpoint.
pub struct WsConnector {
    client: reqwest::Client,
    discovery: DiscoveryConfig,
}

impl WsConnector {
    /// Create a new connector.
    #[must_use]
    pub fn new(discovery: DiscoveryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            discovery,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn discover(&self) -> Result<Vec<Target>, CdpError> {
        fetch_targets(&self.client, &self.discovery).await
    }

    async fn open(&self, target: &Target) -> Result<FrameChannel, CdpError> {
        let (stream, _) = tokio_tungstenite::connect_async(target.connect_address.as_str())
            .await
            .map_err(|e| CdpError::WebSocket(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<String>();

        // Writer ends when the session drops its sender.
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if ws_tx.send(WsMessage::Text(frame)).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if inbound_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Inspection socket receive error: {}", e);
                        break;
                    }
                }
            }
        });

        tracing::debug!(address = %target.connect_address, "Inspection socket open");
        Ok(FrameChannel { outbound, inbound })
    }
}
