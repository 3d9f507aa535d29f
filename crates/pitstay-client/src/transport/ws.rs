use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use pitstay_types::events::{GatewayCommand, GatewayEvent, Topic};

use super::{FeedConnector, FeedStream};
use crate::error::{ClientError, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to `/gateway?token=` on the server.
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: String,
    token: String,
}

impl WsConnector {
    /// `base_url` may be given as http(s); it is rewritten to ws(s).
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url
            .into()
            .trim_end_matches('/')
            .replacen("http://", "ws://", 1)
            .replacen("https://", "wss://", 1);
        Self { base_url, token: token.into() }
    }
}

#[async_trait]
impl FeedConnector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn FeedStream>> {
        let url = format!("{}/gateway?token={}", self.base_url, self.token);
        let (socket, _) = connect_async(url.as_str()).await?;
        let (tx, mut rx) = socket.split();

        // The server greets a valid token with Ready.
        loop {
            match rx.next().await {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                    Ok(GatewayEvent::Ready { user_id, username }) => {
                        info!(%user_id, %username, "change feed connected");
                        break;
                    }
                    Ok(other) => debug!(?other, "event before Ready ignored"),
                    Err(e) => warn!("unparseable gateway frame: {}", e),
                },
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ClientError::Network("gateway closed before Ready".into())),
            }
        }

        Ok(Box::new(WsFeed { tx, rx }))
    }
}

pub struct WsFeed {
    tx: SplitSink<Socket, WsMessage>,
    rx: SplitStream<Socket>,
}

#[async_trait]
impl FeedStream for WsFeed {
    async fn subscribe(&mut self, topics: Vec<Topic>) -> Result<()> {
        let cmd = serde_json::to_string(&GatewayCommand::Subscribe { topics })
            .map_err(|e| ClientError::Validation(e.to_string()))?;
        self.tx.send(WsMessage::Text(cmd.into())).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<GatewayEvent>> {
        loop {
            match self.rx.next().await? {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                    Ok(event) => return Some(Ok(event)),
                    Err(e) => warn!("unparseable gateway frame: {}", e),
                },
                // tungstenite answers pings itself.
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
