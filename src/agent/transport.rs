//! Duplex frame transport between the agent and the relay

use crate::error::{Error, Result};
use crate::protocol::Frame;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

/// An open connection to the relay
#[async_trait]
pub trait Transport: Send {
    /// Send one frame
    async fn send(&mut self, frame: &Frame) -> Result<()>;

    /// Next text message. `None` once the peer has closed the connection.
    /// Must be cancel-safe.
    async fn recv(&mut self) -> Option<Result<String>>;
}

/// Opens transports to the relay
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>>;

    /// Where the connector points, safe to log
    fn endpoint(&self) -> String;
}

/// WebSocket connector for `ws://` and `wss://` relay URLs
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    /// Build the connection URL, carrying the token as the `token` query parameter
    pub fn new(relay_url: &str, token: &str) -> Result<Self> {
        let mut url = Url::parse(relay_url)
            .map_err(|e| Error::Config(format!("invalid relay_url '{}': {}", relay_url, e)))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::Config(format!(
                    "relay_url must use ws:// or wss://, got '{}'",
                    other
                )))
            }
        }
        url.query_pairs_mut().append_pair("token", token);
        Ok(Self { url })
    }

    /// Full connection URL, token included
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let (stream, _response) = connect_async(self.url.as_str()).await?;
        Ok(Box::new(WsTransport { stream }))
    }

    fn endpoint(&self) -> String {
        let mut redacted = self.url.clone();
        redacted.set_query(None);
        redacted.to_string()
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        self.stream.send(Message::Text(frame.to_text())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => tracing::warn!("Ignoring non-UTF-8 binary message"),
                },
                Ok(Message::Close(frame)) => {
                    if let Some(frame) = frame {
                        tracing::info!(code = u16::from(frame.code), reason = %frame.reason, "Relay closed the connection");
                    }
                    return None;
                }
                // Control frames are answered by tungstenite itself
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_goes_in_query() {
        let connector = WsConnector::new("wss://relay.example.com/ws/agent", "s3cr&t").unwrap();
        assert_eq!(
            connector.url().as_str(),
            "wss://relay.example.com/ws/agent?token=s3cr%26t"
        );
        assert_eq!(connector.endpoint(), "wss://relay.example.com/ws/agent");
    }

    #[test]
    fn test_rejects_non_websocket_urls() {
        assert!(WsConnector::new("https://relay.example.com/ws/agent", "t").is_err());
        assert!(WsConnector::new("not a url", "t").is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = WsConnector::new(&format!("ws://127.0.0.1:{}/ws/agent", port), "t").unwrap();
        assert!(connector.connect().await.is_err());
    }
}
