//! Shared WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves for the hub connection. Handshake failures are mapped
//! to [`TransportError`], with an HTTP 401 on upgrade reported as
//! [`TransportError::Unauthorized`].

// Rust guideline compliant 2026-02

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use crate::channel::TransportError;

/// Concrete WebSocket stream type.
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
    /// Binary, pong or raw frames; the hub protocol ignores them.
    Other,
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    pub async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(tungstenite::Message::Text(text))
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("send failed: {e}")))
    }

    /// Send a pong frame in response to a ping.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
        self.sink
            .send(tungstenite::Message::Pong(data))
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("pong failed: {e}")))
    }

    /// Send a close frame and flush.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("close failed: {e}")))
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    pub async fn recv(&mut self) -> Option<Result<WsMessage, TransportError>> {
        let msg = match self.stream.next().await? {
            Ok(msg) => msg,
            Err(e) => {
                return Some(Err(TransportError::ConnectionFailed(format!(
                    "WebSocket read error: {e}"
                ))))
            }
        };
        Some(Ok(match msg {
            tungstenite::Message::Text(text) => WsMessage::Text(text.to_string()),
            tungstenite::Message::Ping(data) => WsMessage::Ping(data.to_vec()),
            tungstenite::Message::Close(frame) => {
                let (code, reason) = frame
                    .map_or((1005, String::new()), |cf| (cf.code.into(), cf.reason.to_string()));
                WsMessage::Close { code, reason }
            }
            _ => WsMessage::Other,
        }))
    }
}

/// Connect to a WebSocket URL with extra request headers.
///
/// Returns split (writer, reader) halves for use in `tokio::select!` loops.
pub async fn connect(
    url: &str,
    headers: &[(&str, &str)],
) -> Result<(WsWriter, WsReader), TransportError> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::ConnectionFailed(format!("invalid WebSocket URL: {e}")))?;

    for &(name, value) in headers {
        let header_name = tungstenite::http::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid header {name}: {e}")))?;
        let header_value = tungstenite::http::HeaderValue::from_str(value)
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid value for {name}: {e}")))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(classify_connect_error)?;

    let (sink, stream) = ws_stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

fn classify_connect_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::Http(response)
            if response.status() == tungstenite::http::StatusCode::UNAUTHORIZED =>
        {
            TransportError::Unauthorized("hub rejected the bearer token".to_string())
        }
        tungstenite::Error::Http(response) => {
            TransportError::ConnectionFailed(format!("upgrade rejected: {}", response.status()))
        }
        other => TransportError::ConnectionFailed(format!("WebSocket connect failed: {other}")),
    }
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1)
    }
}

/// Build the hub socket URL, carrying the token as `access_token` when present.
pub fn hub_socket_url(hub_url: &str, token: Option<&str>) -> Result<String, TransportError> {
    let mut url = reqwest::Url::parse(&http_to_ws_scheme(hub_url))
        .map_err(|e| TransportError::ConnectionFailed(format!("invalid hub URL {hub_url}: {e}")))?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("access_token", token);
    }
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_ws_scheme() {
        assert_eq!(http_to_ws_scheme("https://example.com/hub"), "wss://example.com/hub");
        assert_eq!(http_to_ws_scheme("http://localhost:5000"), "ws://localhost:5000");
        assert_eq!(http_to_ws_scheme("wss://example.com/hub"), "wss://example.com/hub");
    }

    #[test]
    fn test_hub_socket_url_appends_token() {
        let url = hub_socket_url("https://localhost:7169/notificationHub", Some("a.b.c")).unwrap();
        assert_eq!(url, "wss://localhost:7169/notificationHub?access_token=a.b.c");
    }

    #[test]
    fn test_hub_socket_url_keeps_existing_query() {
        let url = hub_socket_url("http://host/hub?tenant=1", Some("t")).unwrap();
        assert_eq!(url, "ws://host/hub?tenant=1&access_token=t");
    }

    #[test]
    fn test_hub_socket_url_without_token() {
        assert_eq!(hub_socket_url("http://host/hub", None).unwrap(), "ws://host/hub");
        assert!(hub_socket_url("not a url", None).is_err());
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_returns_error() {
        let result = connect("ws://127.0.0.1:1/hub", &[]).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }
}
