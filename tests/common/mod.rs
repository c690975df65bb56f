//! Scripted in-process hub shared by the integration tests.

#![allow(dead_code, reason = "each test crate uses a subset of the helpers")]

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

/// What the hub does with one incoming connection.
#[derive(Debug, Clone)]
pub enum Script {
    /// Refuse the upgrade with HTTP 401.
    Reject,
    /// Complete the handshake, send `frames`, then hold or drop the socket.
    Serve { frames: Vec<String>, then_drop: bool },
}

#[derive(Debug, Clone)]
pub struct Seen {
    pub query_token: Option<String>,
    pub auth_header: Option<String>,
}

pub struct TestHub {
    pub url: String,
    pub seen: Arc<Mutex<Vec<Seen>>>,
    /// Text frames the client sent after the handshake.
    pub received: Arc<Mutex<Vec<String>>>,
}

pub fn invocation(target: &str, message: &str) -> String {
    format!(
        "{}\u{1e}",
        serde_json::json!({ "type": 1, "target": target, "arguments": [message] })
    )
}

/// Start a hub that plays `scripts[n]` for the n-th connection (last one repeats).
pub async fn spawn_hub(scripts: Vec<Script>) -> TestHub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let received = Arc::new(Mutex::new(Vec::new()));

    let seen_task = Arc::clone(&seen);
    let received_task = Arc::clone(&received);
    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let script = scripts.get(index).or(scripts.last()).cloned().unwrap();
            index += 1;
            tokio::spawn(serve(
                stream,
                script,
                Arc::clone(&seen_task),
                Arc::clone(&received_task),
            ));
        }
    });

    TestHub {
        url: format!("http://{addr}/notificationHub"),
        seen,
        received,
    }
}

/// Start a listener that accepts TCP connections and never answers.
pub async fn spawn_silent_listener() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    format!("http://{addr}/notificationHub")
}

async fn serve(
    stream: TcpStream,
    script: Script,
    seen: Arc<Mutex<Vec<Seen>>>,
    received: Arc<Mutex<Vec<String>>>,
) {
    let reject = matches!(script, Script::Reject);
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let query_token = req.uri().query().and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("access_token="))
                .map(str::to_string)
        });
        let auth_header = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        seen.lock().unwrap().push(Seen {
            query_token,
            auth_header,
        });

        if reject {
            let mut denied = ErrorResponse::new(Some("Unauthorized".to_string()));
            *denied.status_mut() = StatusCode::UNAUTHORIZED;
            Err(denied)
        } else {
            Ok(resp)
        }
    };

    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    match ws.next().await {
        Some(Ok(Message::Text(text))) if text.contains("\"protocol\":\"json\"") => {}
        _ => return,
    }
    if ws.send(Message::Text("{}\u{1e}".to_string())).await.is_err() {
        return;
    }

    let Script::Serve { frames, then_drop } = script else {
        return;
    };
    for frame in frames {
        if ws.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }
    if then_drop {
        let _ = ws.close(None).await;
        return;
    }
    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Text(text) => received.lock().unwrap().push(text),
            Message::Close(_) => break,
            _ => {}
        }
    }
}
