//! WebSocket transport
//!
//! Opens the socket, writes typed outbound frames and turns whatever the
//! socket yields into an [`Incoming`] the controller can match on.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{ProtocolError, TransportError};
use crate::protocol::{InboundFrame, OutboundFrame};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSink = SplitSink<WsStream, Message>;
pub type WsSource = SplitStream<WsStream>;

/// Close code reported when the stream ends without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Open the socket. The URL may carry the API key, so only the host is logged.
pub async fn connect(url: Url) -> Result<WsStream, TransportError> {
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme '{}'",
                other
            )))
        }
    }
    let host = url.host_str().unwrap_or("?").to_string();

    tracing::info!("Connecting to {}", host);
    let (ws, response) = connect_async(url.as_str())
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    tracing::info!("WebSocket open to {} ({})", host, response.status());
    Ok(ws)
}

/// Write half of an open socket
pub struct Connection {
    sink: WsSink,
    frames_sent: u64,
}

impl Connection {
    pub fn new(sink: WsSink) -> Self {
        Self {
            sink,
            frames_sent: 0,
        }
    }

    pub async fn send(&mut self, frame: &OutboundFrame) -> Result<(), TransportError> {
        let json = frame
            .to_json()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.sink
            .send(Message::Text(json))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.frames_sent += 1;
        tracing::trace!("Sent {} frame", frame.kind());
        Ok(())
    }

    pub async fn pong(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.sink
            .send(Message::Pong(payload))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Send a normal close frame; errors are irrelevant at this point
    pub async fn close(mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client disconnect".into(),
        };
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            tracing::debug!("Close frame not delivered: {}", e);
        }
        let _ = self.sink.close().await;
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }
}

/// What the socket produced
#[derive(Debug)]
pub enum Incoming {
    Frame(InboundFrame),
    /// A frame that could not be parsed; the session carries on
    Malformed(ProtocolError),
    Ping(Vec<u8>),
    Closed { code: u16, reason: String },
    Failed(String),
    /// Pong and raw frames
    Ignored,
}

/// Classify the next item of the read half
pub fn classify(item: Option<Result<Message, WsError>>) -> Incoming {
    let message = match item {
        None => {
            return Incoming::Closed {
                code: ABNORMAL_CLOSURE,
                reason: "stream ended".to_string(),
            }
        }
        Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
            return Incoming::Closed {
                code: ABNORMAL_CLOSURE,
                reason: String::new(),
            }
        }
        Some(Err(e)) => return Incoming::Failed(e.to_string()),
        Some(Ok(message)) => message,
    };

    match message {
        Message::Text(text) => match InboundFrame::parse(&text) {
            Ok(frame) => Incoming::Frame(frame),
            Err(e) => Incoming::Malformed(e),
        },
        Message::Binary(bytes) => match InboundFrame::parse_binary(&bytes) {
            Ok(frame) => Incoming::Frame(frame),
            Err(e) => Incoming::Malformed(e),
        },
        Message::Ping(payload) => Incoming::Ping(payload),
        Message::Close(Some(frame)) => Incoming::Closed {
            code: u16::from(frame.code),
            reason: frame.reason.to_string(),
        },
        Message::Close(None) => Incoming::Closed {
            code: u16::from(CloseCode::Status),
            reason: String::new(),
        },
        Message::Pong(_) | Message::Frame(_) => Incoming::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_text_and_binary() {
        let text = classify(Some(Ok(Message::Text(r#"{"setupComplete":{}}"#.into()))));
        assert!(matches!(text, Incoming::Frame(InboundFrame::SetupComplete)));

        let binary = classify(Some(Ok(Message::Binary(br#"{"setupComplete":{}}"#.to_vec()))));
        assert!(matches!(binary, Incoming::Frame(InboundFrame::SetupComplete)));

        let bad = classify(Some(Ok(Message::Text("{oops".into()))));
        assert!(matches!(bad, Incoming::Malformed(_)));
    }

    #[test]
    fn test_classify_close() {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "bye".into(),
        };
        match classify(Some(Ok(Message::Close(Some(frame))))) {
            Incoming::Closed { code, reason } => {
                assert_eq!(code, 1001);
                assert_eq!(reason, "bye");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            classify(None),
            Incoming::Closed { code: ABNORMAL_CLOSURE, .. }
        ));
    }

    #[test]
    fn test_classify_ping() {
        assert!(matches!(
            classify(Some(Ok(Message::Ping(vec![1, 2])))),
            Incoming::Ping(p) if p == vec![1, 2]
        ));
        assert!(matches!(
            classify(Some(Ok(Message::Pong(vec![])))),
            Incoming::Ignored
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_http_scheme() {
        let url = Url::parse("https://example.com/ws").unwrap();
        assert!(matches!(
            connect(url).await,
            Err(TransportError::InvalidEndpoint(_))
        ));
    }
}
