//! Socket Mode over a real WebSocket.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::envelope::{parse_frame, SocketFrame};
use crate::events::SlackEnvelope;
use crate::socket::{SocketTransport, TransportError};
use crate::web::{call_raw, DEFAULT_API_BASE_URL};

type SocketStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    http: reqwest::Client,
    app_token: SecretString,
    api_base_url: String,
    reader: Mutex<Option<SplitStream<SocketStream>>>,
    writer: Mutex<Option<SplitSink<SocketStream, Message>>>,
    shutdown: watch::Sender<bool>,
}

impl WebSocketTransport {
    pub fn new(app_token: SecretString) -> Result<Self, TransportError> {
        Self::with_api_base_url(app_token, DEFAULT_API_BASE_URL)
    }

    pub fn with_api_base_url(
        app_token: SecretString,
        api_base_url: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            http,
            app_token,
            api_base_url: api_base_url.into().trim_end_matches('/').to_owned(),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            shutdown,
        })
    }

    /// Makes a pending or future `next_envelope` return `Ok(None)`, which ends
    /// the runner loop cleanly.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    async fn open_connection_url(&self) -> Result<String, TransportError> {
        let request = self
            .http
            .post(format!("{}/apps.connections.open", self.api_base_url))
            .bearer_auth(self.app_token.expose_secret());
        let body = call_raw("apps.connections.open", request)
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        body.get("url")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| TransportError::Connect("apps.connections.open returned no url".to_owned()))
    }

    async fn send(&self, message: Message) -> Result<(), String> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err("socket is not connected".to_owned());
        };
        sink.send(message).await.map_err(|error| error.to_string())
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self.open_connection_url().await?;
        let (stream, _) =
            connect_async(url.as_str()).await.map_err(|error| TransportError::Connect(error.to_string()))?;
        let (sink, source) = stream.split();

        *self.writer.lock().await = Some(sink);
        *self.reader.lock().await = Some(source);
        info!(event_name = "ingress.slack.socket_opened", "socket mode websocket opened");
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Ok(None);
        }

        let mut reader = self.reader.lock().await;
        let Some(source) = reader.as_mut() else {
            return Err(TransportError::Receive("socket is not connected".to_owned()));
        };

        loop {
            let frame = tokio::select! {
                _ = shutdown.changed() => return Ok(None),
                frame = source.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                    Ok(SocketFrame::Hello) => debug!("socket mode hello received"),
                    Ok(SocketFrame::Disconnect { reason }) => {
                        return Err(TransportError::Receive(format!(
                            "slack requested reconnect: {reason}"
                        )));
                    }
                    Ok(SocketFrame::Envelope(envelope)) => return Ok(Some(envelope)),
                    Err(error) => warn!(
                        event_name = "ingress.slack.frame_rejected",
                        error = %error,
                        "skipping undecodable socket frame"
                    ),
                },
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(error) = self.send(Message::Pong(payload)).await {
                        return Err(TransportError::Receive(error));
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    return Err(TransportError::Receive("socket closed by slack".to_owned()));
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => return Err(TransportError::Receive(error.to_string())),
                None => return Err(TransportError::Receive("socket stream ended".to_owned())),
            }
        }
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let ack = json!({ "envelope_id": envelope_id }).to_string();
        self.send(Message::Text(ack)).await.map_err(TransportError::Acknowledge)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.reader.lock().await.take();
        let Some(mut sink) = self.writer.lock().await.take() else {
            return Ok(());
        };
        sink.close().await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, StreamExt};
    use secrecy::SecretString;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::WebSocketTransport;
    use crate::events::SlackEvent;
    use crate::socket::{SocketTransport, TransportError};

    async fn connections_open(server: &MockServer, ws_url: &str) {
        Mock::given(method("POST"))
            .and(path("/apps.connections.open"))
            .and(header("authorization", "Bearer xapp-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "url": ws_url
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn receives_envelope_acks_and_surfaces_refresh() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        let socket_server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut socket = tokio_tungstenite::accept_async(stream).await.expect("handshake");
            let frames = [
                json!({"type": "hello", "num_connections": 1}),
                json!({
                    "envelope_id": "env-1",
                    "type": "events_api",
                    "payload": {"team_id": "T1", "event": {
                        "type": "app_mention", "user": "U1", "channel": "C1",
                        "text": "<@U0BOT> hi", "ts": "1700000000.000100"
                    }}
                }),
            ];
            for frame in frames {
                socket.send(Message::Text(frame.to_string())).await.expect("send frame");
            }
            let ack = socket.next().await.expect("ack frame").expect("ack");
            socket
                .send(Message::Text(
                    json!({"type": "disconnect", "reason": "refresh_requested"}).to_string(),
                ))
                .await
                .expect("send disconnect");
            ack.into_text().expect("text ack")
        });

        let api = MockServer::start().await;
        connections_open(&api, &format!("ws://{address}")).await;
        let transport = WebSocketTransport::with_api_base_url(
            SecretString::from("xapp-test".to_owned()),
            api.uri(),
        )
        .expect("transport");

        transport.connect().await.expect("connect");
        let envelope = transport.next_envelope().await.expect("receive").expect("envelope");
        assert_eq!(envelope.envelope_id, "env-1");
        assert!(matches!(envelope.event, SlackEvent::AppMention(_)));

        transport.acknowledge("env-1").await.expect("ack");
        let refresh = transport.next_envelope().await;
        assert!(matches!(refresh, Err(TransportError::Receive(reason)) if reason.contains("refresh_requested")));

        let ack = socket_server.await.expect("server task");
        let ack: serde_json::Value = serde_json::from_str(&ack).expect("ack json");
        assert_eq!(ack, json!({"envelope_id": "env-1"}));
        transport.disconnect().await.ok();
    }

    #[tokio::test]
    async fn connection_open_failure_is_a_connect_error() {
        let api = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps.connections.open"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "invalid_auth"})),
            )
            .mount(&api)
            .await;
        let transport = WebSocketTransport::with_api_base_url(
            SecretString::from("xapp-bad".to_owned()),
            api.uri(),
        )
        .expect("transport");

        let error = transport.connect().await.expect_err("connect should fail");
        assert!(matches!(error, TransportError::Connect(reason) if reason.contains("invalid_auth")));
    }

    #[tokio::test]
    async fn shutdown_ends_the_stream_cleanly() {
        let transport =
            WebSocketTransport::new(SecretString::from("xapp-test".to_owned())).expect("transport");

        transport.shutdown();

        assert_eq!(transport.next_envelope().await, Ok(None));
        assert_eq!(transport.disconnect().await, Ok(()));
    }
}
