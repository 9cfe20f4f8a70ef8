use crate::types::{
    Blob, ClientMessage, FunctionResponse, RealtimeInput, ServerEvent, ServerMessage, Setup,
    ToolResponse,
};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

pub mod config;
pub mod consts;

pub type ClientTx = tokio::sync::mpsc::Sender<ClientMessage>;
type ServerTx = tokio::sync::mpsc::Sender<ServerEvent>;
pub type ServerRx = tokio::sync::mpsc::Receiver<ServerEvent>;

/// A connection to the Live API. Outgoing messages go through a writer task and
/// incoming frames are decoded by a reader task.
pub struct Client {
    capacity: usize,
    config: config::Config,
    c_tx: Option<ClientTx>,
    s_rx: Option<ServerRx>,
    connected: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Client {
    fn new(capacity: usize, config: config::Config) -> Self {
        Self {
            capacity,
            config,
            c_tx: None,
            s_rx: None,
            connected: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if self.c_tx.is_some() {
            return Err(anyhow::anyhow!("already connected"));
        }

        let handshake = tokio_tungstenite::connect_async(self.config.connect_url());
        let (ws_stream, _) = tokio::time::timeout(self.config.connect_timeout(), handshake)
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Timed out after {:?} connecting to the Live API",
                    self.config.connect_timeout()
                )
            })?
            .context("Failed to connect to the Live API WebSocket")?;
        tracing::info!("Connected to the Live API ({})", self.config.model());
        let (mut write, mut read) = ws_stream.split();

        let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<ClientMessage>(self.capacity);
        let (s_tx, s_rx) = tokio::sync::mpsc::channel(self.capacity);
        self.c_tx = Some(c_tx);
        self.s_rx = Some(s_rx);
        self.connected.store(true, Ordering::SeqCst);

        // Writer: serialize outgoing messages until every sender is gone, then close.
        self.tasks.push(tokio::spawn(async move {
            while let Some(message) = c_rx.recv().await {
                match serde_json::to_string(&message) {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!("failed to send message: {}", e);
                            break;
                        }
                    }
                    Err(e) => tracing::error!("failed to serialize message: {}", e),
                }
            }
            if let Err(e) = write.close().await {
                tracing::debug!("failed to close WebSocket cleanly: {}", e);
            }
        }));

        let connected = self.connected.clone();
        self.tasks.push(tokio::spawn(async move {
            read_loop(&mut read, &s_tx).await;
            connected.store(false, Ordering::SeqCst);
        }));
        Ok(())
    }

    /// Takes the server event stream. Only the first call succeeds.
    pub fn server_events(&mut self) -> Result<ServerRx> {
        self.s_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("server events already taken or not connected"))
    }

    pub fn is_connected(&self) -> bool {
        self.c_tx.is_some() && self.connected.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &config::Config {
        &self.config
    }

    async fn send_client_message(&self, message: ClientMessage) -> Result<()> {
        match self.c_tx {
            Some(ref tx) => {
                tx.send(message)
                    .await
                    .map_err(|_| anyhow::anyhow!("connection writer has stopped"))?;
                Ok(())
            }
            None => Err(anyhow::anyhow!("not connected yet")),
        }
    }

    /// Sends the session setup. Must be the first message on a connection.
    pub async fn setup(&self, setup: Setup) -> Result<()> {
        self.send_client_message(ClientMessage::Setup(Box::new(setup)))
            .await
    }

    /// Streams base64-encoded PCM16 audio at `sample_rate`.
    pub async fn send_realtime_audio(&self, data: String, sample_rate: u32) -> Result<()> {
        let input = RealtimeInput {
            audio: Some(Blob {
                mime_type: format!("audio/pcm;rate={sample_rate}"),
                data,
            }),
            audio_stream_end: None,
        };
        self.send_client_message(ClientMessage::RealtimeInput(input))
            .await
    }

    pub async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()> {
        let response = ToolResponse {
            function_responses: responses,
        };
        self.send_client_message(ClientMessage::ToolResponse(response))
            .await
    }

    /// Closes the connection. The writer flushes queued messages and sends a close frame.
    pub async fn close(&mut self) {
        self.c_tx = None;
        self.connected.store(false, Ordering::SeqCst);
        let mut tasks = std::mem::take(&mut self.tasks).into_iter();
        // Give the writer a moment to send its close frame before the reader goes.
        if let Some(writer) = tasks.next() {
            if tokio::time::timeout(std::time::Duration::from_secs(1), writer)
                .await
                .is_err()
            {
                tracing::debug!("writer did not finish in time");
            }
        }
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
    }
}

async fn read_loop<S>(read: &mut S, s_tx: &ServerTx)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    while let Some(message) = read.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("failed to read message: {}", e);
                let _ = s_tx.send(ServerEvent::Error(e.to_string())).await;
                return;
            }
        };

        // The Live API sends JSON in both text and binary frames.
        let parsed = match message {
            Message::Text(text) => serde_json::from_str::<ServerMessage>(&text),
            Message::Binary(bin) => serde_json::from_slice::<ServerMessage>(&bin),
            Message::Close(reason) => {
                tracing::info!("connection closed: {:?}", reason);
                let close = ServerEvent::Close {
                    reason: reason.map(|frame| frame.reason.to_string()),
                };
                let _ = s_tx.send(close).await;
                return;
            }
            _ => continue,
        };

        match parsed {
            Ok(event) => {
                if s_tx.send(ServerEvent::Message(Box::new(event))).await.is_err() {
                    tracing::debug!("server event receiver dropped");
                    return;
                }
            }
            Err(e) => tracing::error!("failed to deserialize server message: {}", e),
        }
    }
}

pub async fn connect_with_config(capacity: usize, config: config::Config) -> Result<Client> {
    let mut client = Client::new(capacity, config);
    client.connect().await?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use serde_json::Value;
    use tokio::net::TcpListener;

    async fn local_server() -> (TcpListener, config::Config) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = config::Config::builder()
            .with_base_url(&format!("ws://{addr}/live"))
            .with_api_key(SecretString::from("test".to_string()))
            .build();
        (listener, config)
    }

    #[tokio::test]
    async fn sends_setup_and_receives_binary_json() {
        // --- Arrange ---
        let (listener, config) = local_server().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            let setup: Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
            ws.send(Message::Binary(br#"{"setupComplete": {}}"#.to_vec()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"goAway": {"timeLeft": "5s"}}"#.to_string()))
                .await
                .unwrap();
            setup
        });

        // --- Act ---
        let mut client = connect_with_config(16, config).await.unwrap();
        let mut events = client.server_events().unwrap();
        client
            .setup(Setup {
                model: "models/gemini-test".into(),
                ..Setup::default()
            })
            .await
            .unwrap();
        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();

        // --- Assert ---
        let setup = server.await.unwrap();
        assert_eq!(setup["setup"]["model"], "models/gemini-test");
        match first {
            ServerEvent::Message(message) => assert!(message.setup_complete.is_some()),
            other => panic!("unexpected event {other:?}"),
        }
        match second {
            ServerEvent::Message(message) => {
                assert_eq!(message.go_away.unwrap().time_left.as_deref(), Some("5s"))
            }
            other => panic!("unexpected event {other:?}"),
        }
        client.close().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn server_close_is_reported() {
        let (listener, config) = local_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
            // Drain until the client acknowledges the close.
            while ws.next().await.is_some() {}
        });

        let mut client = connect_with_config(16, config).await.unwrap();
        let mut events = client.server_events().unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(event, ServerEvent::Close { .. }));
        assert!(client.server_events().is_err());
        client.close().await;
    }

    #[tokio::test]
    async fn stalled_handshake_times_out() {
        // --- Arrange ---
        let (listener, config) = local_server().await;
        let config = config::Config::builder()
            .with_base_url(config.base_url())
            .with_connect_timeout(std::time::Duration::from_millis(100))
            .build();
        // Accepts the TCP connection but never answers the upgrade request.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            drop(stream);
        });

        // --- Act ---
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            connect_with_config(4, config),
        )
        .await
        .expect("connect should give up on its own");

        // --- Assert ---
        let err = result.err().expect("a stalled handshake must fail");
        assert!(format!("{err:#}").contains("Timed out"));
        server.abort();
    }

    #[tokio::test]
    async fn sending_before_connect_fails() {
        let client = Client::new(4, config::Config::new());
        assert!(client.send_realtime_audio(String::new(), 16_000).await.is_err());
        assert!(!client.is_connected());
    }
}
