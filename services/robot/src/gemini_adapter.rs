use crate::config::SERVER_EVENT_CAPACITY;
use anyhow::{Context, Result};
use async_trait::async_trait;
use gemini_live::types::{
    ActivityHandling, AudioTranscriptionConfig, AutomaticActivityDetection, Content,
    ContextWindowCompression, EndSensitivity, FunctionResponse, GenerationConfig, Modality,
    RealtimeInputConfig, ServerMessage, Setup, SlidingWindow, SpeechConfig, StartSensitivity, Tool,
};
use gemini_live::{Client, ServerEvent};
use robot_core::{
    Error, NormalizedMessage, RealtimeSession, SessionConfig, SessionFactory, ToolResult,
    VadSensitivity,
};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

type CallNames = Arc<Mutex<HashMap<String, String>>>;

/// An adapter that implements the core `RealtimeSession` trait on top of a
/// `gemini_live::Client`.
pub struct GeminiSession {
    config: gemini_live::Config,
    session: SessionConfig,
    input_sample_rate: u32,
    client: tokio::sync::Mutex<Option<Client>>,
    connected: Arc<AtomicBool>,
    // Tool responses must carry the name of the call they answer.
    call_names: CallNames,
    translator: Mutex<Option<JoinHandle<()>>>,
}

impl GeminiSession {
    pub fn new(config: gemini_live::Config, session: SessionConfig, input_sample_rate: u32) -> Self {
        Self {
            config,
            session,
            input_sample_rate,
            client: tokio::sync::Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            call_names: Arc::new(Mutex::new(HashMap::new())),
            translator: Mutex::new(None),
        }
    }
}

fn sensitivities(vad: VadSensitivity) -> (StartSensitivity, EndSensitivity) {
    match vad {
        VadSensitivity::Low => (
            StartSensitivity::StartSensitivityLow,
            EndSensitivity::EndSensitivityLow,
        ),
        VadSensitivity::Medium => (
            StartSensitivity::StartSensitivityHigh,
            EndSensitivity::EndSensitivityLow,
        ),
        VadSensitivity::High => (
            StartSensitivity::StartSensitivityHigh,
            EndSensitivity::EndSensitivityHigh,
        ),
    }
}

/// Builds the setup message for a session: audio replies in the configured voice,
/// barge-in enabled, both transcriptions on and sliding-window compression.
pub fn build_setup(model: &str, session: &SessionConfig) -> Result<Setup> {
    let (start, end) = sensitivities(session.vad_sensitivity);

    let tools = if session.tools.is_empty() {
        Vec::new()
    } else {
        let function_declarations = session
            .tools
            .iter()
            .map(|d| {
                Ok(gemini_live::types::FunctionDeclaration {
                    name: d.name.clone(),
                    description: d.description.clone(),
                    parameters: d.parameters.as_ref().map(serde_json::to_value).transpose()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        vec![Tool {
            function_declarations,
        }]
    };

    Ok(Setup {
        model: model.to_string(),
        generation_config: GenerationConfig {
            response_modalities: vec![Modality::Audio],
            speech_config: Some(SpeechConfig::prebuilt(&session.voice)),
        },
        system_instruction: Some(Content::text(&session.system_prompt)),
        tools,
        realtime_input_config: Some(RealtimeInputConfig {
            automatic_activity_detection: AutomaticActivityDetection {
                disabled: false,
                start_of_speech_sensitivity: Some(start),
                end_of_speech_sensitivity: Some(end),
            },
            activity_handling: Some(ActivityHandling::StartOfActivityInterrupts),
        }),
        input_audio_transcription: Some(AudioTranscriptionConfig {}),
        output_audio_transcription: Some(AudioTranscriptionConfig {}),
        context_window_compression: Some(ContextWindowCompression {
            sliding_window: SlidingWindow {},
        }),
    })
}

/// Translates one server message into zero or more normalized messages.
///
/// Order within a message: setup, model-turn parts, output transcription, input
/// transcription, interruption, turn end, tool calls, cancellations, go-away.
/// Tool call names are recorded in `names` keyed by call id.
pub fn normalize(
    message: ServerMessage,
    names: &mut HashMap<String, String>,
) -> Vec<NormalizedMessage> {
    let mut results = Vec::new();

    if message.setup_complete.is_some() {
        results.push(NormalizedMessage::SetupComplete);
    }

    if let Some(content) = message.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(blob) = part.inline_data {
                    if !blob.data.is_empty() {
                        match robot_native_utils::audio::decode_pcm16(&blob.data) {
                            Ok(pcm) => results.push(NormalizedMessage::Audio(pcm)),
                            Err(e) => tracing::warn!("Dropping undecodable audio part: {}", e),
                        }
                    }
                }
                if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    results.push(NormalizedMessage::Transcription(text));
                }
            }
        }
        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            if !text.is_empty() {
                results.push(NormalizedMessage::Transcription(text));
            }
        }
        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            if !text.is_empty() {
                results.push(NormalizedMessage::InputTranscription(text));
            }
        }
        if content.interrupted {
            results.push(NormalizedMessage::Interrupted);
        }
        if content.turn_complete {
            results.push(NormalizedMessage::TurnComplete);
        }
    }

    if let Some(tool_call) = message.tool_call {
        for call in tool_call.function_calls {
            let call_id = call.id.unwrap_or_default();
            let name = call.name.unwrap_or_default();
            names.insert(call_id.clone(), name.clone());
            results.push(NormalizedMessage::ToolCall {
                call_id,
                name,
                args: call.args.unwrap_or_default(),
            });
        }
    }

    if let Some(cancellation) = message.tool_call_cancellation {
        results.push(NormalizedMessage::ToolCallCancellation(cancellation.ids));
    }

    if message.go_away.is_some() {
        results.push(NormalizedMessage::GoAway);
    }

    results
}

async fn translate(
    mut events: gemini_live::ServerRx,
    tx: tokio::sync::mpsc::Sender<NormalizedMessage>,
    call_names: CallNames,
    connected: Arc<AtomicBool>,
) {
    while let Some(event) = events.recv().await {
        let messages = match event {
            ServerEvent::Message(message) => {
                let mut names = HashMap::new();
                let messages = normalize(*message, &mut names);
                if !names.is_empty() {
                    if let Ok(mut call_names) = call_names.lock() {
                        call_names.extend(names);
                    }
                }
                messages
            }
            ServerEvent::Error(e) => {
                tracing::error!("Error receiving from the Live API: {}", e);
                connected.store(false, Ordering::SeqCst);
                let _ = tx.send(NormalizedMessage::Error(e)).await;
                return;
            }
            ServerEvent::Close { reason } => {
                tracing::info!("Live API connection closed: {:?}", reason);
                connected.store(false, Ordering::SeqCst);
                return;
            }
        };
        for message in messages {
            if tx.send(message).await.is_err() {
                tracing::debug!("Normalized message receiver dropped");
                return;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

#[async_trait]
impl RealtimeSession for GeminiSession {
    async fn connect(&self) -> Result<()> {
        let mut slot = self.client.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let setup = build_setup(&self.config.qualified_model(), &self.session)?;
        let client = gemini_live::connect_with_config(SERVER_EVENT_CAPACITY, self.config.clone())
            .await
            .context("Failed to connect to the Live API")?;
        client
            .setup(setup)
            .await
            .context("Failed to send session setup")?;
        *slot = Some(client);
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(
            model = %self.config.model(),
            voice = %self.session.voice,
            "Gemini session connected"
        );
        Ok(())
    }

    async fn send_audio(&self, frame: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected.into());
        }
        let slot = self.client.lock().await;
        let client = slot.as_ref().ok_or(Error::NotConnected)?;
        client
            .send_realtime_audio(
                robot_native_utils::audio::encode_pcm16(&frame),
                self.input_sample_rate,
            )
            .await
    }

    async fn send_tool_response(&self, call_id: &str, result: ToolResult) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected.into());
        }
        let name = self
            .call_names
            .lock()
            .ok()
            .and_then(|mut names| names.remove(call_id))
            .unwrap_or_default();
        let slot = self.client.lock().await;
        let client = slot.as_ref().ok_or(Error::NotConnected)?;
        client
            .send_tool_response(vec![FunctionResponse {
                id: call_id.to_string(),
                name,
                response: result,
            }])
            .await
    }

    async fn receive(&self) -> Result<tokio::sync::mpsc::Receiver<NormalizedMessage>> {
        if !self.is_connected() {
            return Err(Error::NotConnected.into());
        }
        let events = {
            let mut slot = self.client.lock().await;
            let client = slot.as_mut().ok_or(Error::NotConnected)?;
            client.server_events()?
        };

        let (tx, rx) = tokio::sync::mpsc::channel(128);
        let task = tokio::spawn(translate(
            events,
            tx,
            self.call_names.clone(),
            self.connected.clone(),
        ));
        if let Ok(mut translator) = self.translator.lock() {
            *translator = Some(task);
        }
        Ok(rx)
    }

    async fn close(&self) {
        let client = self.client.lock().await.take();
        let translator = self.translator.lock().ok().and_then(|mut t| t.take());
        if let Some(mut client) = client {
            client.close().await;
            tracing::info!("Gemini session closed.");
        }
        if let Some(task) = translator {
            task.abort();
            let _ = task.await;
        }
        self.connected.store(false, Ordering::SeqCst);
        if let Ok(mut names) = self.call_names.lock() {
            names.clear();
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Creates one `GeminiSession` per conversation.
pub struct GeminiSessionFactory {
    base_url: Option<String>,
    input_sample_rate: u32,
}

impl GeminiSessionFactory {
    pub fn new(base_url: Option<String>, input_sample_rate: u32) -> Self {
        Self {
            base_url,
            input_sample_rate,
        }
    }
}

impl SessionFactory for GeminiSessionFactory {
    fn create(&self, api_key: &SecretString, config: SessionConfig) -> Arc<dyn RealtimeSession> {
        let mut builder = gemini_live::Config::builder()
            .with_api_key(api_key.clone())
            .with_model(&config.model);
        if let Some(base_url) = &self.base_url {
            builder = builder.with_base_url(base_url);
        }
        Arc::new(GeminiSession::new(
            builder.build(),
            config,
            self.input_sample_rate,
        ))
    }
}
