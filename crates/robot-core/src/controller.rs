//! The robot's conversation state machine.
//!
//! One controller owns the hardware, the wake-word monitor and at most one open
//! realtime session. It cycles IDLE -> CONNECTING -> CONVERSATION -> IDLE until
//! [`ControllerHandle::stop`] is called.

use crate::audio::{CaptureFormat, CapturePipeline, PlaybackConfig, PlaybackPipeline};
use crate::generic_types::NormalizedMessage;
use crate::hardware::{Camera, Display, Hardware, Microphone, Speaker};
use crate::personality::{FALLBACK_PERSONALITY, Personality, PersonalityManager};
use crate::realtime_api::{RealtimeSession, SessionConfig, SessionFactory};
use crate::settings::RobotSettings;
use crate::state::RobotState;
use crate::tools::{ToolDefinition, ToolDispatcher, camera_tools, display_tools};
use crate::wake_word::{ModelLoader, WakeWordMonitor, energy_loader};
use anyhow::{Result, anyhow};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, watch};

/// Back-off before retrying when the wake-word monitor cannot start.
const WAKE_WORD_RETRY_DELAY: Duration = Duration::from_secs(1);

/// State shared between the controller and its handles.
struct Shared {
    running: AtomicBool,
    loop_active: AtomicBool,
    stop_signal: Notify,
    state: watch::Sender<RobotState>,
    session: Mutex<Option<Arc<dyn RealtimeSession>>>,
    wake_word: Arc<WakeWordMonitor>,
}

impl Shared {
    fn current_session(&self) -> Option<Arc<dyn RealtimeSession>> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    fn replace_session(&self, session: Option<Arc<dyn RealtimeSession>>) -> Option<Arc<dyn RealtimeSession>> {
        match self.session.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, session),
            Err(_) => None,
        }
    }
}

/// Cloneable remote control for a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    shared: Arc<Shared>,
}

impl ControllerHandle {
    /// Requests shutdown. Safe to call in any state, before `run`, and repeatedly.
    pub async fn stop(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Stop requested");
        }
        self.shared.stop_signal.notify_one();
        self.shared.wake_word.stop().await;
        if let Some(session) = self.shared.current_session() {
            if session.is_connected() {
                session.close().await;
            }
        }
        if !self.shared.loop_active.load(Ordering::SeqCst) {
            self.shared.state.send_replace(RobotState::ShuttingDown);
        }
    }

    pub fn state(&self) -> RobotState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RobotState> {
        self.shared.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

/// Time of the last sign of life in a conversation.
struct ActivityTracker {
    last: Mutex<Instant>,
}

impl ActivityTracker {
    fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last.lock() {
            *last = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last.lock().map(|l| l.elapsed()).unwrap_or_default()
    }
}

pub struct RobotController {
    settings: RobotSettings,
    hardware: Hardware,
    sessions: Arc<dyn SessionFactory>,
    tools: ToolDispatcher,
    personalities: PersonalityManager,
    playback_config: PlaybackConfig,
    wake_word: Arc<WakeWordMonitor>,
    shared: Arc<Shared>,
    active_config: Option<SessionConfig>,
    conversation_timeout: Duration,
}

impl RobotController {
    pub fn builder(settings: RobotSettings) -> RobotControllerBuilder {
        RobotControllerBuilder::new(settings)
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> RobotState {
        *self.shared.state.borrow()
    }

    pub fn tools(&self) -> &ToolDispatcher {
        &self.tools
    }

    /// The configuration of the open session, if any.
    pub fn active_config(&self) -> Option<&SessionConfig> {
        self.active_config.as_ref()
    }

    /// Runs the state machine until stopped, then releases every resource.
    pub async fn run(&mut self) {
        self.shared.loop_active.store(true, Ordering::SeqCst);
        tracing::info!(tools = self.tools.len(), "Robot controller started");

        while self.shared.running.load(Ordering::SeqCst) {
            let current = self.state();
            let next = match current {
                RobotState::Idle => self.run_idle().await,
                RobotState::Connecting => self.run_connecting().await,
                RobotState::Conversation => self.run_conversation().await,
                RobotState::ShuttingDown => break,
            };
            // A stop that landed mid-handler wins over the handler's transition.
            if self.shared.running.load(Ordering::SeqCst) && next != current {
                tracing::info!(from = %current, to = %next, "State transition");
                self.shared.state.send_replace(next);
            }
        }

        self.cleanup().await;
        self.shared.state.send_replace(RobotState::ShuttingDown);
        self.shared.loop_active.store(false, Ordering::SeqCst);
        tracing::info!("Robot controller stopped");
    }

    /// Waits for the wake word or a stop, whichever comes first.
    pub(crate) async fn run_idle(&mut self) -> RobotState {
        self.hardware.status("listening");
        if !self.shared.running.load(Ordering::SeqCst) {
            return RobotState::Idle;
        }

        let wake = Arc::new(Notify::new());
        let on_wake = wake.clone();
        if let Err(e) = self
            .wake_word
            .start(Arc::new(move || on_wake.notify_one()))
            .await
        {
            tracing::error!("Failed to start wake word monitor: {:#}", e);
            tokio::select! {
                _ = self.shared.stop_signal.notified() => {}
                _ = tokio::time::sleep(WAKE_WORD_RETRY_DELAY) => {}
            }
            return RobotState::Idle;
        }

        // Stop is polled first so it wins when both are ready.
        let woke = tokio::select! {
            biased;
            _ = self.shared.stop_signal.notified() => false,
            _ = wake.notified() => true,
        };
        self.wake_word.stop().await;

        if woke && self.shared.running.load(Ordering::SeqCst) {
            RobotState::Connecting
        } else {
            RobotState::Idle
        }
    }

    /// Opens a session for the configured personality.
    pub(crate) async fn run_connecting(&mut self) -> RobotState {
        self.hardware.status("connecting");

        let Some(personality) = self.resolve_personality() else {
            return RobotState::Idle;
        };
        let config = SessionConfig {
            model: self.settings.model.clone(),
            voice: personality.voice.clone(),
            system_prompt: personality.system_prompt.clone(),
            tools: self.tools.declarations(),
            vad_sensitivity: personality.vad_sensitivity,
        };
        tracing::info!(
            personality = %personality.name,
            voice = %config.voice,
            model = %config.model,
            "Connecting realtime session"
        );

        let session = self.sessions.create(&self.settings.api_key, config.clone());
        // Visible to stop() while the connection is in flight.
        self.shared.replace_session(Some(session.clone()));

        let connected = tokio::select! {
            biased;
            _ = self.shared.stop_signal.notified() => None,
            result = session.connect() => Some(result),
        };
        let Some(connected) = connected else {
            tracing::info!("Stop requested while connecting");
            self.shared.replace_session(None);
            session.close().await;
            return RobotState::Idle;
        };

        match connected {
            Ok(()) => {
                self.conversation_timeout = personality.conversation_timeout;
                self.active_config = Some(config);
                tracing::info!("Realtime session connected");
                RobotState::Conversation
            }
            Err(e) => {
                tracing::error!("Failed to connect realtime session: {:#}", e);
                self.shared.replace_session(None);
                session.close().await;
                self.hardware.status("error");
                RobotState::Idle
            }
        }
    }

    /// Streams a conversation until the remote side ends it, silence times out,
    /// or stop is requested. Always tears the conversation down before returning.
    pub(crate) async fn run_conversation(&mut self) -> RobotState {
        self.hardware.status("conversation");
        let Some(session) = self.shared.current_session() else {
            tracing::warn!("Entered conversation without an open session");
            return RobotState::Idle;
        };

        let mut capture = CapturePipeline::new(
            self.hardware.microphone.clone(),
            session.clone(),
            self.capture_format(),
        );
        let mut playback = PlaybackPipeline::new(self.hardware.speaker.clone(), self.playback_config);
        let activity = ActivityTracker::new();

        let reason = match capture.start() {
            Ok(()) => {
                let receive = receive_loop(
                    session.as_ref(),
                    &mut playback,
                    &self.tools,
                    &self.hardware,
                    &activity,
                );
                let monitor = timeout_monitor(
                    &activity,
                    self.conversation_timeout,
                    self.settings.max_session_duration,
                    self.settings.timeout_poll_interval,
                );
                // The losing futures are dropped here, before any teardown.
                tokio::select! {
                    reason = receive => reason,
                    reason = monitor => reason,
                    _ = self.shared.stop_signal.notified() => "stop requested",
                }
            }
            Err(e) => {
                tracing::error!("Failed to start audio capture: {:#}", e);
                "capture failed"
            }
        };
        tracing::info!(reason, "Conversation ended");

        capture.stop().await;
        playback.stop().await;
        if session.is_connected() {
            session.close().await;
        }
        self.shared.replace_session(None);
        self.active_config = None;
        RobotState::Idle
    }

    fn resolve_personality(&self) -> Option<Personality> {
        let configured = &self.settings.default_personality;
        match self.personalities.get(configured) {
            Ok(p) => Some(p.clone()),
            Err(e) => {
                tracing::warn!("{}; falling back to '{}'", e, FALLBACK_PERSONALITY);
                match self.personalities.get(FALLBACK_PERSONALITY) {
                    Ok(p) => Some(p.clone()),
                    Err(e) => {
                        tracing::error!("No usable personality: {}", e);
                        None
                    }
                }
            }
        }
    }

    fn capture_format(&self) -> CaptureFormat {
        CaptureFormat {
            sample_rate: self.settings.input_sample_rate,
            channels: self.settings.input_channels,
            chunk_size: self.settings.audio_chunk_size,
        }
    }

    /// Releases everything. Tolerates resources that are already closed.
    async fn cleanup(&mut self) {
        self.wake_word.stop().await;
        if let Some(session) = self.shared.replace_session(None) {
            session.close().await;
        }
        self.active_config = None;

        let microphone = &self.hardware.microphone;
        if microphone.is_open() {
            if let Err(e) = microphone.close() {
                tracing::warn!("Failed to close microphone: {:?}", e);
            }
        }
        let speaker = &self.hardware.speaker;
        if speaker.is_open() {
            if let Err(e) = speaker.stop().and_then(|_| speaker.close()) {
                tracing::warn!("Failed to close speaker: {:?}", e);
            }
        }
        if let Some(display) = &self.hardware.display {
            if let Err(e) = display.clear() {
                tracing::warn!("Failed to clear display: {:?}", e);
            }
        }
    }
}

async fn receive_loop(
    session: &dyn RealtimeSession,
    playback: &mut PlaybackPipeline,
    tools: &ToolDispatcher,
    hardware: &Hardware,
    activity: &ActivityTracker,
) -> &'static str {
    let mut messages = match session.receive().await {
        Ok(messages) => messages,
        Err(e) => {
            tracing::error!("Failed to open the session message stream: {:#}", e);
            return "receive failed";
        }
    };

    while let Some(message) = messages.recv().await {
        let kind = message.kind();
        let terminal = message.is_terminal();
        tracing::trace!(kind, "Session message");
        match message {
            NormalizedMessage::Audio(frame) => {
                if let Err(e) = playback.play_chunk(frame) {
                    tracing::error!("Failed to queue audio: {:#}", e);
                }
            }
            NormalizedMessage::Transcription(text) => {
                tracing::debug!(text = %text, "Model said");
                hardware.text(&text);
            }
            NormalizedMessage::InputTranscription(text) => {
                activity.touch();
                tracing::debug!(text = %text, "User said");
                hardware.text(&format!("> {text}"));
            }
            NormalizedMessage::TurnComplete => {
                activity.touch();
                playback.flush().await;
            }
            NormalizedMessage::Interrupted => {
                tracing::debug!("Model interrupted");
                playback.stop().await;
                activity.touch();
            }
            NormalizedMessage::ToolCall {
                call_id,
                name,
                args,
            } => {
                activity.touch();
                tracing::info!(tool = %name, call_id = %call_id, "Tool call");
                let result = tools.execute(&name, args).await;
                if session.is_connected() {
                    if let Err(e) = session.send_tool_response(&call_id, result).await {
                        tracing::error!("Failed to send tool response for {}: {:#}", name, e);
                    }
                }
            }
            NormalizedMessage::ToolCallCancellation(ids) => {
                tracing::info!(?ids, "Tool calls cancelled");
            }
            NormalizedMessage::SetupComplete => tracing::debug!("Session setup complete"),
            NormalizedMessage::GoAway => tracing::warn!("Session is going away"),
            NormalizedMessage::Error(text) => tracing::error!("Session error: {}", text),
        }
        if terminal {
            return kind;
        }
    }
    "stream ended"
}

async fn timeout_monitor(
    activity: &ActivityTracker,
    silence_limit: Duration,
    max_duration: Duration,
    poll_interval: Duration,
) -> &'static str {
    let started = Instant::now();
    loop {
        tokio::time::sleep(poll_interval).await;
        if activity.idle_for() >= silence_limit {
            tracing::info!("No activity for {:?}", silence_limit);
            return "silence timeout";
        }
        if started.elapsed() >= max_duration {
            tracing::info!("Conversation reached {:?}", max_duration);
            return "max session duration";
        }
    }
}

pub struct RobotControllerBuilder {
    settings: RobotSettings,
    microphone: Option<Arc<dyn Microphone>>,
    speaker: Option<Arc<dyn Speaker>>,
    display: Option<Arc<dyn Display>>,
    camera: Option<Arc<dyn Camera>>,
    sessions: Option<Arc<dyn SessionFactory>>,
    wake_model: Option<ModelLoader>,
    personalities: Option<PersonalityManager>,
    tools: Vec<ToolDefinition>,
    playback: PlaybackConfig,
}

impl RobotControllerBuilder {
    pub fn new(settings: RobotSettings) -> Self {
        let playback = PlaybackConfig {
            sample_rate: settings.output_sample_rate,
            ..PlaybackConfig::default()
        };
        Self {
            settings,
            microphone: None,
            speaker: None,
            display: None,
            camera: None,
            sessions: None,
            wake_model: None,
            personalities: None,
            tools: Vec::new(),
            playback,
        }
    }

    pub fn with_microphone(mut self, microphone: Arc<dyn Microphone>) -> Self {
        self.microphone = Some(microphone);
        self
    }

    pub fn with_speaker(mut self, speaker: Arc<dyn Speaker>) -> Self {
        self.speaker = Some(speaker);
        self
    }

    pub fn with_display(mut self, display: Arc<dyn Display>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn with_camera(mut self, camera: Arc<dyn Camera>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn with_session_factory(mut self, sessions: Arc<dyn SessionFactory>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Defaults to the energy classifier named after the configured wake word.
    pub fn with_wake_model(mut self, loader: ModelLoader) -> Self {
        self.wake_model = Some(loader);
        self
    }

    /// Defaults to loading the configured personalities directory.
    pub fn with_personalities(mut self, personalities: PersonalityManager) -> Self {
        self.personalities = Some(personalities);
        self
    }

    /// Adds a tool on top of the built-in hardware tools.
    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_playback_config(mut self, playback: PlaybackConfig) -> Self {
        self.playback = playback;
        self
    }

    pub fn build(self) -> Result<RobotController> {
        let microphone = self.microphone.ok_or_else(|| anyhow!("a microphone is required"))?;
        let speaker = self.speaker.ok_or_else(|| anyhow!("a speaker is required"))?;
        let sessions = self
            .sessions
            .ok_or_else(|| anyhow!("a session factory is required"))?;
        let settings = self.settings;

        let mut tools = ToolDispatcher::new();
        if let Some(display) = &self.display {
            display_tools(display.clone()).into_iter().for_each(|t| tools.register(t));
        }
        if let Some(camera) = &self.camera {
            camera_tools(camera.clone()).into_iter().for_each(|t| tools.register(t));
        }
        for tool in self.tools {
            tools.register(tool);
        }

        let personalities = self
            .personalities
            .unwrap_or_else(|| PersonalityManager::load(&settings.personalities_dir));
        let loader = self
            .wake_model
            .unwrap_or_else(|| energy_loader(settings.wake_word.clone()));
        let wake_word = Arc::new(WakeWordMonitor::new(
            microphone.clone(),
            loader,
            CaptureFormat {
                sample_rate: settings.input_sample_rate,
                channels: settings.input_channels,
                chunk_size: settings.audio_chunk_size,
            },
            settings.wake_word_sensitivity,
        ));

        let (state, _) = watch::channel(RobotState::Idle);
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            loop_active: AtomicBool::new(false),
            stop_signal: Notify::new(),
            state,
            session: Mutex::new(None),
            wake_word: wake_word.clone(),
        });

        Ok(RobotController {
            conversation_timeout: settings.conversation_timeout,
            settings,
            hardware: Hardware {
                microphone,
                speaker,
                display: self.display,
                camera: self.camera,
            },
            sessions,
            tools,
            personalities,
            playback_config: self.playback,
            wake_word,
            shared,
            active_config: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generic_types::ToolResult;
    use crate::hardware::stubs::{StubCamera, StubDisplay, StubMicrophone, StubSpeaker};
    use crate::realtime_api::{MockSessionFactory, VadSensitivity};
    use crate::wake_word::WakeWordModel;
    use async_trait::async_trait;
    use secrecy::{ExposeSecret, SecretString};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// A session that replays a fixed script of messages.
    struct ScriptedSession {
        script: Mutex<Vec<NormalizedMessage>>,
        hold_open: bool,
        fail_connect: bool,
        stall_connect: bool,
        connected: AtomicBool,
        closes: AtomicUsize,
        audio_frames: AtomicUsize,
        tool_responses: Mutex<Vec<(String, ToolResult)>>,
        held: Mutex<Option<mpsc::Sender<NormalizedMessage>>>,
    }

    impl ScriptedSession {
        fn new(script: Vec<NormalizedMessage>) -> Self {
            Self {
                script: Mutex::new(script),
                hold_open: false,
                fail_connect: false,
                stall_connect: false,
                connected: AtomicBool::new(false),
                closes: AtomicUsize::new(0),
                audio_frames: AtomicUsize::new(0),
                tool_responses: Mutex::new(Vec::new()),
                held: Mutex::new(None),
            }
        }

        /// Keeps the stream open after the script runs out.
        fn held_open(mut self) -> Self {
            self.hold_open = true;
            self
        }

        fn failing(mut self) -> Self {
            self.fail_connect = true;
            self
        }

        /// Never finishes connecting.
        fn stalling(mut self) -> Self {
            self.stall_connect = true;
            self
        }

        fn tool_responses(&self) -> Vec<(String, ToolResult)> {
            self.tool_responses.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RealtimeSession for ScriptedSession {
        async fn connect(&self) -> Result<()> {
            if self.fail_connect {
                return Err(anyhow!("connection refused"));
            }
            if self.stall_connect {
                std::future::pending::<()>().await;
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send_audio(&self, _frame: Vec<u8>) -> Result<()> {
            self.audio_frames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send_tool_response(&self, call_id: &str, result: ToolResult) -> Result<()> {
            self.tool_responses
                .lock()
                .unwrap()
                .push((call_id.to_string(), result));
            Ok(())
        }

        async fn receive(&self) -> Result<mpsc::Receiver<NormalizedMessage>> {
            let script = std::mem::take(&mut *self.script.lock().unwrap());
            let (tx, rx) = mpsc::channel(script.len() + 1);
            for message in script {
                tx.try_send(message).unwrap();
            }
            if self.hold_open {
                *self.held.lock().unwrap() = Some(tx);
            }
            Ok(rx)
        }

        async fn close(&self) {
            self.connected.store(false, Ordering::SeqCst);
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.held.lock().unwrap().take();
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    struct FixedFactory(Arc<ScriptedSession>);

    impl SessionFactory for FixedFactory {
        fn create(&self, _api_key: &SecretString, _config: SessionConfig) -> Arc<dyn RealtimeSession> {
            self.0.clone()
        }
    }

    /// Scores every detector frame with the same value.
    struct ConstantModel(f32);

    impl WakeWordModel for ConstantModel {
        fn predict(&mut self, _frame: &[i16]) -> Result<HashMap<String, f32>> {
            Ok(HashMap::from([("hey robot".to_string(), self.0)]))
        }

        fn reset(&mut self) {}
    }

    fn constant_loader(score: f32) -> ModelLoader {
        Arc::new(move || Ok(Box::new(ConstantModel(score)) as Box<dyn WakeWordModel>))
    }

    fn personality(name: &str, voice: &str, vad: VadSensitivity) -> Personality {
        Personality {
            name: name.to_string(),
            voice: voice.to_string(),
            system_prompt: format!("You are {name}."),
            description: String::new(),
            conversation_timeout: Duration::from_secs(30),
            vad_sensitivity: vad,
        }
    }

    fn personalities() -> PersonalityManager {
        let mut manager = PersonalityManager::default();
        manager.insert("friendly", personality("Friendly", "Achird", VadSensitivity::Medium));
        manager.insert("professional", personality("Professional", "Kore", VadSensitivity::High));
        manager
    }

    fn settings(default_personality: &str) -> RobotSettings {
        let mut settings = RobotSettings::new(SecretString::from("test-key".to_string()));
        settings.default_personality = default_personality.to_string();
        settings.timeout_poll_interval = Duration::from_millis(10);
        settings
    }

    fn fast_playback() -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: 24_000,
            buffer_frames: 3,
            initial_wait: Duration::from_millis(20),
            drain_wait: Duration::from_millis(50),
        }
    }

    struct Rig {
        controller: RobotController,
        speaker: Arc<StubSpeaker>,
        display: Arc<StubDisplay>,
        microphone: Arc<StubMicrophone>,
    }

    fn rig_with(sessions: Arc<dyn SessionFactory>, default_personality: &str, wake_score: f32) -> Rig {
        let speaker = Arc::new(StubSpeaker::new(None));
        let display = Arc::new(StubDisplay::new());
        let microphone = Arc::new(StubMicrophone::new(None));
        let controller = RobotController::builder(settings(default_personality))
            .with_microphone(microphone.clone())
            .with_speaker(speaker.clone())
            .with_display(display.clone())
            .with_camera(Arc::new(StubCamera::new(None)))
            .with_session_factory(sessions)
            .with_wake_model(constant_loader(wake_score))
            .with_personalities(personalities())
            .with_playback_config(fast_playback())
            .build()
            .unwrap();
        Rig {
            controller,
            speaker,
            display,
            microphone,
        }
    }

    /// Records how much audio had been played each time text is shown.
    struct PlayedWhenShown {
        speaker: Arc<StubSpeaker>,
        played: Mutex<Vec<usize>>,
    }

    impl Display for PlayedWhenShown {
        fn show_text(&self, _text: &str) -> Result<()> {
            self.played.lock().unwrap().push(self.speaker.recorded().len());
            Ok(())
        }

        fn show_status(&self, _status: &str) -> Result<()> {
            Ok(())
        }

        fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    fn rig(session: Arc<ScriptedSession>) -> Rig {
        rig_with(Arc::new(FixedFactory(session)), "friendly", 0.0)
    }

    #[test]
    fn builder_registers_hardware_tools() {
        let rig = rig(Arc::new(ScriptedSession::new(vec![])));
        assert_eq!(
            rig.controller.tools().names(),
            ["display_text", "display_status", "clear_display", "capture_camera_frame"]
        );
        assert_eq!(rig.controller.state(), RobotState::Idle);
    }

    #[test]
    fn builder_requires_a_session_factory() {
        let result = RobotController::builder(settings("friendly"))
            .with_microphone(Arc::new(StubMicrophone::new(None)))
            .with_speaker(Arc::new(StubSpeaker::new(None)))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stop_before_run_shuts_down_immediately() {
        // --- Arrange ---
        let mut rig = rig(Arc::new(ScriptedSession::new(vec![])));
        let handle = rig.controller.handle();

        // --- Act ---
        handle.stop().await;
        handle.stop().await;
        tokio::time::timeout(Duration::from_secs(1), rig.controller.run())
            .await
            .unwrap();

        // --- Assert ---
        assert_eq!(handle.state(), RobotState::ShuttingDown);
        assert!(!handle.is_running());
        assert!(!rig.microphone.is_open());
    }

    #[tokio::test]
    async fn wake_word_moves_idle_to_connecting() {
        let mut rig = rig_with(
            Arc::new(FixedFactory(Arc::new(ScriptedSession::new(vec![])))),
            "friendly",
            1.0,
        );

        let next = tokio::time::timeout(Duration::from_secs(2), rig.controller.run_idle())
            .await
            .unwrap();

        assert_eq!(next, RobotState::Connecting);
        assert_eq!(rig.display.last_status().as_deref(), Some("listening"));
        assert!(!rig.microphone.is_open(), "monitor is stopped on exit");
    }

    #[tokio::test]
    async fn stop_wins_over_wake_word_in_idle() {
        // --- Arrange ---
        let mut rig = rig_with(
            Arc::new(FixedFactory(Arc::new(ScriptedSession::new(vec![])))),
            "friendly",
            1.0,
        );
        let handle = rig.controller.handle();

        // --- Act ---
        handle.stop().await;
        let next = rig.controller.run_idle().await;

        // --- Assert ---
        assert_eq!(next, RobotState::Idle);
    }

    #[tokio::test]
    async fn stop_while_waiting_in_idle_returns_idle() {
        let mut rig = rig(Arc::new(ScriptedSession::new(vec![])));
        let handle = rig.controller.handle();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.stop().await;
        });
        let next = tokio::time::timeout(Duration::from_secs(2), rig.controller.run_idle())
            .await
            .unwrap();
        stopper.await.unwrap();

        assert_eq!(next, RobotState::Idle);
    }

    #[tokio::test]
    async fn professional_personality_sets_voice_and_passes_api_key() {
        // --- Arrange ---
        let session = Arc::new(ScriptedSession::new(vec![]));
        let returned = session.clone();
        let mut factory = MockSessionFactory::new();
        factory
            .expect_create()
            .withf(|api_key, config| {
                api_key.expose_secret() == "test-key"
                    && config.voice == "Kore"
                    && config.vad_sensitivity == VadSensitivity::High
                    && config.system_prompt == "You are Professional."
            })
            .times(1)
            .returning(move |_, _| returned.clone() as Arc<dyn RealtimeSession>);
        let mut rig = rig_with(Arc::new(factory), "professional", 0.0);

        // --- Act ---
        let next = rig.controller.run_connecting().await;

        // --- Assert ---
        assert_eq!(next, RobotState::Conversation);
        assert!(session.is_connected());
        let config = rig.controller.active_config().unwrap();
        assert_eq!(config.voice, "Kore");
        assert_eq!(config.tools.len(), 4);
        assert!(rig.controller.shared.current_session().is_some());
    }

    #[tokio::test]
    async fn unknown_personality_falls_back_to_friendly() {
        let session = Arc::new(ScriptedSession::new(vec![]));
        let mut rig = rig_with(Arc::new(FixedFactory(session)), "pirate", 0.0);

        let next = rig.controller.run_connecting().await;

        assert_eq!(next, RobotState::Conversation);
        assert_eq!(rig.controller.active_config().unwrap().voice, "Achird");
    }

    #[tokio::test]
    async fn connection_failure_returns_to_idle_and_clears_session() {
        let session = Arc::new(ScriptedSession::new(vec![]).failing());
        let mut rig = rig(session.clone());

        let next = rig.controller.run_connecting().await;

        assert_eq!(next, RobotState::Idle);
        assert!(rig.controller.shared.current_session().is_none());
        assert!(rig.controller.active_config().is_none());
        assert_eq!(rig.display.last_status().as_deref(), Some("error"));
    }

    #[tokio::test]
    async fn no_personality_at_all_skips_connection() {
        let mut factory = MockSessionFactory::new();
        factory.expect_create().never();
        let mut rig = rig_with(Arc::new(factory), "friendly", 0.0);
        rig.controller.personalities = PersonalityManager::default();

        let next = rig.controller.run_connecting().await;

        assert_eq!(next, RobotState::Idle);
    }

    #[tokio::test]
    async fn audio_then_turn_complete_plays_every_byte() {
        // --- Arrange ---
        let session = Arc::new(ScriptedSession::new(vec![
            NormalizedMessage::SetupComplete,
            NormalizedMessage::Audio(vec![5; 200]),
            NormalizedMessage::TurnComplete,
        ]));
        let mut rig = rig(session.clone());
        assert_eq!(rig.controller.run_connecting().await, RobotState::Conversation);

        // --- Act ---
        let next = tokio::time::timeout(Duration::from_secs(2), rig.controller.run_conversation())
            .await
            .unwrap();

        // --- Assert ---
        assert_eq!(next, RobotState::Idle);
        assert_eq!(rig.speaker.recorded(), vec![5; 200]);
        assert!(!session.is_connected());
        assert!(session.closes.load(Ordering::SeqCst) >= 1);
        assert!(rig.controller.shared.current_session().is_none());
    }

    #[tokio::test]
    async fn turn_complete_finishes_playback_before_the_next_message() {
        // --- Arrange ---
        let session = Arc::new(ScriptedSession::new(vec![
            NormalizedMessage::Audio(vec![9; 480]),
            NormalizedMessage::TurnComplete,
            NormalizedMessage::Transcription("done".into()),
        ]));
        let speaker = Arc::new(StubSpeaker::new(None));
        let display = Arc::new(PlayedWhenShown {
            speaker: speaker.clone(),
            played: Mutex::new(Vec::new()),
        });
        let mut controller = RobotController::builder(settings("friendly"))
            .with_microphone(Arc::new(StubMicrophone::new(None)))
            .with_speaker(speaker.clone())
            .with_display(display.clone())
            .with_session_factory(Arc::new(FixedFactory(session)))
            .with_wake_model(constant_loader(0.0))
            .with_personalities(personalities())
            .with_playback_config(fast_playback())
            .build()
            .unwrap();
        assert_eq!(controller.run_connecting().await, RobotState::Conversation);

        // --- Act ---
        tokio::time::timeout(Duration::from_secs(2), controller.run_conversation())
            .await
            .unwrap();

        // --- Assert ---
        assert_eq!(*display.played.lock().unwrap(), vec![480]);
    }

    #[tokio::test]
    async fn interrupted_discards_pending_audio() {
        // --- Arrange ---
        let session = Arc::new(ScriptedSession::new(vec![
            NormalizedMessage::Audio(vec![1; 100]),
            NormalizedMessage::Audio(vec![2; 100]),
            NormalizedMessage::Interrupted,
        ]));
        let mut rig = rig(session.clone());
        rig.controller.playback_config = PlaybackConfig {
            buffer_frames: 10,
            initial_wait: Duration::from_secs(5),
            ..fast_playback()
        };
        rig.controller.run_connecting().await;

        // --- Act ---
        rig.controller.run_conversation().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // --- Assert ---
        assert!(rig.speaker.recorded().is_empty());
        assert!(rig.speaker.stop_count() >= 1);
    }

    #[tokio::test]
    async fn unknown_tool_call_is_answered_with_error() {
        // --- Arrange ---
        let session = Arc::new(ScriptedSession::new(vec![
            NormalizedMessage::ToolCall {
                call_id: "call-1".into(),
                name: "nonexistent_tool".into(),
                args: Default::default(),
            },
            NormalizedMessage::ToolCall {
                call_id: "call-2".into(),
                name: "display_text".into(),
                args: json!({"text": "Hi there"}).as_object().cloned().unwrap(),
            },
        ]));
        let mut rig = rig(session.clone());
        rig.controller.run_connecting().await;

        // --- Act ---
        rig.controller.run_conversation().await;

        // --- Assert ---
        let responses = session.tool_responses();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].0, "call-1");
        assert_eq!(
            Value::Object(responses[0].1.clone()),
            json!({"error": "Unknown tool: nonexistent_tool"})
        );
        assert_eq!(responses[1].0, "call-2");
        assert_eq!(
            Value::Object(responses[1].1.clone()),
            json!({"status": "ok", "text": "Hi there"})
        );
        assert_eq!(rig.display.last_text().as_deref(), Some("Hi there"));
    }

    #[tokio::test]
    async fn transcriptions_are_shown_on_the_display() {
        let session = Arc::new(ScriptedSession::new(vec![
            NormalizedMessage::Transcription("Hello, human".into()),
        ]));
        let mut rig = rig(session.clone());
        rig.controller.run_connecting().await;
        rig.controller.run_conversation().await;
        assert_eq!(rig.display.last_text().as_deref(), Some("Hello, human"));

        let session = Arc::new(ScriptedSession::new(vec![
            NormalizedMessage::InputTranscription("what time is it".into()),
        ]));
        rig.controller.sessions = Arc::new(FixedFactory(session));
        rig.controller.run_connecting().await;
        rig.controller.run_conversation().await;
        assert_eq!(rig.display.last_text().as_deref(), Some("> what time is it"));
    }

    #[tokio::test]
    async fn go_away_ends_the_conversation_before_later_messages() {
        let script = vec![
            NormalizedMessage::GoAway,
            NormalizedMessage::ToolCall {
                call_id: "late".into(),
                name: "clear_display".into(),
                args: Default::default(),
            },
        ];
        let session = Arc::new(ScriptedSession::new(script).held_open());
        let mut rig = rig(session.clone());
        rig.controller.run_connecting().await;

        let next = tokio::time::timeout(Duration::from_secs(2), rig.controller.run_conversation())
            .await
            .unwrap();

        assert_eq!(next, RobotState::Idle);
        assert!(session.tool_responses().is_empty());
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn silence_timeout_ends_a_blocked_conversation() {
        // --- Arrange ---
        let session = Arc::new(ScriptedSession::new(vec![]).held_open());
        let mut rig = rig(session.clone());
        rig.controller.run_connecting().await;
        rig.controller.conversation_timeout = Duration::from_millis(50);

        // --- Act ---
        let next = tokio::time::timeout(Duration::from_secs(2), rig.controller.run_conversation())
            .await
            .unwrap();

        // --- Assert ---
        assert_eq!(next, RobotState::Idle);
        assert!(!session.is_connected());
        assert!(rig.controller.shared.current_session().is_none());
    }

    #[tokio::test]
    async fn max_session_duration_caps_a_busy_conversation() {
        let session = Arc::new(ScriptedSession::new(vec![]).held_open());
        let mut rig = rig(session.clone());
        rig.controller.run_connecting().await;
        rig.controller.settings.max_session_duration = Duration::from_millis(40);

        let next = tokio::time::timeout(Duration::from_secs(2), rig.controller.run_conversation())
            .await
            .unwrap();

        assert_eq!(next, RobotState::Idle);
    }

    #[tokio::test]
    async fn capture_streams_microphone_audio_during_conversation() {
        let session = Arc::new(ScriptedSession::new(vec![]).held_open());
        let mut rig = rig(session.clone());
        rig.controller.run_connecting().await;
        rig.controller.conversation_timeout = Duration::from_millis(150);

        rig.controller.run_conversation().await;

        assert!(session.audio_frames.load(Ordering::SeqCst) > 0);
        assert!(!rig.microphone.is_open());
    }

    #[tokio::test]
    async fn stop_while_connecting_reaches_shutting_down() {
        // --- Arrange ---
        let session = Arc::new(ScriptedSession::new(vec![]).stalling());
        let rig = rig_with(Arc::new(FixedFactory(session.clone())), "friendly", 1.0);
        let mut controller = rig.controller;
        let handle = controller.handle();
        let mut states = handle.subscribe();
        let runner = tokio::spawn(async move {
            controller.run().await;
        });
        tokio::time::timeout(
            Duration::from_secs(2),
            states.wait_for(|s| *s == RobotState::Connecting),
        )
        .await
        .unwrap()
        .unwrap();

        // --- Act ---
        handle.stop().await;
        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .unwrap()
            .unwrap();

        // --- Assert ---
        assert_eq!(handle.state(), RobotState::ShuttingDown);
        assert!(session.closes.load(Ordering::SeqCst) >= 1);
        assert!(handle.shared.current_session().is_none());
    }

    #[tokio::test]
    async fn full_cycle_then_stop_reaches_shutting_down() {
        // --- Arrange ---
        let session = Arc::new(ScriptedSession::new(vec![]).held_open());
        let rig = rig_with(Arc::new(FixedFactory(session.clone())), "friendly", 1.0);
        let mut controller = rig.controller;
        let handle = controller.handle();
        let mut states = handle.subscribe();

        // --- Act ---
        let runner = tokio::spawn(async move {
            controller.run().await;
        });
        tokio::time::timeout(
            Duration::from_secs(2),
            states.wait_for(|s| *s == RobotState::Conversation),
        )
        .await
        .unwrap()
        .unwrap();
        handle.stop().await;
        handle.stop().await;
        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .unwrap()
            .unwrap();

        // --- Assert ---
        assert_eq!(handle.state(), RobotState::ShuttingDown);
        assert!(!session.is_connected());
        assert!(!rig.microphone.is_open());
        assert!(rig.display.last_status().is_none(), "display cleared on shutdown");
    }
}
