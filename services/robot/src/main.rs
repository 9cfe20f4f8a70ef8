use anyhow::{Context, Result};
use clap::Parser;
use robot::config::Config;
use robot::gemini_adapter::GeminiSessionFactory;
use robot::hardware::{CpalMicrophone, CpalSpeaker};
use robot::tool_loader;
use robot_core::RobotController;
use robot_core::hardware::stubs::{StubCamera, StubDisplay, StubMicrophone, StubSpeaker};
use robot_core::personality::PersonalityManager;
use robot_core::personality::voices::list_voices;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Wake-word voice assistant backed by the Gemini Live API")]
struct Cli {
    /// Use desktop stub hardware instead of the sound card
    #[arg(long)]
    stub: bool,
    /// WAV file the stub microphone plays (silence when omitted)
    #[arg(long, requires = "stub")]
    input_wav: Option<PathBuf>,
    /// WAV file the stub speaker writes on close
    #[arg(long, requires = "stub")]
    output_wav: Option<PathBuf>,
    /// Input device name (default device when omitted)
    #[arg(long, conflicts_with = "stub")]
    input_device: Option<String>,
    /// Output device name (default device when omitted)
    #[arg(long, conflicts_with = "stub")]
    output_device: Option<String>,
    /// Personality to converse with, overriding DEFAULT_PERSONALITY
    #[arg(long)]
    personality: Option<String>,
    /// Print the voice catalog and exit
    #[arg(long)]
    list_voices: bool,
    /// Print the available personalities and exit
    #[arg(long)]
    list_personalities: bool,
    /// Print the audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Parse Command-Line Arguments ---
    let args = Cli::parse();

    if args.list_voices {
        for voice in list_voices() {
            println!(
                "{:<16} {:<14} {}",
                voice.name, voice.description, voice.personality_fit
            );
        }
        return Ok(());
    }
    if args.list_devices {
        println!("Input devices:\n{}", robot_native_utils::device::get_available_inputs()?);
        println!("Output devices:\n{}", robot_native_utils::device::get_available_outputs()?);
        return Ok(());
    }

    // --- 2. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 3. Initialize Logging ---
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting robot service...");

    // --- 4. Load Personalities and User Tools ---
    let personalities = PersonalityManager::load(&config.personalities_dir);
    if args.list_personalities {
        for key in personalities.list() {
            if let Ok(p) = personalities.get(&key) {
                println!("{:<14} {:<10} {}", key, p.voice, p.description);
            }
        }
        return Ok(());
    }
    let user_tools =
        tool_loader::load_tools(&config.user_tools_dir).context("Failed to load user tools")?;

    // --- 5. Build the Controller ---
    let sessions = Arc::new(GeminiSessionFactory::new(
        config.gemini_base_url.clone(),
        config.input_sample_rate,
    ));
    let mut settings = config.into_settings();
    if let Some(personality) = args.personality {
        settings.default_personality = personality;
    }

    let mut builder = RobotController::builder(settings)
        .with_session_factory(sessions)
        .with_personalities(personalities)
        .with_display(Arc::new(StubDisplay::new()));
    builder = if args.stub {
        tracing::info!("Using stub hardware");
        builder
            .with_microphone(Arc::new(StubMicrophone::new(args.input_wav)))
            .with_speaker(Arc::new(StubSpeaker::new(args.output_wav)))
            .with_camera(Arc::new(StubCamera::new(None)))
    } else {
        builder
            .with_microphone(Arc::new(CpalMicrophone::new(args.input_device)))
            .with_speaker(Arc::new(CpalSpeaker::new(args.output_device)))
    };
    for tool in user_tools {
        builder = builder.with_tool(tool);
    }
    let mut controller = builder.build().context("Failed to build the controller")?;
    tracing::info!("Registered tools: {:?}", controller.tools().names());

    // --- 6. Run Until Ctrl-C ---
    let handle = controller.handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl-C, shutting down..."),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        handle.stop().await;
    });

    controller.run().await;
    tracing::info!("Shutting down...");
    Ok(())
}
