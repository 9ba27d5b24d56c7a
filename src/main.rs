use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parley_gateway::Config;
use parley_gateway::api::{ApiServer, ApiState};

/// Parley - Real-time voice conversation gateway
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Path to a config file (defaults to the platform config directory)
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Conversation language, e.g. "en-IN" (overrides config)
    #[arg(short, long)]
    language: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve WebSocket voice sessions (default)
    Serve,
    /// Hands-free conversation through the local mic and speaker
    Converse,
    /// Transcribe one utterance from the local mic and print it
    Listen,
    /// Synthesize text and play it on the local speaker
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,parley_gateway=info",
        1 => "info,parley_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(language) = cli.language {
        config.voice.language = language;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Converse => local::converse(config).await,
        Command::Listen => local::listen(config).await,
        Command::Say { text } => local::say(config, &text).await,
    }
}

/// Run the WebSocket gateway until Ctrl-C
async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        language = %config.voice.language,
        "starting parley gateway"
    );

    let server = ApiServer::new(
        ApiState::from_config(&config),
        config.server.host.clone(),
        config.server.port,
    );
    server.run(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("received ctrl-c");
}

#[cfg(feature = "local-audio")]
mod local {
    use std::sync::Arc;

    use parley_gateway::voice::{
        CaptureOutcome, CaptureWatchdog, CpalSink, MicFactory, PlaybackController, PlaybackEvent,
        PlaybackItem, SilentProbe,
    };
    use parley_gateway::{Config, Daemon, Pipeline};

    use super::shutdown_signal;

    fn watchdog(config: &Config, pipeline: &Pipeline) -> Arc<CaptureWatchdog> {
        let factory = Arc::new(MicFactory::new(Arc::clone(&pipeline.transcriber)));
        Arc::new(CaptureWatchdog::new(
            factory,
            config.voice.language.clone(),
            config.capture,
        ))
    }

    fn require_stages(pipeline: &Pipeline) -> anyhow::Result<()> {
        let missing = pipeline.unavailable();
        if missing.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("missing API keys for: {}", missing.join(", "))
        }
    }

    pub async fn converse(config: Config) -> anyhow::Result<()> {
        let pipeline = Arc::new(Pipeline::from_config(&config));
        require_stages(&pipeline)?;

        let watchdog = watchdog(&config, &pipeline);
        let sink = Arc::new(CpalSink::new()?);
        let daemon = Daemon::new(&config, watchdog, pipeline, sink);

        let print_partial = |text: &str| println!("... {text}");
        daemon.run(shutdown_signal(), Some(&print_partial)).await?;
        Ok(())
    }

    pub async fn listen(config: Config) -> anyhow::Result<()> {
        let pipeline = Pipeline::from_config(&config);
        if !pipeline.transcriber.is_available() {
            anyhow::bail!("no STT provider configured");
        }

        let watchdog = watchdog(&config, &pipeline);
        println!("Listening ({})... speak now", watchdog.language());

        let outcome = watchdog.listen(None).await;
        watchdog.shutdown().await;

        match outcome? {
            CaptureOutcome::Captured(text) => {
                println!("{text}");
                Ok(())
            }
            CaptureOutcome::Exhausted { attempts } => {
                anyhow::bail!("capture failed after {attempts} attempts")
            }
        }
    }

    pub async fn say(config: Config, text: &str) -> anyhow::Result<()> {
        let pipeline = Pipeline::from_config(&config);
        if !pipeline.synthesizer.is_available() {
            anyhow::bail!("no TTS provider configured");
        }

        let audio = pipeline
            .synthesizer
            .synthesize(text, &config.voice.language)
            .await?;
        println!("Synthesized {} bytes, playing...", audio.len());

        let playback = PlaybackController::start(
            Arc::new(CpalSink::new()?),
            Arc::new(SilentProbe),
            config.playback,
        );
        let mut events = playback.subscribe();
        let id = playback.enqueue(PlaybackItem::new(audio))?;

        loop {
            match events.recv().await? {
                PlaybackEvent::Completed(done) | PlaybackEvent::Preempted(done) if done == id => {
                    break;
                }
                PlaybackEvent::Failed { id: failed, error } if failed == id => {
                    playback.stop().await;
                    anyhow::bail!("playback failed: {error}");
                }
                _ => {}
            }
        }

        playback.stop().await;
        Ok(())
    }
}

#[cfg(not(feature = "local-audio"))]
mod local {
    use parley_gateway::Config;

    const DISABLED: &str = "local audio support is not compiled in (rebuild with --features local-audio)";

    #[allow(clippy::unused_async)]
    pub async fn converse(_config: Config) -> anyhow::Result<()> {
        anyhow::bail!(DISABLED)
    }

    #[allow(clippy::unused_async)]
    pub async fn listen(_config: Config) -> anyhow::Result<()> {
        anyhow::bail!(DISABLED)
    }

    #[allow(clippy::unused_async)]
    pub async fn say(_config: Config, _text: &str) -> anyhow::Result<()> {
        anyhow::bail!(DISABLED)
    }
}
