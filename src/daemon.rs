//! Daemon - the hands-free conversation loop
//!
//! Captures an utterance through the capture watchdog, runs it through the
//! respond and synthesize stages, and queues the reply for local playback.
//! Talking over a reply stops it.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::History;
use crate::pipeline::Pipeline;
use crate::session::ErrorKind;
use crate::voice::{
    AudioSink, CaptureOutcome, CaptureWatchdog, PlaybackController, PlaybackItem, SpeechProbe,
};
use crate::{Config, Result};

/// Pause before retrying after the capture chain gave up
const DEFAULT_RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Partial transcript callback
pub type PartialObserver = dyn Fn(&str) + Send + Sync;

/// The hands-free daemon
pub struct Daemon {
    watchdog: Arc<CaptureWatchdog>,
    pipeline: Arc<Pipeline>,
    playback: PlaybackController,
    history: History,
    retry_pause: Duration,
}

impl Daemon {
    /// Create a daemon and start its playback worker
    #[must_use]
    pub fn new(
        config: &Config,
        watchdog: Arc<CaptureWatchdog>,
        pipeline: Arc<Pipeline>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        let probe: Arc<dyn SpeechProbe> = Arc::clone(&watchdog) as Arc<dyn SpeechProbe>;
        let playback = PlaybackController::start(sink, probe, config.playback);

        Self {
            watchdog,
            pipeline,
            playback,
            history: History::new(config.assistant.max_history),
            retry_pause: DEFAULT_RETRY_PAUSE,
        }
    }

    /// Override the pause taken after capture exhaustion
    #[must_use]
    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Playback controller driving local output
    #[must_use]
    pub const fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    /// Conversation turns so far
    #[must_use]
    pub const fn history(&self) -> &History {
        &self.history
    }

    /// Run until `shutdown` resolves
    ///
    /// Stops playback and releases the capture resource before returning.
    ///
    /// # Errors
    ///
    /// Currently always succeeds; capture and stage failures are logged and
    /// the loop keeps going
    pub async fn run<F>(mut self, shutdown: F, observer: Option<&PartialObserver>) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = pin!(shutdown);
        tracing::info!(language = %self.watchdog.language(), "hands-free listening");

        loop {
            let outcome = tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                outcome = self.watchdog.listen(observer) => outcome,
            };

            match outcome {
                Ok(CaptureOutcome::Captured(text)) => self.handle_utterance(&text).await,
                Ok(CaptureOutcome::Exhausted { attempts }) => {
                    tracing::warn!(
                        attempts,
                        kind = ?ErrorKind::CaptureExhausted,
                        "capture gave up, retrying with a fresh resource"
                    );
                    self.watchdog.shutdown().await;
                    if self.pause(&mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "capture error");
                    if self.pause(&mut shutdown).await {
                        break;
                    }
                }
            }
        }

        self.playback.stop().await;
        Ok(())
    }

    /// Sleep for the retry pause; true if shutdown fired meanwhile
    async fn pause<F>(&self, shutdown: &mut std::pin::Pin<&mut F>) -> bool
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            () = shutdown.as_mut() => true,
            () = tokio::time::sleep(self.retry_pause) => false,
        }
    }

    /// Respond to one captured utterance
    async fn handle_utterance(&mut self, text: &str) {
        tracing::info!(transcript = %text, "heard");
        let language = self.watchdog.language().to_string();

        let reply = match self
            .pipeline
            .responder
            .reply(&self.history.snapshot(), text)
            .await
        {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(_) => {
                tracing::warn!(kind = ?ErrorKind::AssistantError, "assistant returned an empty reply");
                return;
            }
            Err(e) => {
                tracing::warn!(kind = ?ErrorKind::AssistantError, error = %e, "assistant failed");
                return;
            }
        };
        self.history.record(text, &reply);
        tracing::info!(reply = %reply, "assistant replied");

        let audio = match self.pipeline.synthesizer.synthesize(&reply, &language).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(kind = ?ErrorKind::SynthesisError, error = %e, "synthesis failed");
                return;
            }
        };

        if let Err(e) = self.playback.enqueue(PlaybackItem::new(audio)) {
            tracing::error!(error = %e, "failed to queue reply audio");
        }
    }
}
