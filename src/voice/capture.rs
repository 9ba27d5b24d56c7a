//! Capture watchdog for a long-lived listening resource
//!
//! The watchdog owns exactly one [`CaptureSession`] behind a mutex. Every
//! probe, read and reconstruct happens while holding that lock, so a handle
//! that is being torn down is never read.

use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::playback::SpeechProbe;
use crate::config::CaptureConfig;
use crate::{Error, Result};

/// Setup attempts per capture before giving up
pub const MAX_CAPTURE_ATTEMPTS: u32 = 3;

/// External listening resource driven by the watchdog
#[async_trait]
pub trait CaptureResource: Send {
    /// Whether the underlying handle is still usable
    async fn probe_liveness(&mut self) -> bool;

    /// Make sure the capture target is loaded
    async fn load_target(&mut self) -> Result<()>;

    /// Resolve once the resource accepts commands
    async fn wait_ready(&mut self) -> Result<()>;

    async fn select_language(&mut self, language: &str) -> Result<()>;

    /// Language the resource reports as selected
    async fn selected_language(&mut self) -> Result<String>;

    async fn start_recording(&mut self) -> Result<()>;

    /// Whether the resource is currently recording
    async fn recording(&mut self) -> bool;

    /// Latest recognized text for the current recording
    async fn current_text(&mut self) -> Result<String>;

    /// Reload the resource after a failed setup
    async fn reset(&mut self) -> Result<()>;

    /// Tear the resource down for good
    async fn release(&mut self) -> Result<()>;
}

/// Builds fresh capture resources
#[async_trait]
pub trait CaptureFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns error if the resource cannot be constructed
    async fn create(&self) -> Result<Box<dyn CaptureResource>>;
}

/// Result of [`CaptureWatchdog::ensure_healthy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Existing resource passed its liveness probe
    Healthy,
    /// A new resource was constructed
    Rebuilt,
}

/// Result of one capture chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured(String),
    /// Setup failed on every attempt
    Exhausted { attempts: u32 },
}

/// The live resource plus the bookkeeping kept alongside it
pub struct CaptureSession {
    resource: Box<dyn CaptureResource>,
    retry_count: u32,
    recording: bool,
    last_text: String,
}

impl CaptureSession {
    fn new(resource: Box<dyn CaptureResource>) -> Self {
        Self {
            resource,
            retry_count: 0,
            recording: false,
            last_text: String::new(),
        }
    }

    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.recording
    }

    #[must_use]
    pub fn last_text(&self) -> &str {
        &self.last_text
    }
}

/// Keeps one capture resource healthy across failures
pub struct CaptureWatchdog {
    factory: Arc<dyn CaptureFactory>,
    language: String,
    config: CaptureConfig,
    slot: Mutex<Option<CaptureSession>>,
    builds: AtomicU64,
}

impl CaptureWatchdog {
    #[must_use]
    pub fn new(factory: Arc<dyn CaptureFactory>, language: String, config: CaptureConfig) -> Self {
        Self {
            factory,
            language,
            config,
            slot: Mutex::new(None),
            builds: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Number of resources constructed so far
    #[must_use]
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }

    /// Retry count of the current session, if one exists
    pub async fn retry_count(&self) -> Option<u32> {
        self.slot.lock().await.as_ref().map(CaptureSession::retry_count)
    }

    /// Probe the resource and rebuild it if the probe fails
    ///
    /// # Errors
    ///
    /// Returns error if a replacement resource cannot be constructed
    pub async fn ensure_healthy(&self) -> Result<Health> {
        let mut slot = self.slot.lock().await;
        self.ensure_locked(&mut slot).await
    }

    async fn ensure_locked(&self, slot: &mut Option<CaptureSession>) -> Result<Health> {
        if let Some(session) = slot.as_mut() {
            if session.resource.probe_liveness().await {
                return Ok(Health::Healthy);
            }
            tracing::warn!("capture resource failed liveness probe, rebuilding");
            Self::discard(slot).await;
        }

        let resource = self.factory.create().await?;
        *slot = Some(CaptureSession::new(resource));
        let builds = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(builds, "capture resource constructed");
        Ok(Health::Rebuilt)
    }

    /// Release and drop the current session; release failures are logged only
    async fn discard(slot: &mut Option<CaptureSession>) {
        let Some(mut stale) = slot.take() else {
            return;
        };
        if let Err(e) = stale.resource.release().await {
            tracing::warn!(error = %e, "failed to release capture resource");
        }
    }

    /// Bring the resource to the recording state
    ///
    /// Each attempt loads the target, waits for readiness, then selects and
    /// verifies the language before starting to record. A failed attempt
    /// resets the resource and tries again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureExhausted`] after [`MAX_CAPTURE_ATTEMPTS`]
    /// failed attempts
    pub async fn attempt_capture(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let mut retry_count = 0;

        while retry_count < MAX_CAPTURE_ATTEMPTS {
            let err = match self.setup_attempt(&mut slot).await {
                Ok(()) => {
                    if let Some(session) = slot.as_mut() {
                        session.retry_count = 0;
                        session.recording = true;
                    }
                    tracing::debug!(attempt = retry_count + 1, "capture recording");
                    return Ok(());
                }
                Err(e) => e,
            };

            retry_count += 1;
            tracing::warn!(
                attempt = retry_count,
                max_attempts = MAX_CAPTURE_ATTEMPTS,
                error = %err,
                "capture setup failed"
            );

            let reset = match slot.as_mut() {
                Some(session) => {
                    session.retry_count = retry_count;
                    session.recording = false;
                    session.resource.reset().await
                }
                None => Ok(()),
            };
            if let Err(e) = reset {
                tracing::warn!(error = %e, "capture reset failed, discarding resource");
                Self::discard(&mut slot).await;
            }
        }

        tracing::error!(attempts = MAX_CAPTURE_ATTEMPTS, "capture setup exhausted");
        Err(Error::CaptureExhausted {
            attempts: MAX_CAPTURE_ATTEMPTS,
        })
    }

    async fn setup_attempt(&self, slot: &mut Option<CaptureSession>) -> Result<()> {
        self.ensure_locked(slot).await?;
        let session = slot
            .as_mut()
            .ok_or_else(|| Error::Capture("capture session missing".to_string()))?;
        let resource = &mut session.resource;

        resource.load_target().await?;
        timeout(self.config.ready_timeout, resource.wait_ready())
            .await
            .map_err(|_| {
                Error::Capture(format!(
                    "resource not ready within {}ms",
                    self.config.ready_timeout.as_millis()
                ))
            })??;

        if resource.recording().await {
            return Ok(());
        }

        resource.select_language(&self.language).await?;
        let selected = resource.selected_language().await?;
        if selected != self.language {
            return Err(Error::Capture(format!(
                "language mismatch: selected {selected}, expected {}",
                self.language
            )));
        }

        resource.start_recording().await
    }

    /// Partial texts of the current recording, one per poll
    ///
    /// Ends when the resource stops recording or fails its liveness probe.
    pub fn partials(&self) -> impl Stream<Item = String> + '_ {
        stream::unfold(true, move |first| async move {
            if !first {
                tokio::time::sleep(self.config.poll_interval).await;
            }
            self.poll_partial().await.map(|text| (text, false))
        })
    }

    async fn poll_partial(&self) -> Option<String> {
        let mut slot = self.slot.lock().await;
        let session = slot.as_mut()?;

        if !session.resource.probe_liveness().await || !session.resource.recording().await {
            session.recording = false;
            return None;
        }

        match session.resource.current_text().await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::debug!(error = %e, "partial read failed");
                Some(String::new())
            }
        }
    }

    /// Record one utterance and return its final text
    ///
    /// # Errors
    ///
    /// Returns error only for failures other than setup exhaustion
    pub async fn capture_utterance(
        &self,
        observer: Option<&(dyn Fn(&str) + Send + Sync)>,
    ) -> Result<CaptureOutcome> {
        match self.attempt_capture().await {
            Ok(()) => {}
            Err(Error::CaptureExhausted { attempts }) => {
                return Ok(CaptureOutcome::Exhausted { attempts });
            }
            Err(e) => return Err(e),
        }

        let mut partials = pin!(self.partials());
        let mut previous = String::new();
        while let Some(text) = partials.next().await {
            if text.is_empty() || text == previous {
                continue;
            }
            tracing::debug!(partial = %text, "partial transcript");
            if let Some(observer) = observer {
                observer(&text);
            }
            previous = text;
        }

        Ok(CaptureOutcome::Captured(self.final_text().await))
    }

    async fn final_text(&self) -> String {
        let mut slot = self.slot.lock().await;
        let Some(session) = slot.as_mut() else {
            return String::new();
        };
        session.recording = false;

        if !session.resource.probe_liveness().await {
            tracing::warn!("capture resource died before the final read, dropping utterance");
            return String::new();
        }

        let text = match session.resource.current_text().await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read final transcript");
                String::new()
            }
        };
        session.last_text.clone_from(&text);
        text
    }

    /// Capture utterances until one has text
    ///
    /// # Errors
    ///
    /// Returns error only for failures other than setup exhaustion
    pub async fn listen(
        &self,
        observer: Option<&(dyn Fn(&str) + Send + Sync)>,
    ) -> Result<CaptureOutcome> {
        loop {
            match self.capture_utterance(observer).await? {
                CaptureOutcome::Captured(text) if text.is_empty() => {
                    tracing::debug!("empty capture, listening again");
                }
                outcome => return Ok(outcome),
            }
        }
    }

    /// Release the resource under the lock
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        Self::discard(&mut slot).await;
        tracing::debug!("capture watchdog shut down");
    }
}

#[async_trait]
impl SpeechProbe for CaptureWatchdog {
    /// New non-empty text while recording counts as speech
    ///
    /// A busy lock means a setup or read is in progress, which reports no
    /// speech for this tick.
    async fn speech_detected(&self) -> bool {
        let Ok(mut slot) = self.slot.try_lock() else {
            return false;
        };
        let Some(session) = slot.as_mut() else {
            return false;
        };

        if !session.resource.probe_liveness().await || !session.resource.recording().await {
            return false;
        }

        let Ok(text) = session.resource.current_text().await else {
            return false;
        };
        let text = text.trim();
        if text.is_empty() || text == session.last_text {
            return false;
        }

        session.last_text = text.to_string();
        true
    }

    async fn shutdown(&self) {
        Self::shutdown(self).await;
    }
}
