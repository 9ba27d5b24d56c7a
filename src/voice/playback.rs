//! Barge-in aware audio playback queue
//!
//! A single worker drains a FIFO of [`PlaybackItem`]s. While an item plays the
//! worker polls a [`SpeechProbe`] every tick and stops the item as soon as the
//! user starts talking over it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use uuid::Uuid;

use crate::Result;
use crate::config::PlaybackConfig;

/// Capacity of the playback event channel
const EVENT_CAPACITY: usize = 64;

/// Audio buffer queued for local output
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    pub id: Uuid,
    /// Encoded audio as produced by the synthesizer
    pub audio: Vec<u8>,
}

impl PlaybackItem {
    #[must_use]
    pub fn new(audio: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            audio,
        }
    }
}

/// Output device that can start playing an item
pub trait AudioSink: Send + Sync {
    /// Begin playing `item`, returning a handle to the running playback
    ///
    /// # Errors
    ///
    /// Returns error if the audio cannot be decoded or the device fails
    fn start(&self, item: &PlaybackItem) -> Result<Box<dyn ActivePlayback>>;
}

/// Handle to an item that is currently playing
pub trait ActivePlayback: Send {
    /// Whether audio is still coming out
    fn is_playing(&self) -> bool;

    /// Stop immediately, discarding the rest of the item
    fn stop(&mut self);
}

/// Source of the "user started talking" signal
#[async_trait]
pub trait SpeechProbe: Send + Sync {
    /// Poll once for new speech
    async fn speech_detected(&self) -> bool;

    /// Release whatever resource backs the probe
    async fn shutdown(&self) {}
}

/// Probe that never reports speech
pub struct SilentProbe;

#[async_trait]
impl SpeechProbe for SilentProbe {
    async fn speech_detected(&self) -> bool {
        false
    }
}

/// Shared speech-detected flag
#[derive(Debug, Clone, Default)]
pub struct SpeechSignal(Arc<AtomicBool>);

impl SpeechSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Read and clear the flag
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle notifications for queued items
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started(Uuid),
    Completed(Uuid),
    /// Stopped early by speech or shutdown
    Preempted(Uuid),
    Failed { id: Uuid, error: String },
}

/// Owns the playback worker
pub struct PlaybackController {
    queue: mpsc::UnboundedSender<PlaybackItem>,
    signal: SpeechSignal,
    running: Arc<AtomicBool>,
    events: broadcast::Sender<PlaybackEvent>,
    probe: Arc<dyn SpeechProbe>,
    worker: JoinHandle<()>,
}

impl PlaybackController {
    /// Spawn the playback worker
    #[must_use]
    pub fn start(
        sink: Arc<dyn AudioSink>,
        probe: Arc<dyn SpeechProbe>,
        config: PlaybackConfig,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let signal = SpeechSignal::new();
        let running = Arc::new(AtomicBool::new(true));

        let worker = tokio::spawn(
            Worker {
                sink,
                probe: Arc::clone(&probe),
                signal: signal.clone(),
                running: Arc::clone(&running),
                events: events.clone(),
                config,
            }
            .run(rx),
        );

        tracing::debug!(
            tick_ms = config.tick.as_millis(),
            idle_ms = config.idle.as_millis(),
            "playback controller started"
        );

        Self {
            queue,
            signal,
            running,
            events,
            probe,
            worker,
        }
    }

    /// Queue an item behind anything already waiting
    ///
    /// # Errors
    ///
    /// Returns error if the worker has already exited
    pub fn enqueue(&self, item: PlaybackItem) -> Result<Uuid> {
        let id = item.id;
        self.queue
            .send(item)
            .map_err(|_| crate::Error::Playback("playback worker is not running".to_string()))?;
        Ok(id)
    }

    /// Handle to the speech-detected flag, for external detectors
    #[must_use]
    pub fn signal(&self) -> SpeechSignal {
        self.signal.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.worker.is_finished()
    }

    /// Stop the worker and release the probe's resource
    ///
    /// Returns once the worker has exited.
    pub async fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        self.probe.shutdown().await;
        drop(self.queue);

        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "playback worker panicked");
        }
        tracing::debug!("playback controller stopped");
    }
}

struct Worker {
    sink: Arc<dyn AudioSink>,
    probe: Arc<dyn SpeechProbe>,
    signal: SpeechSignal,
    running: Arc<AtomicBool>,
    events: broadcast::Sender<PlaybackEvent>,
    config: PlaybackConfig,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<PlaybackItem>) {
        while self.running.load(Ordering::SeqCst) {
            let item = match timeout(self.config.idle, rx.recv()).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(_) => continue,
            };

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            self.play(item).await;
        }
        tracing::debug!("playback worker exited");
    }

    async fn play(&self, item: PlaybackItem) {
        // Speech raised before this item started belongs to the previous one
        self.signal.take();

        let mut active = match self.sink.start(&item) {
            Ok(active) => active,
            Err(e) => {
                tracing::warn!(item_id = %item.id, error = %e, "failed to start playback");
                self.emit(PlaybackEvent::Failed {
                    id: item.id,
                    error: e.to_string(),
                });
                return;
            }
        };
        self.emit(PlaybackEvent::Started(item.id));
        tracing::debug!(item_id = %item.id, bytes = item.audio.len(), "playback started");

        let mut ticker = interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if !self.running.load(Ordering::SeqCst) {
                active.stop();
                self.emit(PlaybackEvent::Preempted(item.id));
                return;
            }

            // A probe slower than one tick counts as no speech
            if matches!(timeout(self.config.tick, self.probe.speech_detected()).await, Ok(true)) {
                self.signal.raise();
            }

            if self.signal.take() {
                active.stop();
                tracing::info!(item_id = %item.id, "speech detected, playback preempted");
                self.emit(PlaybackEvent::Preempted(item.id));
                return;
            }

            if !active.is_playing() {
                tracing::debug!(item_id = %item.id, "playback complete");
                self.emit(PlaybackEvent::Completed(item.id));
                return;
            }
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_take_clears() {
        let signal = SpeechSignal::new();
        assert!(!signal.take());

        signal.raise();
        assert!(signal.is_raised());
        assert!(signal.take());
        assert!(!signal.is_raised());
        assert!(!signal.take());
    }

    #[test]
    fn signal_clones_share_state() {
        let signal = SpeechSignal::new();
        let other = signal.clone();
        other.raise();
        assert!(signal.take());
    }

    #[test]
    fn items_get_distinct_ids() {
        let a = PlaybackItem::new(vec![1]);
        let b = PlaybackItem::new(vec![1]);
        assert_ne!(a.id, b.id);
    }
}
