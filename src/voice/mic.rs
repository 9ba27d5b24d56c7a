//! Microphone-backed capture resource
//!
//! The cpal input stream lives on a dedicated thread (streams are not `Send`
//! on every platform). Samples land in a shared buffer that the watchdog
//! drains through [`CaptureResource`] calls. One recording lasts until the
//! speaker falls silent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::oneshot;

use super::Transcriber;
use super::capture::{CaptureFactory, CaptureResource};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Energy analysis window (100ms)
const CHUNK_SIZE: usize = 1600;

/// Minimum RMS energy to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum utterance length (0.3 seconds)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Trailing silence that ends an utterance (0.8 seconds)
const SILENCE_SAMPLES: usize = 12800;

/// Hard cap on one utterance (30 seconds)
const MAX_UTTERANCE_SAMPLES: usize = SAMPLE_RATE as usize * 30;

/// Minimum new audio before a partial is re-transcribed (0.5 seconds)
const PARTIAL_STEP_SAMPLES: usize = 8000;

/// Minimum spacing between partial transcriptions
const PARTIAL_INTERVAL: Duration = Duration::from_millis(750);

/// Splits a sample stream into one utterance by energy
#[derive(Debug, Default)]
struct Segmenter {
    speech: Vec<f32>,
    heard_speech: bool,
    silence: usize,
    complete: bool,
}

impl Segmenter {
    fn feed(&mut self, samples: &[f32]) {
        for chunk in samples.chunks(CHUNK_SIZE) {
            if self.complete {
                return;
            }

            if calculate_energy(chunk) > ENERGY_THRESHOLD {
                self.heard_speech = true;
                self.silence = 0;
                self.speech.extend_from_slice(chunk);
            } else if self.heard_speech {
                self.speech.extend_from_slice(chunk);
                self.silence += chunk.len();
                if self.silence >= SILENCE_SAMPLES && self.speech.len() >= MIN_SPEECH_SAMPLES {
                    self.complete = true;
                }
            }

            if self.speech.len() >= MAX_UTTERANCE_SAMPLES {
                self.complete = true;
            }
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// RMS energy of a chunk
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = sum / samples.len() as f32;
    mean.sqrt()
}

/// Input stream running on its own thread
struct InputStream {
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl InputStream {
    /// Open the default input device and start streaming into `buffer`
    async fn open(buffer: Arc<Mutex<Vec<f32>>>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread = {
            let stop = Arc::clone(&stop);
            let alive = Arc::clone(&alive);
            std::thread::Builder::new()
                .name("parley-mic".to_string())
                .spawn(move || run_input_stream(&buffer, &stop, &alive, ready_tx))?
        };

        ready_rx
            .await
            .map_err(|_| Error::Audio("capture thread exited during startup".to_string()))??;

        Ok(Self {
            stop,
            alive,
            thread: Some(thread),
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.join().is_err() {
            tracing::warn!("capture thread panicked");
        }
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_input_stream(
    buffer: &Arc<Mutex<Vec<f32>>>,
    stop: &AtomicBool,
    alive: &Arc<AtomicBool>,
    ready: oneshot::Sender<Result<()>>,
) {
    let stream = match build_input_stream(Arc::clone(buffer), Arc::clone(alive)) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    alive.store(true, Ordering::SeqCst);
    let _ = ready.send(Ok(()));
    tracing::debug!("audio capture started");

    while !stop.load(Ordering::SeqCst) && alive.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    alive.store(false, Ordering::SeqCst);
    tracing::debug!("audio capture stopped");
}

fn build_input_stream(
    buffer: Arc<Mutex<Vec<f32>>>,
    alive: Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        channels = config.channels,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                alive.store(false, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Latest transcript of the live segment
///
/// Written by background transcription tasks. `generation` changes with
/// every recording so a late result never lands on the wrong one.
#[derive(Debug, Default)]
struct Transcript {
    generation: u64,
    text: String,
}

/// Capture resource reading the default microphone
///
/// Transcription of the live segment runs on background tasks, so
/// [`CaptureResource::current_text`] only reads the latest result.
pub struct MicCapture {
    transcriber: Arc<dyn Transcriber>,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<InputStream>,
    language: Option<String>,
    segmenter: Segmenter,
    recording: bool,
    transcript: Arc<Mutex<Transcript>>,
    pending: Option<tokio::task::JoinHandle<()>>,
    generation: u64,
    transcribed_samples: usize,
    last_partial: Option<Instant>,
}

impl MicCapture {
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            transcriber,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
            language: None,
            segmenter: Segmenter::default(),
            recording: false,
            transcript: Arc::new(Mutex::new(Transcript::default())),
            pending: None,
            generation: 0,
            transcribed_samples: 0,
            last_partial: None,
        }
    }

    fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    fn clear_recording(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        drop(self.take_buffer());
        self.segmenter.reset();
        self.recording = false;
        self.generation += 1;
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.generation = self.generation;
            transcript.text.clear();
        }
        self.transcribed_samples = 0;
        self.last_partial = None;
    }

    fn transcribing(&self) -> bool {
        self.pending.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start transcribing the segment as it stands
    fn spawn_transcription(&mut self) {
        self.transcribed_samples = self.segmenter.speech.len();
        self.last_partial = Some(Instant::now());

        let wav = match samples_to_wav(&self.segmenter.speech, SAMPLE_RATE) {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode live segment");
                return;
            }
        };

        let transcriber = Arc::clone(&self.transcriber);
        let transcript = Arc::clone(&self.transcript);
        let language = self.language.clone().unwrap_or_default();
        let generation = self.generation;

        self.pending = Some(tokio::spawn(async move {
            let text = transcriber.transcribe(&wav, &language).await;
            let Ok(mut transcript) = transcript.lock() else {
                return;
            };
            if transcript.generation == generation {
                transcript.text = text;
            }
        }));
    }
}

#[async_trait]
impl CaptureResource for MicCapture {
    async fn probe_liveness(&mut self) -> bool {
        self.stream.as_ref().is_some_and(InputStream::is_alive)
    }

    async fn load_target(&mut self) -> Result<()> {
        if self.stream.as_ref().is_some_and(InputStream::is_alive) {
            return Ok(());
        }
        self.stream = None;
        self.stream = Some(InputStream::open(Arc::clone(&self.buffer)).await?);
        Ok(())
    }

    async fn wait_ready(&mut self) -> Result<()> {
        while !self.stream.as_ref().is_some_and(InputStream::is_alive) {
            if self.stream.is_none() {
                return Err(Error::Capture("input stream not open".to_string()));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(())
    }

    async fn select_language(&mut self, language: &str) -> Result<()> {
        self.language = Some(language.to_string());
        Ok(())
    }

    async fn selected_language(&mut self) -> Result<String> {
        self.language
            .clone()
            .ok_or_else(|| Error::Capture("no language selected".to_string()))
    }

    async fn start_recording(&mut self) -> Result<()> {
        self.clear_recording();
        self.recording = true;
        tracing::debug!("microphone recording");
        Ok(())
    }

    /// Stays true after the segment ends until its final transcript lands
    async fn recording(&mut self) -> bool {
        if !self.recording {
            return false;
        }

        let samples = self.take_buffer();
        self.segmenter.feed(&samples);
        if self.transcribing() {
            return true;
        }

        let pending = self.segmenter.speech.len().saturating_sub(self.transcribed_samples);
        if self.segmenter.complete {
            if pending > 0 {
                self.spawn_transcription();
                return true;
            }
            self.recording = false;
            return false;
        }

        let due = pending >= PARTIAL_STEP_SAMPLES
            && self
                .last_partial
                .is_none_or(|at| at.elapsed() >= PARTIAL_INTERVAL);
        if due {
            self.spawn_transcription();
        }
        true
    }

    async fn current_text(&mut self) -> Result<String> {
        self.transcript
            .lock()
            .map(|transcript| transcript.text.clone())
            .map_err(|_| Error::Capture("transcript lock poisoned".to_string()))
    }

    async fn reset(&mut self) -> Result<()> {
        self.stream = None;
        self.clear_recording();
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        self.reset().await
    }
}

/// Builds microphone capture resources
pub struct MicFactory {
    transcriber: Arc<dyn Transcriber>,
}

impl MicFactory {
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self { transcriber }
    }
}

#[async_trait]
impl CaptureFactory for MicFactory {
    async fn create(&self) -> Result<Box<dyn CaptureResource>> {
        Ok(Box::new(MicCapture::new(Arc::clone(&self.transcriber))))
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
