//! Audio playback to speakers

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::playback::{ActivePlayback, AudioSink, PlaybackItem};
use crate::{Error, Result};

/// Sample rate assumed when the decoder reports none (common TTS output)
const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// Decoded mono audio
struct Pcm {
    samples: Vec<f32>,
    sample_rate: u32,
}

/// Plays synthesized MP3 audio on the default output device
#[derive(Debug, Default)]
pub struct CpalSink;

impl CpalSink {
    /// Create a sink, checking that an output device exists
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
        tracing::debug!(device = device.name().unwrap_or_default(), "audio playback initialized");
        Ok(Self)
    }
}

impl AudioSink for CpalSink {
    fn start(&self, item: &PlaybackItem) -> Result<Box<dyn ActivePlayback>> {
        let pcm = decode_mp3(&item.audio)?;
        let stop = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(pcm.samples.is_empty()));

        let thread = {
            let stop = Arc::clone(&stop);
            let finished = Arc::clone(&finished);
            std::thread::Builder::new()
                .name("parley-speaker".to_string())
                .spawn(move || {
                    if let Err(e) = play_blocking(pcm, &stop) {
                        tracing::error!(error = %e, "audio playback error");
                    }
                    finished.store(true, Ordering::SeqCst);
                })?
        };

        Ok(Box::new(CpalPlayback {
            stop,
            finished,
            thread: Some(thread),
        }))
    }
}

struct CpalPlayback {
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ActivePlayback for CpalPlayback {
    fn is_playing(&self) -> bool {
        !self.finished.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.join().is_err() {
            tracing::warn!("playback thread panicked");
        }
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Play samples until done or `stop` is raised
fn play_blocking(pcm: Pcm, stop: &AtomicBool) -> Result<()> {
    if pcm.samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let rate = SampleRate(pcm.sample_rate);
    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| c.channels() == 1 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported_config.with_sample_rate(rate).config();
    let channels = usize::from(config.channels);

    let samples = Arc::new(pcm.samples);
    let position = Arc::new(AtomicUsize::new(0));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or(0.0);
                        frame.fill(sample);
                        pos = (pos + 1).min(samples.len());
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    while !stop.load(Ordering::SeqCst) && position.load(Ordering::Relaxed) < samples.len() {
        std::thread::sleep(Duration::from_millis(10));
    }

    if !stop.load(Ordering::SeqCst) {
        // Let the device drain its last buffer
        std::thread::sleep(Duration::from_millis(100));
    }

    drop(stream);
    tracing::debug!(samples = samples.len(), "playback finished");
    Ok(())
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Pcm> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                sample_rate.get_or_insert(frame.sample_rate as u32);

                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(Pcm {
        samples,
        sample_rate: sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
    })
}
