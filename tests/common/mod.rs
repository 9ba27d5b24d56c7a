//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};

use parley_gateway::agent::{ChatTurn, Responder};
use parley_gateway::config::{CaptureConfig, PlaybackConfig};
use parley_gateway::pipeline::Pipeline;
use parley_gateway::session::{Outbound, OutboundFrame, Session};
use parley_gateway::voice::{
    ActivePlayback, AudioSink, CaptureFactory, CaptureResource, PlaybackItem, Synthesizer,
    Transcriber,
};
use parley_gateway::{Error, Result};

pub const LANGUAGE: &str = "en-IN";

/// Bytes every [`StaticSynthesizer`] returns
pub const SPEECH: &[u8] = &[0x49, 0x44, 0x33, 0x04];

// ---------------------------------------------------------------------------
// Pipeline fakes
// ---------------------------------------------------------------------------

/// Returns the same transcript for every call
pub struct ScriptedTranscriber {
    text: String,
    pub calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _audio: &[u8], _language: &str) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.text.clone()
    }
}

/// Echoes the user text, optionally waiting on a gate first
pub struct EchoResponder {
    gate: Option<Arc<Semaphore>>,
    pub calls: AtomicUsize,
    pub seen_history: Mutex<Vec<usize>>,
}

impl EchoResponder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: None,
            calls: AtomicUsize::new(0),
            seen_history: Mutex::new(Vec::new()),
        })
    }

    /// Each reply waits for one permit on `gate`
    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            calls: AtomicUsize::new(0),
            seen_history: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Responder for EchoResponder {
    async fn reply(&self, history: &[ChatTurn], text: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_history.lock().unwrap().push(history.len());
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| Error::Assistant(e.to_string()))?
                .forget();
        }
        Ok(format!("echo: {text}"))
    }
}

/// Always fails
pub struct FailingResponder;

#[async_trait]
impl Responder for FailingResponder {
    async fn reply(&self, _history: &[ChatTurn], _text: &str) -> Result<String> {
        Err(Error::Assistant("backend unreachable".to_string()))
    }
}

/// Replies with whitespace only
pub struct BlankResponder;

#[async_trait]
impl Responder for BlankResponder {
    async fn reply(&self, _history: &[ChatTurn], _text: &str) -> Result<String> {
        Ok("   ".to_string())
    }
}

/// Returns [`SPEECH`] for any text
pub struct StaticSynthesizer;

#[async_trait]
impl Synthesizer for StaticSynthesizer {
    async fn synthesize(&self, _text: &str, _language: &str) -> Result<Vec<u8>> {
        Ok(SPEECH.to_vec())
    }
}

/// Always fails
pub struct FailingSynthesizer;

#[async_trait]
impl Synthesizer for FailingSynthesizer {
    async fn synthesize(&self, _text: &str, _language: &str) -> Result<Vec<u8>> {
        Err(Error::Tts("quota exceeded".to_string()))
    }
}

pub fn pipeline(
    transcriber: Arc<dyn Transcriber>,
    responder: Arc<dyn Responder>,
    synthesizer: Arc<dyn Synthesizer>,
) -> Arc<Pipeline> {
    Arc::new(Pipeline::new(transcriber, responder, synthesizer))
}

/// Pipeline whose every stage succeeds
pub fn happy_pipeline(transcript: &str) -> Arc<Pipeline> {
    pipeline(
        ScriptedTranscriber::new(transcript),
        EchoResponder::new(),
        Arc::new(StaticSynthesizer),
    )
}

// ---------------------------------------------------------------------------
// Session helpers
// ---------------------------------------------------------------------------

pub fn session(pipeline: Arc<Pipeline>) -> (Session, mpsc::Receiver<OutboundFrame>) {
    let (outbound, rx) = Outbound::channel(32);
    (Session::new(LANGUAGE.to_string(), outbound, pipeline, 10), rx)
}

/// Next queued frame, failing the test if none arrives in time
pub async fn next_frame(rx: &mut mpsc::Receiver<OutboundFrame>) -> OutboundFrame {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("outbound channel closed")
}

/// Everything queued right now
pub fn drain(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<OutboundFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

// ---------------------------------------------------------------------------
// Playback fakes
// ---------------------------------------------------------------------------

/// Counters shared between a [`FakeSink`] and its playbacks
#[derive(Default)]
pub struct SinkStats {
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

/// Sink whose items "play" for a fixed duration
pub struct FakeSink {
    duration: Duration,
    fail: AtomicBool,
    pub stats: Arc<SinkStats>,
}

impl FakeSink {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            fail: AtomicBool::new(false),
            stats: Arc::new(SinkStats::default()),
        })
    }

    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl AudioSink for FakeSink {
    fn start(&self, _item: &PlaybackItem) -> Result<Box<dyn ActivePlayback>> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(Error::Audio("device unplugged".to_string()));
        }

        self.stats.started.fetch_add(1, Ordering::SeqCst);
        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(FakePlayback {
            started: Instant::now(),
            duration: self.duration,
            stopped: false,
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct FakePlayback {
    started: Instant,
    duration: Duration,
    stopped: bool,
    stats: Arc<SinkStats>,
}

impl ActivePlayback for FakePlayback {
    fn is_playing(&self) -> bool {
        !self.stopped && self.started.elapsed() < self.duration
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stats.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakePlayback {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fast polling so tests stay short
pub fn fast_playback() -> PlaybackConfig {
    PlaybackConfig {
        tick: Duration::from_millis(10),
        idle: Duration::from_millis(20),
    }
}

// ---------------------------------------------------------------------------
// Capture fakes
// ---------------------------------------------------------------------------

/// Behaviour shared by every resource a [`FakeFactory`] builds
pub struct CaptureScript {
    /// Liveness reported by every resource
    pub alive: AtomicBool,
    /// Setups that fail in `load_target` before one succeeds
    pub failing_setups: AtomicU32,
    /// Language reads that report the wrong language
    pub mismatches: AtomicU32,
    /// `wait_ready` never resolves
    pub never_ready: AtomicBool,
    /// `reset` fails
    pub reset_fails: AtomicBool,
    /// Partial texts per recording; once empty, recordings never end
    pub utterances: Mutex<VecDeque<Vec<String>>>,
    /// Text reads left before every resource stops reporting alive
    pub dies_after_reads: Mutex<Option<u32>>,
    /// Text reads made while the resource was not alive
    pub dead_reads: AtomicU32,

    pub created: AtomicU32,
    pub loads: AtomicU32,
    pub resets: AtomicU32,
    pub releases: AtomicU32,
    pub starts: AtomicU32,
}

impl CaptureScript {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(true),
            failing_setups: AtomicU32::new(0),
            mismatches: AtomicU32::new(0),
            never_ready: AtomicBool::new(false),
            reset_fails: AtomicBool::new(false),
            utterances: Mutex::new(VecDeque::new()),
            dies_after_reads: Mutex::new(None),
            dead_reads: AtomicU32::new(0),
            created: AtomicU32::new(0),
            loads: AtomicU32::new(0),
            resets: AtomicU32::new(0),
            releases: AtomicU32::new(0),
            starts: AtomicU32::new(0),
        })
    }

    /// Queue one recording that yields these partials in order
    pub fn push_utterance(&self, partials: &[&str]) {
        self.utterances
            .lock()
            .unwrap()
            .push_back(partials.iter().map(ToString::to_string).collect());
    }
}

/// Decrement `counter` if positive; true if it was
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub struct FakeResource {
    script: Arc<CaptureScript>,
    language: Option<String>,
    recording: bool,
    endless: bool,
    partials: VecDeque<String>,
    current: String,
    released: bool,
}

#[async_trait]
impl CaptureResource for FakeResource {
    async fn probe_liveness(&mut self) -> bool {
        !self.released && self.script.alive.load(Ordering::SeqCst)
    }

    async fn load_target(&mut self) -> Result<()> {
        self.script.loads.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.script.failing_setups) {
            return Err(Error::Capture("target failed to load".to_string()));
        }
        Ok(())
    }

    async fn wait_ready(&mut self) -> Result<()> {
        if self.script.never_ready.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn select_language(&mut self, language: &str) -> Result<()> {
        self.language = Some(language.to_string());
        Ok(())
    }

    async fn selected_language(&mut self) -> Result<String> {
        if take_one(&self.script.mismatches) {
            return Ok("xx-XX".to_string());
        }
        self.language
            .clone()
            .ok_or_else(|| Error::Capture("no language selected".to_string()))
    }

    async fn start_recording(&mut self) -> Result<()> {
        self.script.starts.fetch_add(1, Ordering::SeqCst);
        let next = self.script.utterances.lock().unwrap().pop_front();
        self.endless = next.is_none();
        self.partials = next.unwrap_or_default().into();
        self.current.clear();
        self.recording = true;
        Ok(())
    }

    async fn recording(&mut self) -> bool {
        if self.recording && !self.endless && self.partials.is_empty() {
            self.recording = false;
        }
        self.recording
    }

    async fn current_text(&mut self) -> Result<String> {
        if !self.script.alive.load(Ordering::SeqCst) {
            self.script.dead_reads.fetch_add(1, Ordering::SeqCst);
        }
        {
            let mut left = self.script.dies_after_reads.lock().unwrap();
            if let Some(n) = left.as_mut() {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    self.script.alive.store(false, Ordering::SeqCst);
                }
            }
        }

        if let Some(next) = self.partials.pop_front() {
            self.current = next;
        }
        Ok(self.current.clone())
    }

    async fn reset(&mut self) -> Result<()> {
        self.script.resets.fetch_add(1, Ordering::SeqCst);
        self.recording = false;
        if self.script.reset_fails.load(Ordering::SeqCst) {
            return Err(Error::Capture("reset failed".to_string()));
        }
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        self.script.releases.fetch_add(1, Ordering::SeqCst);
        self.released = true;
        self.recording = false;
        Ok(())
    }
}

pub struct FakeFactory {
    pub script: Arc<CaptureScript>,
}

impl FakeFactory {
    pub fn new(script: &Arc<CaptureScript>) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::clone(script),
        })
    }
}

#[async_trait]
impl CaptureFactory for FakeFactory {
    async fn create(&self) -> Result<Box<dyn CaptureResource>> {
        self.script.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeResource {
            script: Arc::clone(&self.script),
            language: None,
            recording: false,
            endless: false,
            partials: VecDeque::new(),
            current: String::new(),
            released: false,
        }))
    }
}

/// Short bounds so failing setups finish quickly
pub fn fast_capture() -> CaptureConfig {
    CaptureConfig {
        ready_timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(5),
    }
}
