//! Parley Gateway - Real-time voice conversation gateway
//!
//! This library provides the core functionality for the Parley gateway:
//! - WebSocket voice sessions (audio or text in, reply text and audio out)
//! - A transcribe, respond, synthesize pipeline over pluggable providers
//! - Hands-free local capture with a self-healing capture resource
//! - Barge-in aware playback that stops when the user talks over it
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Clients                          │
//! │     Browser (WebSocket)   │   Local mic + speaker    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Parley Gateway                       │
//! │   Sessions  │  Capture Watchdog  │  Playback        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Pipeline                            │
//! │       STT      │    Assistant    │     TTS           │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use pipeline::Pipeline;
