//! Voice turn pipeline — one recorded utterance in, one spoken reply out.
//!
//! A *turn* is the full cycle: microphone capture → remote transcription →
//! chat completion → speech synthesis → local playback.  [`TurnPipeline`]
//! owns the single active turn, sequences the stages, exposes observable
//! status to the presentation layer, and guarantees that cancelling a turn
//! aborts every in-flight request and releases every audio resource.
//!
//! # Flow
//!
//! ```text
//! start_recording ──▶ MicRecorder (cpal, worker thread)
//! stop_recording  ──▶ capture.wav
//!   └─▶ Transcribe  (multipart upload)      [Transcribing]
//!        └─▶ Complete  (chat completion)    [Completing]
//!             └─▶ Synthesize (speech bytes) [Synthesizing]
//!                  └─▶ ClipStore::persist   [WritingAudio]
//!                       └─▶ AudioOutput     [Playing] → Done
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voiceturn::audio::{ClipStore, MicRecorder, RodioPlayer};
//! use voiceturn::config::{AppConfig, AppPaths};
//! use voiceturn::pipeline::TurnPipeline;
//! use voiceturn::transport::HttpTransport;
//!
//! # async fn example() {
//! let config = AppConfig::load().unwrap();
//! let paths = AppPaths::new();
//!
//! let pipeline = TurnPipeline::new(
//!     config.api.clone(),
//!     Arc::new(HttpTransport::from_config(&config.api)),
//!     Arc::new(MicRecorder::new(paths.capture_file, config.audio.input_device)),
//!     Arc::new(RodioPlayer::new()),
//!     ClipStore::new(paths.reply_file),
//! );
//!
//! pipeline.start_recording().unwrap();
//! // …user speaks…
//! pipeline.stop_recording().await; // transcribe → complete → synthesize → play
//! println!("{:?}", pipeline.status().transcript);
//! # }
//! ```
//!
//! [`TurnPipeline`]: pipeline::TurnPipeline

pub mod audio;
pub mod config;
pub mod pipeline;
pub mod transport;
