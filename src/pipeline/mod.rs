//! Voice turn pipeline — controller, state machine, stage payloads.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     TurnPipeline                           │
//! │                                                            │
//! │  start_recording ─▶ AudioInput ─▶ capture.wav              │
//! │  stop_recording ──▶ stages::transcribe_request ─┐          │
//! │                                                 ▼          │
//! │              Transport (cancellation token per request)    │
//! │                                                 │          │
//! │  stages::completion_request ◀── transcript ─────┘          │
//! │  stages::speech_request ◀────── reply                      │
//! │  ClipStore::persist ◀────────── audio bytes                │
//! │  AudioOutput::play ◀─────────── reply.mp3                  │
//! │                                                            │
//! │  SharedTurnState ◀── stage / flags / last_error            │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The controller is the only writer of [`TurnState`]; the UI reads
//! snapshots and calls [`TurnPipeline::cancel_turn`] to abort everything.

pub mod controller;
pub mod stages;
pub mod state;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use controller::{TurnError, TurnPipeline};
pub use state::{new_shared_state, SharedTurnState, TurnStage, TurnState};
