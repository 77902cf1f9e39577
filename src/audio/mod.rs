//! Audio adapters — microphone capture, clip storage, clip playback.
//!
//! # Resource ownership
//!
//! ```text
//! MicRecorder ──stop()──▶ capture.wav ──▶ (transcription upload)
//! synthesized bytes ──ClipStore::persist()──▶ reply.mp3 ──AudioOutput::play()──▶ speakers
//! ```
//!
//! Every resource here has exclusive ownership with an explicit release
//! point: one capture worker at a time ([`MicRecorder`]), one clip slot on
//! disk ([`ClipStore`]), one live playback handle ([`AudioOutput`]).

pub mod capture;
pub mod playback;
pub mod store;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use capture::{AudioInput, CaptureError, MicRecorder};
pub use playback::{AudioOutput, PlaybackError, RodioPlayer};
pub use store::{ClipStore, StoreError};

// test-only re-exports so the pipeline test module can use the audio doubles
// without spelling out the full paths.
#[cfg(test)]
pub use capture::MockRecorder;
#[cfg(test)]
pub use playback::{MockPlayer, PlayerEvent};
