//! Turn state machine and shared observable state.
//!
//! [`TurnStage`] tracks where the active turn is in its lifecycle.  The
//! presentation layer reads a [`TurnState`] snapshot via [`SharedTurnState`]
//! to render loading indicators and the last error; the controller is the
//! only writer.
//!
//! [`SharedTurnState`] is a type alias for `Arc<Mutex<TurnState>>` — cheap to
//! clone and safe to share across threads.

use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// TurnStage
// ---------------------------------------------------------------------------

/// Stages of a voice turn.
///
/// Transitions are monotonic forward:
///
/// ```text
/// Idle ──start_recording──▶ Recording
///      ──stop_recording───▶ Transcribing ──▶ Completing ──▶ Synthesizing
///                           ──▶ WritingAudio ──▶ Playing ──▶ Done
/// any non-terminal stage ──cancel──▶ Cancelled
/// any non-terminal stage ──error───▶ Failed
/// ```
///
/// `Cancelled`, `Failed` and `Done` are terminal; an empty stage result also
/// ends the turn in `Done` (nothing left to do) without recording an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStage {
    /// No turn has started yet.
    Idle,

    /// Microphone capture is active.
    Recording,

    /// The recording is being uploaded for speech-to-text.
    Transcribing,

    /// The transcript is with the chat model.
    Completing,

    /// The reply text is being synthesized into audio.
    Synthesizing,

    /// The synthesized bytes are being written to the clip slot.
    WritingAudio,

    /// The reply clip is playing.
    Playing,

    /// The turn was cancelled; nothing further will run.
    Cancelled,

    /// A stage failed; see [`TurnState::last_error`].
    Failed,

    /// The turn ran to completion (or stopped early on an empty result).
    Done,
}

impl TurnStage {
    /// Terminal stages never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TurnStage::Cancelled | TurnStage::Failed | TurnStage::Done
        )
    }

    /// Returns `true` while a turn is underway (neither idle nor terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != TurnStage::Idle
    }

    /// A short human-readable label suitable for a status line.
    pub fn label(&self) -> &'static str {
        match self {
            TurnStage::Idle => "Idle",
            TurnStage::Recording => "Recording",
            TurnStage::Transcribing => "Transcribing",
            TurnStage::Completing => "Thinking",
            TurnStage::Synthesizing => "Generating speech",
            TurnStage::WritingAudio => "Saving audio",
            TurnStage::Playing => "Playing",
            TurnStage::Cancelled => "Cancelled",
            TurnStage::Failed => "Error",
            TurnStage::Done => "Done",
        }
    }
}

impl Default for TurnStage {
    fn default() -> Self {
        TurnStage::Idle
    }
}

// ---------------------------------------------------------------------------
// TurnState
// ---------------------------------------------------------------------------

/// Observable state of the controller — the single source of truth for the
/// presentation layer.
///
/// Held behind [`SharedTurnState`].  The controller mutates it; readers take
/// cheap snapshots by cloning.
#[derive(Debug, Clone, Default)]
pub struct TurnState {
    /// Identifier of the turn this state belongs to.
    ///
    /// Assigned from a monotonic counter when the turn begins; `0` means no
    /// turn has ever started.  Stale stage completions compare against it
    /// before touching any field.
    pub turn: u64,

    /// Where the turn currently is.
    pub stage: TurnStage,

    /// Transcribed user speech, set once per turn by the transcription stage.
    pub transcript: Option<String>,

    /// Assistant reply text, set once per turn by the completion stage.
    pub reply: Option<String>,

    /// The transcription request is in flight.
    pub is_transcribing: bool,

    /// The chat-completion request is in flight.
    pub is_fetching_response: bool,

    /// The speech-synthesis request is in flight.
    pub is_generating_speech: bool,

    /// Message of the most recent failure, or `None`.
    ///
    /// Cleared when a new request stage begins; cancellations never set it.
    pub last_error: Option<String>,
}

impl TurnState {
    /// Fresh state for a newly begun turn.
    pub fn begin(turn: u64, stage: TurnStage) -> Self {
        Self {
            turn,
            stage,
            ..Self::default()
        }
    }

    /// Aggregate of the per-stage loading flags.
    pub fn is_loading(&self) -> bool {
        self.is_transcribing || self.is_fetching_response || self.is_generating_speech
    }

    /// Drop every loading flag (used on cancel and failure paths).
    pub fn clear_flags(&mut self) {
        self.is_transcribing = false;
        self.is_fetching_response = false;
        self.is_generating_speech = false;
    }
}

// ---------------------------------------------------------------------------
// SharedTurnState
// ---------------------------------------------------------------------------

/// Thread-safe handle to [`TurnState`].
///
/// Cheap to clone (`Arc` clone).  Lock with `.lock().unwrap()` for a short
/// critical section; do **not** hold the lock across `.await` points.
pub type SharedTurnState = Arc<Mutex<TurnState>>;

/// Construct a new [`SharedTurnState`] in the idle state.
pub fn new_shared_state() -> SharedTurnState {
    Arc::new(Mutex::new(TurnState::default()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
