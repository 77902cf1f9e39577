//! The turn controller — owns the single active voice turn.
//!
//! [`TurnPipeline`] sequences capture → transcription → completion →
//! synthesis → persist → playback, updates the shared [`TurnState`] the
//! presentation layer reads, and guarantees total, idempotent cancellation:
//! one [`cancel_turn`] reaches every in-flight request, stops playback and
//! discards any active recording.
//!
//! # Stage protocol
//!
//! Every network stage follows the same steps:
//!
//! 1. allocate a cancellation token and register it in the active set
//! 2. clear `last_error`, raise the stage's loading flag
//! 3. send the request through the [`Transport`]
//! 4. drop the token, lower the flag
//! 5. on success hand the extracted value to the next stage; on
//!    cancellation stop silently; on failure record `last_error` and stop
//!
//! A stage that succeeds with an *empty* payload ends the turn quietly in
//! [`TurnStage::Done`] — there is nothing left to say.
//!
//! Starting a new turn while one is active interrupts the old one first, and
//! every state write after an `.await` is guarded by the turn counter so a
//! stale response can never leak into a newer turn's transcript, reply or
//! playback slot.
//!
//! [`cancel_turn`]: TurnPipeline::cancel_turn

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioInput, AudioOutput, CaptureError, ClipStore, PlaybackError, StoreError};
use crate::config::ApiConfig;
use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError};

use super::stages;
use super::state::{new_shared_state, SharedTurnState, TurnStage, TurnState};

// ---------------------------------------------------------------------------
// TurnError
// ---------------------------------------------------------------------------

/// Everything that can fail a turn.
///
/// `Display` is what lands in [`TurnState::last_error`]; for transport
/// failures that is exactly the provider-extracted message.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("audio capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("could not read recorded audio: {0}")]
    AudioInput(std::io::Error),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Playback(#[from] PlaybackError),

    #[error("internal error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// Stage bookkeeping
// ---------------------------------------------------------------------------

/// Which loading flag a network stage toggles.
#[derive(Debug, Clone, Copy)]
enum StageFlag {
    Transcribe,
    Complete,
    Synthesize,
}

fn set_flag(state: &mut TurnState, flag: StageFlag, value: bool) {
    match flag {
        StageFlag::Transcribe => state.is_transcribing = value,
        StageFlag::Complete => state.is_fetching_response = value,
        StageFlag::Synthesize => state.is_generating_speech = value,
    }
}

// ---------------------------------------------------------------------------
// TurnPipeline
// ---------------------------------------------------------------------------

/// Controller for the voice interaction pipeline.
///
/// All methods take `&self`; the controller is designed to sit behind an
/// `Arc` with the UI calling [`start_recording`]/[`cancel_turn`] from one
/// task while a turn runs in another.
///
/// [`start_recording`]: TurnPipeline::start_recording
/// [`cancel_turn`]: TurnPipeline::cancel_turn
pub struct TurnPipeline {
    api: ApiConfig,
    transport: Arc<dyn Transport>,
    input: Arc<dyn AudioInput>,
    output: Arc<dyn AudioOutput>,
    store: ClipStore,
    state: SharedTurnState,
    /// Tokens of in-flight requests, tagged with the turn that issued them.
    ///
    /// A turn holds at most one at a time (stages are sequential), but the
    /// set form lets a cancel reach everything even when it races a stage
    /// handoff.
    tokens: Arc<Mutex<Vec<(u64, CancellationToken)>>>,
    seq: AtomicU64,
}

impl TurnPipeline {
    pub fn new(
        api: ApiConfig,
        transport: Arc<dyn Transport>,
        input: Arc<dyn AudioInput>,
        output: Arc<dyn AudioOutput>,
        store: ClipStore,
    ) -> Self {
        Self {
            api,
            transport,
            input,
            output,
            store,
            state: new_shared_state(),
            tokens: Arc::new(Mutex::new(Vec::new())),
            seq: AtomicU64::new(0),
        }
    }

    /// Shared handle to the observable state (for UI polling).
    pub fn shared_state(&self) -> SharedTurnState {
        Arc::clone(&self.state)
    }

    /// Snapshot of the current turn state.
    pub fn status(&self) -> TurnState {
        self.state.lock().unwrap().clone()
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Begin capturing a new utterance.
    ///
    /// Interrupts whatever turn was active — in-flight requests, playback
    /// and any previous recording — before the microphone opens.
    pub fn start_recording(&self) -> Result<(), TurnError> {
        self.interrupt();
        let turn = self.begin_turn(TurnStage::Recording);
        log::info!("pipeline: turn {turn} recording");

        if let Err(e) = self.input.start() {
            let err = TurnError::Capture(e);
            self.record_failure(turn, &err);
            return Err(err);
        }
        Ok(())
    }

    /// Finish the capture and run the rest of the turn.
    ///
    /// No-op (with a warning) when no recording is active.
    pub async fn stop_recording(&self) {
        let turn = {
            let state = self.state.lock().unwrap();
            if state.stage != TurnStage::Recording {
                log::warn!("pipeline: stop_recording without an active recording");
                return;
            }
            state.turn
        };

        let input = Arc::clone(&self.input);
        let stopped = tokio::task::spawn_blocking(move || input.stop()).await;
        let audio_input = match stopped {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => {
                self.record_failure(turn, &TurnError::Capture(e));
                return;
            }
            Err(e) => {
                self.record_failure(turn, &TurnError::Internal(e.to_string()));
                return;
            }
        };

        self.transcribe_and_respond(turn, audio_input).await;
    }

    /// Run a full turn from an already captured recording.
    ///
    /// Implicitly cancels any active turn first.  Errors never propagate to
    /// the caller; they land in [`TurnState::last_error`].
    pub async fn start_turn(&self, audio_input: PathBuf) {
        self.interrupt();
        let turn = self.begin_turn(TurnStage::Transcribing);
        log::info!("pipeline: turn {turn} started from {}", audio_input.display());
        self.transcribe_and_respond(turn, audio_input).await;
    }

    /// Run a turn from typed text instead of speech — completion onwards.
    pub async fn start_text_turn(&self, instructions: &str) {
        self.interrupt();
        let turn = self.begin_turn(TurnStage::Completing);
        log::info!("pipeline: turn {turn} started from text");
        self.respond(turn, instructions).await;
    }

    /// Speak `text` directly — synthesis and playback only.
    ///
    /// `voice` overrides the configured default for this turn.
    pub async fn say(&self, text: &str, voice: Option<&str>) {
        self.interrupt();
        let turn = self.begin_turn(TurnStage::Synthesizing);
        log::info!("pipeline: turn {turn} speaking text directly");
        self.speak(turn, text, voice).await;
    }

    /// Cancel the active turn: abort every in-flight request, stop playback,
    /// discard any recording.  Safe to call at any time, any number of times.
    pub fn cancel_turn(&self) {
        self.interrupt();

        let mut state = self.state.lock().unwrap();
        if state.stage.is_active() {
            log::info!(
                "pipeline: turn {} cancelled during {}",
                state.turn,
                state.stage.label()
            );
            state.stage = TurnStage::Cancelled;
        }
        state.clear_flags();
    }

    // -----------------------------------------------------------------------
    // Turn body
    // -----------------------------------------------------------------------

    /// Transcribe the recording, then continue with the completion stages.
    async fn transcribe_and_respond(&self, turn: u64, audio_input: PathBuf) {
        if !self.advance(turn, TurnStage::Transcribing) {
            return;
        }

        let audio = match tokio::fs::read(&audio_input).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.record_failure(turn, &TurnError::AudioInput(e));
                return;
            }
        };

        let request = stages::transcribe_request(&self.api, audio);
        let Some(response) = self.run_request(turn, StageFlag::Transcribe, request).await else {
            return;
        };

        let transcript = stages::transcript_text(response).unwrap_or_default();
        {
            let mut state = self.state.lock().unwrap();
            if state.turn != turn || state.stage.is_terminal() {
                return;
            }
            state.transcript = Some(transcript.clone());
        }
        log::debug!("pipeline: turn {turn} transcript = {transcript:?}");

        if transcript.is_empty() {
            self.finish_quietly(turn, "transcript");
            return;
        }

        self.respond(turn, &transcript).await;
    }

    /// Ask the chat model for a reply, then synthesize and play it.
    async fn respond(&self, turn: u64, instructions: &str) {
        if !self.advance(turn, TurnStage::Completing) {
            return;
        }

        let request = stages::completion_request(&self.api, instructions);
        let Some(response) = self.run_request(turn, StageFlag::Complete, request).await else {
            return;
        };

        let reply = stages::reply_text(response).unwrap_or_default();
        {
            let mut state = self.state.lock().unwrap();
            if state.turn != turn || state.stage.is_terminal() {
                return;
            }
            state.reply = Some(reply.clone());
        }
        log::debug!("pipeline: turn {turn} reply = {} chars", reply.len());

        if reply.is_empty() {
            self.finish_quietly(turn, "reply");
            return;
        }

        self.speak(turn, &reply, None).await;
    }

    /// Synthesize `text`, persist the clip and play it.
    async fn speak(&self, turn: u64, text: &str, voice: Option<&str>) {
        if !self.advance(turn, TurnStage::Synthesizing) {
            return;
        }

        let request = stages::speech_request(&self.api, text, voice);
        let Some(response) = self.run_request(turn, StageFlag::Synthesize, request).await else {
            return;
        };

        let bytes = stages::speech_bytes(response).unwrap_or_default();
        if bytes.is_empty() {
            self.finish_quietly(turn, "synthesized audio");
            return;
        }

        if !self.advance(turn, TurnStage::WritingAudio) {
            return;
        }
        let clip = match self.store.persist(&bytes) {
            Ok(path) => path,
            Err(e) => {
                self.record_failure(turn, &TurnError::Store(e));
                return;
            }
        };

        if !self.advance(turn, TurnStage::Playing) {
            return;
        }
        match self.output.play(&clip).await {
            Ok(()) => {
                if self.advance(turn, TurnStage::Done) {
                    log::info!("pipeline: turn {turn} complete");
                }
            }
            Err(e) => self.record_failure(turn, &TurnError::Playback(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Stage protocol helpers
    // -----------------------------------------------------------------------

    /// Issue one stage request under a fresh cancellation token.
    ///
    /// Returns `None` when the turn is stale/terminal, the request was
    /// cancelled, or it failed (failure is recorded before returning).
    async fn run_request(
        &self,
        turn: u64,
        flag: StageFlag,
        request: ApiRequest,
    ) -> Option<ApiResponse> {
        // Token first, then the state gate: a cancel that lands in between
        // either sees this token in the set or has already marked the turn
        // terminal — it cannot slip past both.
        let token = CancellationToken::new();
        self.tokens.lock().unwrap().push((turn, token.clone()));

        {
            let mut state = self.state.lock().unwrap();
            if state.turn != turn || state.stage.is_terminal() {
                drop(state);
                self.drop_tokens(turn);
                return None;
            }
            state.last_error = None;
            set_flag(&mut state, flag, true);
        }

        let result = self.transport.send(request, token.clone()).await;

        self.drop_tokens(turn);
        {
            let mut state = self.state.lock().unwrap();
            if state.turn == turn {
                set_flag(&mut state, flag, false);
            }
        }

        match result {
            Ok(response) => Some(response),
            Err(TransportError::Cancelled) => {
                log::debug!("pipeline: turn {turn} {flag:?} request cancelled");
                None
            }
            Err(e) => {
                self.record_failure(turn, &TurnError::Transport(e));
                None
            }
        }
    }

    /// Move the turn to `stage` unless it is stale or already terminal.
    fn advance(&self, turn: u64, stage: TurnStage) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.turn != turn || state.stage.is_terminal() {
            return false;
        }
        state.stage = stage;
        true
    }

    /// End the turn without an error after an empty stage result.
    fn finish_quietly(&self, turn: u64, what: &str) {
        let mut state = self.state.lock().unwrap();
        if state.turn != turn || state.stage.is_terminal() {
            return;
        }
        log::info!("pipeline: turn {turn} produced an empty {what}, stopping here");
        state.stage = TurnStage::Done;
        state.clear_flags();
    }

    /// Record a failure against the turn and stop it.
    fn record_failure(&self, turn: u64, err: &TurnError) {
        log::error!("pipeline: turn {turn} failed: {err}");
        let mut state = self.state.lock().unwrap();
        if state.turn != turn || state.stage.is_terminal() {
            return;
        }
        state.last_error = Some(err.to_string());
        state.stage = TurnStage::Failed;
        state.clear_flags();
    }

    /// Start a fresh session and return its id.
    fn begin_turn(&self, stage: TurnStage) -> u64 {
        let turn = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.lock().unwrap() = TurnState::begin(turn, stage);
        turn
    }

    /// Abort everything the active session holds: in-flight requests, the
    /// playback handle and any open recording.
    fn interrupt(&self) {
        let tokens: Vec<(u64, CancellationToken)> =
            std::mem::take(&mut *self.tokens.lock().unwrap());
        for (turn, token) in tokens {
            log::debug!("pipeline: aborting in-flight request of turn {turn}");
            token.cancel();
        }
        self.output.stop();
        self.input.abort();
    }

    /// Remove the tokens registered by `turn`.
    fn drop_tokens(&self, turn: u64) {
        self.tokens.lock().unwrap().retain(|(t, _)| *t != turn);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{MockPlayer, MockRecorder, PlayerEvent};
    use crate::transport::{MockReply, MockTransport};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    // -----------------------------------------------------------------------
    // Harness
    // -----------------------------------------------------------------------

    struct Harness {
        pipeline: Arc<TurnPipeline>,
        transport: Arc<MockTransport>,
        player: Arc<MockPlayer>,
        recorder: Arc<MockRecorder>,
        audio_file: PathBuf,
        clip_file: PathBuf,
        _dir: TempDir,
    }

    fn harness(replies: Vec<MockReply>, hold_playback: bool) -> Harness {
        let dir = tempdir().expect("temp dir");
        let audio_file = dir.path().join("capture.wav");
        std::fs::write(&audio_file, b"RIFF....fake-capture").expect("write capture");
        let clip_file = dir.path().join("reply.mp3");

        let transport = Arc::new(MockTransport::script(replies));
        let player = Arc::new(MockPlayer::new(hold_playback));
        let recorder = Arc::new(MockRecorder::new(&audio_file));

        let pipeline = Arc::new(TurnPipeline::new(
            ApiConfig::default(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&recorder) as Arc<dyn AudioInput>,
            Arc::clone(&player) as Arc<dyn AudioOutput>,
            ClipStore::new(&clip_file),
        ));

        Harness {
            pipeline,
            transport,
            player,
            recorder,
            audio_file,
            clip_file,
            _dir: dir,
        }
    }

    fn ok_replies() -> Vec<MockReply> {
        vec![
            MockReply::Json(json!({"text": "what's the weather"})),
            MockReply::Json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "it is sunny" } }]
            })),
            MockReply::Bytes(vec![0xff, 0xfb, 0x90, 0x00]),
        ]
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    // -----------------------------------------------------------------------
    // Sequencing
    // -----------------------------------------------------------------------

    /// A successful turn walks Transcribe → Complete → Synthesize in order
    /// and ends Done with the clip played.
    #[tokio::test]
    async fn successful_turn_walks_stages_in_order() {
        let h = harness(ok_replies(), false);
        h.pipeline.start_turn(h.audio_file.clone()).await;

        let api = ApiConfig::default();
        let urls: Vec<String> = h.transport.calls().iter().map(|c| c.url.clone()).collect();
        assert_eq!(
            urls,
            vec![api.transcription_url, api.completions_url, api.speech_url]
        );

        let status = h.pipeline.status();
        assert_eq!(status.stage, TurnStage::Done);
        assert_eq!(status.transcript.as_deref(), Some("what's the weather"));
        assert_eq!(status.reply.as_deref(), Some("it is sunny"));
        assert!(status.last_error.is_none());
        assert!(!status.is_loading());

        // The synthesized bytes reached the clip slot and were played.
        assert_eq!(
            std::fs::read(&h.clip_file).expect("clip written"),
            vec![0xff, 0xfb, 0x90, 0x00]
        );
        assert!(h
            .player
            .events()
            .contains(&PlayerEvent::Play(h.clip_file.clone())));
    }

    /// The capture flow drives the same chain: record → stop → Done.
    #[tokio::test]
    async fn recording_flow_feeds_transcription() {
        let h = harness(ok_replies(), false);

        h.pipeline.start_recording().expect("start recording");
        assert_eq!(h.pipeline.status().stage, TurnStage::Recording);

        h.pipeline.stop_recording().await;

        let status = h.pipeline.status();
        assert_eq!(status.stage, TurnStage::Done);
        assert_eq!(status.transcript.as_deref(), Some("what's the weather"));
        assert_eq!(
            h.recorder.events.lock().unwrap().as_slice(),
            &["abort", "start", "stop"]
        );
    }

    /// stop_recording with nothing active must not start a turn.
    #[tokio::test]
    async fn stop_recording_without_recording_is_a_no_op() {
        let h = harness(ok_replies(), false);
        h.pipeline.stop_recording().await;

        assert_eq!(h.pipeline.status().stage, TurnStage::Idle);
        assert_eq!(h.transport.call_count(), 0);
    }

    /// A text turn skips transcription entirely.
    #[tokio::test]
    async fn text_turn_skips_transcription() {
        let h = harness(ok_replies().into_iter().skip(1).collect(), false);
        h.pipeline.start_text_turn("tell me a joke").await;

        let api = ApiConfig::default();
        let urls: Vec<String> = h.transport.calls().iter().map(|c| c.url.clone()).collect();
        assert_eq!(urls, vec![api.completions_url, api.speech_url]);

        let status = h.pipeline.status();
        assert_eq!(status.stage, TurnStage::Done);
        assert!(status.transcript.is_none());
        assert_eq!(status.reply.as_deref(), Some("it is sunny"));
    }

    /// `say` goes straight to synthesis with the voice override applied.
    #[tokio::test]
    async fn say_synthesizes_and_plays_directly() {
        let h = harness(vec![MockReply::Bytes(vec![1, 2, 3])], false);
        h.pipeline.say("welcome back", Some("onyx")).await;

        assert_eq!(h.transport.call_count(), 1);
        assert_eq!(h.pipeline.status().stage, TurnStage::Done);
        assert!(h
            .player
            .events()
            .contains(&PlayerEvent::Play(h.clip_file.clone())));
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Cancelling mid-transcription aborts the token, clears the loading
    /// flags and leaves no error behind.
    #[tokio::test]
    async fn cancel_mid_transcription_is_silent_and_total() {
        let h = harness(vec![MockReply::HangUntilCancelled], false);

        let turn = {
            let pipeline = Arc::clone(&h.pipeline);
            let audio = h.audio_file.clone();
            tokio::spawn(async move { pipeline.start_turn(audio).await })
        };

        wait_until(|| h.transport.call_count() >= 1).await;
        h.pipeline.cancel_turn();
        turn.await.expect("turn task");

        assert!(h.transport.calls()[0].token.is_cancelled());

        let status = h.pipeline.status();
        assert_eq!(status.stage, TurnStage::Cancelled);
        assert!(status.last_error.is_none());
        assert!(!status.is_loading());
    }

    /// Cancel with nothing active is a harmless no-op, repeatedly.
    #[tokio::test]
    async fn cancel_with_no_active_turn_is_a_no_op() {
        let h = harness(Vec::new(), false);
        h.pipeline.cancel_turn();
        h.pipeline.cancel_turn();

        assert_eq!(h.pipeline.status().stage, TurnStage::Idle);
        assert!(h.pipeline.status().last_error.is_none());
    }

    /// Starting a second turn cancels the first's in-flight request before
    /// the second's transcription is issued.
    #[tokio::test]
    async fn new_turn_cancels_previous_before_first_request() {
        let mut replies = vec![MockReply::HangUntilCancelled];
        replies.extend(ok_replies());
        let h = harness(replies, false);

        let first = {
            let pipeline = Arc::clone(&h.pipeline);
            let audio = h.audio_file.clone();
            tokio::spawn(async move { pipeline.start_turn(audio).await })
        };
        wait_until(|| h.transport.call_count() >= 1).await;

        h.pipeline.start_turn(h.audio_file.clone()).await;
        first.await.expect("first turn task");

        let calls = h.transport.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[0].token.is_cancelled());
        // The second turn's first request only went out after every earlier
        // token had been cancelled.
        assert!(calls[1].earlier_all_cancelled);

        let status = h.pipeline.status();
        assert_eq!(status.stage, TurnStage::Done);
        assert_eq!(status.transcript.as_deref(), Some("what's the weather"));
        assert!(status.last_error.is_none());
    }

    /// A stale first turn must not overwrite the second turn's state even
    /// though its task finishes later.
    #[tokio::test]
    async fn superseded_turn_cannot_touch_newer_state() {
        let mut replies = vec![MockReply::HangUntilCancelled];
        replies.extend(ok_replies());
        let h = harness(replies, false);

        let first = {
            let pipeline = Arc::clone(&h.pipeline);
            let audio = h.audio_file.clone();
            tokio::spawn(async move { pipeline.start_turn(audio).await })
        };
        wait_until(|| h.transport.call_count() >= 1).await;

        h.pipeline.start_turn(h.audio_file.clone()).await;
        let after_second = h.pipeline.status();
        first.await.expect("first turn task");

        let final_status = h.pipeline.status();
        assert_eq!(final_status.turn, after_second.turn);
        assert_eq!(final_status.stage, TurnStage::Done);
    }

    // -----------------------------------------------------------------------
    // Error handling
    // -----------------------------------------------------------------------

    /// The provider-extracted message is surfaced verbatim in last_error and
    /// the pipeline halts at the failing stage.
    #[tokio::test]
    async fn provider_error_message_lands_in_last_error() {
        let h = harness(
            vec![MockReply::Fail(TransportError::Http {
                status: 401,
                message: "invalid_api_key".into(),
            })],
            false,
        );
        h.pipeline.start_turn(h.audio_file.clone()).await;

        let status = h.pipeline.status();
        assert_eq!(status.stage, TurnStage::Failed);
        assert_eq!(status.last_error.as_deref(), Some("invalid_api_key"));
        assert!(!status.is_loading());
        assert_eq!(h.transport.call_count(), 1);
    }

    /// A mid-pipeline failure stops before the next stage is issued.
    #[tokio::test]
    async fn completion_failure_stops_before_synthesis() {
        let h = harness(
            vec![
                MockReply::Json(json!({"text": "hello"})),
                MockReply::Fail(TransportError::Request("connection reset".into())),
            ],
            false,
        );
        h.pipeline.start_turn(h.audio_file.clone()).await;

        let status = h.pipeline.status();
        assert_eq!(status.stage, TurnStage::Failed);
        assert_eq!(status.last_error.as_deref(), Some("connection reset"));
        assert_eq!(h.transport.call_count(), 2);
        assert!(h.player.events().iter().all(|e| *e == PlayerEvent::Stop));
    }

    /// An unreadable recording is a filesystem failure, not a panic.
    #[tokio::test]
    async fn missing_recording_file_fails_the_turn() {
        let h = harness(ok_replies(), false);
        h.pipeline
            .start_turn(h._dir.path().join("nope.wav"))
            .await;

        let status = h.pipeline.status();
        assert_eq!(status.stage, TurnStage::Failed);
        assert!(status
            .last_error
            .as_deref()
            .is_some_and(|m| m.contains("could not read recorded audio")));
        assert_eq!(h.transport.call_count(), 0);
    }

    /// A clip-write failure surfaces as last_error and playback never starts.
    #[tokio::test]
    async fn persist_failure_skips_playback() {
        let dir = tempdir().expect("temp dir");
        let audio_file = dir.path().join("capture.wav");
        std::fs::write(&audio_file, b"fake").expect("write");

        let transport = Arc::new(MockTransport::script(ok_replies()));
        let player = Arc::new(MockPlayer::new(false));
        let recorder = Arc::new(MockRecorder::new(&audio_file));

        // The clip slot is the temp directory itself — the write must fail.
        let pipeline = TurnPipeline::new(
            ApiConfig::default(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&recorder) as Arc<dyn AudioInput>,
            Arc::clone(&player) as Arc<dyn AudioOutput>,
            ClipStore::new(dir.path()),
        );

        pipeline.start_turn(audio_file).await;

        let status = pipeline.status();
        assert_eq!(status.stage, TurnStage::Failed);
        assert!(status
            .last_error
            .as_deref()
            .is_some_and(|m| m.contains("could not write audio clip")));
        assert!(player
            .events()
            .iter()
            .all(|e| !matches!(e, PlayerEvent::Play(_))));
    }

    // -----------------------------------------------------------------------
    // Empty results
    // -----------------------------------------------------------------------

    /// An empty transcript halts the turn without error and without issuing
    /// the completion request.
    #[tokio::test]
    async fn empty_transcript_halts_without_error() {
        let h = harness(vec![MockReply::Json(json!({"text": ""}))], false);
        h.pipeline.start_turn(h.audio_file.clone()).await;

        assert_eq!(h.transport.call_count(), 1);

        let status = h.pipeline.status();
        assert_eq!(status.stage, TurnStage::Done);
        assert_eq!(status.transcript.as_deref(), Some(""));
        assert!(status.last_error.is_none());
        assert!(!status.is_loading());
    }

    /// An empty reply halts before synthesis.
    #[tokio::test]
    async fn empty_reply_halts_before_synthesis() {
        let h = harness(
            vec![
                MockReply::Json(json!({"text": "hello"})),
                MockReply::Json(json!({
                    "choices": [{ "message": { "role": "assistant", "content": "" } }]
                })),
            ],
            false,
        );
        h.pipeline.start_turn(h.audio_file.clone()).await;

        assert_eq!(h.transport.call_count(), 2);

        let status = h.pipeline.status();
        assert_eq!(status.stage, TurnStage::Done);
        assert_eq!(status.reply.as_deref(), Some(""));
        assert!(status.last_error.is_none());
    }

    // -----------------------------------------------------------------------
    // Playback exclusivity
    // -----------------------------------------------------------------------

    /// Turn B stops turn A's still-active playback handle before its own
    /// clip starts.
    #[tokio::test]
    async fn playback_handle_released_before_next_turn_plays() {
        let mut replies = ok_replies();
        replies.extend(ok_replies());
        let h = harness(replies, true);

        let first = {
            let pipeline = Arc::clone(&h.pipeline);
            let audio = h.audio_file.clone();
            tokio::spawn(async move { pipeline.start_turn(audio).await })
        };
        wait_until(|| {
            h.player
                .events()
                .iter()
                .filter(|e| matches!(e, PlayerEvent::Play(_)))
                .count()
                >= 1
        })
        .await;

        let second = {
            let pipeline = Arc::clone(&h.pipeline);
            let audio = h.audio_file.clone();
            tokio::spawn(async move { pipeline.start_turn(audio).await })
        };
        wait_until(|| {
            h.player
                .events()
                .iter()
                .filter(|e| matches!(e, PlayerEvent::Play(_)))
                .count()
                >= 2
        })
        .await;

        let events = h.player.events();
        let play_positions: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, PlayerEvent::Play(_)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(play_positions.len(), 2);
        // A stop must sit between the two plays.
        assert!(events[play_positions[0] + 1..play_positions[1]]
            .iter()
            .any(|e| *e == PlayerEvent::Stop));

        // Release the second clip so both tasks wind down.
        h.pipeline.cancel_turn();
        first.await.expect("first turn task");
        second.await.expect("second turn task");
    }
}
