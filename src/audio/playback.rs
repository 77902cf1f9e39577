//! Synthesized-clip playback via `rodio`.
//!
//! [`AudioOutput`] is the seam the pipeline plays through.  The contract is
//! exclusive ownership: at most one playback handle is live at a time, and
//! starting a new clip (or cancelling a turn) stops and releases the previous
//! handle first.
//!
//! [`RodioPlayer`] keeps the `rodio::OutputStream` (which is not `Send`) on a
//! dedicated playback thread and retains only the `Sink` — that is what
//! [`stop`] reaches from other threads.  [`play`] resolves when the clip
//! finishes or is stopped.
//!
//! [`play`]: AudioOutput::play
//! [`stop`]: AudioOutput::stop

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, Sink};
use thiserror::Error;

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or playing a clip.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The clip file does not exist at the given path.
    #[error("audio clip not found: {0}")]
    Missing(PathBuf),

    /// No usable output device, or the playback thread could not start.
    #[error("audio output unavailable: {0}")]
    Device(String),

    /// The decoder rejected the clip data.
    #[error("failed to decode audio clip: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// AudioOutput trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe playback interface.
///
/// `play` verifies the clip exists, releases any previous handle, then plays
/// to completion (or until `stop`).  `stop` is safe to call with no active
/// handle.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play `clip` and resolve once playback has ended.
    async fn play(&self, clip: &Path) -> Result<(), PlaybackError>;

    /// Stop and release the active playback handle, if any.
    fn stop(&self);
}

// Compile-time assertion: Box<dyn AudioOutput> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn AudioOutput>) {}
};

// ---------------------------------------------------------------------------
// RodioPlayer
// ---------------------------------------------------------------------------

/// Production player backed by the default `rodio` output device.
pub struct RodioPlayer {
    active: Mutex<Option<Arc<Sink>>>,
}

impl RodioPlayer {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }
}

impl Default for RodioPlayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioOutput for RodioPlayer {
    async fn play(&self, clip: &Path) -> Result<(), PlaybackError> {
        if !clip.exists() {
            return Err(PlaybackError::Missing(clip.to_path_buf()));
        }

        // Exclusive handle: release whatever was playing before.
        self.stop();

        let path = clip.to_path_buf();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();

        // The OutputStream must live on one thread for the whole playback;
        // only the Sink crosses back to the caller.
        std::thread::Builder::new()
            .name("clip-playback".into())
            .spawn(move || {
                let built: Result<(OutputStream, Arc<Sink>), PlaybackError> = (|| {
                    let (stream, handle) = OutputStream::try_default()
                        .map_err(|e| PlaybackError::Device(e.to_string()))?;
                    let sink =
                        Sink::try_new(&handle).map_err(|e| PlaybackError::Device(e.to_string()))?;
                    let file = std::fs::File::open(&path)
                        .map_err(|e| PlaybackError::Device(e.to_string()))?;
                    let source = Decoder::new(std::io::BufReader::new(file))
                        .map_err(|e| PlaybackError::Decode(e.to_string()))?;
                    sink.append(source);
                    Ok((stream, Arc::new(sink)))
                })();

                match built {
                    Ok((_stream, sink)) => {
                        if ready_tx.send(Ok(Arc::clone(&sink))).is_err() {
                            sink.stop();
                            return;
                        }
                        sink.sleep_until_end();
                        let _ = done_tx.send(());
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        let sink = ready_rx
            .await
            .map_err(|_| PlaybackError::Device("playback thread exited early".into()))??;

        *self.active.lock().unwrap() = Some(Arc::clone(&sink));
        log::debug!("audio: playback started");

        // Resolves on natural end of the clip or after stop().
        let _ = done_rx.await;

        // Release the handle unless a newer playback already replaced it.
        let mut active = self.active.lock().unwrap();
        if let Some(current) = active.as_ref() {
            if Arc::ptr_eq(current, &sink) {
                *active = None;
            }
        }
        log::debug!("audio: playback finished");
        Ok(())
    }

    fn stop(&self) {
        if let Some(sink) = self.active.lock().unwrap().take() {
            sink.stop();
            log::debug!("audio: playback stopped");
        }
    }
}

// ---------------------------------------------------------------------------
// MockPlayer  (test double)
// ---------------------------------------------------------------------------

/// What a [`MockPlayer`] observed, in order.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Play(PathBuf),
    Stop,
}

/// Player stub that records the play/stop sequence.
///
/// With `hold = true` each `play` parks until the next `stop`, emulating a
/// clip that is still audible when the next turn begins.
#[cfg(test)]
pub struct MockPlayer {
    hold: bool,
    events: Mutex<Vec<PlayerEvent>>,
    released: std::sync::atomic::AtomicBool,
    notify: tokio::sync::Notify,
}

#[cfg(test)]
impl MockPlayer {
    pub fn new(hold: bool) -> Self {
        Self {
            hold,
            events: Mutex::new(Vec::new()),
            released: std::sync::atomic::AtomicBool::new(false),
            notify: tokio::sync::Notify::new(),
        }
    }

    pub fn events(&self) -> Vec<PlayerEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl AudioOutput for MockPlayer {
    async fn play(&self, clip: &Path) -> Result<(), PlaybackError> {
        use std::sync::atomic::Ordering;

        self.events
            .lock()
            .unwrap()
            .push(PlayerEvent::Play(clip.to_path_buf()));

        if self.hold {
            // Discard releases that predate this playback, then wait for the
            // next stop().  The flag is ground truth; the Notify only wakes,
            // and is registered before the flag check so no stop is missed.
            self.released.store(false, Ordering::SeqCst);
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.released.load(Ordering::SeqCst) {
                    break;
                }
                notified.await;
            }
        }
        Ok(())
    }

    fn stop(&self) {
        use std::sync::atomic::Ordering;

        self.events.lock().unwrap().push(PlayerEvent::Stop);
        self.released.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
