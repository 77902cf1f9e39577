//! Microphone capture via `cpal`.
//!
//! [`MicRecorder`] runs the cpal host/device/stream lifecycle on a dedicated
//! worker thread (the stream itself is not `Send`), accumulating samples
//! until [`stop`] is called.  `stop` downmixes to mono, encodes a 16-bit WAV
//! with `hound` into the recorder's fixed capture path and returns that path
//! for the transcription upload.  [`abort`] discards a recording without
//! producing a file.
//!
//! [`stop`]: AudioInput::stop
//! [`abort`]: AudioInput::abort

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up or finalising a capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to enumerate input devices: {0}")]
    Devices(String),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported input sample format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("no recording is in progress")]
    NotRecording,

    #[error("no audio was captured")]
    NoAudio,

    #[error("the capture worker stopped unexpectedly")]
    WorkerGone,

    #[error("failed to encode WAV file: {0}")]
    Encode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// AudioInput trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface for microphone capture.
///
/// One recording at a time: `start` fails while a recording is active,
/// `stop` finalises the current recording into a file, `abort` throws the
/// current recording away.  Both `stop` and `abort` are safe no-ops against
/// a recorder that was never started (`stop` reports [`CaptureError::NotRecording`]).
pub trait AudioInput: Send + Sync {
    /// Begin capturing from the microphone.
    fn start(&self) -> Result<(), CaptureError>;

    /// Stop capturing, write the recording to the capture path and return it.
    fn stop(&self) -> Result<PathBuf, CaptureError>;

    /// Stop capturing and discard whatever was recorded.
    fn abort(&self);
}

// Compile-time assertion: Box<dyn AudioInput> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn AudioInput>) {}
};

// ---------------------------------------------------------------------------
// MicRecorder
// ---------------------------------------------------------------------------

/// State shared between the recorder handle and its worker thread.
struct Shared {
    /// Interleaved f32 samples as delivered by the cpal callback.
    samples: Mutex<Vec<f32>>,
    /// Native (sample_rate, channels) of the opened stream.
    format: Mutex<Option<(u32, u16)>>,
    /// Set to ask the worker to drop the stream and exit.
    stop: AtomicBool,
}

/// Microphone recorder built on top of `cpal`.
///
/// The capture path is a single slot — each new recording overwrites the
/// previous file.
pub struct MicRecorder {
    out_path: PathBuf,
    device_name: Option<String>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MicRecorder {
    /// Create a recorder that writes finished captures to `out_path`.
    ///
    /// `device_name` selects a specific input device by its cpal name;
    /// `None` (and any name that matches nothing) uses the system default.
    pub fn new(out_path: impl Into<PathBuf>, device_name: Option<String>) -> Self {
        Self {
            out_path: out_path.into(),
            device_name,
            shared: Arc::new(Shared {
                samples: Mutex::new(Vec::new()),
                format: Mutex::new(None),
                stop: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Ask the worker thread to exit and wait for it.  Returns `false` when
    /// no recording was in progress.
    fn join_worker(&self) -> bool {
        let handle = self.worker.lock().unwrap().take();
        match handle {
            Some(handle) => {
                self.shared.stop.store(true, Ordering::SeqCst);
                if let Err(e) = handle.join() {
                    log::error!("audio: capture worker panicked: {e:?}");
                }
                true
            }
            None => false,
        }
    }
}

impl AudioInput for MicRecorder {
    fn start(&self) -> Result<(), CaptureError> {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.samples.lock().unwrap().clear();
        *self.shared.format.lock().unwrap() = None;

        let shared = Arc::clone(&self.shared);
        let device_name = self.device_name.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();

        let handle = std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let stream = match open_stream(&shared, device_name.as_deref()) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while !shared.stop.load(Ordering::SeqCst) {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }

                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *worker = Some(handle);
                log::info!("audio: recording started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::WorkerGone)
            }
        }
    }

    fn stop(&self) -> Result<PathBuf, CaptureError> {
        if !self.join_worker() {
            return Err(CaptureError::NotRecording);
        }

        let samples = std::mem::take(&mut *self.shared.samples.lock().unwrap());
        let format = self.shared.format.lock().unwrap().take();

        let Some((sample_rate, channels)) = format else {
            return Err(CaptureError::WorkerGone);
        };
        if samples.is_empty() {
            return Err(CaptureError::NoAudio);
        }

        let mono = downmix_to_mono(&samples, channels);
        log::info!(
            "audio: recording stopped ({:.2}s at {} Hz)",
            mono.len() as f32 / sample_rate as f32,
            sample_rate
        );

        if let Some(parent) = self.out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        encode_wav(&self.out_path, &mono, sample_rate)?;
        Ok(self.out_path.clone())
    }

    fn abort(&self) {
        if self.join_worker() {
            log::debug!("audio: recording aborted");
        }
        self.shared.samples.lock().unwrap().clear();
        *self.shared.format.lock().unwrap() = None;
    }
}

// ---------------------------------------------------------------------------
// Stream setup
// ---------------------------------------------------------------------------

/// Resolve the capture device: by configured name when given, else default.
fn resolve_device(host: &cpal::Host, wanted: Option<&str>) -> Result<cpal::Device, CaptureError> {
    if let Some(wanted) = wanted {
        let mut devices = host
            .input_devices()
            .map_err(|e| CaptureError::Devices(e.to_string()))?;
        if let Some(device) = devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false)) {
            return Ok(device);
        }
        log::warn!("audio: input device '{wanted}' not found, using default");
    }
    host.default_input_device().ok_or(CaptureError::NoDevice)
}

/// Open and start an input stream that appends samples into `shared`.
///
/// Runs on the worker thread; the returned stream must stay alive there.
fn open_stream(shared: &Arc<Shared>, wanted: Option<&str>) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = resolve_device(&host, wanted)?;
    log::debug!(
        "audio: capturing from '{}'",
        device.name().unwrap_or_else(|_| "<unknown>".into())
    );

    let supported = device.default_input_config()?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    *shared.format.lock().unwrap() = Some((config.sample_rate.0, config.channels));

    let err_fn = |err| log::error!("audio: input stream error: {err}");

    let stream = match sample_format {
        SampleFormat::F32 => {
            let shared = Arc::clone(shared);
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut samples) = shared.samples.lock() {
                        samples.extend_from_slice(data);
                    }
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::I16 => {
            let shared = Arc::clone(shared);
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut samples) = shared.samples.lock() {
                        samples.extend(data.iter().map(|&s| f32::from(s) / 32_768.0));
                    }
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::U16 => {
            let shared = Arc::clone(shared);
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut samples) = shared.samples.lock() {
                        samples.extend(data.iter().map(|&s| (f32::from(s) - 32_768.0) / 32_768.0));
                    }
                },
                err_fn,
                None,
            )?
        }
        other => return Err(CaptureError::UnsupportedFormat(format!("{other:?}"))),
    };

    stream.play()?;
    Ok(stream)
}

// ---------------------------------------------------------------------------
// Sample handling
// ---------------------------------------------------------------------------

/// Average interleaved frames down to a single channel.
fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = usize::from(channels);
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Write mono f32 samples as a 16-bit PCM WAV file.
fn encode_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), CaptureError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| CaptureError::Encode(e.to_string()))?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer
            .write_sample(value)
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// MockRecorder  (test double)
// ---------------------------------------------------------------------------

/// Recorder stub that hands out a fixed path — lets the pipeline be tested
/// without a microphone or audio host.
#[cfg(test)]
pub struct MockRecorder {
    path: PathBuf,
    pub events: Mutex<Vec<&'static str>>,
}

#[cfg(test)]
impl MockRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            events: Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl AudioInput for MockRecorder {
    fn start(&self) -> Result<(), CaptureError> {
        self.events.lock().unwrap().push("start");
        Ok(())
    }

    fn stop(&self) -> Result<PathBuf, CaptureError> {
        self.events.lock().unwrap().push("stop");
        Ok(self.path.clone())
    }

    fn abort(&self) {
        self.events.lock().unwrap().push("abort");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
