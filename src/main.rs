//! Application entry point — interactive voice turn CLI.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Build the transport, recorder, player and clip store.
//! 4. Hand them to a [`TurnPipeline`].
//! 5. Read commands from stdin until EOF / `quit`.
//!
//! Commands:
//!
//! | Command       | Effect                                             |
//! |---------------|----------------------------------------------------|
//! | `record`      | start capturing the microphone                     |
//! | `stop`        | finish the capture and run the turn                |
//! | `ask <text>`  | run a turn from typed text (no microphone)         |
//! | `say <text>`  | speak `<text>` directly (synthesis + playback)     |
//! | `cancel`      | cancel the active turn                             |
//! | `status`      | print the current turn state                       |
//! | `quit`        | exit                                               |

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use voiceturn::audio::{ClipStore, MicRecorder, RodioPlayer};
use voiceturn::config::{AppConfig, AppPaths};
use voiceturn::pipeline::{TurnPipeline, TurnState};
use voiceturn::transport::HttpTransport;

fn print_status(status: &TurnState) {
    println!(
        "[turn {}] {}{}",
        status.turn,
        status.stage.label(),
        if status.is_loading() { " …" } else { "" }
    );
    if let Some(transcript) = &status.transcript {
        println!("  you:       {transcript}");
    }
    if let Some(reply) = &status.reply {
        println!("  assistant: {reply}");
    }
    if let Some(error) = &status.last_error {
        println!("  error:     {error}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voiceturn starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    if config.api.api_key.is_none() {
        log::warn!(
            "No api_key configured in {}; provider requests will be rejected",
            AppPaths::new().settings_file.display()
        );
    }

    // 3. Adapters
    let paths = AppPaths::new();
    let transport = Arc::new(HttpTransport::from_config(&config.api));
    let recorder = Arc::new(MicRecorder::new(
        paths.capture_file.clone(),
        config.audio.input_device.clone(),
    ));
    let player = Arc::new(RodioPlayer::new());
    let store = ClipStore::new(paths.reply_file.clone());

    // 4. Pipeline
    let pipeline = Arc::new(TurnPipeline::new(
        config.api.clone(),
        transport,
        recorder,
        player,
        store,
    ));

    // 5. Command loop
    println!("voiceturn — record | stop | ask <text> | say <text> | cancel | status | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "record" | "r" => {
                if let Err(e) = pipeline.start_recording() {
                    println!("  could not start recording: {e}");
                } else {
                    println!("  recording — type 'stop' when done");
                }
            }
            "stop" | "s" => {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    pipeline.stop_recording().await;
                    print_status(&pipeline.status());
                });
            }
            "ask" if !rest.is_empty() => {
                let pipeline = Arc::clone(&pipeline);
                let text = rest.to_string();
                tokio::spawn(async move {
                    pipeline.start_text_turn(&text).await;
                    print_status(&pipeline.status());
                });
            }
            "say" if !rest.is_empty() => {
                let pipeline = Arc::clone(&pipeline);
                let text = rest.to_string();
                tokio::spawn(async move {
                    pipeline.say(&text, None).await;
                    print_status(&pipeline.status());
                });
            }
            "cancel" | "c" => {
                pipeline.cancel_turn();
                print_status(&pipeline.status());
            }
            "status" => print_status(&pipeline.status()),
            "quit" | "q" | "exit" => break,
            "" => {}
            other => println!("  unknown command: {other}"),
        }
    }

    pipeline.cancel_turn();
    log::info!("voiceturn shutting down");
    Ok(())
}
