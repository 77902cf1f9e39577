//! Stage payloads and response extraction.
//!
//! One builder/extractor pair per network stage, keeping the wire formats in
//! a single place:
//!
//! | Stage      | Body                                           | Extracted |
//! |------------|------------------------------------------------|-----------|
//! | Transcribe | multipart `file` + `model` + `language`        | `text`    |
//! | Complete   | JSON `{model, messages}`                       | `choices[0].message.content` |
//! | Synthesize | JSON `{model, input, voice}`                   | raw audio bytes |
//!
//! Extractors are tolerant: a missing or ill-shaped success field yields
//! `None`, which the controller treats the same as an empty result — the
//! turn simply stops there.

use serde::Deserialize;

use crate::config::ApiConfig;
use crate::transport::{ApiRequest, ApiResponse, FilePart, RequestBody, ResponseKind};

// ---------------------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------------------

/// Multipart transcription upload for a finished recording.
pub fn transcribe_request(api: &ApiConfig, audio: Vec<u8>) -> ApiRequest {
    ApiRequest {
        method: reqwest::Method::POST,
        url: api.transcription_url.clone(),
        body: RequestBody::Multipart {
            fields: vec![
                ("language".to_string(), api.language.clone()),
                ("model".to_string(), api.transcription_model.clone()),
            ],
            file: FilePart {
                field: "file".to_string(),
                file_name: "audio.mp3".to_string(),
                mime: "audio/mp3".to_string(),
                bytes: audio,
            },
        },
        expect: ResponseKind::Json,
    }
}

/// Chat-completion request for a transcript.
///
/// The transcript is sent as both the `system` and the `user` message.
pub fn completion_request(api: &ApiConfig, instructions: &str) -> ApiRequest {
    ApiRequest {
        method: reqwest::Method::POST,
        url: api.completions_url.clone(),
        body: RequestBody::Json(serde_json::json!({
            "model": api.chat_model,
            "messages": [
                { "role": "system", "content": instructions },
                { "role": "user",   "content": instructions },
            ],
        })),
        expect: ResponseKind::Json,
    }
}

/// Speech-synthesis request for a reply text.
///
/// `voice` overrides the configured default for this one turn.
pub fn speech_request(api: &ApiConfig, text: &str, voice: Option<&str>) -> ApiRequest {
    ApiRequest {
        method: reqwest::Method::POST,
        url: api.speech_url.clone(),
        body: RequestBody::Json(serde_json::json!({
            "model": api.speech_model,
            "input": text,
            "voice": voice.unwrap_or(&api.voice),
        })),
        expect: ResponseKind::Bytes,
    }
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TranscriptionReply {
    text: String,
}

#[derive(Deserialize)]
struct ChatReply {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// Pull the transcript text out of a transcription response.
pub fn transcript_text(response: ApiResponse) -> Option<String> {
    let value = response.into_json()?;
    serde_json::from_value::<TranscriptionReply>(value)
        .ok()
        .map(|reply| reply.text)
}

/// Pull the assistant message out of a chat-completion response.
pub fn reply_text(response: ApiResponse) -> Option<String> {
    let value = response.into_json()?;
    serde_json::from_value::<ChatReply>(value)
        .ok()?
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
}

/// Pull the synthesized audio bytes out of a speech response.
pub fn speech_bytes(response: ApiResponse) -> Option<Vec<u8>> {
    response.into_bytes()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
