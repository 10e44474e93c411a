// Speech collaborator seams: transcription, synthesis, accent voices.

use async_trait::async_trait;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// The audio contained no recognizable speech.
    #[error("I didn't catch that. Please speak more clearly.")]
    NoSpeechDetected,

    /// The transcription service could not be reached or failed outright.
    #[error("Speech service error: {0}")]
    ServiceUnavailable(String),
}

/// Synthesis failures are logged and otherwise ignored; voice output is
/// best-effort and never blocks a turn.
#[derive(Debug, Error)]
#[error("speech synthesis failed: {0}")]
pub struct SynthesisError(pub String);

// ---------------------------------------------------------------------------
// Accents
// ---------------------------------------------------------------------------

/// The fixed accent table for synthesized speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accent {
    Us,
    Uk,
    Australian,
}

impl Accent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Accent::Us => "US",
            Accent::Uk => "UK",
            Accent::Australian => "Australian",
        }
    }

    /// Parse an accent name as it appears in config files. Returns `None`
    /// for unrecognized names.
    pub fn parse(name: &str) -> Option<Accent> {
        match name {
            "US" => Some(Accent::Us),
            "UK" => Some(Accent::Uk),
            "Australian" => Some(Accent::Australian),
            _ => None,
        }
    }

    /// The synthesis voice for this accent.
    pub fn voice_id(&self) -> &'static str {
        match self {
            Accent::Us => "en-US-AriaNeural",
            Accent::Uk => "en-GB-SoniaNeural",
            Accent::Australian => "en-AU-NatashaNeural",
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Speech-to-text collaborator.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `audio` to text. An empty or unrecognizable recording is
    /// `TranscriptionError::NoSpeechDetected`.
    async fn transcribe(
        &self,
        audio: &[u8],
        language_hint: &str,
    ) -> Result<String, TranscriptionError>;
}

/// Text-to-speech collaborator.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Render `text` as audio using one of the [`Accent`] voices.
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, SynthesisError>;
}

/// Stand-in wired when no speech services are configured. Transcription
/// reports the service unavailable; synthesis fails and is logged by the
/// synthesis worker like any other synthesis failure.
pub struct DisabledSpeech;

#[async_trait]
impl Transcriber for DisabledSpeech {
    async fn transcribe(
        &self,
        _audio: &[u8],
        _language_hint: &str,
    ) -> Result<String, TranscriptionError> {
        Err(TranscriptionError::ServiceUnavailable(
            "speech services are not configured".to_string(),
        ))
    }
}

#[async_trait]
impl Synthesizer for DisabledSpeech {
    async fn synthesize(&self, _text: &str, _voice_id: &str) -> Result<Vec<u8>, SynthesisError> {
        Err(SynthesisError(
            "speech services are not configured".to_string(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Speech text preparation
// ---------------------------------------------------------------------------

/// Prepare display text for the synthesizer: strip markdown markers and
/// bracketing, spell out symbols that read badly aloud, and collapse the
/// leftover whitespace.
pub fn sanitize_for_speech(text: &str) -> String {
    let mut text = text.to_string();

    // Multi-character tokens first, so their pieces don't get rewritten
    // underneath them.
    for (from, to) in [
        ("->", " becomes "),
        ("=>", " becomes "),
        ("...", ", "),
        ("---", ", "),
        ("--", ", "),
        ("**", ""),
        ("##", ""),
    ] {
        text = text.replace(from, to);
    }

    for (from, to) in [
        ("/", " or "),
        ("\\", " or "),
        ("*", ""),
        ("#", ""),
        ("[", ""),
        ("]", ""),
        ("{", ""),
        ("}", ""),
        ("<", ""),
        (">", ""),
        ("(", ", "),
        (")", ", "),
        ("|", " or "),
        ("&", " and "),
        ("@", " at "),
        ("_", " "),
        ("~", ""),
        ("`", ""),
        ("^", ""),
        ("+", " plus "),
        ("=", " equals "),
    ] {
        text = text.replace(from, to);
    }

    while text.contains("  ") {
        text = text.replace("  ", " ");
    }
    text.trim().to_string()
}
