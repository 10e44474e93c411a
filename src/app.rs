// Turn orchestration.
//
// `App` owns the shared collaborators (credential store, language model,
// speech services, the synthesis worker) and drives one tutoring turn at a
// time per session: accept input, persist the user turn, obtain the
// assistant reply, persist it, and hand voice replies to the background
// synthesis worker. Sessions are explicit values passed into every
// operation; the phase guard rejects overlapping submissions.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::db::{Database, StoreError};
use crate::llm::client::LanguageModel;
use crate::llm::correction::{self, CorrectionResult};
use crate::llm::prompt;
use crate::session::{Level, Role, Session, SessionSettings, TurnPhase};
use crate::speech::{sanitize_for_speech, Accent, Synthesizer, Transcriber, TranscriptionError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Capacity of the synthesis request queue. Voice output is best-effort, so
/// a full queue drops the newest request rather than delaying the turn.
const SPEECH_QUEUE_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Result of a successfully processed submission.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Empty or whitespace-only input; nothing was recorded.
    Ignored,
    /// Audio byte-identical to the last processed payload; nothing was
    /// recorded and the transcriber was not called.
    Duplicate,
    /// A reply was produced and persisted.
    Replied {
        text: String,
        /// True when the model call failed and `text` is the apology reply.
        is_apology: bool,
    },
}

/// Failures a submission can surface to the caller.
///
/// Model failures never appear here: they are absorbed into the apology
/// reply so a user turn is never left unanswered.
#[derive(Debug, Error)]
pub enum TurnError {
    /// A submission arrived while another one is still being processed.
    #[error("A previous submission is still being processed")]
    Busy,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),
}

/// A synthesis request queued for the background speech worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice_id: String,
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// Shared application services and the turn pipeline.
pub struct App {
    pub config: Config,
    pub db: Database,
    model: Arc<dyn LanguageModel>,
    transcriber: Arc<dyn Transcriber>,
    speech_tx: mpsc::Sender<SpeechRequest>,
    speech_worker: JoinHandle<()>,
}

impl App {
    /// Assemble the application around its collaborators and start the
    /// synthesis worker. Synthesized audio is handed to `audio_tx`; the
    /// caller decides what playback means. Must be called from within a
    /// Tokio runtime.
    pub fn new(
        config: Config,
        db: Database,
        model: Arc<dyn LanguageModel>,
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn Synthesizer>,
        audio_tx: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        let (speech_tx, speech_rx) = mpsc::channel(SPEECH_QUEUE_CAPACITY);
        let speech_worker = tokio::spawn(run_speech_worker(synthesizer, speech_rx, audio_tx));

        App {
            config,
            db,
            model,
            transcriber,
            speech_tx,
            speech_worker,
        }
    }

    /// Session settings derived from the `[session]` and `[speech]` config
    /// tables. Config validation guarantees the names parse; the fallbacks
    /// only guard against a hand-built `Config`.
    pub fn default_settings(&self) -> SessionSettings {
        SessionSettings {
            level: Level::parse(&self.config.session.default_level)
                .unwrap_or(Level::Intermediate),
            accent: Accent::parse(&self.config.speech.default_accent).unwrap_or(Accent::Us),
            auto_speak: self.config.session.auto_speak,
            correction_enabled: self.config.session.correction_enabled,
        }
    }

    /// Process one typed submission.
    ///
    /// Empty input is a silent no-op. Otherwise the user turn is persisted,
    /// the model is called with the instruction context and the trimmed
    /// history, and the reply (or the apology, if the call failed) is
    /// persisted as the assistant turn. The phase is back at `Idle` on every
    /// exit path.
    pub async fn submit_text(
        &self,
        session: &mut Session,
        text: &str,
    ) -> Result<TurnOutcome, TurnError> {
        let text = text.trim();
        if text.is_empty() {
            debug!("ignoring empty submission");
            return Ok(TurnOutcome::Ignored);
        }
        if session.phase != TurnPhase::Idle {
            return Err(TurnError::Busy);
        }

        session.append_turn(&self.db, Role::User, text, false)?;
        self.complete_turn(session, false).await
    }

    /// Process one voice submission.
    ///
    /// A payload byte-identical to the last processed one is skipped without
    /// transcribing. A transcription failure is returned to the caller with
    /// no turn recorded. On success the transcript goes through the same
    /// pipeline as typed input, with both turns tagged as voice and the
    /// reply queued for synthesis when auto-speak is on.
    pub async fn submit_voice(
        &self,
        session: &mut Session,
        audio: &[u8],
    ) -> Result<TurnOutcome, TurnError> {
        if session.last_audio.as_deref() == Some(audio) {
            debug!("ignoring duplicate audio payload");
            return Ok(TurnOutcome::Duplicate);
        }
        if session.phase != TurnPhase::Idle {
            return Err(TurnError::Busy);
        }

        // Recorded before transcribing so a failed attempt is not retried
        // on the same payload.
        session.last_audio = Some(audio.to_vec());

        session.phase = TurnPhase::AwaitingTranscription;
        let transcript = match self
            .transcriber
            .transcribe(audio, &self.config.speech.language_hint)
            .await
        {
            Ok(transcript) => transcript,
            Err(e) => {
                session.phase = TurnPhase::Idle;
                return Err(e.into());
            }
        };
        debug!(chars = transcript.len(), "transcription complete");

        let appended = session
            .append_turn(&self.db, Role::User, transcript.as_str(), true)
            .map(|_| ());
        if let Err(e) = appended {
            session.phase = TurnPhase::Idle;
            return Err(e.into());
        }

        self.complete_turn(session, true).await
    }

    /// Run sentence analysis for the session's level. Never fails; model
    /// trouble collapses into the deterministic fallback result.
    pub async fn check_sentence(&self, session: &Session, sentence: &str) -> CorrectionResult {
        correction::analyze_sentence(
            self.model.as_ref(),
            sentence,
            session.settings.level,
            self.config.model.analysis_max_tokens,
            self.config.model.analysis_temperature,
        )
        .await
    }

    /// Close the synthesis queue and wait for the worker to drain it.
    pub async fn shutdown(self) {
        let App {
            speech_tx,
            speech_worker,
            ..
        } = self;
        drop(speech_tx);
        if let Err(e) = speech_worker.await {
            warn!("speech worker task failed: {e}");
        }
    }

    /// Obtain and persist the assistant reply for the user turn that was
    /// just appended. A model failure becomes the apology reply, persisted
    /// like any other; the conversation is never left without an answer.
    async fn complete_turn(
        &self,
        session: &mut Session,
        is_voice: bool,
    ) -> Result<TurnOutcome, TurnError> {
        session.phase = TurnPhase::AwaitingModelReply;

        let system = prompt::build_instruction_context(
            session.settings.level,
            session.settings.correction_enabled,
            is_voice,
        );
        let max_tokens = if is_voice {
            self.config.model.chat_max_tokens_voice
        } else {
            self.config.model.chat_max_tokens_text
        };

        let window = prompt::trim_history(&session.turns);
        let (reply, is_apology) = match self
            .model
            .complete(&system, window, max_tokens, self.config.model.chat_temperature)
            .await
        {
            Ok(text) => (text, false),
            Err(e) => {
                warn!(error = %e, "model call failed, substituting apology reply");
                (format!("Sorry, I encountered an error: {e}"), true)
            }
        };

        let persisted = session
            .append_turn(&self.db, Role::Assistant, reply.as_str(), is_voice)
            .map(|_| ());
        session.phase = TurnPhase::Idle;
        persisted?;

        if is_voice && session.settings.auto_speak {
            self.enqueue_speech(&reply, session.settings.accent);
        }

        Ok(TurnOutcome::Replied {
            text: reply,
            is_apology,
        })
    }

    /// Queue the reply for synthesis. Fire-and-forget: a full queue or a
    /// stopped worker is logged and the turn proceeds unaffected.
    fn enqueue_speech(&self, reply: &str, accent: Accent) {
        let request = SpeechRequest {
            text: sanitize_for_speech(reply),
            voice_id: accent.voice_id().to_string(),
        };
        match self.speech_tx.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("speech queue full, dropping synthesis request");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("speech worker gone, dropping synthesis request");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Synthesis worker
// ---------------------------------------------------------------------------

/// Drain synthesis requests until the queue closes, handing audio to the
/// sink. Failures are logged and dropped; the worker never stops early.
async fn run_speech_worker(
    synthesizer: Arc<dyn Synthesizer>,
    mut speech_rx: mpsc::Receiver<SpeechRequest>,
    audio_tx: mpsc::Sender<Vec<u8>>,
) {
    while let Some(request) = speech_rx.recv().await {
        match synthesizer.synthesize(&request.text, &request.voice_id).await {
            Ok(audio) => {
                debug!(
                    bytes = audio.len(),
                    voice = %request.voice_id,
                    "synthesized reply audio"
                );
                if audio_tx.send(audio).await.is_err() {
                    debug!("audio sink closed, dropping synthesized audio");
                }
            }
            Err(e) => warn!(error = %e, "speech synthesis failed"),
        }
    }
    debug!("speech worker shutting down");
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
