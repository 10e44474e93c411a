// Sentence analysis and correction feedback.
//
// Asks the model to grade a single sentence and return structured JSON, then
// renders the result as learner-facing feedback. Analysis never fails the
// caller: transport errors and unparseable model output both collapse into a
// deterministic fallback result.

use serde::Deserialize;
use tracing::warn;

use crate::llm::client::{LanguageModel, ModelError};
use crate::session::{Level, Role, Turn};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ANALYSIS_SYSTEM: &str =
    "You are an English language expert. Respond only with valid JSON.";

// ---------------------------------------------------------------------------
// CorrectionResult
// ---------------------------------------------------------------------------

/// Structured verdict on a single sentence.
///
/// All fields are required when parsing model output; a reply missing any of
/// them is treated as malformed and replaced by the fallback result.
#[derive(Debug, Clone, Deserialize)]
pub struct CorrectionResult {
    pub has_errors: bool,
    pub original: String,
    pub corrected: String,
    pub explanation: String,
    pub alternative: String,
    pub vocabulary_tip: String,
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Grade `sentence` for the given learner level.
///
/// Returns a result unconditionally: if the model call fails the explanation
/// carries the failure detail, and if the model answers with something other
/// than the requested JSON the sentence is treated as clean.
pub async fn analyze_sentence(
    model: &dyn LanguageModel,
    sentence: &str,
    level: Level,
    max_tokens: u32,
    temperature: f32,
) -> CorrectionResult {
    let prompt = build_analysis_prompt(sentence, level);
    let request = [Turn::now(Role::User, prompt, false)];

    let raw = match model
        .complete(ANALYSIS_SYSTEM, &request, max_tokens, temperature)
        .await
    {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "sentence analysis call failed");
            return failure_result(sentence, &e);
        }
    };

    match parse_analysis(&raw) {
        Some(result) => result,
        None => {
            warn!("sentence analysis returned non-JSON output");
            clean_sentence_result(sentence)
        }
    }
}

fn build_analysis_prompt(sentence: &str, level: Level) -> String {
    format!(
        r#"Analyze this English sentence and provide corrections.
User's English level: {level}

Sentence: "{sentence}"

Respond in this exact JSON format:
{{
    "has_errors": true/false,
    "original": "original sentence",
    "corrected": "corrected sentence (or same if no errors)",
    "explanation": "brief explanation of errors (if any)",
    "alternative": "a more natural way to say this",
    "vocabulary_tip": "one vocabulary or phrase tip related to the sentence"
}}

Be encouraging and helpful. If the sentence is correct, praise the user."#,
        level = level.as_str(),
    )
}

/// Parse the model's reply into a `CorrectionResult`.
///
/// Tries the whole reply first, then the slice between the first `{` and the
/// last `}` for replies that wrap the JSON in prose or a code fence.
fn parse_analysis(raw: &str) -> Option<CorrectionResult> {
    if let Ok(result) = serde_json::from_str::<CorrectionResult>(raw) {
        return Some(result);
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

/// Fallback when the model's reply could not be parsed as JSON.
fn clean_sentence_result(sentence: &str) -> CorrectionResult {
    CorrectionResult {
        has_errors: false,
        original: sentence.to_string(),
        corrected: sentence.to_string(),
        explanation: "Your sentence looks good!".to_string(),
        alternative: sentence.to_string(),
        vocabulary_tip: String::new(),
    }
}

/// Fallback when the model call itself failed.
fn failure_result(sentence: &str, error: &ModelError) -> CorrectionResult {
    CorrectionResult {
        has_errors: false,
        original: sentence.to_string(),
        corrected: sentence.to_string(),
        explanation: format!("Could not analyze: {error}"),
        alternative: String::new(),
        vocabulary_tip: String::new(),
    }
}

// ---------------------------------------------------------------------------
// Feedback rendering
// ---------------------------------------------------------------------------

/// Render a `CorrectionResult` as the feedback text shown to the learner.
pub fn format_correction(result: &CorrectionResult) -> String {
    if !result.has_errors {
        let tip = if result.vocabulary_tip.is_empty() {
            "Keep practicing!"
        } else {
            result.vocabulary_tip.as_str()
        };
        return format!("✅ **Great job!** Your sentence is correct.\n\n💡 **Tip:** {tip}");
    }

    format!(
        "📝 **Let me help you with that:**\n\n\
         ❌ **Original:** {}\n\n\
         ✅ **Corrected:** {}\n\n\
         💡 **Explanation:** {}\n\n\
         🗣️ **Alternative way:** {}\n\n\
         📚 **Vocabulary tip:** {}",
        result.original,
        result.corrected,
        result.explanation,
        result.alternative,
        result.vocabulary_tip,
    )
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Model stub that always answers with a fixed reply or a fixed failure.
    struct ScriptedModel(Result<String, String>);

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(
            &self,
            _system: &str,
            _history: &[Turn],
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String, ModelError> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(msg) => Err(ModelError::CallFailed(msg.clone())),
            }
        }
    }

    const VALID_ANALYSIS: &str = r#"{
        "has_errors": true,
        "original": "She go to school",
        "corrected": "She goes to school",
        "explanation": "Third-person singular verbs take -s in the present tense.",
        "alternative": "She attends school",
        "vocabulary_tip": "'Attend' is a more formal way to say 'go to'."
    }"#;

    // -- Prompt construction --

    #[test]
    fn prompt_includes_sentence_and_level() {
        let prompt = build_analysis_prompt("She go to school", Level::Beginner);

        assert!(
            prompt.contains("Sentence: \"She go to school\""),
            "Prompt should quote the sentence"
        );
        assert!(
            prompt.contains("User's English level: Beginner"),
            "Prompt should state the learner level"
        );
        assert!(
            prompt.contains("Respond in this exact JSON format"),
            "Prompt should demand the JSON shape"
        );
        assert!(prompt.contains("\"vocabulary_tip\""));
    }

    // -- Parsing --

    #[test]
    fn parse_strict_json() {
        let result = parse_analysis(VALID_ANALYSIS).expect("should parse");
        assert!(result.has_errors);
        assert_eq!(result.corrected, "She goes to school");
    }

    #[test]
    fn parse_json_wrapped_in_prose() {
        let raw = format!("Here is my analysis:\n```json\n{VALID_ANALYSIS}\n```\nHope that helps!");
        let result = parse_analysis(&raw).expect("should parse embedded JSON");
        assert!(result.has_errors);
        assert_eq!(result.original, "She go to school");
    }

    #[test]
    fn parse_garbage_returns_none() {
        assert!(parse_analysis("I think your sentence is great!").is_none());
        assert!(parse_analysis("").is_none());
        assert!(parse_analysis("} backwards {").is_none());
    }

    #[test]
    fn parse_missing_field_returns_none() {
        // No vocabulary_tip: the reply does not match the requested shape.
        let raw = r#"{
            "has_errors": false,
            "original": "Hello",
            "corrected": "Hello",
            "explanation": "All good",
            "alternative": "Hi"
        }"#;
        assert!(parse_analysis(raw).is_none());
    }

    // -- analyze_sentence fallbacks --

    #[tokio::test]
    async fn analyze_passes_through_valid_result() {
        let model = ScriptedModel(Ok(VALID_ANALYSIS.to_string()));
        let result =
            analyze_sentence(&model, "She go to school", Level::Intermediate, 300, 0.3).await;

        assert!(result.has_errors);
        assert_eq!(result.corrected, "She goes to school");
        assert!(result.explanation.contains("Third-person"));
    }

    #[tokio::test]
    async fn analyze_malformed_output_treats_sentence_as_clean() {
        let model = ScriptedModel(Ok("Your sentence is wonderful, keep going!".to_string()));
        let result = analyze_sentence(&model, "I like apples.", Level::Beginner, 300, 0.3).await;

        assert!(!result.has_errors);
        assert_eq!(result.original, "I like apples.");
        assert_eq!(result.corrected, "I like apples.");
        assert_eq!(result.explanation, "Your sentence looks good!");
        assert_eq!(result.alternative, "I like apples.");
        assert!(result.vocabulary_tip.is_empty());
    }

    #[tokio::test]
    async fn analyze_call_failure_reports_detail() {
        let model = ScriptedModel(Err("Network error: connection refused".to_string()));
        let result = analyze_sentence(&model, "I like apples.", Level::Advanced, 300, 0.3).await;

        assert!(!result.has_errors);
        assert!(
            result.explanation.starts_with("Could not analyze:"),
            "Explanation should flag the failure: {}",
            result.explanation
        );
        assert!(result.explanation.contains("connection refused"));
        assert!(result.alternative.is_empty());
        assert!(result.vocabulary_tip.is_empty());
    }

    // -- Feedback rendering --

    #[test]
    fn format_clean_sentence_praises() {
        let result = CorrectionResult {
            has_errors: false,
            original: "I like apples.".to_string(),
            corrected: "I like apples.".to_string(),
            explanation: "Your sentence looks good!".to_string(),
            alternative: "I enjoy apples.".to_string(),
            vocabulary_tip: "'Enjoy' adds a touch of enthusiasm.".to_string(),
        };

        let text = format_correction(&result);
        assert!(text.starts_with("✅ **Great job!** Your sentence is correct."));
        assert!(text.contains("💡 **Tip:** 'Enjoy' adds a touch of enthusiasm."));
    }

    #[test]
    fn format_clean_sentence_without_tip_uses_default() {
        let result = clean_sentence_result("I like apples.");
        let text = format_correction(&result);
        assert!(text.contains("💡 **Tip:** Keep practicing!"));
    }

    #[test]
    fn format_errors_lists_all_sections() {
        let result = parse_analysis(VALID_ANALYSIS).unwrap();
        let text = format_correction(&result);

        assert!(text.starts_with("📝 **Let me help you with that:**"));
        assert!(text.contains("❌ **Original:** She go to school"));
        assert!(text.contains("✅ **Corrected:** She goes to school"));
        assert!(text.contains("💡 **Explanation:** Third-person singular"));
        assert!(text.contains("🗣️ **Alternative way:** She attends school"));
        assert!(text.contains("📚 **Vocabulary tip:** 'Attend'"));
    }
}
