// Tutoring prompt templates and history policy.
//
// Builds the instruction context sent with every chat completion: scope
// rules, persona, a level-matched vocabulary directive, optional correction
// behavior, and a verbosity directive for the input mode. Also bounds the
// history window sent to the model.

use crate::session::{Level, Turn};

/// Number of most-recent turns included in the model's context window.
/// Older turns are dropped without summarization; the tutor has no longer
/// memory than this.
pub const HISTORY_WINDOW: usize = 10;

// ---------------------------------------------------------------------------
// Instruction context
// ---------------------------------------------------------------------------

/// Build the system prompt for a chat completion.
pub fn build_instruction_context(level: Level, correction_enabled: bool, is_voice: bool) -> String {
    let mut prompt = String::with_capacity(2048);

    // Section 1: non-negotiable scope rules
    prompt.push_str(
        "CRITICAL RULES - YOU MUST FOLLOW THESE WITHOUT EXCEPTION:\n\
         1. ENGLISH ONLY - You ONLY communicate in English\n\
         2. TOPIC RESTRICTION - You ONLY discuss English learning topics\n\
         3. Be encouraging, helpful, and educational\n\
         4. If user speaks another language, respond in English asking them to use English\n\
         \n",
    );

    // Section 2: persona and student level
    prompt.push_str("You are TalkMate, a friendly English tutor.\n");
    prompt.push_str(&format!("STUDENT LEVEL: {}\n", level.as_str()));
    prompt.push_str(level_directive(level));
    prompt.push('\n');

    // Section 3: correction behavior (optional)
    if correction_enabled {
        prompt.push_str("If there's a grammar mistake, gently correct it after responding.\n");
    }

    // Section 4: verbosity for the input mode
    prompt.push('\n');
    prompt.push_str(if is_voice {
        "VOICE MODE: Be conversational and concise (3-4 sentences)."
    } else {
        "TEXT MODE: Be detailed and educational (4-6 sentences)."
    });

    prompt
}

/// The vocabulary-complexity directive for a proficiency level.
fn level_directive(level: Level) -> &'static str {
    match level {
        Level::Beginner => "Use SIMPLE vocabulary and short sentences. Be extra encouraging.",
        Level::Intermediate => "Use moderate vocabulary with some idioms. Include phrasal verbs.",
        Level::Advanced => {
            "Use rich, sophisticated vocabulary. Include idioms and nuanced expressions."
        }
    }
}

// ---------------------------------------------------------------------------
// History window
// ---------------------------------------------------------------------------

/// The slice of `turns` sent to the model: the last [`HISTORY_WINDOW`]
/// turns, order preserved.
pub fn trim_history(turns: &[Turn]) -> &[Turn] {
    let start = turns.len().saturating_sub(HISTORY_WINDOW);
    &turns[start..]
}

// ---------------------------------------------------------------------------
// Front-end suggestion text
// ---------------------------------------------------------------------------

/// Fixed quick phrases shown before the first message: (label, message).
pub const QUICK_PHRASES: [(&str, &str); 4] = [
    ("Say Hello", "Hello! I want to practice my English."),
    ("Practice Grammar", "Can you help me with English grammar?"),
    ("Learn Vocabulary", "Teach me some new English words."),
    ("Conversation", "Let's have a conversation in English."),
];

/// Conversation starters matched to the student's level.
pub fn conversation_starters(level: Level) -> [&'static str; 3] {
    match level {
        Level::Beginner => [
            "Hello! 👋 How are you today? Let's practice some simple English together!",
            "Hi there! 😊 What's your name? I'm here to help you learn English!",
            "Welcome! 🌟 Tell me about yourself. What do you like to do?",
        ],
        Level::Intermediate => [
            "Hey! 👋 I'm excited to chat with you today. What would you like to talk about?",
            "Hello! 🎯 How's your English learning journey going? Any topics you'd like to explore?",
            "Hi there! 📚 Shall we have a conversation about something interesting?",
        ],
        Level::Advanced => [
            "Greetings! 🎓 I'm looking forward to an engaging conversation. What's on your mind?",
            "Hello! 💡 Ready for some stimulating discussion? What topics intrigue you lately?",
            "Welcome! 🌍 Let's dive into an interesting conversation. What would you like to explore?",
        ],
    }
}
