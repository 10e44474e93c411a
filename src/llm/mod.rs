// Language-model integration: client, tutoring prompts, sentence analysis.

pub mod client;
pub mod correction;
pub mod prompt;
