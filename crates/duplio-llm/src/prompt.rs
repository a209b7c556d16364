// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prompt composition for the generation stage.
//!
//! A prompt is assembled from: persona text, retrieved knowledge chunks
//! (truncated to the provider's context budget), the last k turn summaries,
//! and the user's final transcript. When retrieval produced no usable
//! knowledge, a grounding directive instructs the model to decline rather
//! than invent an answer.

use duplio_core::traits::GenerationRequest;
use duplio_core::types::{RetrievedChunk, TurnSummary};

const DEFAULT_PERSONA: &str =
    "You are the user's digital twin. Answer in their voice, first person, \
     concise and conversational.";

const GROUNDED_REFUSAL_DIRECTIVE: &str =
    "No knowledge-base entries matched this question. Say you don't have \
     that information rather than guessing.";

/// Composes [`GenerationRequest`]s for one session.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    model: String,
    persona: String,
    max_tokens: u32,
    /// Character budget for the knowledge-chunk section.
    context_char_budget: usize,
}

impl PromptComposer {
    pub fn new(
        model: String,
        persona: Option<String>,
        max_tokens: u32,
        context_char_budget: usize,
    ) -> Self {
        Self {
            model,
            persona: persona.unwrap_or_else(|| DEFAULT_PERSONA.to_string()),
            max_tokens,
            context_char_budget,
        }
    }

    /// Builds the request for one turn.
    pub fn compose(
        &self,
        transcript: &str,
        chunks: &[RetrievedChunk],
        history: &[TurnSummary],
    ) -> GenerationRequest {
        let mut system = String::with_capacity(self.persona.len() + 256);
        system.push_str(&self.persona);

        if chunks.is_empty() {
            system.push_str("\n\n");
            system.push_str(GROUNDED_REFUSAL_DIRECTIVE);
        } else {
            system.push_str("\n\nKnowledge base:\n");
            let mut used = 0usize;
            for chunk in chunks {
                let entry = format!("- [{}] {}\n", chunk.source, chunk.snippet);
                if used + entry.len() > self.context_char_budget {
                    break;
                }
                used += entry.len();
                system.push_str(&entry);
            }
        }

        let mut user = String::new();
        for summary in history {
            user.push_str("User: ");
            user.push_str(&summary.user_text);
            user.push_str("\nTwin: ");
            user.push_str(&summary.reply_text);
            user.push('\n');
        }
        user.push_str("User: ");
        user.push_str(transcript);

        GenerationRequest {
            model: self.model.clone(),
            system_prompt: system,
            user_prompt: user,
            max_tokens: self.max_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use duplio_core::types::{SourceType, UserId};

    use super::*;

    fn chunk(snippet: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: "c".into(),
            user_id: UserId("u".into()),
            source: SourceType::Document,
            score,
            snippet: snippet.into(),
        }
    }

    fn composer(budget: usize) -> PromptComposer {
        PromptComposer::new("twin-chat-1".into(), None, 512, budget)
    }

    #[test]
    fn empty_context_adds_refusal_directive() {
        let request = composer(1000).compose("what is my shoe size?", &[], &[]);
        assert!(request.system_prompt.contains("don't have"));
        assert!(!request.system_prompt.contains("Knowledge base"));
    }

    #[test]
    fn chunks_render_with_source_tags() {
        let chunks = vec![chunk("Opening hours are 9-5.", 0.9)];
        let request = composer(1000).compose("when are you open?", &chunks, &[]);
        assert!(request.system_prompt.contains("[document] Opening hours are 9-5."));
        assert!(!request.system_prompt.contains("guessing"));
    }

    #[test]
    fn context_budget_truncates_chunks() {
        let chunks = vec![
            chunk(&"a".repeat(40), 0.9),
            chunk(&"b".repeat(40), 0.8),
            chunk(&"c".repeat(40), 0.7),
        ];
        let request = composer(110).compose("q", &chunks, &[]);
        assert!(request.system_prompt.contains(&"a".repeat(40)));
        assert!(request.system_prompt.contains(&"b".repeat(40)));
        assert!(!request.system_prompt.contains(&"c".repeat(40)));
    }

    #[test]
    fn history_precedes_transcript() {
        let history = vec![TurnSummary {
            turn_index: 1,
            user_text: "hi".into(),
            reply_text: "hello!".into(),
        }];
        let request = composer(1000).compose("how are you?", &[], &history);
        let hi_pos = request.user_prompt.find("User: hi").unwrap();
        let q_pos = request.user_prompt.find("User: how are you?").unwrap();
        assert!(hi_pos < q_pos);
    }

    #[test]
    fn custom_persona_overrides_default() {
        let composer =
            PromptComposer::new("m".into(), Some("You are a pirate.".into()), 512, 1000);
        let request = composer.compose("q", &[], &[]);
        assert!(request.system_prompt.starts_with("You are a pirate."));
    }
}
