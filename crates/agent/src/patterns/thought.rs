//! Thought generation for the plain ReAct loop.

use std::sync::Arc;
use steward_core::message::Message;
use steward_core::provider::{Provider, ProviderRequest};
use tracing::{debug, warn};

use super::outcome::AgentContext;
use crate::lenient;
use crate::state::{Scratchpad, Thought};
use crate::state::scratchpad::preview;

const FALLBACK_CONFIDENCE: f32 = 0.3;
const JSON_CONFIDENCE: f32 = 0.7;
const TEXT_CONFIDENCE: f32 = 0.6;

/// Words that signal a chain of reasoning rather than a single assertion.
const CONNECTIVES: &[&str] = &[
    "because",
    "therefore",
    "however",
    "so that",
    "then",
    "otherwise",
    "왜냐하면",
    "따라서",
    "그러므로",
    "하지만",
    "그리고",
    "그래서",
    "만약",
];

/// Reasoning depth from connective words, 1 to 5.
pub fn reasoning_depth(content: &str) -> u8 {
    let lower = content.to_lowercase();
    let hits: usize = CONNECTIVES.iter().map(|c| lower.matches(c).count()).sum();
    (1 + hits).clamp(1, 5) as u8
}

/// Asks the model what to do next and records the answer as a thought.
pub struct ThoughtGenerator {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl ThoughtGenerator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Generate a thought on a fresh scratchpad step. Never fails.
    pub async fn generate_thought(
        &self,
        scratchpad: &mut Scratchpad,
        context: &AgentContext,
    ) -> Thought {
        let (content, confidence, tags) = match self.ask(scratchpad, context).await {
            Some(parsed) => parsed,
            None => (
                format!("Analyzing the goal: {}", preview(&context.goal, 80)),
                FALLBACK_CONFIDENCE,
                vec!["fallback".to_string()],
            ),
        };
        let depth = reasoning_depth(&content);
        debug!(depth, confidence, "Thought generated");

        scratchpad.start_new_step();
        scratchpad
            .add_thought(content, depth, confidence, tags)
            .clone()
    }

    async fn ask(
        &self,
        scratchpad: &Scratchpad,
        context: &AgentContext,
    ) -> Option<(String, f32, Vec<String>)> {
        let mut request = ProviderRequest::new(
            &self.model,
            vec![
                Message::system(
                    "You are a careful assistant working toward a user's goal one step at a time.",
                ),
                Message::user(thought_prompt(scratchpad, context)),
            ],
        )
        .with_temperature(self.temperature);
        if let Some(max) = self.max_tokens {
            request = request.with_max_tokens(max);
        }

        let response = match self.provider.complete(request).await {
            Ok(r) if !r.is_soft_failure() => r,
            Ok(_) => {
                warn!("Thought generation returned nothing, using fallback");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Thought generation failed, using fallback");
                return None;
            }
        };

        let text = response.content().trim();
        if let Ok(obj) = lenient::decode_object(text) {
            if let Some(thought) = lenient::str_field(&obj, &["thought", "content", "reasoning"]) {
                let confidence = lenient::f64_field(&obj, "confidence")
                    .map(|c| c as f32)
                    .unwrap_or(JSON_CONFIDENCE);
                return Some((thought, confidence, lenient::string_list(&obj, "tags")));
            }
        }
        Some((text.to_string(), TEXT_CONFIDENCE, Vec::new()))
    }
}

fn thought_prompt(scratchpad: &Scratchpad, context: &AgentContext) -> String {
    format!(
        "Goal: {goal}\n\
         Limits: {limits}\n\n\
         Progress so far:\n{history}\n\n\
         Think about the single next step toward the goal. If the goal is already \
         achieved, say so. Reply either in plain text or as JSON: \
         {{\"thought\": \"...\", \"confidence\": 0.0-1.0, \"tags\": [\"...\"]}}",
        goal = context.goal,
        limits = context.limits_summary(),
        history = scratchpad.get_formatted_history(false),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_helpers::{
        FailingProvider, SequentialMockProvider, make_error_response,
    };
    use serde_json::json;

    #[test]
    fn depth_counts_connectives() {
        assert_eq!(reasoning_depth("list the desktop"), 1);
        assert_eq!(reasoning_depth("list it because we need the names, then delete"), 3);
        assert_eq!(reasoning_depth("따라서 먼저 탐색하고 그리고 삭제한다"), 3);
        let long = "because ".repeat(10);
        assert_eq!(reasoning_depth(&long), 5);
    }

    #[tokio::test]
    async fn json_thought_is_parsed() {
        let provider = Arc::new(SequentialMockProvider::jsons([json!({
            "thought": "list the desktop first, then pick screenshots",
            "confidence": 0.9,
            "tags": ["explore"]
        })]));
        let generator = ThoughtGenerator::new(provider, "mock-model");
        let mut pad = Scratchpad::new("clean desktop");
        let thought = generator
            .generate_thought(&mut pad, &AgentContext::new("clean desktop"))
            .await;

        assert!(thought.content.starts_with("list the desktop"));
        assert!((thought.confidence - 0.9).abs() < 1e-6);
        assert_eq!(thought.tags, vec!["explore"]);
        assert_eq!(thought.reasoning_depth, 2);
        assert_eq!(pad.steps.len(), 1);
        assert_eq!(pad.reasoning_history.len(), 1);
    }

    #[tokio::test]
    async fn free_text_thought_is_kept_verbatim() {
        let provider = Arc::new(SequentialMockProvider::texts(["I should check the calendar."]));
        let generator = ThoughtGenerator::new(provider, "mock-model");
        let mut pad = Scratchpad::new("g");
        let thought = generator.generate_thought(&mut pad, &AgentContext::new("g")).await;
        assert_eq!(thought.content, "I should check the calendar.");
        assert!((thought.confidence - TEXT_CONFIDENCE).abs() < 1e-6);
    }

    #[tokio::test]
    async fn failures_fall_back_to_goal_restatement() {
        let generator = ThoughtGenerator::new(Arc::new(FailingProvider), "mock-model");
        let mut pad = Scratchpad::new("tidy downloads");
        let thought = generator
            .generate_thought(&mut pad, &AgentContext::new("tidy downloads"))
            .await;
        assert!(thought.content.contains("tidy downloads"));
        assert!((thought.confidence - FALLBACK_CONFIDENCE).abs() < 1e-6);

        let provider = Arc::new(SequentialMockProvider::new(vec![make_error_response()]));
        let generator = ThoughtGenerator::new(provider, "mock-model");
        let thought = generator
            .generate_thought(&mut pad, &AgentContext::new("tidy downloads"))
            .await;
        assert!((thought.confidence - FALLBACK_CONFIDENCE).abs() < 1e-6);
        assert_eq!(pad.steps.len(), 2);
    }
}
