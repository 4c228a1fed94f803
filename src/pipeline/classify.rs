//! LLM classification stages.
//!
//! Each stage asks for strict JSON and falls back to a safe default when the
//! model is unreachable or returns something unparseable. Scope fails OPEN
//! (treat as in-scope) so a flaky model degrades to extra escalations, never
//! to silently dropped customer questions.

use crate::llm::{Completion, CompletionProvider};
use serde::Deserialize;
use tracing::warn;

/// Scope stage verdict. Greeting and out-of-scope carry the model's reply so
/// the customer still gets a natural response.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeVerdict {
    InScope,
    Greeting(String),
    OutOfScope(String),
}

#[derive(Deserialize)]
struct ScopeReply {
    category: String,
    #[serde(default)]
    reply: String,
}

#[derive(Deserialize)]
struct BookingReply {
    booking: bool,
}

#[derive(Deserialize)]
struct SplitReply {
    questions: Vec<String>,
}

const FALLBACK_GREETING: &str = "Hi! How can I help you today?";
const FALLBACK_OUT_OF_SCOPE: &str =
    "I'm the assistant for our salon, so I can only help with questions about our services. Is there anything salon-related I can do for you?";

/// Stage 1: is this message about the salon at all?
pub async fn classify_scope(
    llm: &dyn CompletionProvider,
    text: &str,
    history: &str,
) -> ScopeVerdict {
    let prompt = format!(
        r#"You are a receptionist assistant for a beauty salon. Classify the customer's latest message.

Conversation so far:
{history}

Latest message: "{text}"

Respond with ONLY a JSON object, no other text:
{{"category": "in_scope" | "greeting" | "out_of_scope", "reply": "<reply to send if greeting or out_of_scope, else empty>"}}

"in_scope" means any question about the salon's services, prices, hours, policies, products, or staff.
"greeting" means small talk or a hello with no question in it.
"out_of_scope" means a topic unrelated to the salon."#
    );

    let raw = match llm.complete(&prompt).await {
        Completion::Answered(text) => text,
        Completion::NeedsHelp => {
            warn!("scope stage unavailable, treating message as in scope");
            return ScopeVerdict::InScope;
        }
    };

    match parse_json::<ScopeReply>(&raw) {
        Some(reply) => match reply.category.as_str() {
            "greeting" => ScopeVerdict::Greeting(non_empty_or(reply.reply, FALLBACK_GREETING)),
            "out_of_scope" => {
                ScopeVerdict::OutOfScope(non_empty_or(reply.reply, FALLBACK_OUT_OF_SCOPE))
            }
            _ => ScopeVerdict::InScope,
        },
        None => {
            warn!("unparseable scope reply, treating message as in scope");
            ScopeVerdict::InScope
        }
    }
}

/// Stage 2: booking intent. Defaults to false so classifier failures keep
/// questions flowing to the knowledge base.
pub async fn classify_booking(llm: &dyn CompletionProvider, text: &str) -> bool {
    let prompt = format!(
        r#"Does this salon customer message ask to book, reschedule, or cancel an appointment?

Message: "{text}"

Respond with ONLY a JSON object, no other text:
{{"booking": true | false}}"#
    );

    let raw = match llm.complete(&prompt).await {
        Completion::Answered(text) => text,
        Completion::NeedsHelp => return false,
    };

    parse_json::<BookingReply>(&raw)
        .map(|r| r.booking)
        .unwrap_or(false)
}

/// Stage 3: split a compound message into standalone questions. Fallback is
/// the whole message as a single question.
pub async fn split_questions(llm: &dyn CompletionProvider, text: &str) -> Vec<String> {
    let prompt = format!(
        r#"Split this salon customer message into its distinct standalone questions. Rephrase each so it makes sense on its own. If there is only one question, return it alone.

Message: "{text}"

Respond with ONLY a JSON object, no other text:
{{"questions": ["...", "..."]}}"#
    );

    let raw = match llm.complete(&prompt).await {
        Completion::Answered(text) => text,
        Completion::NeedsHelp => return vec![text.to_string()],
    };

    match parse_json::<SplitReply>(&raw) {
        Some(reply) => {
            let questions: Vec<String> = reply
                .questions
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .collect();
            if questions.is_empty() {
                vec![text.to_string()]
            } else {
                questions
            }
        }
        None => {
            warn!("unparseable split reply, keeping message whole");
            vec![text.to_string()]
        }
    }
}

/// Parse model output as JSON, tolerating markdown code fences
fn parse_json<T: for<'de> Deserialize<'de>>(raw: &str) -> Option<T> {
    serde_json::from_str(strip_code_fences(raw)).ok()
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

fn non_empty_or(value: String, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use async_trait::async_trait;

    struct CannedLlm(Completion);

    #[async_trait]
    impl CompletionProvider for CannedLlm {
        async fn complete(&self, _prompt: &str) -> Completion {
            self.0.clone()
        }
    }

    fn answered(text: &str) -> CannedLlm {
        CannedLlm(Completion::Answered(text.to_string()))
    }

    #[tokio::test]
    async fn test_scope_parses_fenced_json() {
        let llm = answered("```json\n{\"category\": \"greeting\", \"reply\": \"Hello!\"}\n```");
        let verdict = classify_scope(&llm, "hi there", "").await;
        assert_eq!(verdict, ScopeVerdict::Greeting("Hello!".to_string()));
    }

    #[tokio::test]
    async fn test_scope_fails_open_on_garbage() {
        let llm = answered("I think this is about nails?");
        let verdict = classify_scope(&llm, "do you do acrylics", "").await;
        assert_eq!(verdict, ScopeVerdict::InScope);
    }

    #[tokio::test]
    async fn test_scope_fails_open_when_model_down() {
        let llm = CannedLlm(Completion::NeedsHelp);
        let verdict = classify_scope(&llm, "do you do acrylics", "").await;
        assert_eq!(verdict, ScopeVerdict::InScope);
    }

    #[tokio::test]
    async fn test_out_of_scope_gets_fallback_reply_when_empty() {
        let llm = answered(r#"{"category": "out_of_scope", "reply": ""}"#);
        let ScopeVerdict::OutOfScope(reply) = classify_scope(&llm, "fix my car?", "").await else {
            panic!("expected out of scope");
        };
        assert!(!reply.is_empty());
    }

    #[tokio::test]
    async fn test_booking_defaults_to_false() {
        let llm = answered("not json at all");
        assert!(!classify_booking(&llm, "book me in").await);

        let llm = answered(r#"{"booking": true}"#);
        assert!(classify_booking(&llm, "book me in").await);
    }

    #[tokio::test]
    async fn test_split_falls_back_to_whole_message() {
        let llm = answered(r#"{"questions": []}"#);
        let questions = split_questions(&llm, "hours and prices?").await;
        assert_eq!(questions, vec!["hours and prices?".to_string()]);
    }

    #[tokio::test]
    async fn test_split_filters_blank_entries() {
        let llm = answered(r#"{"questions": ["What are your hours?", "  ", "Do you do gel?"]}"#);
        let questions = split_questions(&llm, "hours? gel?").await;
        assert_eq!(questions.len(), 2);
    }
}
