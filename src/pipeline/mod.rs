//! Query resolution pipeline.
//!
//! One customer utterance flows through scope and booking classification,
//! question decomposition, per-question knowledge lookup, and aggregation.
//! Anything the knowledge base cannot answer confidently is escalated to a
//! human supervisor through the ledger, and the customer is asked for an
//! email address so the answer can reach them later.
//!
//! The outer entry point never fails: internal errors degrade to an
//! escalation with an apologetic reply, because a customer-facing surface
//! cannot return an error type.

pub mod classify;

use crate::embedding::EmbeddingProvider;
use crate::errors::Result;
use crate::escalation::LedgerStore;
use crate::knowledge::KnowledgeStore;
use crate::llm::{Completion, CompletionProvider, NEED_HELP_SENTINEL};
use crate::session::{SessionStore, Speaker};
use crate::telemetry::{AssistCollector, AssistEvent};
use crate::types::{PipelineResult, ScoredEntry};
use classify::ScopeVerdict;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
pub const DEFAULT_TOP_K: usize = 3;

const BOOKING_REPLY: &str = "I'd be happy to get you booked in! What service would you like, and what day and time work best for you?";
const ESCALATION_REPLY: &str =
    "Let me check with my supervisor and get back to you on that.";
const PARTIAL_NOTE: &str = "I'm checking on the rest with my supervisor and will follow up.";
const EMAIL_ASK: &str =
    "Could you share your email address so we can follow up once we have the answer?";
const EMAIL_REPROMPT: &str =
    "That doesn't look like a valid email address. Could you double-check it for me?";
const FALLBACK_REPLY: &str =
    "Sorry, we're having some technical difficulties on my end. I've passed your question along to my supervisor.";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hard similarity cutoff; below it an entry is never used as context
    pub similarity_threshold: f32,
    pub top_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Per-question resolution outcome
enum Outcome {
    Answered(String),
    Unanswerable,
}

struct Resolution {
    question: String,
    outcome: Outcome,
}

pub struct QueryPipeline {
    llm: Arc<dyn CompletionProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    knowledge: Arc<dyn KnowledgeStore>,
    ledger: Arc<dyn LedgerStore>,
    sessions: Arc<SessionStore>,
    telemetry: AssistCollector,
    config: PipelineConfig,
}

impl QueryPipeline {
    pub fn new(
        llm: Arc<dyn CompletionProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        knowledge: Arc<dyn KnowledgeStore>,
        ledger: Arc<dyn LedgerStore>,
        sessions: Arc<SessionStore>,
        telemetry: AssistCollector,
        config: PipelineConfig,
    ) -> Self {
        Self {
            llm,
            embedder,
            knowledge,
            ledger,
            sessions,
            telemetry,
            config,
        }
    }

    /// Resolve one customer utterance. Never errors; internal failures come
    /// back as an escalation with an apology.
    pub async fn resolve_query(
        &self,
        text: &str,
        participant_id: &str,
        room_name: &str,
    ) -> PipelineResult {
        self.telemetry.record(AssistEvent::QueryReceived {
            timestamp: Instant::now(),
        });
        self.sessions
            .record_turn(participant_id, Speaker::Customer, text)
            .await;

        let result = match self.try_resolve(text, participant_id, room_name).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "pipeline failure, degrading to escalation");
                self.telemetry.record(AssistEvent::InternalFailure {
                    stage: "pipeline".to_string(),
                    timestamp: Instant::now(),
                });
                self.degraded_escalation(text, participant_id, room_name)
                    .await
            }
        };

        self.sessions
            .record_turn(participant_id, Speaker::Assistant, &result.answer)
            .await;
        result
    }

    async fn try_resolve(
        &self,
        text: &str,
        participant_id: &str,
        room_name: &str,
    ) -> Result<PipelineResult> {
        let session = self.sessions.snapshot(participant_id).await;

        // A pending email ask takes priority over normal resolution
        if let Some(request_id) = session.awaiting_email_for {
            return self.collect_email(text, participant_id, request_id).await;
        }

        match classify::classify_scope(self.llm.as_ref(), text, &session.history_block()).await {
            ScopeVerdict::InScope => {}
            ScopeVerdict::Greeting(reply) => {
                return Ok(PipelineResult::answered(reply));
            }
            ScopeVerdict::OutOfScope(reply) => {
                self.telemetry.record(AssistEvent::OutOfScope {
                    timestamp: Instant::now(),
                });
                // The polite decline is still a delivered reply
                return Ok(PipelineResult {
                    answer: reply,
                    found: true,
                    needs_help: false,
                    out_of_scope: true,
                    requires_booking: false,
                    partial_answer: false,
                    help_request_id: None,
                });
            }
        }

        if classify::classify_booking(self.llm.as_ref(), text).await {
            self.telemetry.record(AssistEvent::BookingDetected {
                timestamp: Instant::now(),
            });
            return Ok(PipelineResult {
                answer: BOOKING_REPLY.to_string(),
                found: true,
                needs_help: false,
                out_of_scope: false,
                requires_booking: true,
                partial_answer: false,
                help_request_id: None,
            });
        }

        let questions = classify::split_questions(self.llm.as_ref(), text).await;
        debug!(count = questions.len(), "message decomposed");

        let mut resolutions = Vec::with_capacity(questions.len());
        for question in questions {
            let outcome = self.resolve_question(&question).await;
            resolutions.push(Resolution { question, outcome });
        }

        self.aggregate(text, participant_id, room_name, &session.customer_email, resolutions)
            .await
    }

    /// Customer reply while we are waiting for their email address
    async fn collect_email(
        &self,
        text: &str,
        participant_id: &str,
        request_id: Uuid,
    ) -> Result<PipelineResult> {
        let candidate = text.trim();
        if !crate::email::is_valid_email(candidate) {
            // Keep the association; the next message gets checked again
            return Ok(PipelineResult {
                answer: EMAIL_REPROMPT.to_string(),
                found: false,
                needs_help: true,
                out_of_scope: false,
                requires_booking: false,
                partial_answer: false,
                help_request_id: Some(request_id),
            });
        }

        self.ledger.set_customer_email(request_id, candidate).await?;
        self.sessions.email_collected(participant_id, candidate).await;
        Ok(PipelineResult {
            answer: format!(
                "Perfect, thanks! We'll email you at {candidate} as soon as we have the answer."
            ),
            found: true,
            needs_help: true,
            out_of_scope: false,
            requires_booking: false,
            partial_answer: false,
            help_request_id: Some(request_id),
        })
    }

    /// Resolve a single standalone question against the knowledge base
    async fn resolve_question(&self, question: &str) -> Outcome {
        let context = match self.lookup_context(question).await {
            Some(entries) if !entries.is_empty() => entries,
            _ => {
                self.telemetry.record(AssistEvent::KnowledgeMiss {
                    timestamp: Instant::now(),
                });
                return Outcome::Unanswerable;
            }
        };

        let top = &context[0];
        self.telemetry.record(AssistEvent::KnowledgeHit {
            score: top.score,
            timestamp: Instant::now(),
        });

        let context_block = context
            .iter()
            .map(|s| format!("Q: {}\nA: {}", s.entry.question, s.entry.answer))
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = format!(
            r#"You are a friendly receptionist for a beauty salon. Answer the customer's question using ONLY the knowledge below. If the knowledge does not contain the answer, respond with exactly {NEED_HELP_SENTINEL} and nothing else.

Knowledge:
{context_block}

Customer question: "{question}"

Answer in one or two warm, natural sentences."#
        );

        match self.llm.complete(&prompt).await {
            Completion::Answered(answer) => {
                // Fire and forget; a lost counter bump is acceptable
                let knowledge = Arc::clone(&self.knowledge);
                let entry_id = top.entry.id;
                tokio::spawn(async move {
                    if let Err(e) = knowledge.increment_usage(entry_id).await {
                        warn!(id = %entry_id, error = %e, "usage bump failed");
                    }
                });
                Outcome::Answered(answer)
            }
            Completion::NeedsHelp => Outcome::Unanswerable,
        }
    }

    /// Vector lookup with keyword fallback when the store misbehaves.
    /// Returns `None` when nothing usable was found.
    async fn lookup_context(&self, question: &str) -> Option<Vec<ScoredEntry>> {
        let embedding = match self.embedder.embed(question).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "embedding failed, using keyword fallback");
                self.telemetry.record(AssistEvent::InternalFailure {
                    stage: "embedding".to_string(),
                    timestamp: Instant::now(),
                });
                return self.keyword_fallback(question).await;
            }
        };

        match self
            .knowledge
            .find_similar(
                &embedding,
                self.config.similarity_threshold,
                self.config.top_k,
            )
            .await
        {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!(error = %e, "vector search failed, using keyword fallback");
                self.telemetry.record(AssistEvent::InternalFailure {
                    stage: "vector_search".to_string(),
                    timestamp: Instant::now(),
                });
                self.keyword_fallback(question).await
            }
        }
    }

    async fn keyword_fallback(&self, question: &str) -> Option<Vec<ScoredEntry>> {
        match self.knowledge.keyword_search(question, self.config.top_k).await {
            Ok(entries) => Some(
                entries
                    .into_iter()
                    // No similarity available on this path
                    .map(|entry| ScoredEntry { entry, score: 0.0 })
                    .collect(),
            ),
            Err(e) => {
                warn!(error = %e, "keyword fallback failed");
                None
            }
        }
    }

    /// Combine per-question results into one reply, escalating the
    /// unanswerable remainder
    async fn aggregate(
        &self,
        original: &str,
        participant_id: &str,
        room_name: &str,
        known_email: &Option<String>,
        resolutions: Vec<Resolution>,
    ) -> Result<PipelineResult> {
        let mut answered = Vec::new();
        let mut unanswered = Vec::new();
        for resolution in resolutions {
            match resolution.outcome {
                Outcome::Answered(answer) => answered.push(answer),
                Outcome::Unanswerable => unanswered.push(resolution.question),
            }
        }

        if unanswered.is_empty() {
            let reply = if answered.len() == 1 {
                answered.into_iter().next().unwrap_or_default()
            } else {
                self.combine_answers(original, &answered).await
            };
            return Ok(PipelineResult::answered(reply));
        }

        // Escalate the whole original message when nothing was answerable,
        // otherwise only the unanswered subset
        let escalation_text = if answered.is_empty() {
            original.to_string()
        } else {
            unanswered.join(" ")
        };

        let (request_id, email_suffix) = self
            .escalate(&escalation_text, participant_id, room_name, known_email)
            .await?;

        if answered.is_empty() {
            return Ok(PipelineResult {
                answer: format!("{ESCALATION_REPLY}{email_suffix}"),
                found: false,
                needs_help: true,
                out_of_scope: false,
                requires_booking: false,
                partial_answer: false,
                help_request_id: Some(request_id),
            });
        }

        self.telemetry.record(AssistEvent::PartialAnswer {
            timestamp: Instant::now(),
        });
        let known = if answered.len() == 1 {
            answered.into_iter().next().unwrap_or_default()
        } else {
            self.combine_answers(original, &answered).await
        };
        Ok(PipelineResult {
            answer: format!("{known} {PARTIAL_NOTE}{email_suffix}"),
            found: true,
            needs_help: true,
            out_of_scope: false,
            requires_booking: false,
            partial_answer: true,
            help_request_id: Some(request_id),
        })
    }

    /// Merge multiple answers into one reply; a combine failure falls back
    /// to simple joining rather than escalating answers we already have
    async fn combine_answers(&self, original: &str, answers: &[String]) -> String {
        let parts = answers.join("\n- ");
        let prompt = format!(
            r#"Combine these answer fragments into one short, natural reply to the customer's message. Do not add any information that is not in the fragments.

Customer message: "{original}"

Fragments:
- {parts}"#
        );

        match self.llm.complete(&prompt).await {
            Completion::Answered(combined) => combined,
            Completion::NeedsHelp => answers.join(" "),
        }
    }

    async fn escalate(
        &self,
        question: &str,
        participant_id: &str,
        room_name: &str,
        known_email: &Option<String>,
    ) -> Result<(Uuid, String)> {
        let request = self
            .ledger
            .create(question, participant_id, room_name)
            .await?;
        self.telemetry.record(AssistEvent::Escalated {
            timestamp: Instant::now(),
        });

        // Reuse an address from earlier in the conversation; otherwise ask
        let suffix = match known_email {
            Some(email) => {
                self.ledger.set_customer_email(request.id, email).await?;
                String::new()
            }
            None => {
                self.sessions
                    .set_awaiting_email(participant_id, request.id)
                    .await;
                format!(" {EMAIL_ASK}")
            }
        };

        Ok((request.id, suffix))
    }

    /// Last-resort path when the normal pipeline errored out
    async fn degraded_escalation(
        &self,
        text: &str,
        participant_id: &str,
        room_name: &str,
    ) -> PipelineResult {
        let help_request_id = match self.ledger.create(text, participant_id, room_name).await {
            Ok(request) => {
                self.telemetry.record(AssistEvent::Escalated {
                    timestamp: Instant::now(),
                });
                self.sessions
                    .set_awaiting_email(participant_id, request.id)
                    .await;
                Some(request.id)
            }
            Err(e) => {
                warn!(error = %e, "could not open help request for failed query");
                None
            }
        };

        let answer = if help_request_id.is_some() {
            format!("{FALLBACK_REPLY} {EMAIL_ASK}")
        } else {
            FALLBACK_REPLY.to_string()
        };

        PipelineResult {
            answer,
            found: false,
            needs_help: true,
            out_of_scope: false,
            requires_booking: false,
            partial_answer: false,
            help_request_id,
        }
    }
}
