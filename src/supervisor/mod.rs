//! Supervisor answer handling.
//!
//! One entry point ties the feedback loop together: a supervisor answer
//! moves the request through its status machine exactly once, then fires
//! three best-effort side effects (customer email, teaching the answer back
//! into the knowledge base, audit row). Side-effect failures are logged and
//! never block resolution.

use crate::email::{is_valid_email, EmailSender};
use crate::embedding::EmbeddingProvider;
use crate::errors::Result;
use crate::escalation::LedgerStore;
use crate::knowledge::KnowledgeStore;
use crate::telemetry::{AssistCollector, AssistEvent};
use crate::types::{HelpRequest, HelpRequestStatus, SupervisorResponse};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub struct SupervisorService {
    ledger: Arc<dyn LedgerStore>,
    knowledge: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    email: Arc<dyn EmailSender>,
    telemetry: AssistCollector,
}

impl SupervisorService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        knowledge: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        email: Arc<dyn EmailSender>,
        telemetry: AssistCollector,
    ) -> Self {
        Self {
            ledger,
            knowledge,
            embedder,
            email,
            telemetry,
        }
    }

    /// Apply a supervisor's answer to a help request.
    ///
    /// The audit row is written unconditionally, so a rejected duplicate
    /// answer still leaves a trace. The status transition itself is the only
    /// step that can fail the call.
    pub async fn answer_help_request(&self, id: Uuid, answer: &str) -> Result<HelpRequest> {
        self.ledger
            .record_supervisor_response(SupervisorResponse {
                request_id: id,
                answer: answer.to_string(),
                recorded_at: Utc::now(),
            })
            .await?;

        let before = self.ledger.get(id).await?.map(|r| r.status);
        let request = self.ledger.record_answer(id, answer).await?;

        let late = matches!(
            before,
            Some(HelpRequestStatus::Timeout) | Some(HelpRequestStatus::Unresolved)
        );
        self.telemetry.record(AssistEvent::SupervisorAnswer {
            late,
            timestamp: Instant::now(),
        });
        info!(id = %id, late, "supervisor answer recorded");

        self.notify_customer(&request, answer).await;
        self.learn_from_resolution(&request, answer).await;

        self.ledger.mark_resolved(id).await
    }

    async fn notify_customer(&self, request: &HelpRequest, answer: &str) {
        let Some(address) = request.customer_email.as_deref() else {
            info!(id = %request.id, "no customer email on file, skipping notification");
            return;
        };
        if !is_valid_email(address) {
            warn!(id = %request.id, "stored customer email is malformed, skipping notification");
            return;
        }

        let subject = "An update from the salon";
        let body = format!(
            "Hi!\n\nYou asked: {}\n\n{}\n\nThanks for your patience,\nThe salon team",
            request.question, answer
        );

        let outcome = self.email.send(address, subject, &body).await;
        self.telemetry.record(AssistEvent::EmailAttempted {
            success: outcome.is_ok(),
            timestamp: Instant::now(),
        });
        match outcome {
            Ok(()) => {
                if let Err(e) = self.ledger.mark_email_sent(request.id).await {
                    warn!(id = %request.id, error = %e, "email sent but flag not recorded");
                }
            }
            Err(e) => warn!(id = %request.id, error = %e, "follow-up email failed"),
        }
    }

    /// Teach the resolved answer back into the knowledge base so the next
    /// customer asking the same thing gets it directly
    async fn learn_from_resolution(&self, request: &HelpRequest, answer: &str) {
        let embedding = match self.embedder.embed(&request.question).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(id = %request.id, error = %e, "teach-back embedding failed");
                return;
            }
        };

        match self
            .knowledge
            .insert(&request.question, answer, embedding, Some(request.id))
            .await
        {
            Ok(entry) => {
                self.telemetry.record(AssistEvent::EntryLearned {
                    timestamp: Instant::now(),
                });
                info!(request = %request.id, entry = %entry.id, "answer learned into knowledge base");
            }
            Err(e) => warn!(id = %request.id, error = %e, "teach-back insert failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AssistError;
    use crate::escalation::MemoryLedger;
    use crate::knowledge::MemoryKnowledgeStore;
    use async_trait::async_trait;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AssistError::EmbeddingProvider("down".to_string()))
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(AssistError::EmbeddingProvider("down".to_string()))
        }
    }

    struct RefusingEmail;

    #[async_trait]
    impl EmailSender for RefusingEmail {
        async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<()> {
            Err(AssistError::EmailProvider("rejected".to_string()))
        }
    }

    fn service_with(
        ledger: Arc<MemoryLedger>,
        knowledge: Arc<MemoryKnowledgeStore>,
    ) -> SupervisorService {
        SupervisorService::new(
            ledger,
            knowledge,
            Arc::new(FixedEmbedder),
            Arc::new(crate::email::NoopEmailSender),
            AssistCollector::new(),
        )
    }

    #[tokio::test]
    async fn test_answer_resolves_and_teaches_back() {
        let ledger = Arc::new(MemoryLedger::new());
        let knowledge = Arc::new(MemoryKnowledgeStore::new());
        let service = service_with(Arc::clone(&ledger), Arc::clone(&knowledge));

        let request = ledger
            .create("do you sell gift cards?", "p1", "salon")
            .await
            .unwrap();
        let resolved = service
            .answer_help_request(request.id, "Yes, in any amount from $25.")
            .await
            .unwrap();

        assert_eq!(resolved.status, HelpRequestStatus::Resolved);
        assert_eq!(knowledge.count().await.unwrap(), 1);
        assert_eq!(ledger.audit_trail(request.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_answer_errors_but_is_audited() {
        let ledger = Arc::new(MemoryLedger::new());
        let knowledge = Arc::new(MemoryKnowledgeStore::new());
        let service = service_with(Arc::clone(&ledger), Arc::clone(&knowledge));

        let request = ledger.create("q", "p1", "salon").await.unwrap();
        service.answer_help_request(request.id, "first").await.unwrap();
        let err = service
            .answer_help_request(request.id, "second")
            .await
            .unwrap_err();
        assert!(matches!(err, AssistError::InvalidTransition { .. }));

        // Both submissions are in the trail; only the first took effect
        assert_eq!(ledger.audit_trail(request.id).await.unwrap().len(), 2);
        let stored = ledger.get(request.id).await.unwrap().unwrap();
        assert_eq!(stored.answer.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_side_effect_failures_do_not_block_resolution() {
        let ledger = Arc::new(MemoryLedger::new());
        let knowledge = Arc::new(MemoryKnowledgeStore::new());
        let service = SupervisorService::new(
            Arc::clone(&ledger) as Arc<dyn LedgerStore>,
            Arc::clone(&knowledge) as Arc<dyn KnowledgeStore>,
            Arc::new(FailingEmbedder),
            Arc::new(RefusingEmail),
            AssistCollector::new(),
        );

        let request = ledger.create("q", "p1", "salon").await.unwrap();
        ledger
            .set_customer_email(request.id, "c@example.com")
            .await
            .unwrap();

        let resolved = service.answer_help_request(request.id, "a").await.unwrap();
        assert_eq!(resolved.status, HelpRequestStatus::Resolved);
        assert!(!resolved.email_sent);
        assert_eq!(knowledge.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_late_answer_still_resolves() {
        let ledger = Arc::new(MemoryLedger::new());
        let knowledge = Arc::new(MemoryKnowledgeStore::new());
        let service = service_with(Arc::clone(&ledger), Arc::clone(&knowledge));

        let request = ledger.create("q", "p1", "salon").await.unwrap();
        ledger.sweep_timeouts(chrono::Duration::zero()).await.unwrap();

        let resolved = service
            .answer_help_request(request.id, "late answer")
            .await
            .unwrap();
        assert_eq!(resolved.status, HelpRequestStatus::Resolved);
    }
}
