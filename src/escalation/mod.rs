//! Human escalation ledger.
//!
//! Every question the assistant cannot answer becomes a [`HelpRequest`] here.
//! The ledger owns the status machine around those requests and keeps an
//! append-only trail of supervisor submissions, including ones that arrive
//! after a request already left the pending state.

mod file;
mod memory;

pub use file::FileLedger;
pub use memory::MemoryLedger;

use crate::errors::Result;
use crate::types::{HelpRequest, HelpRequestStatus, StatusEvent, SupervisorResponse};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

pub const DEFAULT_PENDING_TIMEOUT_MINS: i64 = 15;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a new pending request for an unanswerable question
    async fn create(
        &self,
        question: &str,
        participant_id: &str,
        room_name: &str,
    ) -> Result<HelpRequest>;

    async fn get(&self, id: Uuid) -> Result<Option<HelpRequest>>;

    async fn list_by_status(&self, status: HelpRequestStatus) -> Result<Vec<HelpRequest>>;

    /// Attach a contact address collected mid-conversation
    async fn set_customer_email(&self, id: Uuid, email: &str) -> Result<HelpRequest>;

    /// Apply a supervisor's answer. Errors if the request is already resolved;
    /// late answers against timed-out or unresolved requests are accepted.
    async fn record_answer(&self, id: Uuid, answer: &str) -> Result<HelpRequest>;

    /// Move an answered request to its terminal state
    async fn mark_resolved(&self, id: Uuid) -> Result<HelpRequest>;

    async fn mark_email_sent(&self, id: Uuid) -> Result<HelpRequest>;

    /// Pending request whose conversation ended without an answer
    async fn close_conversation(&self, id: Uuid) -> Result<HelpRequest>;

    /// Expire pending requests older than `window`; returns the ids moved
    /// to unresolved
    async fn sweep_timeouts(&self, window: Duration) -> Result<Vec<Uuid>>;

    /// Append to the audit trail. Recorded even when the corresponding
    /// status transition was rejected.
    async fn record_supervisor_response(&self, response: SupervisorResponse) -> Result<()>;

    async fn audit_trail(&self, request_id: Uuid) -> Result<Vec<SupervisorResponse>>;
}

/// Shared mutation logic for answer recording
pub(crate) fn apply_answer(request: &mut HelpRequest, answer: &str) -> Result<()> {
    request.status = request.status.transition(StatusEvent::SupervisorAnswered)?;
    request.answer = Some(answer.to_string());
    request.answered_at = Some(Utc::now());
    Ok(())
}

pub(crate) fn apply_resolution(request: &mut HelpRequest) -> Result<()> {
    request.status = request.status.transition(StatusEvent::SideEffectsComplete)?;
    request.resolved_at = Some(Utc::now());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_answer_then_resolution() {
        let mut request = HelpRequest::new("what polish brands?", "p1", "salon");
        apply_answer(&mut request, "We stock OPI and Essie.").unwrap();
        assert_eq!(request.status, HelpRequestStatus::Answered);
        assert!(request.answered_at.is_some());

        apply_resolution(&mut request).unwrap();
        assert_eq!(request.status, HelpRequestStatus::Resolved);
        assert!(request.status.is_terminal());
    }

    #[test]
    fn test_second_answer_after_resolution_is_rejected() {
        let mut request = HelpRequest::new("q", "p1", "salon");
        apply_answer(&mut request, "first").unwrap();
        apply_resolution(&mut request).unwrap();

        let err = apply_answer(&mut request, "second").unwrap_err();
        assert!(err.to_string().contains("Resolved"));
        // The original answer is untouched
        assert_eq!(request.answer.as_deref(), Some("first"));
    }
}
