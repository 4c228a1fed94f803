//! Core data model: knowledge entries, help requests, pipeline results.
//!
//! `HelpRequestStatus` implements a checked state machine. Transitions are
//! forward-only; a request never returns to `Pending`. A late supervisor
//! answer is still accepted on a timed-out request — supervisor answers are
//! authoritative over the clock.

use crate::errors::{AssistError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A question/answer pair in the knowledge base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: Uuid,
    /// Original question this entry answers
    pub question: String,
    pub answer: String,
    /// Fixed-length vector from the embedding provider. Entries whose length
    /// does not match the store dimension are excluded from vector search.
    pub embedding: Vec<f32>,
    /// Incremented each time this entry is the top match returned to a customer
    pub times_used: u64,
    /// Back-reference to the help request that taught this entry, if any
    pub learned_from: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A knowledge entry with its similarity score from a vector search
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: KnowledgeEntry,
    pub score: f32,
}

/// Lifecycle status of an escalated question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelpRequestStatus {
    /// Waiting for a supervisor
    Pending,
    /// Supervisor answer recorded; side effects in flight
    Answered,
    /// Answer recorded and side-effect attempts complete (terminal)
    Resolved,
    /// Conversation ended before an answer arrived
    Timeout,
    /// Swept after sitting pending past the timeout window
    Unresolved,
}

/// Events that drive help-request status transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// A supervisor submitted an answer
    SupervisorAnswered,
    /// Answer side effects (email, teach-back, audit) have been attempted
    SideEffectsComplete,
    /// The periodic sweep found this request pending past the window
    SweepExpired,
    /// The customer conversation ended with the request still pending
    ConversationClosed,
}

impl HelpRequestStatus {
    /// Terminal success state
    pub fn is_terminal(&self) -> bool {
        matches!(self, HelpRequestStatus::Resolved)
    }

    /// Attempt a status transition.
    ///
    /// Valid transitions:
    /// - Pending    → Answered    (SupervisorAnswered)
    /// - Pending    → Unresolved  (SweepExpired)
    /// - Pending    → Timeout     (ConversationClosed)
    /// - Answered   → Resolved    (SideEffectsComplete)
    /// - Timeout    → Answered    (SupervisorAnswered, late answer accepted)
    /// - Unresolved → Answered    (SupervisorAnswered, late answer accepted)
    pub fn transition(&self, event: StatusEvent) -> Result<HelpRequestStatus> {
        use HelpRequestStatus::*;
        use StatusEvent::*;

        let next = match (self, event) {
            (Pending, SupervisorAnswered) => Answered,
            (Pending, SweepExpired) => Unresolved,
            (Pending, ConversationClosed) => Timeout,
            (Answered, SideEffectsComplete) => Resolved,
            (Timeout, SupervisorAnswered) => Answered,
            (Unresolved, SupervisorAnswered) => Answered,
            (from, event) => {
                return Err(AssistError::InvalidTransition {
                    from: format!("{:?}", from),
                    to: format!("(via {:?})", event),
                    reason: format!("no valid transition from {:?} on {:?}", from, event),
                });
            }
        };

        Ok(next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HelpRequestStatus::Pending => "pending",
            HelpRequestStatus::Answered => "answered",
            HelpRequestStatus::Resolved => "resolved",
            HelpRequestStatus::Timeout => "timeout",
            HelpRequestStatus::Unresolved => "unresolved",
        }
    }
}

/// An escalated customer question in the ledger.
///
/// Never physically deleted; the ledger doubles as audit trail and
/// training-data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelpRequest {
    pub id: Uuid,
    /// Verbatim question, or the combined unanswerable subset of a compound one
    pub question: String,
    /// Opaque, client-supplied customer session identifier
    pub participant_id: String,
    pub room_name: String,
    /// Collected lazily during the conversation
    pub customer_email: Option<String>,
    pub status: HelpRequestStatus,
    pub answer: Option<String>,
    pub answered_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub email_sent: bool,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl HelpRequest {
    pub fn new(question: &str, participant_id: &str, room_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.to_string(),
            participant_id: participant_id.to_string(),
            room_name: room_name.to_string(),
            customer_email: None,
            status: HelpRequestStatus::Pending,
            answer: None,
            answered_at: None,
            resolved_at: None,
            email_sent: false,
            email_sent_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Immutable audit row recorded for every supervisor answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorResponse {
    pub request_id: Uuid,
    pub answer: String,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of one pipeline run for a customer utterance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Customer-facing reply text
    pub answer: String,
    /// At least part of the query was answered from the KB or a canned reply
    pub found: bool,
    /// A help request was created (or an internal error degraded to one)
    pub needs_help: bool,
    pub out_of_scope: bool,
    pub requires_booking: bool,
    /// Some sub-questions were answered, others escalated
    pub partial_answer: bool,
    pub help_request_id: Option<Uuid>,
}

impl PipelineResult {
    /// A fully answered reply with no escalation
    pub fn answered(answer: String) -> Self {
        Self {
            answer,
            found: true,
            needs_help: false,
            out_of_scope: false,
            requires_booking: false,
            partial_answer: false,
            help_request_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_to_answered() {
        assert_eq!(
            HelpRequestStatus::Pending
                .transition(StatusEvent::SupervisorAnswered)
                .unwrap(),
            HelpRequestStatus::Answered
        );
    }

    #[test]
    fn test_sweep_is_one_way() {
        let swept = HelpRequestStatus::Pending
            .transition(StatusEvent::SweepExpired)
            .unwrap();
        assert_eq!(swept, HelpRequestStatus::Unresolved);

        // A second sweep on an already-swept request is invalid
        assert!(swept.transition(StatusEvent::SweepExpired).is_err());
    }

    #[test]
    fn test_late_answer_accepted_after_timeout() {
        for stale in [HelpRequestStatus::Timeout, HelpRequestStatus::Unresolved] {
            assert_eq!(
                stale.transition(StatusEvent::SupervisorAnswered).unwrap(),
                HelpRequestStatus::Answered
            );
        }
    }

    #[test]
    fn test_resolved_is_terminal() {
        let resolved = HelpRequestStatus::Resolved;
        assert!(resolved.is_terminal());
        assert!(resolved.transition(StatusEvent::SupervisorAnswered).is_err());
        assert!(resolved.transition(StatusEvent::SweepExpired).is_err());
    }

    #[test]
    fn test_cannot_return_to_pending() {
        // No event maps any state back to Pending
        for status in [
            HelpRequestStatus::Answered,
            HelpRequestStatus::Resolved,
            HelpRequestStatus::Timeout,
            HelpRequestStatus::Unresolved,
        ] {
            for event in [
                StatusEvent::SupervisorAnswered,
                StatusEvent::SideEffectsComplete,
                StatusEvent::SweepExpired,
                StatusEvent::ConversationClosed,
            ] {
                if let Ok(next) = status.transition(event) {
                    assert_ne!(next, HelpRequestStatus::Pending);
                }
            }
        }
    }

    #[test]
    fn test_new_help_request_defaults() {
        let req = HelpRequest::new("What are your hours?", "participant-1", "room-a");
        assert_eq!(req.status, HelpRequestStatus::Pending);
        assert!(req.answer.is_none());
        assert!(!req.email_sent);
    }
}
