//! Conversation session tracking.
//!
//! Sessions are keyed by participant id and hold a bounded turn history plus
//! the small amount of cross-turn state the pipeline needs: whether we are
//! waiting for the customer's email after an escalation, and any address
//! they already gave us.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_MAX_TURNS: usize = 20;
pub const DEFAULT_TTL_MINS: i64 = 30;

/// Pinned system turn; survives history pruning
const PERSONA: &str =
    "You are the front-desk assistant for our beauty salon. Be warm, brief, and helpful.";

#[derive(Debug, Clone, PartialEq)]
pub enum Speaker {
    Customer,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub participant: String,
    pub turns: VecDeque<Turn>,
    /// Help request waiting on a contact address from this customer
    pub awaiting_email_for: Option<Uuid>,
    pub customer_email: Option<String>,
    pub last_active: DateTime<Utc>,
}

impl ConversationSession {
    fn new(participant: &str) -> Self {
        Self {
            participant: participant.to_string(),
            turns: VecDeque::new(),
            awaiting_email_for: None,
            customer_email: None,
            last_active: Utc::now(),
        }
    }

    fn push_turn(&mut self, speaker: Speaker, text: &str, max_turns: usize) {
        if self.turns.len() >= max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(Turn {
            speaker,
            text: text.to_string(),
            at: Utc::now(),
        });
        self.last_active = Utc::now();
    }

    /// Recent history rendered for prompt context: the pinned persona turn
    /// first, then turns oldest to newest
    pub fn history_block(&self) -> String {
        let mut lines = vec![format!("System: {PERSONA}")];
        lines.extend(self.turns.iter().map(|turn| match turn.speaker {
            Speaker::Customer => format!("Customer: {}", turn.text),
            Speaker::Assistant => format!("Assistant: {}", turn.text),
        }));
        lines.join("\n")
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, ConversationSession>>,
    max_turns: usize,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(max_turns: usize, ttl_mins: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns,
            ttl: Duration::minutes(ttl_mins),
        }
    }

    pub async fn snapshot(&self, participant: &str) -> ConversationSession {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(participant.to_string())
            .or_insert_with(|| ConversationSession::new(participant))
            .clone()
    }

    pub async fn record_turn(&self, participant: &str, speaker: Speaker, text: &str) {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(participant.to_string())
            .or_insert_with(|| ConversationSession::new(participant));
        session.push_turn(speaker, text, self.max_turns);
    }

    pub async fn set_awaiting_email(&self, participant: &str, request_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(participant.to_string())
            .or_insert_with(|| ConversationSession::new(participant));
        session.awaiting_email_for = Some(request_id);
        session.last_active = Utc::now();
    }

    /// Clears the pending-email marker and remembers the address
    pub async fn email_collected(&self, participant: &str, email: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(participant) {
            session.awaiting_email_for = None;
            session.customer_email = Some(email.to_string());
            session.last_active = Utc::now();
        }
    }

    /// Drops sessions idle past the TTL and returns them, so callers can
    /// close out any help request still waiting on an email
    pub async fn evict_expired(&self) -> Vec<ConversationSession> {
        let cutoff = Utc::now() - self.ttl;
        let mut sessions = self.sessions.write().await;
        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.last_active <= cutoff)
            .map(|(k, _)| k.clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for key in stale {
            if let Some(session) = sessions.remove(&key) {
                evicted.push(session);
            }
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "expired sessions dropped");
        }
        evicted
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS, DEFAULT_TTL_MINS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_turns_are_bounded() {
        let store = SessionStore::new(3, 30);
        for i in 0..5 {
            store
                .record_turn("p1", Speaker::Customer, &format!("msg {i}"))
                .await;
        }

        let session = store.snapshot("p1").await;
        assert_eq!(session.turns.len(), 3);
        assert_eq!(session.turns.front().unwrap().text, "msg 2");
    }

    #[tokio::test]
    async fn test_history_block_labels_speakers() {
        let store = SessionStore::default();
        store.record_turn("p1", Speaker::Customer, "hi").await;
        store.record_turn("p1", Speaker::Assistant, "hello!").await;

        let block = store.snapshot("p1").await.history_block();
        assert!(block.starts_with("System: "));
        assert!(block.ends_with("Customer: hi\nAssistant: hello!"));
    }

    #[tokio::test]
    async fn test_persona_survives_pruning() {
        let store = SessionStore::new(2, 30);
        for i in 0..10 {
            store
                .record_turn("p1", Speaker::Customer, &format!("msg {i}"))
                .await;
        }

        let block = store.snapshot("p1").await.history_block();
        assert!(block.starts_with("System: "));
    }

    #[tokio::test]
    async fn test_email_collection_clears_pending_marker() {
        let store = SessionStore::default();
        let request_id = Uuid::new_v4();
        store.set_awaiting_email("p1", request_id).await;
        assert_eq!(
            store.snapshot("p1").await.awaiting_email_for,
            Some(request_id)
        );

        store.email_collected("p1", "a@b.com").await;
        let session = store.snapshot("p1").await;
        assert!(session.awaiting_email_for.is_none());
        assert_eq!(session.customer_email.as_deref(), Some("a@b.com"));
    }

    #[tokio::test]
    async fn test_eviction_returns_stale_sessions() {
        let store = SessionStore::new(20, 0);
        store.record_turn("p1", Speaker::Customer, "hi").await;
        let request_id = Uuid::new_v4();
        store.set_awaiting_email("p1", request_id).await;

        // TTL of zero makes every session instantly stale
        let evicted = store.evict_expired().await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].awaiting_email_for, Some(request_id));
        assert_eq!(store.active_count().await, 0);
    }
}
