//! In-memory ledger for tests and single-process runs.

use super::{apply_answer, apply_resolution, LedgerStore};
use crate::errors::{AssistError, Result};
use crate::types::{HelpRequest, HelpRequestStatus, StatusEvent, SupervisorResponse};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryLedger {
    requests: RwLock<HashMap<Uuid, HelpRequest>>,
    responses: RwLock<Vec<SupervisorResponse>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn create(
        &self,
        question: &str,
        participant_id: &str,
        room_name: &str,
    ) -> Result<HelpRequest> {
        let request = HelpRequest::new(question, participant_id, room_name);
        info!(id = %request.id, "help request opened");
        self.requests
            .write()
            .await
            .insert(request.id, request.clone());
        Ok(request)
    }

    async fn get(&self, id: Uuid) -> Result<Option<HelpRequest>> {
        Ok(self.requests.read().await.get(&id).cloned())
    }

    async fn list_by_status(&self, status: HelpRequestStatus) -> Result<Vec<HelpRequest>> {
        let requests = self.requests.read().await;
        let mut matching: Vec<HelpRequest> = requests
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }

    async fn set_customer_email(&self, id: Uuid, email: &str) -> Result<HelpRequest> {
        let mut requests = self.requests.write().await;
        let request = requests.get_mut(&id).ok_or(AssistError::NotFound(id))?;
        request.customer_email = Some(email.to_string());
        Ok(request.clone())
    }

    async fn record_answer(&self, id: Uuid, answer: &str) -> Result<HelpRequest> {
        let mut requests = self.requests.write().await;
        let request = requests.get_mut(&id).ok_or(AssistError::NotFound(id))?;
        apply_answer(request, answer)?;
        Ok(request.clone())
    }

    async fn mark_resolved(&self, id: Uuid) -> Result<HelpRequest> {
        let mut requests = self.requests.write().await;
        let request = requests.get_mut(&id).ok_or(AssistError::NotFound(id))?;
        apply_resolution(request)?;
        Ok(request.clone())
    }

    async fn mark_email_sent(&self, id: Uuid) -> Result<HelpRequest> {
        let mut requests = self.requests.write().await;
        let request = requests.get_mut(&id).ok_or(AssistError::NotFound(id))?;
        request.email_sent = true;
        request.email_sent_at = Some(Utc::now());
        Ok(request.clone())
    }

    async fn close_conversation(&self, id: Uuid) -> Result<HelpRequest> {
        let mut requests = self.requests.write().await;
        let request = requests.get_mut(&id).ok_or(AssistError::NotFound(id))?;
        request.status = request.status.transition(StatusEvent::ConversationClosed)?;
        Ok(request.clone())
    }

    async fn sweep_timeouts(&self, window: Duration) -> Result<Vec<Uuid>> {
        let cutoff = Utc::now() - window;
        let mut requests = self.requests.write().await;
        let mut expired = Vec::new();

        for request in requests.values_mut() {
            if request.status == HelpRequestStatus::Pending && request.created_at < cutoff {
                request.status = request.status.transition(StatusEvent::SweepExpired)?;
                expired.push(request.id);
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "pending requests expired by sweep");
        }
        Ok(expired)
    }

    async fn record_supervisor_response(&self, response: SupervisorResponse) -> Result<()> {
        self.responses.write().await.push(response);
        Ok(())
    }

    async fn audit_trail(&self, request_id: Uuid) -> Result<Vec<SupervisorResponse>> {
        Ok(self
            .responses
            .read()
            .await
            .iter()
            .filter(|r| r.request_id == request_id)
            .cloned()
            .collect())
    }
}
