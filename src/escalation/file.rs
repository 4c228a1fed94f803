//! JSON-file ledger for persistent single-node deployments.
//!
//! Each help request lives in `request_<id>.json` under the ledger
//! directory; the audit trail is a single append-rewritten `audit.json`.
//! Existing files are loaded once on open, so pending requests survive a
//! process restart.

use super::{apply_answer, apply_resolution, LedgerStore};
use crate::errors::{AssistError, Result};
use crate::types::{HelpRequest, HelpRequestStatus, StatusEvent, SupervisorResponse};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

const AUDIT_FILE: &str = "audit.json";

pub struct FileLedger {
    dir: PathBuf,
    requests: RwLock<HashMap<Uuid, HelpRequest>>,
    responses: RwLock<Vec<SupervisorResponse>>,
}

impl FileLedger {
    /// Open a ledger directory, creating it and loading any existing state
    pub fn open(dir: PathBuf) -> Result<Self> {
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }

        let mut requests = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with("request_") || !name.ends_with(".json") {
                continue;
            }
            match serde_json::from_str::<HelpRequest>(&fs::read_to_string(&path)?) {
                Ok(request) => {
                    requests.insert(request.id, request);
                }
                Err(e) => warn!(file = %path.display(), error = %e, "skipping unreadable ledger file"),
            }
        }

        let audit_path = dir.join(AUDIT_FILE);
        let responses = if audit_path.exists() {
            serde_json::from_str(&fs::read_to_string(&audit_path)?)?
        } else {
            Vec::new()
        };

        info!(dir = %dir.display(), loaded = requests.len(), "ledger opened");
        Ok(Self {
            dir,
            requests: RwLock::new(requests),
            responses: RwLock::new(responses),
        })
    }

    fn request_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("request_{id}.json"))
    }

    fn persist_request(&self, request: &HelpRequest) -> Result<()> {
        let json = serde_json::to_string_pretty(request)?;
        fs::write(self.request_path(request.id), json)?;
        Ok(())
    }

    fn persist_audit(&self, responses: &[SupervisorResponse]) -> Result<()> {
        let json = serde_json::to_string_pretty(responses)?;
        fs::write(self.dir.join(AUDIT_FILE), json)?;
        Ok(())
    }

    async fn mutate<F>(&self, id: Uuid, f: F) -> Result<HelpRequest>
    where
        F: FnOnce(&mut HelpRequest) -> Result<()>,
    {
        let mut requests = self.requests.write().await;
        let request = requests.get_mut(&id).ok_or(AssistError::NotFound(id))?;
        f(request)?;
        let snapshot = request.clone();
        self.persist_request(&snapshot)?;
        Ok(snapshot)
    }
}

#[async_trait]
impl LedgerStore for FileLedger {
    async fn create(
        &self,
        question: &str,
        participant_id: &str,
        room_name: &str,
    ) -> Result<HelpRequest> {
        let request = HelpRequest::new(question, participant_id, room_name);
        self.persist_request(&request)?;
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
        self.mutate(id, |request| {
            request.customer_email = Some(email.to_string());
            Ok(())
        })
        .await
    }

    async fn record_answer(&self, id: Uuid, answer: &str) -> Result<HelpRequest> {
        self.mutate(id, |request| apply_answer(request, answer)).await
    }

    async fn mark_resolved(&self, id: Uuid) -> Result<HelpRequest> {
        self.mutate(id, apply_resolution).await
    }

    async fn mark_email_sent(&self, id: Uuid) -> Result<HelpRequest> {
        self.mutate(id, |request| {
            request.email_sent = true;
            request.email_sent_at = Some(Utc::now());
            Ok(())
        })
        .await
    }

    async fn close_conversation(&self, id: Uuid) -> Result<HelpRequest> {
        self.mutate(id, |request| {
            request.status = request.status.transition(StatusEvent::ConversationClosed)?;
            Ok(())
        })
        .await
    }

    async fn sweep_timeouts(&self, window: Duration) -> Result<Vec<Uuid>> {
        let cutoff = Utc::now() - window;
        let mut requests = self.requests.write().await;
        let mut expired = Vec::new();

        for request in requests.values_mut() {
            if request.status == HelpRequestStatus::Pending && request.created_at < cutoff {
                request.status = request.status.transition(StatusEvent::SweepExpired)?;
                self.persist_request(request)?;
                expired.push(request.id);
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "pending requests expired by sweep");
        }
        Ok(expired)
    }

    async fn record_supervisor_response(&self, response: SupervisorResponse) -> Result<()> {
        let mut responses = self.responses.write().await;
        responses.push(response);
        self.persist_audit(&responses)
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_requests_survive_reopen() {
        let dir = TempDir::new().unwrap();

        let request = {
            let ledger = FileLedger::open(dir.path().to_path_buf()).unwrap();
            let request = ledger.create("gel removal price?", "p1", "salon").await.unwrap();
            ledger.record_answer(request.id, "$15").await.unwrap();
            request
        };

        let reopened = FileLedger::open(dir.path().to_path_buf()).unwrap();
        let loaded = reopened.get(request.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, HelpRequestStatus::Answered);
        assert_eq!(loaded.answer.as_deref(), Some("$15"));
    }

    #[tokio::test]
    async fn test_audit_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let request_id = Uuid::new_v4();

        {
            let ledger = FileLedger::open(dir.path().to_path_buf()).unwrap();
            ledger
                .record_supervisor_response(SupervisorResponse {
                    request_id,
                    answer: "we do".to_string(),
                    recorded_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let reopened = FileLedger::open(dir.path().to_path_buf()).unwrap();
        let trail = reopened.audit_trail(request_id).await.unwrap();
        assert_eq!(trail.len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("request_broken.json"), "not json").unwrap();

        let ledger = FileLedger::open(dir.path().to_path_buf()).unwrap();
        let pending = ledger
            .list_by_status(HelpRequestStatus::Pending)
            .await
            .unwrap();
        assert!(pending.is_empty());
    }
}
