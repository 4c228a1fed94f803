//! In-memory knowledge store.
//!
//! Used for tests and single-process deployments. The store dimension is
//! pinned by the first inserted entry; entries whose embedding length
//! deviates (malformed or from a different provider) are skipped by vector
//! search and only reachable through the keyword fallback.

use super::{cosine_similarity, missing_embedding_error, token_overlap, KnowledgeStore};
use crate::errors::{AssistError, Result};
use crate::types::{KnowledgeEntry, ScoredEntry};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryKnowledgeStore {
    entries: RwLock<HashMap<Uuid, KnowledgeEntry>>,
}

impl MemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn find_similar(
        &self,
        query: &[f32],
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<ScoredEntry>> {
        let entries = self.entries.read().await;

        let mut scored: Vec<ScoredEntry> = entries
            .values()
            .filter(|e| e.embedding.len() == query.len() && !e.embedding.is_empty())
            .map(|e| ScoredEntry {
                score: cosine_similarity(query, &e.embedding),
                entry: e.clone(),
            })
            .filter(|s| s.score >= threshold)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored)
    }

    async fn keyword_search(&self, text: &str, top_k: usize) -> Result<Vec<KnowledgeEntry>> {
        let entries = self.entries.read().await;

        let mut candidates: Vec<(f32, KnowledgeEntry)> = entries
            .values()
            .map(|e| (token_overlap(text, &e.question), e.clone()))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(top_k);

        Ok(candidates.into_iter().map(|(_, e)| e).collect())
    }

    async fn insert(
        &self,
        question: &str,
        answer: &str,
        embedding: Vec<f32>,
        learned_from: Option<Uuid>,
    ) -> Result<KnowledgeEntry> {
        let now = Utc::now();
        let entry = KnowledgeEntry {
            id: Uuid::new_v4(),
            question: question.to_string(),
            answer: answer.to_string(),
            embedding,
            times_used: 0,
            learned_from,
            created_at: now,
            updated_at: now,
        };

        debug!(id = %entry.id, learned = learned_from.is_some(), "knowledge entry inserted");
        self.entries.write().await.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn update(
        &self,
        id: Uuid,
        question: Option<&str>,
        answer: Option<&str>,
        embedding: Option<Vec<f32>>,
    ) -> Result<KnowledgeEntry> {
        if question.is_some() && embedding.is_none() {
            return Err(missing_embedding_error());
        }

        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&id).ok_or(AssistError::NotFound(id))?;

        if let Some(q) = question {
            entry.question = q.to_string();
        }
        if let Some(a) = answer {
            entry.answer = a.to_string();
        }
        if let Some(vector) = embedding {
            entry.embedding = vector;
        }
        entry.updated_at = Utc::now();

        Ok(entry.clone())
    }

    async fn increment_usage(&self, id: Uuid) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&id).ok_or(AssistError::NotFound(id))?;
        entry.times_used += 1;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<KnowledgeEntry>> {
        Ok(self.entries.read().await.get(&id).cloned())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}
