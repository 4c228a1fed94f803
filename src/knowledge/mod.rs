//! Knowledge base: question/answer pairs with vector embeddings.
//!
//! `find_similar` is the authoritative lookup path. When it fails (index
//! missing, store unreachable) callers degrade to `keyword_search`, a naive
//! token-overlap filter whose results carry no similarity guarantee and are
//! treated as lower-confidence context.

mod memory;
mod qdrant;

pub use memory::MemoryKnowledgeStore;
pub use qdrant::{QdrantKnowledgeStore, DEFAULT_EMBEDDING_DIM};

use crate::embedding::EmbeddingProvider;
use crate::errors::{AssistError, Result};
use crate::types::{KnowledgeEntry, ScoredEntry};
use async_trait::async_trait;
use std::collections::HashSet;
use uuid::Uuid;

/// Storage seam for the knowledge base
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Nearest neighbors at or above `threshold`, descending by similarity
    async fn find_similar(
        &self,
        query: &[f32],
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<ScoredEntry>>;

    /// Case-insensitive token-overlap fallback; no similarity scores
    async fn keyword_search(&self, text: &str, top_k: usize) -> Result<Vec<KnowledgeEntry>>;

    /// Insert a new entry. Duplicate questions are allowed — re-teaching an
    /// answer creates a second row rather than overwriting usage counts.
    async fn insert(
        &self,
        question: &str,
        answer: &str,
        embedding: Vec<f32>,
        learned_from: Option<Uuid>,
    ) -> Result<KnowledgeEntry>;

    /// Update text fields. A question change must arrive with a regenerated
    /// embedding; stores reject the update otherwise.
    async fn update(
        &self,
        id: Uuid,
        question: Option<&str>,
        answer: Option<&str>,
        embedding: Option<Vec<f32>>,
    ) -> Result<KnowledgeEntry>;

    /// Bump the usage counter. Lost updates under concurrency are acceptable;
    /// callers treat this as fire-and-forget.
    async fn increment_usage(&self, id: Uuid) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<KnowledgeEntry>>;

    async fn count(&self) -> Result<usize>;
}

/// Update an entry, regenerating the embedding when the question changed
pub async fn update_entry(
    store: &dyn KnowledgeStore,
    embedder: &dyn EmbeddingProvider,
    id: Uuid,
    question: Option<&str>,
    answer: Option<&str>,
) -> Result<KnowledgeEntry> {
    let embedding = match question {
        Some(new_question) => Some(embedder.embed(new_question).await?),
        None => None,
    };

    store.update(id, question, answer, embedding).await
}

/// Cosine similarity between two vectors of equal length
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Token-overlap score between a query and a stored question, 0.0..=1.0
pub(crate) fn token_overlap(query: &str, question: &str) -> f32 {
    let query_lower = query.to_lowercase();
    let question_lower = question.to_lowercase();

    // Substring containment either way counts as a strong match
    if question_lower.contains(query_lower.trim()) || query_lower.contains(question_lower.trim()) {
        return 1.0;
    }

    let query_tokens: HashSet<&str> = query_lower.split_whitespace().collect();
    let question_tokens: HashSet<&str> = question_lower.split_whitespace().collect();
    if question_tokens.is_empty() {
        return 0.0;
    }

    let overlap = query_tokens.intersection(&question_tokens).count();
    overlap as f32 / question_tokens.len() as f32
}

pub(crate) fn missing_embedding_error() -> AssistError {
    AssistError::VectorStore(
        "question update requires a regenerated embedding".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![0.5, 0.5, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_dimension_mismatch_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_token_overlap_containment() {
        assert_eq!(token_overlap("your hours", "What are your hours today"), 1.0);
    }

    #[test]
    fn test_token_overlap_partial() {
        let score = token_overlap("how much is a haircut", "haircut price list");
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn test_token_overlap_disjoint() {
        assert_eq!(token_overlap("weather tomorrow", "haircut price"), 0.0);
    }

    struct StubEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    #[tokio::test]
    async fn test_update_entry_regenerates_embedding_on_question_change() {
        let store = MemoryKnowledgeStore::new();
        let embedder = StubEmbedder(vec![0.0, 1.0]);
        let entry = store
            .insert("hours?", "9-7", vec![1.0, 0.0], None)
            .await
            .unwrap();

        let updated = update_entry(&store, &embedder, entry.id, Some("opening hours?"), None)
            .await
            .unwrap();

        assert_eq!(updated.question, "opening hours?");
        assert_eq!(updated.embedding, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_update_entry_answer_only_keeps_embedding() {
        let store = MemoryKnowledgeStore::new();
        let embedder = StubEmbedder(vec![0.0, 1.0]);
        let entry = store
            .insert("hours?", "9-7", vec![1.0, 0.0], None)
            .await
            .unwrap();

        let updated = update_entry(&store, &embedder, entry.id, None, Some("10-6"))
            .await
            .unwrap();

        // No question change, so the stored vector is untouched
        assert_eq!(updated.answer, "10-6");
        assert_eq!(updated.embedding, vec![1.0, 0.0]);
    }
}
