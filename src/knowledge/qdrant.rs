//! Qdrant-backed knowledge store.
//!
//! One collection with cosine distance; entry fields travel in the point
//! payload, the embedding as the point vector. Usage-count bumps re-upsert
//! the whole point — lost updates under concurrent bumps are acceptable for
//! an eventually-consistent counter.

use super::{missing_embedding_error, token_overlap, KnowledgeStore};
use crate::errors::{AssistError, Result};
use crate::types::{KnowledgeEntry, ScoredEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qdrant_client::{
    client::QdrantClient,
    qdrant::{
        condition::ConditionOneOf, vectors::VectorsOptions, vectors_config::Config,
        with_payload_selector::SelectorOptions, with_vectors_selector,
        Condition, CreateCollection, Distance, Filter, HasIdCondition, PointId, PointStruct,
        ScrollPoints, SearchPoints, Value as QdrantValue, VectorParams, Vectors, VectorsConfig,
        WithPayloadSelector, WithVectorsSelector,
    },
};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Must match the embedding provider's output exactly; a mismatch makes
/// similarity search silently return nothing useful
pub const DEFAULT_EMBEDDING_DIM: u64 = 768;

/// Upper bound on entries considered by the keyword fallback scan
const KEYWORD_SCAN_LIMIT: u32 = 1000;

pub struct QdrantKnowledgeStore {
    client: QdrantClient,
    collection: String,
}

impl QdrantKnowledgeStore {
    /// Connect and create the collection if it does not exist
    pub async fn connect(url: &str, collection: &str, dim: u64) -> Result<Self> {
        let client = QdrantClient::from_url(url)
            .build()
            .map_err(|e| AssistError::VectorStore(e.to_string()))?;

        let store = Self {
            client,
            collection: collection.to_string(),
        };
        store.ensure_collection(dim).await?;

        Ok(store)
    }

    async fn ensure_collection(&self, dim: u64) -> Result<()> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| AssistError::VectorStore(e.to_string()))?;

        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.collection);

        if !exists {
            self.client
                .create_collection(&CreateCollection {
                    collection_name: self.collection.clone(),
                    vectors_config: Some(VectorsConfig {
                        config: Some(Config::Params(VectorParams {
                            size: dim,
                            distance: Distance::Cosine.into(),
                            ..Default::default()
                        })),
                    }),
                    ..Default::default()
                })
                .await
                .map_err(|e| AssistError::VectorStore(e.to_string()))?;
        }

        Ok(())
    }

    async fn upsert_entry(&self, entry: &KnowledgeEntry) -> Result<()> {
        let point = PointStruct::new(
            entry.id.to_string(),
            entry.embedding.clone(),
            entry_payload(entry),
        );

        self.client
            .upsert_points_blocking(&self.collection, None, vec![point], None)
            .await
            .map_err(|e| AssistError::VectorStore(e.to_string()))?;

        Ok(())
    }

    /// Fetch one entry by point id, vector included
    async fn fetch_entry(&self, id: Uuid) -> Result<Option<KnowledgeEntry>> {
        let filter = Filter {
            must: vec![Condition {
                condition_one_of: Some(ConditionOneOf::HasId(HasIdCondition {
                    has_id: vec![PointId::from(id.to_string())],
                })),
            }],
            ..Default::default()
        };

        let response = self
            .client
            .scroll(&ScrollPoints {
                collection_name: self.collection.clone(),
                filter: Some(filter),
                limit: Some(1),
                with_payload: Some(WithPayloadSelector {
                    selector_options: Some(SelectorOptions::Enable(true)),
                }),
                with_vectors: Some(WithVectorsSelector {
                    selector_options: Some(with_vectors_selector::SelectorOptions::Enable(true)),
                }),
                ..Default::default()
            })
            .await
            .map_err(|e| AssistError::VectorStore(e.to_string()))?;

        let Some(point) = response.result.into_iter().next() else {
            return Ok(None);
        };

        let embedding = extract_vector(point.vectors);
        Ok(Some(payload_to_entry(id, &point.payload, embedding)))
    }
}

#[async_trait]
impl KnowledgeStore for QdrantKnowledgeStore {
    async fn find_similar(
        &self,
        query: &[f32],
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<ScoredEntry>> {
        let response = self
            .client
            .search_points(&SearchPoints {
                collection_name: self.collection.clone(),
                vector: query.to_vec(),
                limit: top_k as u64,
                score_threshold: Some(threshold),
                with_payload: Some(WithPayloadSelector {
                    selector_options: Some(SelectorOptions::Enable(true)),
                }),
                with_vectors: Some(WithVectorsSelector {
                    selector_options: Some(with_vectors_selector::SelectorOptions::Enable(true)),
                }),
                ..Default::default()
            })
            .await
            .map_err(|e| AssistError::VectorStore(e.to_string()))?;

        let results = response
            .result
            .into_iter()
            .map(|point| {
                let id = point_id_to_uuid(&point.id);
                let embedding = extract_vector(point.vectors);
                ScoredEntry {
                    score: point.score,
                    entry: payload_to_entry(id, &point.payload, embedding),
                }
            })
            .collect();

        Ok(results)
    }

    async fn keyword_search(&self, text: &str, top_k: usize) -> Result<Vec<KnowledgeEntry>> {
        let response = self
            .client
            .scroll(&ScrollPoints {
                collection_name: self.collection.clone(),
                limit: Some(KEYWORD_SCAN_LIMIT),
                with_payload: Some(WithPayloadSelector {
                    selector_options: Some(SelectorOptions::Enable(true)),
                }),
                ..Default::default()
            })
            .await
            .map_err(|e| AssistError::VectorStore(e.to_string()))?;

        let mut candidates: Vec<(f32, KnowledgeEntry)> = response
            .result
            .into_iter()
            .map(|point| {
                let id = point_id_to_uuid(&point.id);
                payload_to_entry(id, &point.payload, Vec::new())
            })
            .map(|entry| (token_overlap(text, &entry.question), entry))
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

        self.upsert_entry(&entry).await?;
        debug!(id = %entry.id, "knowledge entry upserted to qdrant");
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

        let mut entry = self
            .fetch_entry(id)
            .await?
            .ok_or(AssistError::NotFound(id))?;

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

        self.upsert_entry(&entry).await?;
        Ok(entry)
    }

    async fn increment_usage(&self, id: Uuid) -> Result<()> {
        let mut entry = self
            .fetch_entry(id)
            .await?
            .ok_or(AssistError::NotFound(id))?;

        entry.times_used += 1;
        self.upsert_entry(&entry).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<KnowledgeEntry>> {
        self.fetch_entry(id).await
    }

    async fn count(&self) -> Result<usize> {
        let info = self
            .client
            .collection_info(&self.collection)
            .await
            .map_err(|e| AssistError::VectorStore(e.to_string()))?;

        Ok(info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or(0) as usize)
    }
}

fn entry_payload(entry: &KnowledgeEntry) -> HashMap<String, QdrantValue> {
    let mut payload = HashMap::new();
    payload.insert("question".to_string(), QdrantValue::from(entry.question.clone()));
    payload.insert("answer".to_string(), QdrantValue::from(entry.answer.clone()));
    payload.insert("times_used".to_string(), QdrantValue::from(entry.times_used as i64));
    payload.insert(
        "created_at".to_string(),
        QdrantValue::from(entry.created_at.to_rfc3339()),
    );
    payload.insert(
        "updated_at".to_string(),
        QdrantValue::from(entry.updated_at.to_rfc3339()),
    );
    if let Some(request_id) = entry.learned_from {
        payload.insert(
            "learned_from".to_string(),
            QdrantValue::from(request_id.to_string()),
        );
    }
    payload
}

fn payload_to_entry(
    id: Uuid,
    payload: &HashMap<String, QdrantValue>,
    embedding: Vec<f32>,
) -> KnowledgeEntry {
    KnowledgeEntry {
        id,
        question: payload_string(payload, "question"),
        answer: payload_string(payload, "answer"),
        embedding,
        times_used: payload_integer(payload, "times_used").max(0) as u64,
        learned_from: payload
            .get("learned_from")
            .and_then(value_as_string)
            .and_then(|s| Uuid::parse_str(&s).ok()),
        created_at: payload_timestamp(payload, "created_at"),
        updated_at: payload_timestamp(payload, "updated_at"),
    }
}

fn payload_string(payload: &HashMap<String, QdrantValue>, key: &str) -> String {
    payload.get(key).and_then(value_as_string).unwrap_or_default()
}

fn payload_integer(payload: &HashMap<String, QdrantValue>, key: &str) -> i64 {
    payload
        .get(key)
        .and_then(|v| v.kind.as_ref())
        .and_then(|kind| {
            use qdrant_client::qdrant::value::Kind;
            match kind {
                Kind::IntegerValue(i) => Some(*i),
                _ => None,
            }
        })
        .unwrap_or(0)
}

fn payload_timestamp(
    payload: &HashMap<String, QdrantValue>,
    key: &str,
) -> DateTime<Utc> {
    payload
        .get(key)
        .and_then(value_as_string)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn value_as_string(value: &QdrantValue) -> Option<String> {
    value.kind.as_ref().and_then(|kind| {
        use qdrant_client::qdrant::value::Kind;
        match kind {
            Kind::StringValue(s) => Some(s.clone()),
            _ => None,
        }
    })
}

fn extract_vector(vectors: Option<Vectors>) -> Vec<f32> {
    vectors
        .and_then(|v| v.vectors_options)
        .and_then(|options| match options {
            VectorsOptions::Vector(vector) => Some(vector.data),
            _ => None,
        })
        .unwrap_or_default()
}

fn point_id_to_uuid(point_id: &Option<PointId>) -> Uuid {
    point_id
        .as_ref()
        .and_then(|id| {
            use qdrant_client::qdrant::point_id::PointIdOptions;
            match &id.point_id_options {
                Some(PointIdOptions::Uuid(u)) => Uuid::parse_str(u).ok(),
                _ => None,
            }
        })
        .unwrap_or_else(Uuid::nil)
}
