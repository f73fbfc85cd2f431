//! Nearest-neighbour retrieval over the Qdrant support index.

use super::{CapabilityError, DocumentRetriever, RetrievedDocument};
use crate::embedding::EmbeddingClient;
use crate::pipeline::DocumentRecord;
use crate::qdrant::{QdrantService, ScoredPoint};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Payload keys written by the ingestion job that are not document metadata.
const INTERNAL_KEYS: [&str; 3] = ["content", "record_hash", "indexed_at"];

/// Retriever that embeds the question and queries Qdrant.
pub struct QdrantRetriever {
    embedding: Arc<dyn EmbeddingClient>,
    qdrant: QdrantService,
    collection: String,
}

impl QdrantRetriever {
    /// Retrieve from `collection` using `embedding` for query vectors.
    pub fn new(
        embedding: Arc<dyn EmbeddingClient>,
        qdrant: QdrantService,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedding,
            qdrant,
            collection: collection.into(),
        }
    }

    /// Verify the collection exists so a broken index fails at startup.
    pub async fn ensure_ready(&self) -> Result<(), CapabilityError> {
        self.qdrant.require_collection(&self.collection).await?;
        Ok(())
    }
}

/// Turn scored points into documents, keeping rank order and dropping repeated ids.
pub(crate) fn map_points(points: Vec<ScoredPoint>) -> Vec<RetrievedDocument> {
    let mut seen = HashSet::new();
    let mut documents = Vec::with_capacity(points.len());

    for point in points {
        if !seen.insert(point.id.clone()) {
            tracing::debug!(id = %point.id, "Dropping duplicate retrieval hit");
            continue;
        }
        let mut payload = point.payload.unwrap_or_default();
        let content = match payload.get("content") {
            Some(Value::String(text)) => text.trim().to_string(),
            _ => String::new(),
        };
        let metadata: DocumentRecord = match payload.remove("metadata") {
            Some(Value::Object(map)) => map,
            _ => {
                for key in INTERNAL_KEYS {
                    payload.remove(key);
                }
                payload
            }
        };
        documents.push(RetrievedDocument { content, metadata });
    }

    documents
}

#[async_trait]
impl DocumentRetriever for QdrantRetriever {
    async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedDocument>, CapabilityError> {
        let vector = self
            .embedding
            .generate_embeddings(vec![question.to_string()])
            .await?
            .pop()
            .ok_or_else(|| CapabilityError::InvalidResponse("no query embedding".into()))?;

        let points = self
            .qdrant
            .search_points(&self.collection, vector, top_k)
            .await?;
        let documents = map_points(points);
        tracing::debug!(
            collection = %self.collection,
            top_k,
            returned = documents.len(),
            "Documents retrieved"
        );
        Ok(documents)
    }
}
