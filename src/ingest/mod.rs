//! Offline build of the support index from a question/answer export.
//!
//! Input is either the CSV export of the support dataset or JSON Lines, one row per record with
//! `instruction`/`response` (or `question`/`answer`) fields. Rows missing either side are dropped. Every record gets a point id derived from the
//! SHA-256 of its text, so repeated runs overwrite the same points instead of adding copies.

use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::qdrant::{PointUpsert, QdrantError, QdrantService};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::{BufRead, Read};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Errors raised while building the index.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The export could not be read.
    #[error("Failed to read dataset: {0}")]
    Io(#[from] std::io::Error),
    /// A row is not valid JSON.
    #[error("Malformed row on line {line}: {source}")]
    Parse {
        /// One-based line number.
        line: usize,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// A CSV row could not be decoded.
    #[error("Malformed CSV row on line {line}: {source}")]
    Csv {
        /// One-based line number.
        line: u64,
        /// Underlying CSV error.
        #[source]
        source: csv::Error,
    },
    /// Embedding generation failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Qdrant rejected a request.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// The indexing timestamp could not be formatted.
    #[error("Failed to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// One question/answer pair of the support dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportRecord {
    /// Customer question; this is the text that gets embedded.
    pub question: String,
    /// Reference answer.
    pub answer: String,
}

impl SupportRecord {
    /// Hex SHA-256 over question and answer.
    pub fn record_hash(&self) -> String {
        hex::encode(self.digest())
    }

    /// Deterministic point id built from the first 16 bytes of the record digest.
    pub fn point_id(&self) -> Uuid {
        let digest = self.digest();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes)
    }

    fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.question.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.answer.as_bytes());
        hasher.finalize().into()
    }
}

#[derive(Deserialize)]
struct RawRow {
    #[serde(default, alias = "question")]
    instruction: Option<String>,
    #[serde(default, alias = "answer")]
    response: Option<String>,
}

/// Counters describing one dataset load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Non-blank lines read.
    pub rows: usize,
    /// Rows without both a question and an answer.
    pub dropped_incomplete: usize,
    /// Rows identical to an earlier row.
    pub duplicates: usize,
}

/// On-disk layout of a dataset export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    /// Comma-separated values with a header row.
    Csv,
    /// One JSON object per line.
    JsonLines,
}

impl DatasetFormat {
    /// `.csv` files are CSV; everything else is read as JSON Lines.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|extension| extension.to_str()) {
            Some(extension) if extension.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::JsonLines,
        }
    }
}

#[derive(Default)]
struct Collector {
    report: LoadReport,
    seen: HashSet<Uuid>,
    records: Vec<SupportRecord>,
}

impl Collector {
    fn push(&mut self, row: RawRow) {
        self.report.rows += 1;
        let question = row.instruction.map(|value| value.trim().to_string());
        let answer = row.response.map(|value| value.trim().to_string());
        let (Some(question), Some(answer)) = (question, answer) else {
            self.report.dropped_incomplete += 1;
            return;
        };
        if question.is_empty() || answer.is_empty() {
            self.report.dropped_incomplete += 1;
            return;
        }

        let record = SupportRecord { question, answer };
        if !self.seen.insert(record.point_id()) {
            self.report.duplicates += 1;
            return;
        }
        self.records.push(record);
    }

    fn finish(self) -> (Vec<SupportRecord>, LoadReport) {
        (self.records, self.report)
    }
}

/// Parse an export in `format` into unique, complete records.
pub fn load_dataset<R: BufRead>(
    reader: R,
    format: DatasetFormat,
) -> Result<(Vec<SupportRecord>, LoadReport), IngestError> {
    match format {
        DatasetFormat::Csv => load_csv_records(reader),
        DatasetFormat::JsonLines => load_records(reader),
    }
}

/// Parse a JSON Lines export into unique, complete records.
pub fn load_records<R: BufRead>(
    reader: R,
) -> Result<(Vec<SupportRecord>, LoadReport), IngestError> {
    let mut collector = Collector::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: RawRow = serde_json::from_str(&line).map_err(|source| IngestError::Parse {
            line: index + 1,
            source,
        })?;
        collector.push(row);
    }

    Ok(collector.finish())
}

/// Parse a CSV export with a header row into unique, complete records.
///
/// Columns other than the question and answer (intent, category, flags) are ignored.
pub fn load_csv_records<R: Read>(
    reader: R,
) -> Result<(Vec<SupportRecord>, LoadReport), IngestError> {
    let mut collector = Collector::default();
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    for row in csv_reader.deserialize::<RawRow>() {
        let row = row.map_err(|source| IngestError::Csv {
            line: source.position().map(|position| position.line()).unwrap_or(0),
            source,
        })?;
        collector.push(row);
    }

    Ok(collector.finish())
}

/// Build the Qdrant payload stored with a record.
pub fn record_payload(record: &SupportRecord, indexed_at: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("content".into(), Value::String(record.question.clone()));
    payload.insert(
        "metadata".into(),
        json!({ "question": record.question, "answer": record.answer }),
    );
    payload.insert("record_hash".into(), Value::String(record.record_hash()));
    payload.insert("indexed_at".into(), Value::String(indexed_at.to_string()));
    payload
}

/// Embeds records and writes them to a collection.
pub struct Indexer {
    embedding: Arc<dyn EmbeddingClient>,
    qdrant: QdrantService,
    collection: String,
    dimension: usize,
    batch_size: usize,
}

impl Indexer {
    /// Write to `collection`, whose vectors have `dimension` components, in batches of
    /// `batch_size` records.
    pub fn new(
        embedding: Arc<dyn EmbeddingClient>,
        qdrant: QdrantService,
        collection: impl Into<String>,
        dimension: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            embedding,
            qdrant,
            collection: collection.into(),
            dimension,
            batch_size: batch_size.max(1),
        }
    }

    /// Ensure the collection exists and upsert every record, returning the number written.
    pub async fn index(&self, records: &[SupportRecord]) -> Result<usize, IngestError> {
        self.qdrant
            .create_collection_if_not_exists(&self.collection, self.dimension as u64)
            .await?;
        let indexed_at = OffsetDateTime::now_utc().format(&Rfc3339)?;

        let mut written = 0;
        for (batch_index, batch) in records.chunks(self.batch_size).enumerate() {
            let vectors = self
                .embedding
                .generate_embeddings(batch.iter().map(|record| record.question.clone()).collect())
                .await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingClientError::InvalidResponse(format!(
                    "expected {} embeddings, received {}",
                    batch.len(),
                    vectors.len()
                ))
                .into());
            }

            let points = batch
                .iter()
                .zip(vectors)
                .map(|(record, vector)| PointUpsert {
                    id: record.point_id().to_string(),
                    vector,
                    payload: record_payload(record, &indexed_at),
                })
                .collect();
            written += self.qdrant.upsert_points(&self.collection, points).await?;
            tracing::info!(
                batch = batch_index + 1,
                written,
                total = records.len(),
                "Batch indexed"
            );
        }

        Ok(written)
    }
}
