//! Process-local vector store with exact cosine search.

use super::{VectorStore, VectorStoreError};
use crate::records::{CitationRecord, SearchResult, StoredDocument};
use async_trait::async_trait;
use std::cmp::Ordering;
use tokio::sync::RwLock;

/// Keeps every document in memory and scans all of them on each search.
pub struct InMemoryStore {
    dimension: usize,
    documents: RwLock<Vec<StoredDocument>>,
}

impl InMemoryStore {
    /// Create an empty store accepting vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            documents: RwLock::new(Vec::new()),
        }
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Whether the store holds no documents.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Copy of every stored document, in insertion order.
    pub async fn documents(&self) -> Vec<StoredDocument> {
        self.documents.read().await.clone()
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), VectorStoreError> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn insert(
        &self,
        record: &CitationRecord,
        embedding: Vec<f32>,
    ) -> Result<(), VectorStoreError> {
        self.check_dimension(&embedding)?;
        let document = StoredDocument::new(record.clone(), embedding);
        self.documents.write().await.push(document);
        Ok(())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, VectorStoreError> {
        self.check_dimension(&vector)?;
        let documents = self.documents.read().await;
        let mut scored: Vec<(f32, &StoredDocument)> = documents
            .iter()
            .map(|document| {
                (
                    cosine_similarity(&vector, &document.document_embedding),
                    document,
                )
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, document)| document.to_search_result(score))
            .collect())
    }

    async fn clear(&self) -> Result<(), VectorStoreError> {
        let mut documents = self.documents.write().await;
        let removed = documents.len();
        documents.clear();
        tracing::debug!(removed, "In-memory store cleared");
        Ok(())
    }

    async fn ping(&self) -> Result<(), VectorStoreError> {
        Ok(())
    }
}

/// Cosine similarity in `[-1, 1]`; zero when either vector has no magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(reference: &str, text: &str) -> CitationRecord {
        CitationRecord::new(reference, text).expect("valid record")
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_limits() {
        let store = InMemoryStore::new(2);
        store.insert(&record("1:1", "east"), vec![1.0, 0.0]).await.unwrap();
        store.insert(&record("1:2", "north"), vec![0.0, 1.0]).await.unwrap();
        store
            .insert(&record("1:3", "north-east"), vec![0.7, 0.7])
            .await
            .unwrap();

        let results = store.search(vec![1.0, 0.1], 2).await.expect("search");
        let references: Vec<_> = results.iter().map(|r| r.reference.as_str()).collect();
        assert_eq!(references, vec!["1:1", "1:3"]);
        assert!(results[0].search_score >= results[1].search_score);
    }

    #[tokio::test]
    async fn identical_vector_scores_at_maximum() {
        let store = InMemoryStore::new(3);
        store
            .insert(&record("2:22", "text"), vec![0.2, 0.4, 0.9])
            .await
            .unwrap();
        let results = store.search(vec![0.2, 0.4, 0.9], 5).await.expect("search");
        assert_eq!(results.len(), 1);
        assert!((results[0].search_score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let store = InMemoryStore::new(2);
        store.insert(&record("1:1", "a"), vec![1.0, 0.0]).await.unwrap();
        store.clear().await.expect("clear");
        assert!(store.is_empty().await);
        assert!(store.search(vec![1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_wrong_dimension() {
        let store = InMemoryStore::new(2);
        let error = store
            .insert(&record("1:1", "a"), vec![1.0, 0.0, 0.0])
            .await
            .expect_err("dimension");
        assert!(matches!(
            error,
            VectorStoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }
}
