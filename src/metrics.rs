use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and query activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_ingested: AtomicU64,
    pages_segmented: AtomicU64,
    records_indexed: AtomicU64,
    records_skipped: AtomicU64,
    queries_served: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished PDF ingestion.
    pub fn record_ingestion(&self, pages: u64, indexed: u64, skipped: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.pages_segmented.fetch_add(pages, Ordering::Relaxed);
        self.records_indexed.fetch_add(indexed, Ordering::Relaxed);
        self.records_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    /// Record one record written outside PDF ingestion.
    pub fn record_insert(&self) {
        self.records_indexed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one similarity search.
    pub fn record_query(&self) {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            pages_segmented: self.pages_segmented.load(Ordering::Relaxed),
            records_indexed: self.records_indexed.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            queries_served: self.queries_served.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of the pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// PDFs ingested since startup.
    pub documents_ingested: u64,
    /// Pages sent to the segmentation model.
    pub pages_segmented: u64,
    /// Records written to the vector store.
    pub records_indexed: u64,
    /// Records dropped during ingestion (placeholders, bad references, failed writes).
    pub records_skipped: u64,
    /// Similarity searches executed.
    pub queries_served: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_ingestions_and_inserts() {
        let metrics = PipelineMetrics::new();
        metrics.record_ingestion(2, 5, 1);
        metrics.record_ingestion(1, 3, 0);
        metrics.record_insert();
        metrics.record_query();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 2);
        assert_eq!(snapshot.pages_segmented, 3);
        assert_eq!(snapshot.records_indexed, 9);
        assert_eq!(snapshot.records_skipped, 1);
        assert_eq!(snapshot.queries_served, 1);
    }

    #[test]
    fn snapshot_starts_at_zero() {
        assert_eq!(PipelineMetrics::new().snapshot(), MetricsSnapshot::default());
    }
}
