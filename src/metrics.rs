use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing QA activity since startup.
#[derive(Default)]
pub struct QaMetrics {
    documents_processed: AtomicU64,
    partitions_written: AtomicU64,
    chunks_written: AtomicU64,
    questions_answered: AtomicU64,
    answers_failed: AtomicU64,
}

impl QaMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a processed document; `written_chunks` is `Some` when its partition was written.
    pub fn record_document(&self, written_chunks: Option<u64>) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        if let Some(chunks) = written_chunks {
            self.partitions_written.fetch_add(1, Ordering::Relaxed);
            self.chunks_written.fetch_add(chunks, Ordering::Relaxed);
        }
    }

    /// Record the outcome of one question.
    pub fn record_answer(&self, succeeded: bool) {
        if succeeded {
            self.questions_answered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.answers_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            partitions_written: self.partitions_written.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            answers_failed: self.answers_failed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of QA counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents that reached ingestion.
    pub documents_processed: u64,
    /// Partitions written for the first time.
    pub partitions_written: u64,
    /// Chunks embedded and stored.
    pub chunks_written: u64,
    /// Questions that produced a model answer.
    pub questions_answered: u64,
    /// Questions that ended with an error placeholder.
    pub answers_failed: u64,
}
