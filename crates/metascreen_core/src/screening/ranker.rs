//! Relevance ranking of unscreened records.
//!
//! # Responsibility
//! - Decide when enough labeled records exist to consult the classifier.
//! - Normalize classifier `(label, confidence)` pairs into a score in `[0, 1]`.
//! - Order unscreened records by score without touching the record set.
//!
//! # Invariants
//! - Below `min_labeled` decided records, the output is the unscreened records
//!   in original order with no score attached.
//! - Sorting is stable: equal scores keep original order.
//! - Classifier failure, panic, timeout or a short/long answer never escapes:
//!   it becomes `RankingUnavailable` and the original order is returned.
//! - At most one classifier pass runs per ranker. A pass abandoned by a
//!   timeout keeps the slot until the classifier returns; later calls fall
//!   back with `RankingUnavailable::Busy` instead of starting another worker.
//!
//! # Normalization contract
//! - Confidence is clamped to `[0, 1]`; a non-finite confidence scores `0.5`.
//! - A label in `positive_labels` scores `confidence`.
//! - A label in `negative_labels` scores `1 - confidence`.
//! - Any other label scores the neutral `0.5`.
//!
//! Label matching is case-insensitive on trimmed values.

use crate::config::RankingConfig;
use crate::model::record::Record;
use log::{debug, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const NEUTRAL_SCORE: f64 = 0.5;

/// One classifier answer for one submitted text.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
}

impl Classification {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Failure reported by a relevance classifier implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierError {
    pub message: String,
}

impl ClassifierError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for ClassifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "classifier error: {}", self.message)
    }
}

impl Error for ClassifierError {}

/// Relevance-scoring collaborator.
///
/// Implementations must return exactly one classification per input text, in
/// input order.
pub trait RelevanceClassifier: Send + Sync {
    fn classify(&self, texts: &[String]) -> Result<Vec<Classification>, ClassifierError>;
}

/// Why a ranking pass fell back to original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RankingUnavailable {
    TimedOut { timeout_ms: u64 },
    ClassifierFailed(String),
    ResultCountMismatch { expected: usize, actual: usize },
    /// The worker could not start or died without answering.
    WorkerFailed(String),
    /// An earlier pass is still waiting on the classifier.
    Busy,
}

impl Display for RankingUnavailable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut { timeout_ms } => {
                write!(f, "ranking timed out after {timeout_ms} ms")
            }
            Self::ClassifierFailed(message) => write!(f, "ranking failed: {message}"),
            Self::ResultCountMismatch { expected, actual } => write!(
                f,
                "classifier returned {actual} results for {expected} texts"
            ),
            Self::WorkerFailed(message) => write!(f, "ranking worker failed: {message}"),
            Self::Busy => write!(f, "a previous ranking pass is still running"),
        }
    }
}

impl Error for RankingUnavailable {}

impl RankingUnavailable {
    fn code(&self) -> &'static str {
        match self {
            Self::TimedOut { .. } => "timeout",
            Self::ClassifierFailed(_) => "classifier_failed",
            Self::ResultCountMismatch { .. } => "result_count_mismatch",
            Self::WorkerFailed(_) => "worker_failed",
            Self::Busy => "busy",
        }
    }
}

/// Ordered view over the unscreened part of a record set.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedQueue {
    /// Unscreened records in presentation order.
    pub records: Vec<Record>,
    /// Decided records in the input set.
    pub labeled_count: usize,
    /// `true` when `records` are ordered by score and carry `relevance_score`.
    pub ranked: bool,
    /// Set when ranking was attempted but fell back to original order.
    pub unavailable: Option<RankingUnavailable>,
}

impl RankedQueue {
    /// Next record to present, if any.
    pub fn first(&self) -> Option<&Record> {
        self.records.first()
    }
}

/// Maps one classification onto a relevance score in `[0, 1]`.
pub fn normalize_relevance(classification: &Classification, config: &RankingConfig) -> f64 {
    if !classification.confidence.is_finite() {
        return NEUTRAL_SCORE;
    }
    let confidence = classification.confidence.clamp(0.0, 1.0);
    let label = classification.label.trim().to_lowercase();
    let listed = |labels: &[String]| labels.iter().any(|l| l.trim().to_lowercase() == label);

    if listed(config.positive_labels.as_slice()) {
        confidence
    } else if listed(config.negative_labels.as_slice()) {
        1.0 - confidence
    } else {
        NEUTRAL_SCORE
    }
}

/// Orders unscreened records by classifier-predicted relevance.
pub struct Ranker {
    config: RankingConfig,
    classifier: Arc<dyn RelevanceClassifier>,
    in_flight: Arc<AtomicBool>,
}

/// Holds the ranker's worker slot; releasing happens on drop, including
/// when the classifier panics.
struct WorkerSlot(Arc<AtomicBool>);

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Ranker {
    pub fn new(config: RankingConfig, classifier: Arc<dyn RelevanceClassifier>) -> Self {
        Self {
            config,
            classifier,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// `true` while a classifier pass, finished or abandoned, still holds the worker.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn claim_worker(&self) -> Result<WorkerSlot, RankingUnavailable> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RankingUnavailable::Busy)?;
        Ok(WorkerSlot(Arc::clone(&self.in_flight)))
    }

    /// Builds the presentation queue for `records`.
    ///
    /// Never fails; see module invariants for fallback behavior.
    pub fn rank(&self, records: &[Record]) -> RankedQueue {
        let labeled_count = records.iter().filter(|record| record.is_decided()).count();
        let unscreened: Vec<Record> = records
            .iter()
            .filter(|record| !record.is_decided())
            .cloned()
            .collect();

        if labeled_count < self.config.min_labeled || unscreened.is_empty() {
            debug!(
                "event=rank module=ranker status=skipped labeled={labeled_count} min_labeled={} unscreened={}",
                self.config.min_labeled,
                unscreened.len()
            );
            return RankedQueue {
                records: unscreened,
                labeled_count,
                ranked: false,
                unavailable: None,
            };
        }

        let started_at = Instant::now();
        match self.score(&unscreened) {
            Ok(scores) => {
                let mut scored: Vec<(Record, f64)> = unscreened.into_iter().zip(scores).collect();
                // `sort_by` is stable, so ties keep original order.
                scored.sort_by(|left, right| right.1.total_cmp(&left.1));
                let records = scored
                    .into_iter()
                    .map(|(mut record, score)| {
                        record.relevance_score = Some(score);
                        record
                    })
                    .collect::<Vec<_>>();
                debug!(
                    "event=rank module=ranker status=ok labeled={labeled_count} ranked={} duration_ms={}",
                    records.len(),
                    started_at.elapsed().as_millis()
                );
                RankedQueue {
                    records,
                    labeled_count,
                    ranked: true,
                    unavailable: None,
                }
            }
            Err(reason) => {
                warn!(
                    "event=rank module=ranker status=fallback error_code={} duration_ms={} error={reason}",
                    reason.code(),
                    started_at.elapsed().as_millis()
                );
                RankedQueue {
                    records: unscreened,
                    labeled_count,
                    ranked: false,
                    unavailable: Some(reason),
                }
            }
        }
    }

    fn score(&self, unscreened: &[Record]) -> Result<Vec<f64>, RankingUnavailable> {
        let texts: Vec<String> = unscreened
            .iter()
            .map(Record::classification_text)
            .collect();
        let slot = self.claim_worker()?;
        let classifier = Arc::clone(&self.classifier);
        let batch_size = self.config.batch_size.max(1);
        let (sender, receiver) = mpsc::channel();

        // A failed spawn drops the closure and with it the slot.
        thread::Builder::new()
            .name("metascreen-ranker".to_string())
            .spawn(move || {
                let result = classify_in_batches(classifier.as_ref(), &texts, batch_size);
                // Free the slot before answering so a follow-up pass can claim it.
                drop(slot);
                // The receiver is gone after a timeout; the late answer is dropped.
                let _ = sender.send(result);
            })
            .map_err(|err| RankingUnavailable::WorkerFailed(err.to_string()))?;

        let classifications = match receiver.recv_timeout(self.config.timeout()) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(RankingUnavailable::TimedOut {
                    timeout_ms: self.config.timeout_ms,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(RankingUnavailable::WorkerFailed(
                    "worker exited without a result".to_string(),
                ))
            }
        };

        Ok(classifications
            .iter()
            .map(|classification| normalize_relevance(classification, &self.config))
            .collect())
    }
}

fn classify_in_batches(
    classifier: &dyn RelevanceClassifier,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Classification>, RankingUnavailable> {
    let mut classifications = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        let answer = classifier
            .classify(batch)
            .map_err(|err| RankingUnavailable::ClassifierFailed(err.message))?;
        if answer.len() != batch.len() {
            return Err(RankingUnavailable::ResultCountMismatch {
                expected: batch.len(),
                actual: answer.len(),
            });
        }
        classifications.extend(answer);
    }
    Ok(classifications)
}
