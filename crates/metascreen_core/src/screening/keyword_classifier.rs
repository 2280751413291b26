//! Offline relevance classifier driven by the configured keyword list.
//!
//! Each text is labeled [`KEYWORD_LABEL`] with a confidence equal to the share
//! of configured keywords it mentions. Useful when no ML scoring service is
//! deployed; the label must be one of the configured positive labels for the
//! scores to take effect.

use crate::screening::highlight::KeywordHighlighter;
use crate::screening::ranker::{Classification, ClassifierError, RelevanceClassifier};

/// Label emitted for every classification.
pub const KEYWORD_LABEL: &str = "relevant";

pub struct KeywordClassifier {
    highlighter: KeywordHighlighter,
}

impl KeywordClassifier {
    pub fn new(keywords: &[String]) -> Result<Self, regex::Error> {
        Ok(Self {
            highlighter: KeywordHighlighter::new(keywords)?,
        })
    }
}

impl RelevanceClassifier for KeywordClassifier {
    fn classify(&self, texts: &[String]) -> Result<Vec<Classification>, ClassifierError> {
        let total = self.highlighter.keyword_count();
        Ok(texts
            .iter()
            .map(|text| {
                let confidence = if total == 0 {
                    0.0
                } else {
                    self.highlighter.distinct_matches(text).len() as f64 / total as f64
                };
                Classification::new(KEYWORD_LABEL, confidence)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{KeywordClassifier, KEYWORD_LABEL};
    use crate::screening::ranker::RelevanceClassifier;

    #[test]
    fn confidence_is_share_of_keywords_present() {
        let classifier = KeywordClassifier::new(&[
            "randomized".to_string(),
            "placebo".to_string(),
        ])
        .expect("keywords compile");
        let answers = classifier
            .classify(&[
                "Randomized placebo trial".to_string(),
                "randomized cohort".to_string(),
                "case report".to_string(),
            ])
            .expect("classification succeeds");
        let confidences: Vec<f64> = answers.iter().map(|a| a.confidence).collect();
        assert_eq!(confidences, vec![1.0, 0.5, 0.0]);
        assert!(answers.iter().all(|a| a.label == KEYWORD_LABEL));
    }
}
