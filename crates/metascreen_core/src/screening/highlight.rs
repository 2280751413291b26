//! Keyword highlighting for reviewer-facing text.
//!
//! # Invariants
//! - Matching is case-insensitive and whole-word. A word boundary is only
//!   required on a side where the keyword starts or ends with a word
//!   character, so `c++` and `(rct` still match.
//! - Longer keywords win over keywords they contain ("cohort study" over "cohort").
//! - Spans are non-overlapping, in text order, on UTF-8 char boundaries.

use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;

/// One highlighted byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightSpan {
    pub start: usize,
    pub end: usize,
    /// Matched text, lowercased.
    pub keyword: String,
}

/// Compiled keyword matcher.
#[derive(Debug, Clone)]
pub struct KeywordHighlighter {
    pattern: Option<Regex>,
    keyword_count: usize,
}

impl KeywordHighlighter {
    /// Compiles a matcher for `keywords`. Blank entries are ignored.
    pub fn new(keywords: &[String]) -> Result<Self, regex::Error> {
        let unique: BTreeSet<String> = keywords
            .iter()
            .map(|keyword| keyword.trim().to_lowercase())
            .filter(|keyword| !keyword.is_empty())
            .collect();
        let keyword_count = unique.len();
        if unique.is_empty() {
            return Ok(Self {
                pattern: None,
                keyword_count,
            });
        }

        let mut ordered: Vec<String> = unique.into_iter().collect();
        ordered.sort_by(|left, right| right.len().cmp(&left.len()).then(left.cmp(right)));
        let alternation = ordered
            .iter()
            .map(|keyword| bounded(keyword))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = RegexBuilder::new(&format!("(?:{alternation})"))
            .case_insensitive(true)
            .build()?;

        Ok(Self {
            pattern: Some(pattern),
            keyword_count,
        })
    }

    /// Number of distinct configured keywords.
    pub fn keyword_count(&self) -> usize {
        self.keyword_count
    }

    /// Returns highlighted spans in text order.
    pub fn spans(&self, text: &str) -> Vec<HighlightSpan> {
        let Some(pattern) = self.pattern.as_ref() else {
            return Vec::new();
        };
        pattern
            .find_iter(text)
            .map(|found| HighlightSpan {
                start: found.start(),
                end: found.end(),
                keyword: found.as_str().to_lowercase(),
            })
            .collect()
    }

    /// Distinct keywords present in `text`.
    pub fn distinct_matches(&self, text: &str) -> BTreeSet<String> {
        self.spans(text).into_iter().map(|span| span.keyword).collect()
    }

    /// Wraps every match in `open`/`close` markers.
    pub fn mark(&self, text: &str, open: &str, close: &str) -> String {
        let mut marked = String::with_capacity(text.len());
        let mut cursor = 0;
        for span in self.spans(text) {
            marked.push_str(&text[cursor..span.start]);
            marked.push_str(open);
            marked.push_str(&text[span.start..span.end]);
            marked.push_str(close);
            cursor = span.end;
        }
        marked.push_str(&text[cursor..]);
        marked
    }
}

/// Escaped keyword with `\b` on each side that begins or ends with a word char.
fn bounded(keyword: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let leading = keyword.chars().next().is_some_and(is_word);
    let trailing = keyword.chars().last().is_some_and(is_word);
    format!(
        "{}{}{}",
        if leading { r"\b" } else { "" },
        regex::escape(keyword),
        if trailing { r"\b" } else { "" }
    )
}
