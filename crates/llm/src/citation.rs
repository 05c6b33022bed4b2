//! Citation validation
//!
//! The model is told to mark every claim with the `[chunk_id]` of the
//! context section it came from. The validator extracts those markers
//! and resolves them against the retrieval that built the prompt. Page
//! numbers come from chunk metadata, never from model text.

use once_cell::sync::Lazy;
use regex::Regex;

use studymate_core::{Citation, RetrievalResult};

static MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([A-Za-z0-9][A-Za-z0-9_:.\-]*)\]").unwrap_or_else(|_| Regex::new("$^").unwrap())
});

/// Why an answer failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// No markers in the answer at all
    NoCitations,
    /// Markers naming chunks that were not in the retrieval
    UnknownChunks(Vec<String>),
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidReason::NoCitations => write!(f, "no citation markers"),
            InvalidReason::UnknownChunks(ids) => {
                write!(f, "unknown chunk ids: {}", ids.join(", "))
            }
        }
    }
}

/// Validation verdict for one generated answer
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid { citations: Vec<Citation> },
    Invalid { reason: InvalidReason },
}

/// Resolves `[chunk_id]` markers against a retrieval
#[derive(Debug, Clone, Copy, Default)]
pub struct CitationValidator;

impl CitationValidator {
    pub fn new() -> Self {
        Self
    }

    /// Extract marker ids in order of first appearance, deduplicated
    fn markers(text: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for capture in MARKER.captures_iter(text) {
            if let Some(id) = capture.get(1) {
                let id = id.as_str().to_string();
                if !seen.contains(&id) {
                    seen.push(id);
                }
            }
        }
        seen
    }

    /// Full verdict: every marker must resolve, and there must be at
    /// least one
    pub fn validate(&self, text: &str, retrieval: &RetrievalResult) -> Validation {
        let markers = Self::markers(text);
        if markers.is_empty() {
            return Validation::Invalid {
                reason: InvalidReason::NoCitations,
            };
        }

        let mut citations = Vec::new();
        let mut unknown = Vec::new();
        for id in markers {
            match retrieval.get(&id) {
                Some(chunk) => citations.push(Citation {
                    chunk_id: chunk.id.clone(),
                    corpus: chunk.corpus,
                    page: chunk.metadata.page,
                }),
                None => unknown.push(id),
            }
        }

        if !unknown.is_empty() {
            return Validation::Invalid {
                reason: InvalidReason::UnknownChunks(unknown),
            };
        }

        Validation::Valid { citations }
    }

    /// Citations that do resolve, ignoring unknown markers. Used when an
    /// answer is returned unverified after the retry also failed.
    pub fn salvage(&self, text: &str, retrieval: &RetrievalResult) -> Vec<Citation> {
        Self::markers(text)
            .into_iter()
            .filter_map(|id| {
                retrieval.get(&id).map(|chunk| Citation {
                    chunk_id: chunk.id.clone(),
                    corpus: chunk.corpus,
                    page: chunk.metadata.page,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studymate_core::{Chunk, ChunkMetadata, Corpus, ScoredChunk};

    fn retrieval() -> RetrievalResult {
        let make = |id: &str, corpus, page| ScoredChunk {
            chunk: Chunk {
                id: id.to_string(),
                text: "text".to_string(),
                embedding: Vec::new(),
                corpus,
                metadata: ChunkMetadata {
                    section: None,
                    page,
                    language: None,
                },
            },
            score: 0.8,
        };
        RetrievalResult::new(vec![
            make("algo-212-3", Corpus::Textbook, Some(212)),
            make("mod3-1", Corpus::Course, None),
        ])
    }

    #[test]
    fn test_valid_answer_resolves_citations() {
        let validator = CitationValidator::new();
        let verdict = validator.validate(
            "A heap is a complete binary tree [algo-212-3], covered in week 5 [mod3-1].",
            &retrieval(),
        );

        match verdict {
            Validation::Valid { citations } => {
                assert_eq!(citations.len(), 2);
                assert_eq!(citations[0].chunk_id, "algo-212-3");
                assert_eq!(citations[0].page, Some(212));
                assert_eq!(citations[1].corpus, Corpus::Course);
            }
            other => panic!("expected Valid, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_citations_rejected() {
        let validator = CitationValidator::new();
        let verdict = validator.validate("A heap is a complete binary tree.", &retrieval());
        assert_eq!(
            verdict,
            Validation::Invalid {
                reason: InvalidReason::NoCitations
            }
        );
    }

    #[test]
    fn test_unknown_marker_rejected() {
        let validator = CitationValidator::new();
        let verdict = validator.validate(
            "Heaps [algo-212-3] support decrease-key [made-up-id].",
            &retrieval(),
        );
        assert_eq!(
            verdict,
            Validation::Invalid {
                reason: InvalidReason::UnknownChunks(vec!["made-up-id".to_string()])
            }
        );
    }

    #[test]
    fn test_repeated_marker_counted_once() {
        let validator = CitationValidator::new();
        let verdict = validator.validate(
            "Insert is O(log n) [algo-212-3]. Extract-min too [algo-212-3].",
            &retrieval(),
        );
        match verdict {
            Validation::Valid { citations } => assert_eq!(citations.len(), 1),
            other => panic!("expected Valid, got {:?}", other),
        }
    }

    #[test]
    fn test_salvage_keeps_resolvable_markers() {
        let validator = CitationValidator::new();
        let citations = validator.salvage(
            "Heaps [algo-212-3] support decrease-key [made-up-id].",
            &retrieval(),
        );
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].chunk_id, "algo-212-3");
    }

    #[test]
    fn test_bracketed_math_is_not_a_marker() {
        // Markers start with an alphanumeric; "[i+1]" style indexing
        // inside code snippets still matches the pattern only when it
        // looks like an id, so unknown ones surface as invalid
        let validator = CitationValidator::new();
        let verdict = validator.validate("a[0] is the root [algo-212-3]", &retrieval());
        assert!(matches!(
            verdict,
            Validation::Invalid {
                reason: InvalidReason::UnknownChunks(_)
            }
        ));
    }
}
