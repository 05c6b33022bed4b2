//! Answer envelope returned to callers

use serde::{Deserialize, Serialize};

use crate::chunk::Corpus;

/// A verified reference tying a generated claim to a source chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Id of the cited chunk; always one of the chunks supplied to the model
    pub chunk_id: String,
    /// Corpus the chunk came from
    pub corpus: Corpus,
    /// Page number, when the chunk carries one
    pub page: Option<u32>,
}

/// Result envelope for a single question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// Generated (or canned "no relevant information") text
    pub text: String,
    /// Citations resolved against the retrieval used for this answer
    pub citations: Vec<Citation>,
    /// True when citation validation failed twice and the answer is
    /// returned unverified
    pub uncited: bool,
    /// True when neither corpus returned results and no model was invoked
    pub retrieval_empty: bool,
    /// Name of the model that served the response, when one was invoked
    pub model: Option<String>,
}

impl Answer {
    /// The "no relevant information found" response
    pub fn no_information(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            citations: Vec::new(),
            uncited: false,
            retrieval_empty: true,
            model: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_information_answer() {
        let answer = Answer::no_information("nothing found");
        assert!(answer.retrieval_empty);
        assert!(answer.citations.is_empty());
        assert!(!answer.uncited);
        assert!(answer.model.is_none());
    }

    #[test]
    fn test_citation_serialization() {
        let citation = Citation {
            chunk_id: "algo-212-3".to_string(),
            corpus: Corpus::Textbook,
            page: Some(212),
        };
        let json = serde_json::to_string(&citation).unwrap();
        assert!(json.contains("textbook"));
        assert!(json.contains("212"));
    }
}
