//! Request fingerprinting
//!
//! The response cache and the request-level single-flight are keyed by
//! a fingerprint of everything that affects the answer: the normalized
//! question, corpus hint, language hint and metadata filter. Prior
//! conversation turns are excluded on purpose: the answer to "what is a
//! heap?" does not depend on how the student phrased their last
//! question.

use sha2::{Digest, Sha256};

use studymate_core::CorpusHint;
use studymate_rag::SearchFilter;

/// Collapse whitespace and casing so trivially different phrasings of
/// the same question share a cache entry
fn normalize(question: &str) -> String {
    question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `chain` identifies the model lineup; a changed chain must not reuse
/// answers produced by the old one
pub fn fingerprint(
    question: &str,
    chain: &str,
    hint: Option<CorpusHint>,
    language_hint: Option<&str>,
    filter: Option<&SearchFilter>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(question).as_bytes());
    hasher.update([0xff]);
    hasher.update(chain);
    hasher.update([0xff]);
    hasher.update(match hint {
        None => "none",
        Some(CorpusHint::Course) => "course",
        Some(CorpusHint::Textbook) => "textbook",
    });
    hasher.update([0xff]);
    hasher.update(language_hint.unwrap_or(""));
    hasher.update([0xff]);
    hasher.update(filter.map(|f| f.fingerprint()).unwrap_or_default());

    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: &str = "qwen2:1.5b>phi3";

    #[test]
    fn test_whitespace_and_case_insensitive() {
        let a = fingerprint("What  is a heap?", CHAIN, None, None, None);
        let b = fingerprint("what is a heap?", CHAIN, None, None, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hint_changes_fingerprint() {
        let a = fingerprint("what is a heap?", CHAIN, None, None, None);
        let b = fingerprint("what is a heap?", CHAIN, Some(CorpusHint::Course), None, None);
        let c = fingerprint("what is a heap?", CHAIN, Some(CorpusHint::Textbook), None, None);
        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn test_chain_changes_fingerprint() {
        let a = fingerprint("what is a heap?", CHAIN, None, None, None);
        let b = fingerprint("what is a heap?", "llama2", None, None, None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_filter_changes_fingerprint() {
        let filter = SearchFilter::new().section("MODULE 1");
        let a = fingerprint("what is a heap?", CHAIN, None, None, None);
        let b = fingerprint("what is a heap?", CHAIN, None, None, Some(&filter));
        assert_ne!(a, b);
    }

    #[test]
    fn test_language_hint_changes_fingerprint() {
        let a = fingerprint("what is a heap?", CHAIN, None, Some("bn"), None);
        let b = fingerprint("what is a heap?", CHAIN, None, Some("en"), None);
        assert_ne!(a, b);
    }
}
