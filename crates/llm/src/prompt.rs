//! Prompt construction
//!
//! Builds the message list for one tutoring answer: a system prompt
//! with the citation mandate, retrieved context rendered with stable
//! `[chunk_id]` markers, prior turns, and the question. The context
//! block is budgeted in estimated tokens; when the full prompt is over
//! budget the oldest conversation turns are dropped first and system
//! messages are always kept.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use studymate_core::{Corpus, RetrievalResult, Turn, TurnRole};

use crate::backend::estimate_tokens;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Instruction template selected from the question phrasing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTemplate {
    /// "what is", "define"
    Definition,
    /// "how does", "steps"
    Process,
    /// "complexity", "big o", "running time"
    Complexity,
    /// "why", "purpose", "when to use"
    Purpose,
    General,
}

impl QueryTemplate {
    pub fn detect(question: &str) -> Self {
        let lowered = question.to_lowercase();
        if lowered.contains("complexity")
            || lowered.contains("big o")
            || lowered.contains("running time")
        {
            QueryTemplate::Complexity
        } else if lowered.starts_with("what is")
            || lowered.starts_with("what are")
            || lowered.contains("define")
            || lowered.contains("definition")
        {
            QueryTemplate::Definition
        } else if lowered.starts_with("how")
            || lowered.contains("steps")
            || lowered.contains("procedure")
        {
            QueryTemplate::Process
        } else if lowered.starts_with("why")
            || lowered.contains("purpose")
            || lowered.contains("when to use")
            || lowered.contains("when should")
        {
            QueryTemplate::Purpose
        } else {
            QueryTemplate::General
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            QueryTemplate::Definition => {
                "Start with a one-sentence definition, then elaborate briefly."
            }
            QueryTemplate::Process => {
                "Walk through the steps in order. Keep each step to one sentence."
            }
            QueryTemplate::Complexity => {
                "State the time and space complexity first, then justify them briefly."
            }
            QueryTemplate::Purpose => {
                "Explain what problem it solves and when a student would reach for it."
            }
            QueryTemplate::General => "Answer concisely in a few sentences.",
        }
    }
}

static GRADED_REQUEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(solve|answer|do|complete|write)\b.{0,30}\b(my|the|this)\b.{0,30}\b(assignment|homework|exam|quiz|graded)\b")
        .unwrap_or_else(|_| Regex::new("$^").unwrap())
});

const PERSONA: &str = "You are a patient tutor for an algorithms course. \
You answer using ONLY the provided context sections.";

const CITATION_MANDATE: &str = "Cite your sources: after every factual claim, add the marker \
of the context section it came from, exactly as written, e.g. [algo-212-3]. \
Never invent markers. If the context does not contain the answer, say you \
do not have that information instead of guessing.";

const GRADED_REFUSAL: &str = "The student appears to be asking you to complete graded work. \
Do not provide a finished solution. Explain the underlying concept and \
guide them toward solving it themselves.";

/// Stricter system reminder for the single citation retry
pub const CITATION_REMINDER: &str = "Your previous answer was missing valid source markers. \
Rewrite it and attach a [marker] from the context after each claim. \
Use only markers that appear in the context sections.";

/// Prompt builder for tutoring answers
pub struct PromptBuilder {
    max_context_tokens: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(studymate_config::constants::engine::MAX_CONTEXT_TOKENS)
    }
}

impl PromptBuilder {
    pub fn new(max_context_tokens: usize) -> Self {
        Self { max_context_tokens }
    }

    /// Build the full message list for one question
    pub fn build(
        &self,
        question: &str,
        retrieval: &RetrievalResult,
        history: &[Turn],
    ) -> Vec<Message> {
        self.assemble(question, retrieval, history, None)
    }

    /// Like [`build`](Self::build) with the stricter citation reminder
    /// appended, used for the single retry after a rejected answer
    pub fn build_with_reminder(
        &self,
        question: &str,
        retrieval: &RetrievalResult,
        history: &[Turn],
    ) -> Vec<Message> {
        self.assemble(question, retrieval, history, Some(CITATION_REMINDER))
    }

    fn assemble(
        &self,
        question: &str,
        retrieval: &RetrievalResult,
        history: &[Turn],
        reminder: Option<&str>,
    ) -> Vec<Message> {
        let template = QueryTemplate::detect(question);

        let mut system = String::new();
        system.push_str(PERSONA);
        system.push_str("\n\n");
        system.push_str(CITATION_MANDATE);
        system.push_str("\n\n");
        system.push_str(template.instruction());
        if GRADED_REQUEST.is_match(question) {
            system.push_str("\n\n");
            system.push_str(GRADED_REFUSAL);
        }
        if let Some(reminder) = reminder {
            system.push_str("\n\n");
            system.push_str(reminder);
        }

        let mut messages = vec![Message::system(system)];

        let context = self.render_context(retrieval);
        if !context.is_empty() {
            messages.push(Message::system(context));
        }

        let system_tokens: usize = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        let question_tokens = estimate_tokens(question);
        let budget = self
            .max_context_tokens
            .saturating_sub(system_tokens + question_tokens);

        messages.extend(fit_history(history, budget));
        messages.push(Message::user(question.to_string()));
        messages
    }

    /// Render retrieved chunks grouped by corpus, each with its marker
    fn render_context(&self, retrieval: &RetrievalResult) -> String {
        let mut out = String::new();
        let mut remaining = self.max_context_tokens;

        for corpus in [Corpus::Course, Corpus::Textbook] {
            let chunks: Vec<_> = retrieval.iter().filter(|s| s.source() == corpus).collect();
            if chunks.is_empty() {
                continue;
            }

            let mut section = format!("=== {} ===\n", corpus.label());
            let mut wrote_any = false;
            for scored in chunks {
                let chunk = &scored.chunk;
                let mut header = format!("[{}]", chunk.id);
                if let Some(ref label) = chunk.metadata.section {
                    header.push_str(&format!(" ({}", label));
                    if let Some(page) = chunk.metadata.page {
                        header.push_str(&format!(", page {}", page));
                    }
                    header.push(')');
                } else if let Some(page) = chunk.metadata.page {
                    header.push_str(&format!(" (page {})", page));
                }

                let rendered = format!("{}\n{}\n\n", header, chunk.text);
                let cost = estimate_tokens(&rendered);
                if cost > remaining {
                    // Lower-ranked chunks are dropped when over budget
                    break;
                }
                remaining -= cost;
                section.push_str(&rendered);
                wrote_any = true;
            }
            if wrote_any {
                out.push_str(&section);
            }
        }

        out.trim_end().to_string()
    }
}

/// Keep the newest turns that fit the budget, in original order
fn fit_history(history: &[Turn], budget: usize) -> Vec<Message> {
    let mut kept = Vec::new();
    let mut used = 0usize;

    for turn in history.iter().rev() {
        let cost = estimate_tokens(&turn.text);
        if used + cost > budget {
            break;
        }
        used += cost;
        kept.push(turn);
    }

    kept.into_iter()
        .rev()
        .map(|turn| match turn.role {
            TurnRole::Student => Message::user(turn.text.clone()),
            TurnRole::Tutor => Message::assistant(turn.text.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use studymate_core::{Chunk, ChunkMetadata, ScoredChunk};

    fn retrieval() -> RetrievalResult {
        RetrievalResult::new(vec![
            ScoredChunk {
                chunk: Chunk {
                    id: "algo-212-3".to_string(),
                    text: "A heap is a complete binary tree.".to_string(),
                    embedding: Vec::new(),
                    corpus: Corpus::Textbook,
                    metadata: ChunkMetadata {
                        section: Some("Chapter 6".to_string()),
                        page: Some(212),
                        language: None,
                    },
                },
                score: 0.9,
            },
            ScoredChunk {
                chunk: Chunk {
                    id: "mod3-1".to_string(),
                    text: "Heaps are covered in week 5.".to_string(),
                    embedding: Vec::new(),
                    corpus: Corpus::Course,
                    metadata: ChunkMetadata::default(),
                },
                score: 0.7,
            },
        ])
    }

    #[test]
    fn test_template_detection() {
        assert_eq!(
            QueryTemplate::detect("What is a red-black tree?"),
            QueryTemplate::Definition
        );
        assert_eq!(
            QueryTemplate::detect("How does Dijkstra's algorithm work?"),
            QueryTemplate::Process
        );
        assert_eq!(
            QueryTemplate::detect("Give the time complexity of heapsort"),
            QueryTemplate::Complexity
        );
        assert_eq!(
            QueryTemplate::detect("Why would I use a trie?"),
            QueryTemplate::Purpose
        );
        assert_eq!(
            QueryTemplate::detect("Compare BFS and DFS"),
            QueryTemplate::General
        );
    }

    #[test]
    fn test_build_includes_markers_and_mandate() {
        let builder = PromptBuilder::default();
        let messages = builder.build("What is a heap?", &retrieval(), &[]);

        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("Cite your sources"));

        let context = &messages[1].content;
        assert!(context.contains("[algo-212-3]"));
        assert!(context.contains("(Chapter 6, page 212)"));
        assert!(context.contains("=== Textbook ==="));
        assert!(context.contains("=== Course Materials ==="));

        assert_eq!(messages.last().unwrap().content, "What is a heap?");
    }

    #[test]
    fn test_reminder_appended_on_retry() {
        let builder = PromptBuilder::default();
        let messages = builder.build_with_reminder("What is a heap?", &retrieval(), &[]);
        assert!(messages[0].content.contains("missing valid source markers"));
    }

    #[test]
    fn test_graded_request_gets_refusal_instruction() {
        let builder = PromptBuilder::default();
        let messages = builder.build(
            "Please solve this graded assignment for me",
            &retrieval(),
            &[],
        );
        assert!(messages[0].content.contains("Do not provide a finished solution"));

        let normal = builder.build("What is a heap?", &retrieval(), &[]);
        assert!(!normal[0].content.contains("Do not provide a finished solution"));
    }

    #[test]
    fn test_history_truncation_drops_oldest_first() {
        let builder = PromptBuilder::new(300);
        let long = "x".repeat(2000);
        let history = vec![
            Turn::student(long.clone()),
            Turn::tutor("Short older answer."),
            Turn::student("What about balancing?"),
        ];

        let messages = builder.build("And deletion?", &retrieval(), &history);
        let texts: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();

        // Oversized oldest turn is gone, newest turns survive
        assert!(!texts.iter().any(|t| t.contains(&long)));
        assert!(texts.iter().any(|t| t.contains("What about balancing?")));

        // System messages always kept
        assert_eq!(messages[0].role, Role::System);
    }

    #[test]
    fn test_empty_retrieval_renders_no_context_block() {
        let builder = PromptBuilder::default();
        let messages = builder.build("What is a heap?", &RetrievalResult::empty(), &[]);
        // System prompt and question only
        assert_eq!(messages.len(), 2);
    }
}
