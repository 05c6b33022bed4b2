//! Centralized constants for the tutoring engine
//!
//! Single source of truth for default values used across the codebase.
//! Settings fields fall back to these when a value is not provided by
//! file or environment.

/// Service endpoints (defaults for local development)
pub mod endpoints {
    /// Ollama endpoint, shared by embeddings and generation
    pub const OLLAMA_DEFAULT: &str = "http://localhost:11434";

    /// Qdrant vector store endpoint
    pub const QDRANT_DEFAULT: &str = "http://127.0.0.1:6333";
}

/// Model defaults
pub mod models {
    /// Preferred language model, tried first in the fallback chain
    pub const PREFERRED_LLM: &str = "qwen2:1.5b";

    /// Fallback language models, in priority order
    pub const FALLBACK_LLMS: &[&str] = &["phi3", "mistral", "llama2"];

    /// General-purpose embedding model
    pub const EMBEDDING_PRIMARY: &str = "nomic-embed-text";

    /// Fallback embedding model
    pub const EMBEDDING_FALLBACK: &str = "mxbai-embed-large";

    /// Embedding dimension for the primary model
    pub const EMBEDDING_DIM: usize = 768;
}

/// Timeouts (milliseconds)
pub mod timeouts {
    /// Per-attempt language model timeout
    pub const LLM_REQUEST_MS: u64 = 25_000;

    /// Embedding request timeout
    pub const EMBED_REQUEST_MS: u64 = 10_000;

    /// Maximum time a generation request may wait for a worker permit
    pub const QUEUE_WAIT_MS: u64 = 5_000;
}

/// Cache sizes and TTLs
pub mod cache {
    /// Embedding cache: entries and TTL
    pub const EMBEDDING_MAX_ENTRIES: usize = 500;
    pub const EMBEDDING_TTL_SECS: u64 = 1_800;

    /// Per-corpus query-result cache: entries and TTL
    pub const QUERY_MAX_ENTRIES: usize = 100;
    pub const QUERY_TTL_SECS: u64 = 600;

    /// Response cache: entries and TTL
    pub const RESPONSE_MAX_ENTRIES: usize = 200;
    pub const RESPONSE_TTL_SECS: u64 = 1_800;
}

/// Retrieval defaults
pub mod retrieval {
    /// Default number of chunks returned by the merger
    pub const DEFAULT_TOP_K: usize = 5;

    /// Keywords marking a question as course-specific
    pub const COURSE_KEYWORDS: &[&str] = &[
        "syllabus",
        "schedule",
        "instructor",
        "grading",
        "grade",
        "assignment",
        "exam",
        "quiz",
        "deadline",
        "lecture",
        "module",
        "week",
        "marks",
        "office hours",
        "attendance",
    ];
}

/// Generation defaults
pub mod generation {
    pub const MAX_TOKENS: usize = 180;
    pub const TEMPERATURE: f32 = 0.1;
    pub const TOP_P: f32 = 0.9;

    /// Consecutive failures before a model is marked unavailable
    pub const FAILURE_THRESHOLD: u32 = 3;

    /// Cool-down before an unavailable model is probed again (seconds)
    pub const COOLDOWN_SECS: u64 = 60;
}

/// Engine defaults
pub mod engine {
    /// Maximum concurrent model generations
    pub const MAX_CONCURRENT_GENERATIONS: usize = 4;

    /// Prompt context budget in estimated tokens
    pub const MAX_CONTEXT_TOKENS: usize = 2_000;

    /// Canned response when neither corpus returns results
    pub const NO_INFORMATION_MESSAGE: &str =
        "I couldn't find relevant information in the course materials or the \
         textbook to answer your question.";
}

/// Technical abbreviations expanded before embedding, improving recall
/// for terse algorithm questions
pub const ABBREVIATIONS: &[(&str, &str)] = &[
    ("BST", "Binary Search Tree"),
    ("DP", "Dynamic Programming"),
    ("DFS", "Depth First Search"),
    ("BFS", "Breadth First Search"),
    ("AVL", "Adelson-Velsky and Landis Tree"),
    ("MST", "Minimum Spanning Tree"),
    ("LCS", "Longest Common Subsequence"),
];
