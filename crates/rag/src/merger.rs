//! Question classification and source-priority merging
//!
//! Both corpora are searched concurrently and the merger decides how
//! many chunks each contributes. Course-specific questions use course
//! materials exclusively; general questions reserve a majority of the
//! slots for the textbook, since it carries the authoritative
//! explanations, and backfill from whichever corpus has results left.

use std::sync::Arc;

use studymate_core::{Corpus, CorpusHint, RetrievalResult, ScoredChunk};

use crate::index::{CorpusIndex, SearchFilter};
use crate::RagError;

/// What kind of question the student asked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    /// About course logistics (syllabus, deadlines, grading)
    CourseSpecific,
    /// About the subject matter itself
    General,
}

/// Keyword-based question classifier
///
/// Lowercased substring matching is deliberate: "grading" should match
/// "What's the grading policy?" without any tokenization step.
pub struct QuestionClassifier {
    keywords: Vec<String>,
}

impl QuestionClassifier {
    pub fn new(keywords: Vec<String>) -> Self {
        Self { keywords }
    }

    pub fn classify(&self, question: &str) -> QuestionKind {
        let lowered = question.to_lowercase();
        if self.keywords.iter().any(|k| lowered.contains(k.as_str())) {
            QuestionKind::CourseSpecific
        } else {
            QuestionKind::General
        }
    }
}

impl Default for QuestionClassifier {
    fn default() -> Self {
        Self::new(
            studymate_config::constants::retrieval::COURSE_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
        )
    }
}

/// How the two result lists are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePlan {
    /// Course-specific question with course results available
    CourseOnly,
    /// General question, textbook holds the majority quota
    TextbookPriority {
        textbook_take: usize,
        course_take: usize,
    },
    /// Only one corpus returned anything
    SingleCorpus(Corpus),
    /// Neither corpus returned anything
    Empty,
}

/// Decide the merge plan from question kind and per-corpus result counts
///
/// For general questions the textbook quota is `ceil(k / 2) + 1`, a
/// strict majority of the final list. Slots one corpus cannot fill are
/// handed to the other.
pub fn merge_plan(
    kind: QuestionKind,
    course_available: usize,
    textbook_available: usize,
    k: usize,
) -> MergePlan {
    match (course_available, textbook_available) {
        (0, 0) => return MergePlan::Empty,
        (_, 0) => return MergePlan::SingleCorpus(Corpus::Course),
        (0, _) => return MergePlan::SingleCorpus(Corpus::Textbook),
        _ => {}
    }

    if kind == QuestionKind::CourseSpecific {
        return MergePlan::CourseOnly;
    }

    let quota = k.div_ceil(2) + 1;
    let mut textbook_take = quota.min(textbook_available).min(k);
    let mut course_take = (k - textbook_take).min(course_available);

    // Backfill unused slots, textbook first
    let unused = k - textbook_take - course_take;
    if unused > 0 {
        let extra_textbook = unused.min(textbook_available - textbook_take);
        textbook_take += extra_textbook;
        course_take += (unused - extra_textbook).min(course_available - course_take);
    }

    MergePlan::TextbookPriority {
        textbook_take,
        course_take,
    }
}

/// Merger configuration
#[derive(Debug, Clone)]
pub struct MergerConfig {
    /// Final result size
    pub top_k: usize,
    /// Per-corpus search depth, at least `top_k`
    pub fetch_k: usize,
}

impl Default for MergerConfig {
    fn default() -> Self {
        let top_k = studymate_config::constants::retrieval::DEFAULT_TOP_K;
        Self {
            top_k,
            fetch_k: top_k * 2,
        }
    }
}

impl From<&studymate_config::RetrievalSettings> for MergerConfig {
    fn from(settings: &studymate_config::RetrievalSettings) -> Self {
        Self {
            top_k: settings.top_k,
            fetch_k: settings.top_k * 2,
        }
    }
}

/// Dual-corpus retrieval with source-priority merging
pub struct RetrievalMerger {
    classifier: QuestionClassifier,
    course: Arc<CorpusIndex>,
    textbook: Arc<CorpusIndex>,
    config: MergerConfig,
}

impl RetrievalMerger {
    pub fn new(course: Arc<CorpusIndex>, textbook: Arc<CorpusIndex>, config: MergerConfig) -> Self {
        Self {
            classifier: QuestionClassifier::default(),
            course,
            textbook,
            config,
        }
    }

    pub fn with_classifier(mut self, classifier: QuestionClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Search both corpora and merge under the source-priority policy.
    /// A caller-supplied hint overrides the classifier.
    pub async fn retrieve(
        &self,
        question: &str,
        query_vector: &[f32],
        hint: Option<CorpusHint>,
        filter: Option<&SearchFilter>,
    ) -> Result<RetrievalResult, RagError> {
        let kind = match hint {
            Some(CorpusHint::Course) => QuestionKind::CourseSpecific,
            Some(CorpusHint::Textbook) => QuestionKind::General,
            None => self.classifier.classify(question),
        };

        let fetch_k = self.config.fetch_k.max(self.config.top_k);
        let (course_results, textbook_results) = tokio::join!(
            self.course.search(query_vector, fetch_k, filter),
            self.textbook.search(query_vector, fetch_k, filter),
        );
        let course_results = course_results?;
        let textbook_results = textbook_results?;

        let plan = merge_plan(
            kind,
            course_results.len(),
            textbook_results.len(),
            self.config.top_k,
        );
        tracing::debug!(
            ?kind,
            ?plan,
            course = course_results.len(),
            textbook = textbook_results.len(),
            "merging retrieval results"
        );

        let merged = match plan {
            MergePlan::Empty => Vec::new(),
            MergePlan::CourseOnly | MergePlan::SingleCorpus(Corpus::Course) => {
                take_top(course_results, self.config.top_k)
            }
            MergePlan::SingleCorpus(Corpus::Textbook) => {
                take_top(textbook_results, self.config.top_k)
            }
            MergePlan::TextbookPriority {
                textbook_take,
                course_take,
            } => {
                let mut merged = take_top(textbook_results, textbook_take);
                merged.extend(take_top(course_results, course_take));
                order_merged(&mut merged, Corpus::Textbook);
                merged.truncate(self.config.top_k);
                merged
            }
        };

        Ok(RetrievalResult::new(merged))
    }
}

fn take_top(mut results: Vec<ScoredChunk>, n: usize) -> Vec<ScoredChunk> {
    results.truncate(n);
    results
}

/// Order by score descending; ties go to the priority corpus
fn order_merged(merged: &mut [ScoredChunk], priority: Corpus) {
    merged.sort_by(|a, b| {
        b.score.total_cmp(&a.score).then_with(|| {
            let a_priority = a.source() == priority;
            let b_priority = b.source() == priority;
            b_priority.cmp(&a_priority)
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{MemoryIndex, VectorSearch};
    use studymate_core::{Chunk, ChunkMetadata};

    #[test]
    fn test_classifier_flags_logistics_questions() {
        let classifier = QuestionClassifier::default();
        assert_eq!(
            classifier.classify("When is the exam for module 2?"),
            QuestionKind::CourseSpecific
        );
        assert_eq!(
            classifier.classify("What is the GRADING policy?"),
            QuestionKind::CourseSpecific
        );
        assert_eq!(
            classifier.classify("Explain how quicksort partitions"),
            QuestionKind::General
        );
    }

    #[test]
    fn test_classifier_custom_keywords() {
        let classifier = QuestionClassifier::new(vec!["midterm".to_string()]);
        assert_eq!(
            classifier.classify("When is the midterm?"),
            QuestionKind::CourseSpecific
        );
        // Default vocabulary no longer applies
        assert_eq!(
            classifier.classify("What is on the syllabus?"),
            QuestionKind::General
        );
    }

    #[test]
    fn test_plan_course_specific_uses_course_only() {
        assert_eq!(
            merge_plan(QuestionKind::CourseSpecific, 4, 9, 5),
            MergePlan::CourseOnly
        );
    }

    #[test]
    fn test_plan_course_specific_falls_back_to_textbook() {
        assert_eq!(
            merge_plan(QuestionKind::CourseSpecific, 0, 9, 5),
            MergePlan::SingleCorpus(Corpus::Textbook)
        );
    }

    #[test]
    fn test_plan_general_reserves_textbook_majority() {
        // k=5: textbook quota ceil(5/2)+1 = 4, course fills the rest
        assert_eq!(
            merge_plan(QuestionKind::General, 5, 5, 5),
            MergePlan::TextbookPriority {
                textbook_take: 4,
                course_take: 1
            }
        );
    }

    #[test]
    fn test_plan_backfills_scarce_textbook() {
        // Textbook only has 2; course takes the remaining 3
        assert_eq!(
            merge_plan(QuestionKind::General, 10, 2, 5),
            MergePlan::TextbookPriority {
                textbook_take: 2,
                course_take: 3
            }
        );
    }

    #[test]
    fn test_plan_small_k_edge_cases() {
        // k=1: quota 2, capped at k
        assert_eq!(
            merge_plan(QuestionKind::General, 3, 3, 1),
            MergePlan::TextbookPriority {
                textbook_take: 1,
                course_take: 0
            }
        );
        // k=2: quota 2, textbook fills everything
        assert_eq!(
            merge_plan(QuestionKind::General, 3, 3, 2),
            MergePlan::TextbookPriority {
                textbook_take: 2,
                course_take: 0
            }
        );
    }

    #[test]
    fn test_plan_empty_corpora() {
        assert_eq!(merge_plan(QuestionKind::General, 0, 0, 5), MergePlan::Empty);
        assert_eq!(
            merge_plan(QuestionKind::General, 3, 0, 5),
            MergePlan::SingleCorpus(Corpus::Course)
        );
    }

    fn scored(id: &str, corpus: Corpus, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: id.to_string(),
                text: format!("{} text", id),
                embedding: Vec::new(),
                corpus,
                metadata: ChunkMetadata::default(),
            },
            score,
        }
    }

    #[test]
    fn test_order_merged_breaks_ties_toward_priority() {
        let mut merged = vec![
            scored("c1", Corpus::Course, 0.8),
            scored("t1", Corpus::Textbook, 0.8),
            scored("t2", Corpus::Textbook, 0.9),
        ];
        order_merged(&mut merged, Corpus::Textbook);

        assert_eq!(merged[0].chunk.id, "t2");
        assert_eq!(merged[1].chunk.id, "t1");
        assert_eq!(merged[2].chunk.id, "c1");
    }

    fn chunk_with_score(id: &str, corpus: Corpus, seed: &str) -> Chunk {
        let embedder = crate::embedder::SimpleEmbedder::new("test", 32);
        Chunk {
            id: id.to_string(),
            text: seed.to_string(),
            embedding: embedder.embed_sync(seed),
            corpus,
            metadata: ChunkMetadata::default(),
        }
    }

    async fn merger_with(
        course_chunks: Vec<Chunk>,
        textbook_chunks: Vec<Chunk>,
        top_k: usize,
    ) -> RetrievalMerger {
        let course = MemoryIndex::new(Corpus::Course);
        course.upsert(course_chunks).await.unwrap();
        let textbook = MemoryIndex::new(Corpus::Textbook);
        textbook.upsert(textbook_chunks).await.unwrap();

        RetrievalMerger::new(
            Arc::new(CorpusIndex::new(Corpus::Course, Arc::new(course))),
            Arc::new(CorpusIndex::new(Corpus::Textbook, Arc::new(textbook))),
            MergerConfig {
                top_k,
                fetch_k: top_k * 2,
            },
        )
    }

    #[tokio::test]
    async fn test_retrieve_general_question_mixes_corpora() {
        let course: Vec<Chunk> = (0..5)
            .map(|i| {
                chunk_with_score(
                    &format!("c{}", i),
                    Corpus::Course,
                    &format!("sorting notes {}", i),
                )
            })
            .collect();
        let textbook: Vec<Chunk> = (0..5)
            .map(|i| {
                chunk_with_score(
                    &format!("t{}", i),
                    Corpus::Textbook,
                    &format!("sorting chapter {}", i),
                )
            })
            .collect();

        let merger = merger_with(course, textbook, 5).await;
        let embedder = crate::embedder::SimpleEmbedder::new("test", 32);
        let query = embedder.embed_sync("sorting");

        let result = merger
            .retrieve("how does merge sort work?", &query, None, None)
            .await
            .unwrap();

        assert_eq!(result.len(), 5);
        assert_eq!(result.count_from(Corpus::Textbook), 4);
        assert_eq!(result.count_from(Corpus::Course), 1);
    }

    #[tokio::test]
    async fn test_retrieve_course_question_ignores_textbook() {
        let merger = merger_with(
            vec![chunk_with_score("c0", Corpus::Course, "exam schedule")],
            vec![chunk_with_score("t0", Corpus::Textbook, "exam strategies")],
            5,
        )
        .await;
        let embedder = crate::embedder::SimpleEmbedder::new("test", 32);
        let query = embedder.embed_sync("exam");

        let result = merger
            .retrieve("when is the exam?", &query, None, None)
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.count_from(Corpus::Textbook), 0);
    }

    #[tokio::test]
    async fn test_retrieve_hint_overrides_classifier() {
        let merger = merger_with(
            vec![chunk_with_score("c0", Corpus::Course, "recursion notes")],
            vec![chunk_with_score("t0", Corpus::Textbook, "recursion chapter")],
            5,
        )
        .await;
        let embedder = crate::embedder::SimpleEmbedder::new("test", 32);
        let query = embedder.embed_sync("recursion");

        // General phrasing, forced to course materials
        let result = merger
            .retrieve(
                "explain recursion",
                &query,
                Some(CorpusHint::Course),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.count_from(Corpus::Textbook), 0);
        assert_eq!(result.count_from(Corpus::Course), 1);
    }

    #[tokio::test]
    async fn test_retrieve_empty_corpora() {
        let merger = merger_with(vec![], vec![], 5).await;
        let embedder = crate::embedder::SimpleEmbedder::new("test", 32);
        let query = embedder.embed_sync("anything");

        let result = merger
            .retrieve("anything", &query, None, None)
            .await
            .unwrap();
        assert!(result.is_empty());
    }
}
