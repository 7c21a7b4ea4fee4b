//! Duplicate and similarity analysis.
//!
//! Keyword mining and pairwise similarity scoring go through the
//! completion service; candidate retrieval goes through the query
//! compiler so the exclusion and vocabulary rules stay in one place.

use std::sync::Arc;

use tracing::{info, warn};

use tessa_common::llm::CompletionClient;
use tessa_common::tracker::{IssueSummary, TrackerClient};
use tessa_common::AgentError;

use crate::extract::{OneOrMany, QueryParameters};
use crate::jql::{self, KeywordJoin};

/// Scores at or above this value flag a duplicate.
pub const SIMILARITY_THRESHOLD: u8 = 8;

/// Candidate cap for a duplicate scan.
pub const DUPLICATE_CANDIDATE_LIMIT: u32 = 25;

/// Result cap for a similar-ticket search.
pub const SIMILAR_RESULT_LIMIT: u32 = 10;

/// Ephemeral verdict for one candidate. Not persisted.
#[derive(Debug, Clone)]
pub struct SimilarityVerdict {
    pub issue: IssueSummary,
    pub score: u8,
    pub is_duplicate: bool,
}

/// Outcome of a similar-ticket search.
#[derive(Debug, Clone)]
pub enum SimilarSearch {
    /// The source ticket had no text to analyze.
    InsufficientText,
    Matches {
        keywords: String,
        issues: Vec<IssueSummary>,
    },
}

pub struct SimilarityPipeline {
    llm: Arc<dyn CompletionClient>,
    tracker: Arc<dyn TrackerClient>,
}

impl SimilarityPipeline {
    pub fn new(llm: Arc<dyn CompletionClient>, tracker: Arc<dyn TrackerClient>) -> Self {
        Self { llm, tracker }
    }

    /// Top-3 technical terms from ticket text, space-separated.
    pub async fn extract_keywords(&self, text: &str) -> Result<String, AgentError> {
        let system = "You are an expert in analyzing tracker tickets to find core issues. \
            From the following ticket text, extract the 3 most important and specific \
            technical keywords that describe the core problem. Focus on nouns, verbs, and \
            technical terms (like 'crash', 'UI button', 'memory leak', 'API', \
            'authentication'). Combine the keywords into a single, space-separated string.";
        let keywords = self.llm.complete(system, text).await?;
        Ok(keywords.trim().to_string())
    }

    /// Rate two summaries on the 1..=10 duplicate scale.
    ///
    /// An unparsable response scores 1: fail toward "not a duplicate"
    /// rather than falsely flagging.
    pub async fn score_similarity(&self, summary_a: &str, summary_b: &str) -> Result<u8, AgentError> {
        let system = "You are an expert in identifying duplicate tracker tickets. Compare \
            the two ticket summaries and rate their similarity on a scale of 1 to 10, \
            where 1 is completely different and 10 is almost certainly a duplicate. \
            Consider synonyms, rephrasing, and different ways of describing the same core \
            technical issue. Your response must contain ONLY the integer and nothing else.";
        let user = format!("Summary A: \"{summary_a}\"\nSummary B: \"{summary_b}\"");
        let response = self.llm.complete(system, &user).await?;

        match response.trim().parse::<i64>() {
            Ok(score) => Ok(score.clamp(1, 10) as u8),
            Err(_) => {
                warn!(
                    "could not parse similarity score from '{}', defaulting to 1",
                    response.trim()
                );
                Ok(1)
            }
        }
    }

    /// Duplicate scan for an existing ticket.
    pub async fn find_duplicates(&self, key: &str) -> Result<Vec<SimilarityVerdict>, AgentError> {
        let source = self.tracker.get(key).await?;
        let program = source.program.clone().unwrap_or_default();

        if source.summary.trim().is_empty()
            || source.project.trim().is_empty()
            || program.trim().is_empty()
        {
            return Err(AgentError::validation(format!(
                "Source ticket {key} is missing a summary, project, or program field; \
                 cannot search for duplicates."
            )));
        }

        self.scan_for_duplicates(&source.summary, &source.project, &program, Some(key))
            .await
    }

    /// Duplicate scan for a draft that has no key yet.
    pub async fn find_duplicates_for_draft(
        &self,
        summary: &str,
        project: &str,
        program: &str,
    ) -> Result<Vec<SimilarityVerdict>, AgentError> {
        self.scan_for_duplicates(summary, project, program, None)
            .await
    }

    async fn scan_for_duplicates(
        &self,
        summary: &str,
        project: &str,
        program: &str,
        exclude_key: Option<&str>,
    ) -> Result<Vec<SimilarityVerdict>, AgentError> {
        // Equality-only candidate query: same project, same program.
        let params = QueryParameters {
            project: Some(project.to_string()),
            program: Some(program.to_string()),
            ..QueryParameters::default()
        };
        let query = jql::compile(&params, exclude_key, KeywordJoin::Or)?;
        let candidates = self.tracker.search(&query, DUPLICATE_CANDIDATE_LIMIT).await?;
        info!(
            "duplicate scan: {} candidates in {}/{}",
            candidates.len(),
            project,
            program
        );

        let mut duplicates = Vec::new();
        for candidate in candidates {
            if candidate.summary.trim().is_empty() {
                continue;
            }
            match self.score_similarity(summary, &candidate.summary).await {
                Ok(score) if score >= SIMILARITY_THRESHOLD => {
                    info!("likely duplicate {} (score {})", candidate.key, score);
                    duplicates.push(SimilarityVerdict {
                        issue: candidate,
                        score,
                        is_duplicate: true,
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    // One bad comparison never aborts the batch.
                    warn!("could not compare summary for {}: {}", candidate.key, err);
                }
            }
        }
        Ok(duplicates)
    }

    /// Keyword-based similar-ticket search scoped to the source project.
    pub async fn find_similar(&self, key: &str) -> Result<SimilarSearch, AgentError> {
        let source = self.tracker.get(key).await?;
        let text = format!("{}\n{}", source.summary, source.description);
        if text.trim().is_empty() {
            return Ok(SimilarSearch::InsufficientText);
        }

        let keywords = self.extract_keywords(&text).await?;
        let params = QueryParameters {
            project: Some(source.project.clone()),
            keywords: Some(OneOrMany::One(keywords.clone())),
            max_results: Some(SIMILAR_RESULT_LIMIT),
            ..QueryParameters::default()
        };
        let query = jql::compile(&params, Some(key), KeywordJoin::Or)?;
        let issues = self.tracker.search(&query, SIMILAR_RESULT_LIMIT).await?;

        Ok(SimilarSearch::Matches { keywords, issues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessa_common::llm::FakeCompletionClient;
    use tessa_common::tracker::{FakeTrackerClient, IssueDetails};

    fn details(key: &str, summary: &str, program: Option<&str>) -> IssueDetails {
        IssueDetails {
            key: key.to_string(),
            url: format!("http://tracker.example/browse/{key}"),
            project: "PLAT".to_string(),
            program: program.map(|p| p.to_string()),
            summary: summary.to_string(),
            description: "kernel panic during early boot".to_string(),
            status: "Open".to_string(),
            resolution: "Unresolved".to_string(),
            assignee: "Unassigned".to_string(),
            created: "2025-05-01".to_string(),
            updated: "2025-06-01".to_string(),
            comments: Vec::new(),
        }
    }

    fn hit(key: &str, summary: &str) -> IssueSummary {
        IssueSummary {
            key: key.to_string(),
            summary: summary.to_string(),
            status: "Open".to_string(),
            assignee: "Unassigned".to_string(),
            priority: "P2 (Must Solve)".to_string(),
            created: "2025-05-01".to_string(),
            updated: "2025-06-01".to_string(),
            url: format!("http://tracker.example/browse/{key}"),
        }
    }

    fn pipeline(
        llm: FakeCompletionClient,
        tracker: FakeTrackerClient,
    ) -> (SimilarityPipeline, Arc<FakeTrackerClient>) {
        let tracker = Arc::new(tracker);
        (
            SimilarityPipeline::new(Arc::new(llm), tracker.clone()),
            tracker,
        )
    }

    #[tokio::test]
    async fn test_score_threshold_is_inclusive_at_eight() {
        let (p, _) = pipeline(FakeCompletionClient::always("8"), FakeTrackerClient::new());
        assert_eq!(p.score_similarity("a", "b").await.unwrap(), 8);

        let (p, _) = pipeline(FakeCompletionClient::always("7"), FakeTrackerClient::new());
        let score = p.score_similarity("a", "b").await.unwrap();
        assert!(score < SIMILARITY_THRESHOLD);
    }

    #[tokio::test]
    async fn test_unparsable_score_defaults_to_lowest() {
        let (p, _) = pipeline(
            FakeCompletionClient::always("probably a duplicate?"),
            FakeTrackerClient::new(),
        );
        assert_eq!(p.score_similarity("a", "b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_score_is_clamped() {
        let (p, _) = pipeline(FakeCompletionClient::always("14"), FakeTrackerClient::new());
        assert_eq!(p.score_similarity("a", "b").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_find_duplicates_flags_only_high_scores() {
        let tracker = FakeTrackerClient::new();
        tracker.insert_issue(details(
            "PLAT-1",
            "Crash on boot",
            Some("Strix Halo [PRG-000391]"),
        ));
        tracker.queue_search(vec![
            hit("PLAT-2", ""), // skipped: no summary, no score spent
            hit("PLAT-3", "System crashes during boot"),
            hit("PLAT-4", "Fan is loud"),
        ]);

        let llm = FakeCompletionClient::new(vec![Ok("9".to_string()), Ok("2".to_string())]);
        let (p, tracker) = pipeline(llm, tracker);

        let verdicts = p.find_duplicates("PLAT-1").await.unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].issue.key, "PLAT-3");
        assert_eq!(verdicts[0].score, 9);
        assert!(verdicts[0].is_duplicate);

        let queries = tracker.executed_queries();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].contains("project = 'PLAT'"));
        assert!(queries[0].contains("program = 'Strix Halo [PRG-000391]'"));
        assert!(queries[0].contains("key != 'PLAT-1'"));
    }

    #[tokio::test]
    async fn test_find_duplicates_requires_source_fields() {
        let tracker = FakeTrackerClient::new();
        tracker.insert_issue(details("PLAT-9", "Crash on boot", None));
        let (p, _) = pipeline(FakeCompletionClient::always("9"), tracker);

        let err = p.find_duplicates("PLAT-9").await.unwrap_err();
        assert!(err.to_string().contains("PLAT-9"));
    }

    #[tokio::test]
    async fn test_find_similar_builds_keyword_query() {
        let tracker = FakeTrackerClient::new();
        tracker.insert_issue(details("PLAT-1", "Crash on boot", None));
        tracker.queue_search(vec![hit("PLAT-5", "Boot loop after update")]);

        let llm = FakeCompletionClient::always("boot crash kernel");
        let (p, tracker) = pipeline(llm, tracker);

        match p.find_similar("PLAT-1").await.unwrap() {
            SimilarSearch::Matches { keywords, issues } => {
                assert_eq!(keywords, "boot crash kernel");
                assert_eq!(issues.len(), 1);
            }
            other => panic!("expected matches, got {other:?}"),
        }

        let queries = tracker.executed_queries();
        assert!(queries[0].contains("summary ~ \"boot\""));
        assert!(queries[0].contains("key != 'PLAT-1'"));
    }

    #[tokio::test]
    async fn test_find_similar_without_text() {
        let tracker = FakeTrackerClient::new();
        let mut empty = details("PLAT-8", "", None);
        empty.description = String::new();
        tracker.insert_issue(empty);

        let (p, _) = pipeline(FakeCompletionClient::always("anything"), tracker);
        assert!(matches!(
            p.find_similar("PLAT-8").await.unwrap(),
            SimilarSearch::InsufficientText
        ));
    }
}
