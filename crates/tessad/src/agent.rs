//! Orchestration: one front door over the extractor, compiler, and
//! analysis pipelines.

use std::sync::Arc;

use tessa_common::llm::CompletionClient;
use tessa_common::tracker::{IssueSummary, TrackerClient};
use tessa_common::AgentError;

use crate::extract::ParameterExtractor;
use crate::jql::{self, KeywordJoin};
use crate::similarity::{SimilarSearch, SimilarityPipeline, SimilarityVerdict};
use crate::summarize::{Summarizer, TicketSummary};

pub struct Agent {
    extractor: ParameterExtractor,
    similarity: SimilarityPipeline,
    summarizer: Summarizer,
    tracker: Arc<dyn TrackerClient>,
    keyword_join: KeywordJoin,
}

impl Agent {
    pub fn new(
        llm: Arc<dyn CompletionClient>,
        tracker: Arc<dyn TrackerClient>,
        keyword_join: KeywordJoin,
    ) -> Self {
        Self {
            extractor: ParameterExtractor::new(llm.clone()),
            similarity: SimilarityPipeline::new(llm.clone(), tracker.clone()),
            summarizer: Summarizer::new(llm, tracker.clone()),
            tracker,
            keyword_join,
        }
    }

    /// Natural-language search: extract, compile, run.
    pub async fn search(&self, query: &str) -> Result<Vec<IssueSummary>, AgentError> {
        let params = self.extractor.extract(query).await?;
        let compiled = jql::compile(&params, None, self.keyword_join)?;
        self.tracker.search(&compiled, params.limit()).await
    }

    pub async fn find_similar(&self, key: &str) -> Result<SimilarSearch, AgentError> {
        self.similarity.find_similar(key).await
    }

    pub async fn find_duplicates(&self, key: &str) -> Result<Vec<SimilarityVerdict>, AgentError> {
        self.similarity.find_duplicates(key).await
    }

    pub async fn summarize(&self, key: &str, question: &str) -> Result<TicketSummary, AgentError> {
        self.summarizer.summarize_ticket(key, question).await
    }

    pub async fn summarize_many(&self, keys: &[String]) -> Vec<TicketSummary> {
        self.summarizer.summarize_tickets(keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessa_common::llm::FakeCompletionClient;
    use tessa_common::tracker::FakeTrackerClient;

    #[tokio::test]
    async fn test_search_compiles_and_passes_limit() {
        let llm = FakeCompletionClient::always(
            r#"{"intent": "list", "program": "STXH", "maxResults": 5}"#,
        );
        let tracker = Arc::new(FakeTrackerClient::new());
        let agent = Agent::new(Arc::new(llm), tracker.clone(), KeywordJoin::Or);

        let hits = agent.search("show STXH tickets").await.unwrap();
        assert!(hits.is_empty());

        let searches = tracker.searches.lock().unwrap();
        assert_eq!(searches.len(), 1);
        assert!(searches[0].0.contains("program = 'Strix Halo [PRG-000391]'"));
        assert_eq!(searches[0].1, 5);
    }

    #[tokio::test]
    async fn test_search_with_no_filters_never_reaches_the_tracker() {
        let llm = FakeCompletionClient::always(r#"{"intent": "list", "maxResults": 20}"#);
        let tracker = Arc::new(FakeTrackerClient::new());
        let agent = Agent::new(Arc::new(llm), tracker.clone(), KeywordJoin::Or);

        let err = agent.search("show me everything").await.unwrap_err();
        assert!(matches!(err, AgentError::QueryTooBroad));
        assert!(tracker.executed_queries().is_empty());
    }
}
