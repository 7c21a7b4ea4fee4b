//! Single and multi-ticket summarization.

use std::sync::Arc;

use tracing::warn;

use tessa_common::llm::CompletionClient;
use tessa_common::tracker::{IssueDetails, TrackerClient};
use tessa_common::AgentError;

pub const DEFAULT_SUMMARY_QUESTION: &str = "Provide a full 4-point summary.";

#[derive(Debug, Clone)]
pub struct TicketSummary {
    pub key: String,
    pub url: String,
    pub body: String,
}

pub struct Summarizer {
    llm: Arc<dyn CompletionClient>,
    tracker: Arc<dyn TrackerClient>,
}

fn sanitize_key(key: &str) -> String {
    key.trim().replace('_', "-").to_uppercase()
}

/// Render issue details into the text block handed to the model.
fn render_details(details: &IssueDetails) -> String {
    let mut lines = vec![
        format!("Project: {}", details.project),
        format!(
            "Program: {}",
            details.program.as_deref().unwrap_or("Not Found")
        ),
        format!("Title: {}", details.summary),
        format!("Status: {}", details.status),
        format!("Resolution: {}", details.resolution),
        format!("Assignee: {}", details.assignee),
        format!("Created: {}", details.created),
        format!("Updated: {}", details.updated),
        String::new(),
        "-- Description --".to_string(),
        if details.description.is_empty() {
            "No description.".to_string()
        } else {
            details.description.clone()
        },
        String::new(),
        "-- Comments --".to_string(),
    ];

    if details.comments.is_empty() {
        lines.push("No comments.".to_string());
    } else {
        // Newest first, last five only.
        for comment in details.comments.iter().rev().take(5) {
            lines.push(format!(
                "Comment by {} on {}:",
                comment.author, comment.created
            ));
            lines.push(comment.body.clone());
            lines.push("-".repeat(10));
        }
    }

    lines.join("\n")
}

impl Summarizer {
    pub fn new(llm: Arc<dyn CompletionClient>, tracker: Arc<dyn TrackerClient>) -> Self {
        Self { llm, tracker }
    }

    /// Summarize one ticket, tailored to the question asked.
    pub async fn summarize_ticket(
        &self,
        key: &str,
        question: &str,
    ) -> Result<TicketSummary, AgentError> {
        let key = sanitize_key(key);
        let details = self.tracker.get(&key).await?;
        let rendered = render_details(&details);

        let system = "You are an expert engineering assistant. Answer the user's question \
            from the provided ticket details. If the question is a generic request for a \
            full summary, produce a structured summary with four points: Problem Statement, \
            Latest Analysis / Debug, Identified Root Cause, and Current Blockers. If the \
            question is specific, answer only that question, concisely. Do not include the \
            ticket key or URL in your answer.";
        let user = format!("Question: \"{question}\"\n\nTicket details:\n---\n{rendered}\n---");
        let body = self.llm.complete(system, &user).await?;

        Ok(TicketSummary {
            key,
            url: details.url,
            body: body.trim().to_string(),
        })
    }

    /// Summarize several tickets, then add an aggregate analysis when
    /// more than one summary succeeded. A failed key produces an inline
    /// error body and never aborts the rest.
    pub async fn summarize_tickets(&self, keys: &[String]) -> Vec<TicketSummary> {
        let mut summaries = Vec::new();
        for key in keys {
            match self.summarize_ticket(key, DEFAULT_SUMMARY_QUESTION).await {
                Ok(summary) => summaries.push(summary),
                Err(err) => {
                    let key = sanitize_key(key);
                    warn!("could not summarize {key}: {err}");
                    summaries.push(TicketSummary {
                        body: format!("Could not generate summary for {key}: {err}"),
                        url: "#".to_string(),
                        key,
                    });
                }
            }
        }

        let successful: Vec<(String, String)> = summaries
            .iter()
            .filter(|s| !s.body.starts_with("Could not generate summary"))
            .map(|s| (s.key.clone(), s.body.clone()))
            .collect();

        if successful.len() > 1 {
            let joined = successful
                .iter()
                .map(|(key, body)| format!("Ticket {key}:\n{body}"))
                .collect::<Vec<_>>()
                .join("\n\n");
            let system = "You are an expert engineering program manager. Analyze the \
                collection of ticket summaries and produce a high-level aggregate \
                analysis. Identify common themes, recurring root causes, shared blockers, \
                and patterns across the tickets. Structure the response with these \
                headings: Overall Status & Common Themes, Potential Shared Root Causes, \
                Overarching Blockers or Dependencies.";

            match self.llm.complete(system, &joined).await {
                Ok(body) => summaries.push(TicketSummary {
                    key: format!("Aggregate Summary of {} Tickets", successful.len()),
                    url: "#".to_string(),
                    body: body.trim().to_string(),
                }),
                Err(err) => {
                    warn!("could not generate aggregate summary: {err}");
                    summaries.push(TicketSummary {
                        key: "Aggregate Summary".to_string(),
                        url: "#".to_string(),
                        body: format!("Failed to generate aggregate summary: {err}"),
                    });
                }
            }
        }

        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessa_common::llm::FakeCompletionClient;
    use tessa_common::tracker::{Comment, FakeTrackerClient};

    fn details(key: &str) -> IssueDetails {
        IssueDetails {
            key: key.to_string(),
            url: format!("http://tracker.example/browse/{key}"),
            project: "PLAT".to_string(),
            program: Some("Strix Halo [PRG-000391]".to_string()),
            summary: "Crash on boot".to_string(),
            description: "Machine resets during early boot.".to_string(),
            status: "Open".to_string(),
            resolution: "Unresolved".to_string(),
            assignee: "Doe, John".to_string(),
            created: "2025-05-01".to_string(),
            updated: "2025-06-01".to_string(),
            comments: vec![
                Comment {
                    author: "Doe, John".to_string(),
                    created: "2025-05-02".to_string(),
                    body: "Reproduced on the reference board.".to_string(),
                },
                Comment {
                    author: "Roe, Jane".to_string(),
                    created: "2025-05-03".to_string(),
                    body: "Suspect PSP firmware.".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key(" plat_123 "), "PLAT-123");
    }

    #[test]
    fn test_render_details_newest_comment_first() {
        let rendered = render_details(&details("PLAT-1"));
        assert!(rendered.contains("Title: Crash on boot"));
        let psp = rendered.find("Suspect PSP firmware").unwrap();
        let repro = rendered.find("Reproduced on the reference board").unwrap();
        assert!(psp < repro);
    }

    #[tokio::test]
    async fn test_summarize_single_ticket() {
        let tracker = FakeTrackerClient::new();
        tracker.insert_issue(details("PLAT-1"));
        let summarizer = Summarizer::new(
            Arc::new(FakeCompletionClient::always("Root cause: PSP firmware.")),
            Arc::new(tracker),
        );

        let summary = summarizer
            .summarize_ticket("plat_1", "what is the root cause?")
            .await
            .unwrap();
        assert_eq!(summary.key, "PLAT-1");
        assert_eq!(summary.body, "Root cause: PSP firmware.");
    }

    #[tokio::test]
    async fn test_multi_ticket_isolated_failure_and_aggregate() {
        let tracker = FakeTrackerClient::new();
        tracker.insert_issue(details("PLAT-1"));
        tracker.insert_issue(details("PLAT-2"));
        let summarizer = Summarizer::new(
            Arc::new(FakeCompletionClient::always("summary text")),
            Arc::new(tracker),
        );

        let keys = vec![
            "PLAT-1".to_string(),
            "PLAT-404".to_string(),
            "PLAT-2".to_string(),
        ];
        let summaries = summarizer.summarize_tickets(&keys).await;

        // Two real summaries, one inline failure, one aggregate.
        assert_eq!(summaries.len(), 4);
        assert!(summaries[1].body.starts_with("Could not generate summary"));
        assert!(summaries[3].key.starts_with("Aggregate Summary of 2"));
    }

    #[tokio::test]
    async fn test_no_aggregate_for_single_success() {
        let tracker = FakeTrackerClient::new();
        tracker.insert_issue(details("PLAT-1"));
        let summarizer = Summarizer::new(
            Arc::new(FakeCompletionClient::always("summary text")),
            Arc::new(tracker),
        );

        let summaries = summarizer
            .summarize_tickets(&["PLAT-1".to_string()])
            .await;
        assert_eq!(summaries.len(), 1);
    }
}
