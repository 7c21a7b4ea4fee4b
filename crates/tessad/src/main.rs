//! Tessa Daemon - conversational ticket-tracker assistant
//!
//! Thin line-oriented front end: user text in, structured text out. All
//! real work happens in the library modules.

use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, Level};

use tessa_common::llm::HttpCompletionClient;
use tessa_common::tracker::HttpTrackerClient;

use tessad::agent::Agent;
use tessad::config::TessadConfig;
use tessad::session::{FinalizeOutcome, NextStep, SessionReply, SessionStore};
use tessad::similarity::SimilarSearch;

const CONVERSATION: &str = "local";

fn print_reply(reply: &SessionReply) {
    for duplicate in &reply.duplicates {
        println!("possible duplicate: {} {}", duplicate.key, duplicate.summary);
    }
    match &reply.step {
        NextStep::Field(prompt) => {
            println!("{}", prompt.question);
            if !prompt.options.is_empty() {
                println!("options: {}", prompt.options.join(", "));
            }
        }
        NextStep::ReadyToFinalize => {
            println!("All required fields are set. Type 'finalize' to submit or 'cancel'.");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("tessad v{} starting", env!("CARGO_PKG_VERSION"));

    let config = TessadConfig::load();
    let llm = Arc::new(HttpCompletionClient::new(
        config.completion.clone(),
        config.retry.clone(),
    )?);
    let tracker = Arc::new(HttpTrackerClient::new(
        config.tracker.clone(),
        config.retry.clone(),
    )?);

    let agent = Agent::new(llm.clone(), tracker.clone(), config.search.keyword_join);
    let sessions = SessionStore::new(
        llm,
        tracker,
        Duration::from_secs(config.session.idle_expiry_secs),
    );

    info!("tessad ready; reading requests from stdin");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        sessions.sweep_expired().await;

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let result: Result<(), tessa_common::AgentError> = match command {
            "create" => sessions
                .start(CONVERSATION, rest.trim(), "PLAT")
                .await
                .map(|reply| print_reply(&reply)),
            "set" => {
                let (field, value) = rest.split_once(' ').unwrap_or((rest, ""));
                sessions
                    .set_field(CONVERSATION, field, value.trim())
                    .await
                    .map(|reply| print_reply(&reply))
            }
            "finalize" => sessions
                .finalize(CONVERSATION, true)
                .await
                .map(|outcome| match outcome {
                    FinalizeOutcome::Created(created) => {
                        println!("created {} ({})", created.key, created.url)
                    }
                    FinalizeOutcome::NotConfirmed => println!("draft kept, not submitted"),
                }),
            "cancel" => {
                if sessions.cancel(CONVERSATION).await {
                    println!("draft cancelled");
                } else {
                    println!("nothing to cancel");
                }
                Ok(())
            }
            "similar" => agent.find_similar(rest.trim()).await.map(|found| match found {
                SimilarSearch::InsufficientText => {
                    println!("not enough text in the source ticket to analyze")
                }
                SimilarSearch::Matches { keywords, issues } => {
                    println!("keywords: {keywords}");
                    for issue in issues {
                        println!("{} {} [{}]", issue.key, issue.summary, issue.status);
                    }
                }
            }),
            "dupes" => agent.find_duplicates(rest.trim()).await.map(|verdicts| {
                if verdicts.is_empty() {
                    println!("no likely duplicates found");
                }
                for verdict in verdicts {
                    println!(
                        "{} (score {}) {}",
                        verdict.issue.key, verdict.score, verdict.issue.summary
                    );
                }
            }),
            "sum" => {
                let (key, question) = rest.split_once(' ').unwrap_or((rest, ""));
                let question = if question.trim().is_empty() {
                    tessad::summarize::DEFAULT_SUMMARY_QUESTION
                } else {
                    question.trim()
                };
                agent.summarize(key, question).await.map(|summary| {
                    println!("{} ({})", summary.key, summary.url);
                    println!("{}", summary.body);
                })
            }
            _ => agent.search(line).await.map(|hits| {
                if hits.is_empty() {
                    println!("no matching tickets");
                }
                for hit in hits {
                    println!(
                        "{} {} [{} / {} / {}]",
                        hit.key, hit.summary, hit.status, hit.priority, hit.assignee
                    );
                }
            }),
        };

        if let Err(err) = result {
            println!("error: {err}");
        }
    }

    info!("stdin closed, shutting down");
    Ok(())
}
