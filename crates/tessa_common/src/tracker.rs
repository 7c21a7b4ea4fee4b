//! Ticket-tracker client abstraction.
//!
//! The tracker is an external collaborator reached through three
//! operations: search, create, get. The HTTP implementation targets a
//! Jira-style REST surface; the scripted fake backs the test suites.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::retry::{with_retry, RetryConfig};

/// Tracker connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            username: None,
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// One search hit, flattened for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueSummary {
    pub key: String,
    pub summary: String,
    pub status: String,
    pub assignee: String,
    pub priority: String,
    pub created: String,
    pub updated: String,
    pub url: String,
}

/// A single comment on an issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub author: String,
    pub created: String,
    pub body: String,
}

/// Full issue payload used for summarization and similarity analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueDetails {
    pub key: String,
    pub url: String,
    pub project: String,
    pub program: Option<String>,
    pub summary: String,
    pub description: String,
    pub status: String,
    pub resolution: String,
    pub assignee: String,
    pub created: String,
    pub updated: String,
    pub comments: Vec<Comment>,
}

/// Fields for a new draft issue, in the shape the creation session
/// collects them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewIssue {
    pub project: String,
    pub summary: String,
    pub description: String,
    pub program: String,
    pub system: String,
    pub severity: String,
    pub triage_category: String,
    pub triage_assignment: String,
    pub silicon_revision: String,
    pub iod_silicon_die_revision: String,
    pub ccd_silicon_die_revision: String,
    pub bios_version: String,
    pub steps_to_reproduce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatedIssue {
    pub key: String,
    pub url: String,
}

/// Tracker collaborator interface.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<IssueSummary>, AgentError>;
    async fn create(&self, issue: &NewIssue) -> Result<CreatedIssue, AgentError>;
    async fn get(&self, key: &str) -> Result<IssueDetails, AgentError>;
}

/// HTTP implementation against a Jira-style REST API.
pub struct HttpTrackerClient {
    config: TrackerConfig,
    retry: RetryConfig,
    client: reqwest::Client,
}

impl HttpTrackerClient {
    pub fn new(config: TrackerConfig, retry: RetryConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::external(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            retry,
            client,
        })
    }

    fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{}", self.config.base_url, key)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.config.username, &self.config.token) {
            (Some(user), Some(token)) => request.basic_auth(user, Some(token)),
            (None, Some(token)) => request.bearer_auth(token),
            _ => request,
        }
    }

    async fn send_json(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<serde_json::Value, AgentError> {
        let response = self
            .authed(request)
            .send()
            .await
            .map_err(|e| AgentError::external(format!("{context}: {e}")))?;

        if !response.status().is_success() {
            return Err(AgentError::external(format!(
                "{context}: HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AgentError::external(format!("{context}: unreadable response: {e}")))
    }

    fn summary_from_value(&self, issue: &serde_json::Value) -> IssueSummary {
        let key = str_at(issue, &["key"]).unwrap_or_default();
        let fields = &issue["fields"];
        IssueSummary {
            url: self.browse_url(&key),
            key,
            summary: str_at(fields, &["summary"]).unwrap_or_default(),
            status: str_at(fields, &["status", "name"]).unwrap_or_else(|| "Unknown".into()),
            assignee: str_at(fields, &["assignee", "displayName"])
                .unwrap_or_else(|| "Unassigned".into()),
            priority: str_at(fields, &["priority", "name"]).unwrap_or_else(|| "Undefined".into()),
            created: date_only(str_at(fields, &["created"])),
            updated: date_only(str_at(fields, &["updated"])),
        }
    }

    async fn do_search(&self, query: &str, limit: u32) -> Result<Vec<IssueSummary>, AgentError> {
        let url = format!("{}/rest/api/2/search", self.config.base_url);
        let body = serde_json::json!({
            "jql": query,
            "maxResults": limit,
            "fields": ["summary", "status", "assignee", "priority", "created", "updated"],
        });

        let json = self
            .send_json(
                self.client.post(&url).json(&body),
                &format!("tracker search for '{query}'"),
            )
            .await?;

        let issues = json
            .get("issues")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().map(|i| self.summary_from_value(i)).collect())
            .unwrap_or_default();

        Ok(issues)
    }

    async fn do_create(&self, issue: &NewIssue) -> Result<CreatedIssue, AgentError> {
        let url = format!("{}/rest/api/2/issue", self.config.base_url);
        // Custom field ids follow the tracker's Draft create screen.
        let body = serde_json::json!({
            "fields": {
                "project": {"key": issue.project},
                "summary": issue.summary,
                "issuetype": {"name": "Draft"},
                "description": issue.description,
                "customfield_11607": issue.steps_to_reproduce,
                "customfield_12610": {"value": issue.severity},
                "customfield_13002": issue.program,
                "customfield_13208": issue.system,
                "customfield_14200": issue.bios_version,
                "customfield_14307": issue.triage_category,
                "customfield_14308": issue.triage_assignment,
                "customfield_17000": issue.silicon_revision,
                "customfield_27209": issue.iod_silicon_die_revision,
                "customfield_27210": issue.ccd_silicon_die_revision,
            }
        });

        let json = self
            .send_json(
                self.client.post(&url).json(&body),
                &format!("tracker create in project '{}'", issue.project),
            )
            .await?;

        let key = str_at(&json, &["key"])
            .ok_or_else(|| AgentError::external("tracker create response had no key"))?;
        Ok(CreatedIssue {
            url: self.browse_url(&key),
            key,
        })
    }

    async fn do_get(&self, key: &str) -> Result<IssueDetails, AgentError> {
        let url = format!(
            "{}/rest/api/2/issue/{}?expand=comments",
            self.config.base_url, key
        );

        let json = self
            .send_json(self.client.get(&url), &format!("tracker get for '{key}'"))
            .await?;

        let fields = &json["fields"];
        let comments = fields
            .get("comment")
            .and_then(|c| c.get("comments"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .map(|c| Comment {
                        author: str_at(c, &["author", "displayName"])
                            .unwrap_or_else(|| "Unknown author".into()),
                        created: date_only(str_at(c, &["created"])),
                        body: str_at(c, &["body"]).unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(IssueDetails {
            key: key.to_string(),
            url: self.browse_url(key),
            project: str_at(fields, &["project", "key"]).unwrap_or_default(),
            program: str_at(fields, &["customfield_13002"]),
            summary: str_at(fields, &["summary"]).unwrap_or_default(),
            description: str_at(fields, &["description"]).unwrap_or_default(),
            status: str_at(fields, &["status", "name"]).unwrap_or_else(|| "Unknown".into()),
            resolution: str_at(fields, &["resolution", "name"])
                .unwrap_or_else(|| "Unresolved".into()),
            assignee: str_at(fields, &["assignee", "displayName"])
                .unwrap_or_else(|| "Unassigned".into()),
            created: date_only(str_at(fields, &["created"])),
            updated: date_only(str_at(fields, &["updated"])),
            comments,
        })
    }
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<IssueSummary>, AgentError> {
        with_retry(&self.retry, "tracker search", || self.do_search(query, limit)).await
    }

    async fn create(&self, issue: &NewIssue) -> Result<CreatedIssue, AgentError> {
        with_retry(&self.retry, "tracker create", || self.do_create(issue)).await
    }

    async fn get(&self, key: &str) -> Result<IssueDetails, AgentError> {
        with_retry(&self.retry, "tracker get", || self.do_get(key)).await
    }
}

fn str_at(value: &serde_json::Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for segment in path {
        current = current.get(segment)?;
    }
    current.as_str().map(|s| s.to_string())
}

/// Tracker timestamps arrive as ISO datetimes; display only wants the date.
fn date_only(value: Option<String>) -> String {
    match value {
        Some(s) if s.len() >= 10 => s[..10].to_string(),
        Some(s) => s,
        None => "Unknown".to_string(),
    }
}

/// Scripted tracker for tests. Search results are consumed per call;
/// created issues and executed queries are recorded for assertions.
pub struct FakeTrackerClient {
    search_results: Mutex<Vec<Vec<IssueSummary>>>,
    issues: Mutex<HashMap<String, IssueDetails>>,
    create_failures: Mutex<u32>,
    pub searches: Mutex<Vec<(String, u32)>>,
    pub created: Mutex<Vec<NewIssue>>,
}

impl FakeTrackerClient {
    pub fn new() -> Self {
        Self {
            search_results: Mutex::new(Vec::new()),
            issues: Mutex::new(HashMap::new()),
            create_failures: Mutex::new(0),
            searches: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Queue the result set for the next search call.
    pub fn queue_search(&self, results: Vec<IssueSummary>) {
        self.search_results.lock().unwrap().push(results);
    }

    pub fn insert_issue(&self, details: IssueDetails) {
        self.issues
            .lock()
            .unwrap()
            .insert(details.key.clone(), details);
    }

    /// Make the next `n` create calls fail.
    pub fn fail_creates(&self, n: u32) {
        *self.create_failures.lock().unwrap() = n;
    }

    pub fn executed_queries(&self) -> Vec<String> {
        self.searches
            .lock()
            .unwrap()
            .iter()
            .map(|(q, _)| q.clone())
            .collect()
    }
}

impl Default for FakeTrackerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrackerClient for FakeTrackerClient {
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<IssueSummary>, AgentError> {
        self.searches
            .lock()
            .unwrap()
            .push((query.to_string(), limit));
        let mut queued = self.search_results.lock().unwrap();
        if queued.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(queued.remove(0))
        }
    }

    async fn create(&self, issue: &NewIssue) -> Result<CreatedIssue, AgentError> {
        {
            let mut failures = self.create_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AgentError::external("tracker create failed"));
            }
        }
        let mut created = self.created.lock().unwrap();
        created.push(issue.clone());
        let key = format!("{}-{}", issue.project, 1000 + created.len());
        Ok(CreatedIssue {
            url: format!("http://tracker.example/browse/{key}"),
            key,
        })
    }

    async fn get(&self, key: &str) -> Result<IssueDetails, AgentError> {
        self.issues
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| AgentError::external(format!("ticket '{key}' not found")))
    }
}
