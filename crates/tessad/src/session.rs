//! Creation sessions: multi-turn slot filling for new tickets.
//!
//! One draft per conversation, kept in an explicit session map with idle
//! expiry. Fields are collected one at a time in a fixed,
//! dependency-respecting order; setting the program fires a best-effort
//! duplicate pre-check; finalize submits to the tracker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{info, warn};

use tessa_common::llm::CompletionClient;
use tessa_common::tracker::{CreatedIssue, IssueSummary, NewIssue, TrackerClient};
use tessa_common::AgentError;

use crate::similarity::SimilarityPipeline;
use crate::vocab::{self, FieldKind};

/// Required draft fields, in the order they are prompted for.
pub const REQUIRED_FIELDS: &[&str] = &[
    "project",
    "program",
    "system",
    "summary",
    "severity",
    "triage_category",
    "triage_assignment",
    "silicon_revision",
    "iod_silicon_die_revision",
    "ccd_silicon_die_revision",
    "bios_version",
    "description",
    "steps_to_reproduce",
];

/// The question asked for one required field, with enumerated options
/// where the field has a static or parent-resolved vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPrompt {
    pub field: String,
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    Field(FieldPrompt),
    /// All required fields are set.
    ReadyToFinalize,
}

#[derive(Debug, Clone)]
pub struct SessionReply {
    pub step: NextStep,
    /// Likely duplicates surfaced by the mid-flow pre-check.
    pub duplicates: Vec<IssueSummary>,
}

#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    Created(CreatedIssue),
    /// Draft is complete but the caller did not confirm; nothing was
    /// submitted and the draft is retained.
    NotConfirmed,
}

#[derive(Debug)]
struct Draft {
    fields: HashMap<String, String>,
    duplicate_checked: bool,
    last_activity: Instant,
}

impl Draft {
    fn new() -> Self {
        Self {
            fields: HashMap::new(),
            duplicate_checked: false,
            last_activity: Instant::now(),
        }
    }

    fn first_missing(&self) -> Option<&'static str> {
        REQUIRED_FIELDS
            .iter()
            .find(|f| !self.fields.contains_key(**f))
            .copied()
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

fn normalize_field_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

fn title_case(field: &str) -> String {
    field
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn prompt_for(field: &'static str, draft: &Draft) -> FieldPrompt {
    let (question, options) = match field {
        "project" => (
            "Which project should this ticket go in?".to_string(),
            vocab::valid_options(FieldKind::Project, None).unwrap_or_default(),
        ),
        "program" => (
            "What program is this ticket for?".to_string(),
            vocab::valid_options(FieldKind::Program, None).unwrap_or_default(),
        ),
        "system" => {
            let program = draft.fields.get("program").cloned().unwrap_or_default();
            (
                format!("What system is this for (program: {program})?"),
                vocab::valid_options(FieldKind::System, Some(&program)).unwrap_or_default(),
            )
        }
        "severity" => (
            "What is the severity?".to_string(),
            vocab::valid_options(FieldKind::Severity, None).unwrap_or_default(),
        ),
        "triage_category" => (
            "What is the triage category?".to_string(),
            vocab::valid_options(FieldKind::TriageCategory, None).unwrap_or_default(),
        ),
        "triage_assignment" => {
            let category = draft
                .fields
                .get("triage_category")
                .cloned()
                .unwrap_or_default();
            (
                format!("What is the triage assignment (category: {category})?"),
                vocab::valid_options(FieldKind::TriageAssignment, Some(&category))
                    .unwrap_or_default(),
            )
        }
        "silicon_revision" => (
            "What is the silicon revision?".to_string(),
            vocab::valid_options(FieldKind::SiliconRevision, None).unwrap_or_default(),
        ),
        other => (
            format!("Next, please provide the '{}'.", title_case(other)),
            Vec::new(),
        ),
    };
    FieldPrompt {
        field: field.to_string(),
        question,
        options,
    }
}

fn next_step(draft: &Draft) -> NextStep {
    match draft.first_missing() {
        Some(field) => NextStep::Field(prompt_for(field, draft)),
        None => NextStep::ReadyToFinalize,
    }
}

/// Validate a field value through the registry, returning the canonical
/// form to store. Programs are stored as their code; dependent fields are
/// checked against the parent already in the draft.
fn validate_field_value(field: &str, value: &str, draft: &Draft) -> Result<String, AgentError> {
    let Some(kind) = vocab::kind_for_draft_field(field) else {
        return Ok(value.trim().to_string());
    };

    match kind {
        FieldKind::Program => {
            vocab::resolve(kind, value)?;
            Ok(vocab::program_code(value)
                .map(|code| code.to_string())
                .unwrap_or_else(|| value.trim().to_uppercase()))
        }
        FieldKind::System | FieldKind::TriageAssignment => {
            let parent_field = match kind {
                FieldKind::System => "program",
                _ => "triage_category",
            };
            let parent = draft.fields.get(parent_field).ok_or_else(|| {
                AgentError::validation(format!(
                    "Set the {} before the {}.",
                    parent_field.replace('_', " "),
                    field.replace('_', " ")
                ))
            })?;
            vocab::validate_dependent(kind, parent, value)
        }
        _ => vocab::resolve(kind, value),
    }
}

fn required_field(fields: &HashMap<String, String>, name: &str) -> Result<String, AgentError> {
    fields
        .get(name)
        .cloned()
        .ok_or_else(|| AgentError::MissingField(name.to_string()))
}

fn build_new_issue(fields: &HashMap<String, String>) -> Result<NewIssue, AgentError> {
    Ok(NewIssue {
        project: required_field(fields, "project")?,
        summary: required_field(fields, "summary")?,
        description: required_field(fields, "description")?,
        program: vocab::resolve(FieldKind::Program, &required_field(fields, "program")?)?,
        system: required_field(fields, "system")?,
        severity: required_field(fields, "severity")?,
        triage_category: required_field(fields, "triage_category")?,
        triage_assignment: required_field(fields, "triage_assignment")?,
        silicon_revision: required_field(fields, "silicon_revision")?,
        iod_silicon_die_revision: required_field(fields, "iod_silicon_die_revision")?,
        ccd_silicon_die_revision: required_field(fields, "ccd_silicon_die_revision")?,
        bios_version: required_field(fields, "bios_version")?,
        steps_to_reproduce: required_field(fields, "steps_to_reproduce")?,
    })
}

/// Per-conversation draft store.
pub struct SessionStore {
    tracker: Arc<dyn TrackerClient>,
    similarity: SimilarityPipeline,
    sessions: RwLock<HashMap<String, Draft>>,
    idle_expiry: Duration,
}

impl SessionStore {
    pub fn new(
        llm: Arc<dyn CompletionClient>,
        tracker: Arc<dyn TrackerClient>,
        idle_expiry: Duration,
    ) -> Self {
        Self {
            similarity: SimilarityPipeline::new(llm, tracker.clone()),
            tracker,
            sessions: RwLock::new(HashMap::new()),
            idle_expiry,
        }
    }

    /// Begin a draft, replacing any prior draft for the conversation.
    pub async fn start(
        &self,
        conversation: &str,
        summary: &str,
        project: &str,
    ) -> Result<SessionReply, AgentError> {
        let project = vocab::resolve(FieldKind::Project, project)?;

        let mut draft = Draft::new();
        draft.fields.insert("summary".to_string(), summary.to_string());
        draft.fields.insert("project".to_string(), project);
        let step = next_step(&draft);

        let mut sessions = self.sessions.write().await;
        sessions.insert(conversation.to_string(), draft);
        info!("started draft for conversation '{conversation}'");

        Ok(SessionReply {
            step,
            duplicates: Vec::new(),
        })
    }

    /// Set one draft field and return the next prompt, or the
    /// ready-to-finalize sentinel once the draft is complete.
    pub async fn set_field(
        &self,
        conversation: &str,
        name: &str,
        value: &str,
    ) -> Result<SessionReply, AgentError> {
        let field = normalize_field_name(name);
        if !REQUIRED_FIELDS.contains(&field.as_str()) {
            return Err(AgentError::validation(format!(
                "Unknown field '{field}'. Expected one of {REQUIRED_FIELDS:?}."
            )));
        }

        let (step, precheck) = {
            let mut sessions = self.sessions.write().await;
            self.drop_if_expired(&mut sessions, conversation);
            let draft = sessions.get_mut(conversation).ok_or_else(no_active_draft)?;
            draft.touch();

            // 'keep' retains the summary seeded at start.
            let keep_summary =
                field == "summary" && value.trim().eq_ignore_ascii_case("keep");
            if !keep_summary {
                let stored = validate_field_value(&field, value, draft)?;
                draft.fields.insert(field.clone(), stored);
            }

            // The pre-check fires once, when the program is first set.
            let precheck = if field == "program" && !draft.duplicate_checked {
                draft.duplicate_checked = true;
                let program = draft.fields.get("program").cloned().unwrap_or_default();
                Some((
                    draft.fields.get("summary").cloned().unwrap_or_default(),
                    draft.fields.get("project").cloned().unwrap_or_default(),
                    vocab::resolve(FieldKind::Program, &program).unwrap_or(program),
                ))
            } else {
                None
            };

            (next_step(draft), precheck)
        };

        let mut duplicates = Vec::new();
        if let Some((summary, project, program)) = precheck {
            // Best effort only. A failure here is logged and swallowed;
            // it never aborts the creation flow.
            match self
                .similarity
                .find_duplicates_for_draft(&summary, &project, &program)
                .await
            {
                Ok(verdicts) => {
                    duplicates = verdicts.into_iter().map(|v| v.issue).collect();
                    if !duplicates.is_empty() {
                        info!(
                            "duplicate pre-check found {} likely duplicates",
                            duplicates.len()
                        );
                    }
                }
                Err(err) => warn!("duplicate pre-check failed, continuing: {err}"),
            }
        }

        Ok(SessionReply { step, duplicates })
    }

    /// Submit a complete draft to the tracker.
    ///
    /// On tracker failure the draft is retained so the user can retry
    /// without re-entering every field.
    pub async fn finalize(
        &self,
        conversation: &str,
        confirmed: bool,
    ) -> Result<FinalizeOutcome, AgentError> {
        let issue = {
            let mut sessions = self.sessions.write().await;
            self.drop_if_expired(&mut sessions, conversation);
            let draft = sessions.get_mut(conversation).ok_or_else(no_active_draft)?;
            draft.touch();

            if let Some(missing) = draft.first_missing() {
                return Err(AgentError::MissingField(missing.to_string()));
            }
            if !confirmed {
                return Ok(FinalizeOutcome::NotConfirmed);
            }
            build_new_issue(&draft.fields)?
        };

        match self.tracker.create(&issue).await {
            Ok(created) => {
                self.sessions.write().await.remove(conversation);
                info!(
                    "created {} for conversation '{conversation}'",
                    created.key
                );
                Ok(FinalizeOutcome::Created(created))
            }
            Err(err) => {
                warn!("tracker create failed, draft retained: {err}");
                Err(err)
            }
        }
    }

    /// Drop the draft unconditionally.
    pub async fn cancel(&self, conversation: &str) -> bool {
        let removed = self.sessions.write().await.remove(conversation).is_some();
        if removed {
            info!("cancelled draft for conversation '{conversation}'");
        }
        removed
    }

    pub async fn active_drafts(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remove every idle draft; returns how many were dropped.
    pub async fn sweep_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, draft| !self.is_expired(draft));
        before - sessions.len()
    }

    fn is_expired(&self, draft: &Draft) -> bool {
        !self.idle_expiry.is_zero() && draft.last_activity.elapsed() > self.idle_expiry
    }

    fn drop_if_expired(&self, sessions: &mut HashMap<String, Draft>, conversation: &str) {
        if let Some(draft) = sessions.get(conversation) {
            if self.is_expired(draft) {
                info!("expiring idle draft for conversation '{conversation}'");
                sessions.remove(conversation);
            }
        }
    }
}

fn no_active_draft() -> AgentError {
    AgentError::validation(
        "No ticket creation is in progress for this conversation. Start one first.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_field_name() {
        assert_eq!(normalize_field_name("Triage Category"), "triage_category");
        assert_eq!(normalize_field_name("  BIOS Version "), "bios_version");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("bios_version"), "Bios Version");
        assert_eq!(title_case("steps_to_reproduce"), "Steps To Reproduce");
    }

    #[test]
    fn test_first_missing_follows_fixed_order() {
        let mut draft = Draft::new();
        assert_eq!(draft.first_missing(), Some("project"));
        draft.fields.insert("project".into(), "PLAT".into());
        draft.fields.insert("summary".into(), "Crash on boot".into());
        assert_eq!(draft.first_missing(), Some("program"));
    }

    #[test]
    fn test_prompt_options_resolve_against_parent() {
        let mut draft = Draft::new();
        draft.fields.insert("program".into(), "STXH".into());
        let prompt = prompt_for("system", &draft);
        assert_eq!(prompt.options.len(), 2);
        assert!(prompt.question.contains("STXH"));

        // Unknown parent: no options rather than an error.
        draft.fields.insert("program".into(), "???".into());
        let prompt = prompt_for("system", &draft);
        assert!(prompt.options.is_empty());
    }

    #[test]
    fn test_validate_field_value_stores_program_code() {
        let mut draft = Draft::new();
        assert_eq!(
            validate_field_value("program", "stxh", &draft).unwrap(),
            "STXH"
        );
        assert_eq!(
            validate_field_value("program", "Strix Halo [PRG-000391]", &draft).unwrap(),
            "STXH"
        );

        draft.fields.insert("program".into(), "STXH".into());
        assert!(validate_field_value("system", "System-Strix1 FP8 APU", &draft).is_err());
        assert!(
            validate_field_value("system", "System-Strix Halo Reference Board", &draft).is_ok()
        );
    }

    #[test]
    fn test_dependent_field_requires_parent_first() {
        let draft = Draft::new();
        let err = validate_field_value("system", "anything", &draft).unwrap_err();
        assert!(err.to_string().contains("program"));
    }

    #[test]
    fn test_free_text_fields_pass_through() {
        let draft = Draft::new();
        assert_eq!(
            validate_field_value("bios_version", " 1.2.3 ", &draft).unwrap(),
            "1.2.3"
        );
    }
}
