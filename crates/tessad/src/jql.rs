//! Query compilation.
//!
//! Turns validated `QueryParameters` into the tracker's boolean
//! filter-and-order expression: an `AND` conjunction of equality,
//! set-membership, text-match and date-comparison clauses with an
//! optional trailing `ORDER BY`. Compilation is deterministic and fails
//! closed: zero filter clauses is an error, not a full scan.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tessa_common::AgentError;

use crate::extract::{OneOrMany, QueryParameters};
use crate::vocab::{self, FieldKind};

/// Join operator between keyword sub-clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeywordJoin {
    And,
    #[default]
    Or,
}

impl KeywordJoin {
    fn separator(self) -> &'static str {
        match self {
            KeywordJoin::And => " AND ",
            KeywordJoin::Or => " OR ",
        }
    }
}

/// Statuses treated as open-like for staleness queries.
pub const OPEN_STATUSES: &[&str] = &["Open", "To Do", "In Progress", "Reopened", "Blocked"];

static RELATIVE_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-[1-9][0-9]*[dw]$").unwrap());

/// Accepted date forms: absolute `YYYY-MM-DD` (a real calendar date) or a
/// relative offset `-<N>[d|w]`.
fn is_valid_query_date(value: &str) -> bool {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok() || RELATIVE_DATE_RE.is_match(value)
}

/// The target grammar has no month or year units; convert to days.
fn convert_to_relative_days(number: i64, unit: &str) -> Option<String> {
    let unit = unit.to_lowercase();
    let days = if unit.contains("year") {
        number.checked_mul(365)?
    } else if unit.contains("month") {
        number.checked_mul(30)?
    } else if unit.contains("week") {
        number.checked_mul(7)?
    } else if unit.contains("day") {
        number
    } else {
        return None;
    };
    if days <= 0 {
        return None;
    }
    Some(format!("-{days}d"))
}

/// The tracker stores user names as "Last, First". A plain two-token name
/// is reformatted; anything already containing a comma, the current-user
/// token, or an unusual token count passes through unchanged.
fn format_name(name: &str) -> String {
    if name == "currentUser()" || name.contains(',') {
        return name.to_string();
    }
    let parts: Vec<&str> = name.split_whitespace().collect();
    if parts.len() == 2 {
        format!("{}, {}", parts[1], parts[0])
    } else {
        name.to_string()
    }
}

fn user_clause(field: &str, name: &str) -> String {
    let formatted = format_name(name.trim());
    if formatted == "currentUser()" {
        format!("{field} = {formatted}")
    } else {
        format!("{field} = \"{formatted}\"")
    }
}

fn nonempty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn validate_date_field(field: &str) -> Result<&str, AgentError> {
    match field {
        "created" | "updated" => Ok(field),
        other => Err(AgentError::validation(format!(
            "Unknown date field '{other}'. Must be 'created' or 'updated'."
        ))),
    }
}

/// Compile parameters into a query string.
///
/// `exclude_key` appends an inequality clause so similarity searches can
/// omit their source record.
pub fn compile(
    params: &QueryParameters,
    exclude_key: Option<&str>,
    keyword_join: KeywordJoin,
) -> Result<String, AgentError> {
    let mut clauses: Vec<String> = Vec::new();

    if let Some(project) = nonempty(&params.project) {
        let label = vocab::resolve(FieldKind::Project, project)?;
        clauses.push(format!("project = '{label}'"));
    }

    if let Some(key) = exclude_key {
        clauses.push(format!("key != '{key}'"));
    }

    match &params.priority {
        Some(OneOrMany::Many(list)) => {
            let mut labels = Vec::new();
            for raw in list {
                match vocab::resolve(FieldKind::Priority, raw) {
                    Ok(label) => labels.push(format!("\"{label}\"")),
                    Err(_) => warn!("invalid priority '{}' in list ignored", raw),
                }
            }
            if !labels.is_empty() {
                clauses.push(format!("priority in ({})", labels.join(", ")));
            }
        }
        Some(OneOrMany::One(raw)) if !raw.trim().is_empty() => {
            let label = vocab::resolve(FieldKind::Priority, raw)?;
            clauses.push(format!("priority = \"{label}\""));
        }
        _ => {}
    }

    if let Some(program) = nonempty(&params.program) {
        let label = vocab::resolve(FieldKind::Program, program)?;
        clauses.push(format!("program = '{label}'"));
    }

    if let Some(stale_raw) = nonempty(&params.stale_days) {
        // Staleness overrides every other date constraint.
        let days: u32 = stale_raw.parse().map_err(|_| {
            AgentError::validation(format!(
                "The value for stale_days '{stale_raw}' is not a valid number."
            ))
        })?;
        let status_list = OPEN_STATUSES
            .iter()
            .map(|s| format!("\"{s}\""))
            .collect::<Vec<_>>()
            .join(", ");
        clauses.push(format!("status in ({status_list}) AND updated < '-{days}d'"));
    } else if let (Some(number), Some(unit), Some(field), Some(operator)) = (
        params.date_number,
        nonempty(&params.date_unit),
        nonempty(&params.date_field),
        nonempty(&params.date_operator),
    ) {
        let date = convert_to_relative_days(number, unit).ok_or_else(|| {
            AgentError::validation(format!("Could not understand the date unit '{unit}'."))
        })?;
        let field = validate_date_field(field)?;
        let op = match operator {
            "after" => ">=",
            "before" => "<=",
            other => {
                return Err(AgentError::validation(format!(
                    "Unknown date operator '{other}'. Must be 'after' or 'before'."
                )))
            }
        };
        clauses.push(format!("{field} {op} '{date}'"));
    } else {
        let date_fields = [
            ("created", ">=", &params.created_after),
            ("created", "<=", &params.created_before),
            ("updated", ">=", &params.updated_after),
            ("updated", "<=", &params.updated_before),
        ];
        for (field, op, value) in date_fields {
            if let Some(date) = nonempty(value) {
                if !is_valid_query_date(date) {
                    return Err(AgentError::validation(format!(
                        "Invalid date '{date}' for {field}. Use YYYY-MM-DD or a relative \
                         offset like '-30d' or '-4w'."
                    )));
                }
                clauses.push(format!("{field} {op} '{date}'"));
            }
        }
    }

    if let Some(assignee) = nonempty(&params.assignee) {
        clauses.push(user_clause("assignee", assignee));
    }
    if let Some(reporter) = nonempty(&params.reporter) {
        clauses.push(user_clause("reporter", reporter));
    }

    if let Some(keywords) = &params.keywords {
        let tokens: Vec<String> = match keywords {
            OneOrMany::Many(list) => list
                .iter()
                .map(|kw| kw.trim().to_string())
                .filter(|kw| !kw.is_empty())
                .collect(),
            OneOrMany::One(text) => text
                .replace(',', " ")
                .split_whitespace()
                .map(|kw| kw.to_string())
                .collect(),
        };
        let parts: Vec<String> = tokens
            .iter()
            .map(|kw| format!("(summary ~ \"{kw}\" OR description ~ \"{kw}\")"))
            .collect();
        if !parts.is_empty() {
            clauses.push(format!("({})", parts.join(keyword_join.separator())));
        }
    }

    if clauses.is_empty() {
        return Err(AgentError::QueryTooBroad);
    }

    let order_direction = params
        .order
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_uppercase();
    let order_clause = if order_direction == "ASC" || order_direction == "DESC" {
        format!(" ORDER BY updated {order_direction}")
    } else if nonempty(&params.stale_days).is_some() {
        " ORDER BY updated ASC".to_string()
    } else {
        " ORDER BY created DESC".to_string()
    };

    let query = format!("{}{}", clauses.join(" AND "), order_clause);
    info!("compiled query: {}", query);
    Ok(query)
}
