//! Tracker backends: the transport the record accessor talks to.

pub mod files;
pub mod jira;
pub mod lock;
pub mod memory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::TrackerConfig;
use crate::error::{MigrateError, Result};
use crate::model::{FieldValue, Payload, Record, RecordSummary, User};
use crate::schema::{AllowedValue, FieldCatalogue, FieldInfo, Schema};

pub use files::FileTracker;
pub use jira::JiraClient;
pub use memory::MemoryTracker;

/// Blocking operations against one tracker instance.
///
/// Implementations report failures as errors; the record accessor decides
/// which of them become boolean results.
pub trait Tracker {
    /// Human-readable location, for log lines.
    fn server(&self) -> &str;

    fn get_record(&self, key: &str) -> Result<Record>;

    /// Create a record and return it as stored (with its new key).
    fn create_record(&self, payload: &Payload) -> Result<Record>;

    fn update_record(&self, key: &str, fields: &Payload) -> Result<()>;

    fn add_comment(&self, key: &str, body: &str) -> Result<()>;

    fn search(&self, query: &Query) -> Result<Vec<RecordSummary>>;

    /// Global field catalogue.
    fn fields(&self) -> Result<Vec<FieldInfo>>;

    /// Nested create-meta structure for a project/issue-type pair
    /// (`projects[].issuetypes[].fields`).
    fn create_meta(&self, project: &str, issue_type: &str) -> Result<Value>;

    fn transitions(&self, key: &str) -> Result<Vec<Transition>>;

    fn transition(&self, key: &str, request: &TransitionRequest) -> Result<()>;

    fn find_users(&self, query: &str) -> Result<Vec<User>>;

    fn add_remote_link(&self, key: &str, url: &str, title: &str) -> Result<()>;
}

/// Search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Records in `project` whose `field` (by name) equals `value`.
    FieldEquals {
        project: String,
        field: String,
        value: String,
    },
    /// Backend-native query text (JQL for the REST client).
    Raw(String),
}

impl Query {
    pub fn field_equals(
        project: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::FieldEquals {
            project: project.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn to_jql(&self) -> String {
        match self {
            Self::FieldEquals {
                project,
                field,
                value,
            } => format!(
                "{} = \"{}\" AND project = \"{}\"",
                jql_field(field),
                escape_jql(value),
                escape_jql(project)
            ),
            Self::Raw(jql) => jql.clone(),
        }
    }
}

/// Custom field ids render as `cf[N]`; names and system ids are quoted.
fn jql_field(field: &str) -> String {
    match field.strip_prefix("customfield_") {
        Some(n) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => format!("cf[{n}]"),
        _ => format!("\"{}\"", escape_jql(field)),
    }
}

fn escape_jql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,
    pub name: String,
    /// Target status name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Allowed values per field id for fields the transition screen carries.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Vec<AllowedValue>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionRequest {
    pub transition_id: String,
    pub fields: Payload,
    pub comment: Option<String>,
}

/// Pick a backend from the configured server: `file://` paths open a
/// [`FileTracker`], anything else is treated as a REST endpoint.
pub fn connect(config: &TrackerConfig) -> Result<Box<dyn Tracker>> {
    if let Some(path) = config.server.strip_prefix("file://") {
        return Ok(Box::new(FileTracker::open(std::path::Path::new(path))?));
    }
    Ok(Box::new(JiraClient::new(config)?))
}

/// Project key and issue type a create payload targets.
pub(crate) fn create_target(payload: &Payload) -> Result<(String, String)> {
    let project = payload
        .get("project")
        .and_then(|p| p.get("key"))
        .and_then(Value::as_str)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| MigrateError::Rejected("project is required".into()))?;
    let issue_type = payload
        .get("issuetype")
        .and_then(|t| t.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok((project.to_string(), issue_type.to_string()))
}

/// Reject a create payload that leaves a required create-meta field unset,
/// the way a live tracker answers with a 400.
pub(crate) fn check_required(payload: &Payload, meta: &Value, project: &str, issue_type: &str) -> Result<()> {
    let schema = Schema::from_create_meta(meta, &FieldCatalogue::default(), project, issue_type);
    let missing: Vec<&str> = schema
        .fields(true)
        .filter(|d| !matches!(d.id.as_str(), "project" | "issuetype" | "reporter"))
        .filter(|d| payload.get(&d.id).is_none_or(Value::is_null))
        .map(|d| d.name.as_str())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(MigrateError::Rejected(format!(
            "required fields missing: {}",
            missing.join(", ")
        )))
    }
}

/// Evaluate a search query against a locally stored record.
pub(crate) fn record_matches(record: &Record, query: &Query, catalogue: &FieldCatalogue) -> Result<bool> {
    match query {
        Query::FieldEquals {
            project,
            field,
            value,
        } => {
            if &record.project != project {
                return Ok(false);
            }
            Ok(match record.fields.lookup(field, catalogue) {
                Some(FieldValue::List(items)) => items.iter().any(|i| i == value),
                Some(other) => other.display() == *value,
                None => false,
            })
        }
        Query::Raw(text) => Err(MigrateError::UnsupportedQuery(text.clone())),
    }
}
