//! Record accessor: one bound record plus the boolean-returning operations
//! batch drivers and the migration engine call against it.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::error::{MigrateError, Result};
use crate::model::{Comment, Payload, Record, RecordSummary, Status};
use crate::schema::{FieldCatalogue, SchemaCache};
use crate::tracker::{Query, Tracker, Transition, TransitionRequest};

/// Destination field written by `transition(.., target)`.
pub const TARGET_RELEASE_FIELD: &str = "Target Release";

const DEFAULT_RESOLUTION_FIELD: &str = "Resolution";

pub struct RecordAccessor<'a> {
    tracker: &'a dyn Tracker,
    schema: &'a SchemaCache<'a>,
    resolution_field: String,
    current: Option<Record>,
    transitions: Vec<Transition>,
    last_error: Option<MigrateError>,
}

impl<'a> RecordAccessor<'a> {
    pub fn new(tracker: &'a dyn Tracker, schema: &'a SchemaCache<'a>) -> Self {
        Self {
            tracker,
            schema,
            resolution_field: DEFAULT_RESOLUTION_FIELD.into(),
            current: None,
            transitions: Vec::new(),
            last_error: None,
        }
    }

    pub fn with_resolution_field(mut self, name: impl Into<String>) -> Self {
        self.resolution_field = name.into();
        self
    }

    pub fn current(&self) -> Option<&Record> {
        self.current.as_ref()
    }

    pub fn key(&self) -> Option<&str> {
        self.current.as_ref().map(|r| r.key.as_str())
    }

    /// Error behind the most recent failed fetch or create.
    pub fn last_error(&self) -> Option<&MigrateError> {
        self.last_error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<MigrateError> {
        self.last_error.take()
    }

    pub fn catalogue(&self) -> &FieldCatalogue {
        self.schema.catalogue()
    }

    /// Fetch `key` and bind it. On failure the accessor is left unbound.
    pub fn fetch(&mut self, key: &str) -> bool {
        self.transitions.clear();
        match self.tracker.get_record(key) {
            Ok(record) => {
                debug!(key = %key, status = %record.status, "record retrieved");
                self.current = Some(record);
                true
            }
            Err(err @ MigrateError::RecordNotFound(_)) => {
                error!(key = %key, "record not found");
                self.current = None;
                self.last_error = Some(err);
                false
            }
            Err(err) => {
                error!(key = %key, error = %err, "failed to retrieve record");
                self.current = None;
                self.last_error = Some(err);
                false
            }
        }
    }

    /// Create a record and bind the result.
    pub fn create(&mut self, payload: &Payload) -> bool {
        match self.tracker.create_record(payload) {
            Ok(record) => {
                info!(key = %record.key, "record created");
                self.transitions.clear();
                self.current = Some(record);
                true
            }
            Err(err) => {
                error!(error = %err, "failed to create record");
                self.last_error = Some(err);
                false
            }
        }
    }

    /// Update the bound record. Keys may be field names or ids; names are
    /// resolved through the field catalogue.
    pub fn update(&mut self, values: Payload) -> bool {
        let Some(key) = self.bound_key("update") else {
            return false;
        };
        let catalogue = self.schema.catalogue();
        let resolved: Payload = values
            .into_iter()
            .map(|(field, value)| (catalogue.resolve_id(&field).to_string(), value))
            .collect();
        match self.tracker.update_record(&key, &resolved) {
            Ok(()) => {
                debug!(key = %key, fields = ?resolved.keys().collect::<Vec<_>>(), "record updated");
                if let Some(record) = self.current.as_mut() {
                    record.apply_payload(&resolved);
                }
                true
            }
            Err(err) => {
                error!(key = %key, error = %err, "failed to update record");
                self.last_error = Some(err);
                false
            }
        }
    }

    pub fn update_field(&mut self, field: &str, value: Value) -> bool {
        let mut values = Payload::new();
        values.insert(field.to_string(), value);
        self.update(values)
    }

    pub fn add_comment(&mut self, text: &str) -> bool {
        let Some(key) = self.bound_key("comment") else {
            return false;
        };
        match self.tracker.add_comment(&key, text) {
            Ok(()) => {
                info!(key = %key, "added comment");
                debug!(comment = text);
                true
            }
            Err(err) => {
                error!(key = %key, error = %err, "failed to add comment");
                self.last_error = Some(err);
                false
            }
        }
    }

    /// Run a query. Errors are returned, not swallowed, so callers can tell
    /// a failed query from an empty one.
    pub fn search(&self, query: &Query) -> Result<Vec<RecordSummary>> {
        let hits = self.tracker.search(query)?;
        for hit in &hits {
            debug!(key = %hit.key, "matched record");
        }
        Ok(hits)
    }

    pub fn jql_query(&self, jql: &str) -> Result<Vec<RecordSummary>> {
        self.search(&Query::Raw(jql.to_string()))
    }

    pub fn reporter_id(&self) -> Option<&str> {
        let Some(record) = self.current.as_ref() else {
            warn!("no record bound, fetch one first");
            return None;
        };
        let id = record.reporter.as_ref().map(|u| u.account_id.as_str());
        if let Some(id) = id {
            debug!(reporter = id);
        }
        id
    }

    pub fn update_reporter(&mut self, account_id: &str) -> bool {
        if account_id.trim().is_empty() {
            warn!("no account id supplied");
            return false;
        }
        let ok = self.update_field("reporter", json!({ "accountId": account_id }));
        if ok {
            info!(key = ?self.key(), "reporter updated");
        }
        ok
    }

    /// Look the user up by email and make them reporter. An exact email match
    /// wins over the first search hit.
    pub fn update_reporter_by_email(&mut self, email: &str) -> bool {
        let users = match self.tracker.find_users(email) {
            Ok(users) => users,
            Err(err) => {
                error!(email, error = %err, "user search failed");
                self.last_error = Some(err);
                return false;
            }
        };
        let user = users
            .iter()
            .find(|u| u.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .or_else(|| users.first());
        match user {
            Some(user) => {
                let account_id = user.account_id.clone();
                self.update_reporter(&account_id)
            }
            None => {
                warn!(email, "no user found");
                self.last_error = Some(MigrateError::UserNotFound(email.to_string()));
                false
            }
        }
    }

    pub fn comments(&self) -> &[Comment] {
        self.current
            .as_ref()
            .map(|r| r.comments.as_slice())
            .unwrap_or_default()
    }

    /// Account id of the author of comment `index`.
    pub fn comment_author(&self, index: usize) -> Option<&str> {
        let comment = self.comments().get(index);
        if comment.is_none() {
            error!(index, "no such comment");
        }
        comment.and_then(|c| c.author_id.as_deref())
    }

    pub fn status(&self) -> Option<&Status> {
        self.current.as_ref().map(|r| &r.status)
    }

    /// Load the transitions available from the bound record's status.
    pub fn transitions(&mut self) -> bool {
        let Some(key) = self.bound_key("list transitions for") else {
            return false;
        };
        match self.tracker.transitions(&key) {
            Ok(list) => {
                debug!(key = %key, count = list.len(), "transitions retrieved");
                self.transitions = list;
                true
            }
            Err(err) => {
                error!(key = %key, error = %err, "failed to retrieve transitions");
                self.last_error = Some(err);
                false
            }
        }
    }

    /// Id of the named transition among those loaded by [`Self::transitions`].
    pub fn transition_id(&self, name: &str) -> Option<String> {
        let id = self
            .transitions
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .map(|t| t.id.clone());
        if id.is_none() {
            warn!(key = ?self.key(), transition = name, "transition not available");
        }
        id
    }

    /// Id of `resolution` among the values the transition's resolution field allows.
    pub fn resolution_id(&self, transition_id: &str, resolution: &str) -> Option<String> {
        let field = self.resolution_field_id();
        let id = self
            .transitions
            .iter()
            .find(|t| t.id == transition_id)
            .and_then(|t| t.fields.get(&field))
            .and_then(|allowed| allowed.iter().find(|v| v.label.eq_ignore_ascii_case(resolution)))
            .and_then(|v| v.id.clone());
        if id.is_none() {
            warn!(key = ?self.key(), resolution, "resolution not found for transition");
        }
        id
    }

    fn resolution_field_id(&self) -> String {
        match self.schema.field_id_for(&self.resolution_field) {
            Some(id) => id.to_string(),
            None => self.resolution_field.to_lowercase(),
        }
    }

    /// Move the bound record through `transition_id`. A resolution id sets
    /// the resolution field; a target sets the target release.
    pub fn transition(
        &mut self,
        transition_id: &str,
        resolution_id: Option<&str>,
        comment: Option<&str>,
        target: Option<&str>,
    ) -> bool {
        let Some(key) = self.bound_key("transition") else {
            return false;
        };
        let mut fields = Payload::new();
        if let Some(r_id) = resolution_id {
            fields.insert(self.resolution_field_id(), json!({ "id": r_id }));
        }
        if let Some(target) = target {
            let field = self.schema.catalogue().resolve_id(TARGET_RELEASE_FIELD).to_string();
            fields.insert(field, json!([{ "name": target }]));
        }
        let request = TransitionRequest {
            transition_id: transition_id.to_string(),
            fields,
            comment: comment.filter(|c| !c.is_empty()).map(str::to_string),
        };
        match self.tracker.transition(&key, &request) {
            Ok(()) => {
                info!(key = %key, transition = transition_id, "transitioned");
                self.fetch(&key);
                true
            }
            Err(err) => {
                error!(key = %key, error = %err, "transition failed");
                self.last_error = Some(err);
                false
            }
        }
    }

    pub fn add_web_link(&mut self, url: &str, title: &str) -> bool {
        let Some(key) = self.bound_key("link") else {
            return false;
        };
        match self.tracker.add_remote_link(&key, url, title) {
            Ok(()) => {
                info!(key = %key, url, "added web link");
                true
            }
            Err(err) => {
                error!(key = %key, error = %err, "failed to add web link");
                self.last_error = Some(err);
                false
            }
        }
    }

    /// `key`, `status` and each requested field that has a value.
    pub fn summarise(&self, fields: &[String]) -> BTreeMap<String, String> {
        let mut summary = BTreeMap::new();
        let Some(record) = self.current.as_ref() else {
            return summary;
        };
        summary.insert("key".to_string(), record.key.clone());
        summary.insert("status".to_string(), record.status.name.clone());
        for field in fields {
            if let Some(value) = self.field_display(record, field) {
                summary.insert(field.clone(), value);
            }
        }
        summary
    }

    /// Field name -> value for the bound record. Without `all_fields` only the
    /// fields in the record's own project/issue-type schema are shown; if that
    /// schema is unavailable every field is shown.
    pub fn output(&self, all_fields: bool) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let Some(record) = self.current.as_ref() else {
            warn!("no record bound, fetch one first");
            return out;
        };
        let schema = self.schema.schema_for(&record.project, &record.issue_type);
        let everything = all_fields || schema.is_empty();
        if !all_fields && schema.is_empty() {
            warn!(project = %record.project, issue_type = %record.issue_type,
                "schema unavailable, showing all fields");
        }
        let catalogue = self.schema.catalogue();

        let mut put = |id: &str, value: String| {
            if value.is_empty() {
                return;
            }
            if everything || schema.get_by_id(id).is_some() {
                let name = catalogue.name_for(id).unwrap_or(id).to_string();
                out.insert(name, value);
            }
        };
        put("summary", record.summary.clone());
        put("status", record.status.name.clone());
        put("description", record.description.clone().unwrap_or_default());
        put(
            "reporter",
            record.reporter.as_ref().map(|u| u.label().to_string()).unwrap_or_default(),
        );
        put("versions", record.versions.join(", "));
        put("components", record.components.join(", "));
        for (id, value) in record.fields.iter() {
            put(id, value.display());
        }
        out
    }

    /// Nested create-meta for a project/issue-type pair.
    pub fn schema(&self, project: &str, issue_type: &str) -> Result<Value> {
        self.tracker.create_meta(project, issue_type)
    }

    fn field_display(&self, record: &Record, field: &str) -> Option<String> {
        let catalogue = self.schema.catalogue();
        let id = catalogue.resolve_id(field);
        let value = match id.to_lowercase().as_str() {
            "summary" => Some(record.summary.clone()),
            "status" => Some(record.status.name.clone()),
            "description" => record.description.clone(),
            "reporter" => record.reporter.as_ref().map(|u| u.label().to_string()),
            "versions" => Some(record.versions.join(", ")),
            "components" => Some(record.components.join(", ")),
            _ => record.fields.lookup(field, catalogue).map(|v| v.display()),
        };
        value.filter(|v| !v.is_empty())
    }

    fn bound_key(&mut self, action: &str) -> Option<String> {
        let key = self.key().map(str::to_string);
        if key.is_none() {
            warn!("cannot {action}: no record bound, fetch one first");
            self.last_error = Some(MigrateError::NoCurrentRecord);
        }
        key
    }
}
