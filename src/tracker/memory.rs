use std::cell::RefCell;
use std::collections::HashMap;

use chrono::Utc;
use serde_json::{Value, json};

use super::{Query, Tracker, Transition, TransitionRequest, check_required, create_target, record_matches};
use crate::error::{MigrateError, Result};
use crate::model::{Comment, Payload, Record, RecordSummary, User};
use crate::schema::{FieldCatalogue, FieldInfo};

/// Operations a [`MemoryTracker`] can be told to fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Failures {
    pub create: bool,
    pub update: bool,
    pub comment: bool,
    pub search: bool,
    pub fields: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLink {
    pub key: String,
    pub url: String,
    pub title: String,
}

#[derive(Default)]
struct State {
    /// Insertion order doubles as the native search order.
    records: Vec<Record>,
    counters: HashMap<String, u64>,
    fields: Vec<FieldInfo>,
    meta: HashMap<(String, String), Value>,
    users: Vec<User>,
    transitions: Vec<Transition>,
    links: Vec<RemoteLink>,
    failures: Failures,
    creates: usize,
    meta_fetches: usize,
    field_fetches: usize,
}

/// In-process tracker for tests and rehearsals.
pub struct MemoryTracker {
    author: String,
    state: RefCell<State>,
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self {
            author: "issue-migrate".into(),
            state: RefCell::new(State::default()),
        }
    }

    pub fn add_field(&self, id: impl Into<String>, name: impl Into<String>) {
        self.state.borrow_mut().fields.push(FieldInfo {
            id: id.into(),
            name: name.into(),
        });
    }

    /// Register the create-meta `fields` object for a project/issue-type pair.
    pub fn set_create_meta(&self, project: &str, issue_type: &str, fields: Value) {
        self.state
            .borrow_mut()
            .meta
            .insert((project.to_string(), issue_type.to_string()), fields);
    }

    pub fn insert(&self, record: Record) {
        let mut state = self.state.borrow_mut();
        state.records.retain(|r| r.key != record.key);
        state.records.push(record);
    }

    pub fn add_user(&self, user: User) {
        self.state.borrow_mut().users.push(user);
    }

    pub fn set_transitions(&self, transitions: Vec<Transition>) {
        self.state.borrow_mut().transitions = transitions;
    }

    pub fn set_failures(&self, failures: Failures) {
        self.state.borrow_mut().failures = failures;
    }

    pub fn record(&self, key: &str) -> Option<Record> {
        self.state
            .borrow()
            .records
            .iter()
            .find(|r| r.key == key)
            .cloned()
    }

    pub fn records_in(&self, project: &str) -> Vec<Record> {
        self.state
            .borrow()
            .records
            .iter()
            .filter(|r| r.project == project)
            .cloned()
            .collect()
    }

    /// Successful create calls so far.
    pub fn create_count(&self) -> usize {
        self.state.borrow().creates
    }

    /// Create-meta and field catalogue requests served so far.
    pub fn fetch_counts(&self) -> (usize, usize) {
        let state = self.state.borrow();
        (state.meta_fetches, state.field_fetches)
    }

    pub fn links(&self) -> Vec<RemoteLink> {
        self.state.borrow().links.clone()
    }

    fn meta_value(&self, project: &str, issue_type: &str) -> Value {
        let state = self.state.borrow();
        match state.meta.get(&(project.to_string(), issue_type.to_string())) {
            Some(fields) => json!({"projects": [{"key": project, "issuetypes": [
                {"name": issue_type, "fields": fields}
            ]}]}),
            None => json!({"projects": []}),
        }
    }

    fn with_record<T>(&self, key: &str, f: impl FnOnce(&mut Record) -> T) -> Result<T> {
        let mut state = self.state.borrow_mut();
        let record = state
            .records
            .iter_mut()
            .find(|r| r.key == key)
            .ok_or_else(|| MigrateError::RecordNotFound(key.to_string()))?;
        Ok(f(record))
    }

    fn resolve_user(&self, user: &User) -> User {
        self.state
            .borrow()
            .users
            .iter()
            .find(|u| u.account_id == user.account_id)
            .cloned()
            .unwrap_or_else(|| user.clone())
    }
}

impl Tracker for MemoryTracker {
    fn server(&self) -> &str {
        "memory"
    }

    fn get_record(&self, key: &str) -> Result<Record> {
        self.record(key)
            .ok_or_else(|| MigrateError::RecordNotFound(key.to_string()))
    }

    fn create_record(&self, payload: &Payload) -> Result<Record> {
        if self.state.borrow().failures.create {
            return Err(MigrateError::Rejected("create disabled".into()));
        }
        let (project, issue_type) = create_target(payload)?;
        check_required(payload, &self.meta_value(&project, &issue_type), &project, &issue_type)?;

        let mut record = {
            let mut state = self.state.borrow_mut();
            let n = state.counters.entry(project.clone()).or_insert(0);
            *n += 1;
            Record::from_payload(format!("{project}-{n}"), payload)
        };
        if let Some(reporter) = record.reporter.take() {
            record.reporter = Some(self.resolve_user(&reporter));
        }
        record.status.name = "Open".into();

        let mut state = self.state.borrow_mut();
        state.creates += 1;
        state.records.push(record.clone());
        Ok(record)
    }

    fn update_record(&self, key: &str, fields: &Payload) -> Result<()> {
        if self.state.borrow().failures.update {
            return Err(MigrateError::Rejected("update disabled".into()));
        }
        let reporter = self.with_record(key, |r| {
            r.apply_payload(fields);
            r.reporter.clone()
        })?;
        if let Some(reporter) = reporter {
            let resolved = self.resolve_user(&reporter);
            self.with_record(key, |r| r.reporter = Some(resolved))?;
        }
        Ok(())
    }

    fn add_comment(&self, key: &str, body: &str) -> Result<()> {
        if self.state.borrow().failures.comment {
            return Err(MigrateError::Rejected("comments disabled".into()));
        }
        let author = self.author.clone();
        self.with_record(key, |r| {
            r.comments.push(Comment {
                author,
                author_id: None,
                created: Utc::now(),
                body: body.to_string(),
            })
        })
    }

    fn search(&self, query: &Query) -> Result<Vec<RecordSummary>> {
        let state = self.state.borrow();
        if state.failures.search {
            return Err(MigrateError::Transport("search disabled".into()));
        }
        let catalogue = FieldCatalogue::from_fields(state.fields.clone());
        let mut hits = Vec::new();
        for record in &state.records {
            if record_matches(record, query, &catalogue)? {
                hits.push(record.summary_line());
            }
        }
        Ok(hits)
    }

    fn fields(&self) -> Result<Vec<FieldInfo>> {
        let mut state = self.state.borrow_mut();
        state.field_fetches += 1;
        if state.failures.fields {
            return Err(MigrateError::Transport("fields disabled".into()));
        }
        Ok(state.fields.clone())
    }

    fn create_meta(&self, project: &str, issue_type: &str) -> Result<Value> {
        self.state.borrow_mut().meta_fetches += 1;
        Ok(self.meta_value(project, issue_type))
    }

    fn transitions(&self, key: &str) -> Result<Vec<Transition>> {
        self.get_record(key)?;
        Ok(self.state.borrow().transitions.clone())
    }

    fn transition(&self, key: &str, request: &TransitionRequest) -> Result<()> {
        let transition = self
            .state
            .borrow()
            .transitions
            .iter()
            .find(|t| t.id == request.transition_id)
            .cloned()
            .ok_or_else(|| {
                MigrateError::TransitionUnavailable(key.to_string(), request.transition_id.clone())
            })?;
        self.with_record(key, |r| {
            r.apply_payload(&request.fields);
            if let Some(to) = &transition.to {
                r.status.name = to.clone();
                r.status.id = transition.id.clone();
            }
        })?;
        if let Some(comment) = &request.comment {
            self.add_comment(key, comment)?;
        }
        Ok(())
    }

    fn find_users(&self, query: &str) -> Result<Vec<User>> {
        let needle = query.to_lowercase();
        Ok(self
            .state
            .borrow()
            .users
            .iter()
            .filter(|u| user_matches(u, &needle))
            .cloned()
            .collect())
    }

    fn add_remote_link(&self, key: &str, url: &str, title: &str) -> Result<()> {
        self.get_record(key)?;
        self.state.borrow_mut().links.push(RemoteLink {
            key: key.to_string(),
            url: url.to_string(),
            title: title.to_string(),
        });
        Ok(())
    }
}

/// Case-insensitive match on account id, email or display name.
pub(crate) fn user_matches(user: &User, needle: &str) -> bool {
    user.account_id.to_lowercase() == needle
        || user.email.as_deref().is_some_and(|e| e.to_lowercase() == needle)
        || user
            .display_name
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(needle))
}
