use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::lock::LockGuard;
use super::memory::user_matches;
use super::{Query, Tracker, Transition, TransitionRequest, check_required, create_target, record_matches};
use crate::error::{MigrateError, Result};
use crate::model::{Comment, Payload, Record, RecordSummary, User};
use crate::schema::{FieldCatalogue, FieldInfo};

/// Tracker kept as a directory of JSON files.
///
/// On-disk layout:
///   - `tracker.json`          marker with the store version
///   - `counter.json`          next key number per project
///   - `records/{KEY}.json`    one record per file
///   - `fields.json`           global field catalogue
///   - `meta/{PROJECT}.json`   create-meta `fields` object per issue type
///   - `users.json`            known accounts
///   - `transitions.json`      workflow transitions offered on every record
///   - `links/{KEY}.json`      remote links
pub struct FileTracker {
    root: PathBuf,
    label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Link {
    url: String,
    title: String,
}

impl FileTracker {
    /// Open an existing store.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.join("tracker.json").exists() {
            return Err(MigrateError::NotInitialized(root.display().to_string()));
        }
        Ok(Self::at(root))
    }

    /// Initialize an empty store.
    pub fn init(root: &Path) -> Result<Self> {
        if root.join("tracker.json").exists() {
            return Err(MigrateError::AlreadyInitialized(root.display().to_string()));
        }

        fs::create_dir_all(root.join("records"))?;
        fs::create_dir_all(root.join("meta"))?;
        fs::write(root.join("counter.json"), "{}")?;
        fs::write(root.join("fields.json"), "[]")?;
        fs::write(root.join("users.json"), "[]")?;
        fs::write(root.join("transitions.json"), "[]")?;
        fs::write(root.join("tracker.json"), r#"{"version": 1}"#)?;

        Ok(Self::at(root))
    }

    fn at(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            label: format!("file://{}", root.display()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(MigrateError::InvalidInput(format!("bad record key '{key}'")));
        }
        Ok(self.root.join("records").join(format!("{key}.json")))
    }

    fn meta_path(&self, project: &str) -> PathBuf {
        self.root.join("meta").join(format!("{project}.json"))
    }

    fn read_json<T: serde::de::DeserializeOwned + Default>(&self, path: &Path) -> Result<T> {
        if !path.exists() {
            return Ok(T::default());
        }
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(value)?)?;
        Ok(())
    }

    fn next_key(&self, project: &str) -> Result<String> {
        let _lock = LockGuard::acquire(&self.root.join("counter.lock"))?;
        let path = self.root.join("counter.json");
        let mut counters: BTreeMap<String, u64> = self.read_json(&path)?;
        let n = counters.entry(project.to_string()).or_insert(0);
        *n += 1;
        let key = format!("{project}-{n}");
        self.write_json(&path, &counters)?;
        Ok(key)
    }

    /// Store a record as-is, replacing any existing one with the same key.
    pub fn write(&self, record: &Record) -> Result<()> {
        self.write_json(&self.record_path(&record.key)?, record)
    }

    pub fn read(&self, key: &str) -> Result<Record> {
        let path = self.record_path(key)?;
        if !path.exists() {
            return Err(MigrateError::RecordNotFound(key.to_string()));
        }
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(self.root.join("records"))? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                keys.push(stem.to_string());
            }
        }
        keys.sort_by(|a, b| key_order(a).cmp(&key_order(b)));
        Ok(keys)
    }

    pub fn list_all(&self) -> Result<Vec<Record>> {
        self.list_keys()?.iter().map(|k| self.read(k)).collect()
    }

    pub fn set_fields(&self, fields: &[FieldInfo]) -> Result<()> {
        self.write_json(&self.root.join("fields.json"), fields)
    }

    /// Set the create-meta `fields` object for one project/issue-type pair.
    pub fn set_create_meta(&self, project: &str, issue_type: &str, fields: Value) -> Result<()> {
        let path = self.meta_path(project);
        let mut by_type: BTreeMap<String, Value> = self.read_json(&path)?;
        by_type.insert(issue_type.to_string(), fields);
        self.write_json(&path, &by_type)
    }

    pub fn set_users(&self, users: &[User]) -> Result<()> {
        self.write_json(&self.root.join("users.json"), users)
    }

    pub fn set_transitions(&self, transitions: &[Transition]) -> Result<()> {
        self.write_json(&self.root.join("transitions.json"), transitions)
    }

    fn users(&self) -> Result<Vec<User>> {
        self.read_json(&self.root.join("users.json"))
    }

    fn resolve_user(&self, user: User) -> Result<User> {
        Ok(self
            .users()?
            .into_iter()
            .find(|u| u.account_id == user.account_id)
            .unwrap_or(user))
    }
}

/// Sort `PROJ-10` after `PROJ-9`.
fn key_order(key: &str) -> (String, u64) {
    match key.rsplit_once('-') {
        Some((project, n)) => (project.to_string(), n.parse().unwrap_or(u64::MAX)),
        None => (key.to_string(), u64::MAX),
    }
}

impl Tracker for FileTracker {
    fn server(&self) -> &str {
        &self.label
    }

    fn get_record(&self, key: &str) -> Result<Record> {
        self.read(key)
    }

    fn create_record(&self, payload: &Payload) -> Result<Record> {
        let (project, issue_type) = create_target(payload)?;
        let meta = self.create_meta(&project, &issue_type)?;
        check_required(payload, &meta, &project, &issue_type)?;

        let key = self.next_key(&project)?;
        let mut record = Record::from_payload(key, payload);
        record.status.name = "Open".into();
        if let Some(reporter) = record.reporter.take() {
            record.reporter = Some(self.resolve_user(reporter)?);
        }
        self.write(&record)?;
        Ok(record)
    }

    fn update_record(&self, key: &str, fields: &Payload) -> Result<()> {
        let mut record = self.read(key)?;
        record.apply_payload(fields);
        if let Some(reporter) = record.reporter.take() {
            record.reporter = Some(self.resolve_user(reporter)?);
        }
        self.write(&record)
    }

    fn add_comment(&self, key: &str, body: &str) -> Result<()> {
        let mut record = self.read(key)?;
        record.comments.push(Comment {
            author: "issue-migrate".into(),
            author_id: None,
            created: Utc::now(),
            body: body.to_string(),
        });
        record.updated = Utc::now();
        self.write(&record)
    }

    fn search(&self, query: &Query) -> Result<Vec<RecordSummary>> {
        let catalogue = FieldCatalogue::from_fields(self.fields()?);
        let mut hits = Vec::new();
        for record in self.list_all()? {
            if record_matches(&record, query, &catalogue)? {
                hits.push(record.summary_line());
            }
        }
        Ok(hits)
    }

    fn fields(&self) -> Result<Vec<FieldInfo>> {
        self.read_json(&self.root.join("fields.json"))
    }

    fn create_meta(&self, project: &str, issue_type: &str) -> Result<Value> {
        let by_type: BTreeMap<String, Value> = self.read_json(&self.meta_path(project))?;
        Ok(match by_type.get(issue_type) {
            Some(fields) => json!({"projects": [{"key": project, "issuetypes": [
                {"name": issue_type, "fields": fields}
            ]}]}),
            None => json!({"projects": []}),
        })
    }

    fn transitions(&self, key: &str) -> Result<Vec<Transition>> {
        self.read(key)?;
        self.read_json(&self.root.join("transitions.json"))
    }

    fn transition(&self, key: &str, request: &TransitionRequest) -> Result<()> {
        let transition = self
            .transitions(key)?
            .into_iter()
            .find(|t| t.id == request.transition_id)
            .ok_or_else(|| {
                MigrateError::TransitionUnavailable(key.to_string(), request.transition_id.clone())
            })?;
        let mut record = self.read(key)?;
        record.apply_payload(&request.fields);
        if let Some(to) = transition.to {
            record.status.name = to;
            record.status.id = transition.id;
        }
        self.write(&record)?;
        if let Some(comment) = &request.comment {
            self.add_comment(key, comment)?;
        }
        Ok(())
    }

    fn find_users(&self, query: &str) -> Result<Vec<User>> {
        let needle = query.to_lowercase();
        Ok(self
            .users()?
            .into_iter()
            .filter(|u| user_matches(u, &needle))
            .collect())
    }

    fn add_remote_link(&self, key: &str, url: &str, title: &str) -> Result<()> {
        self.read(key)?;
        let dir = self.root.join("links");
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{key}.json"));
        let mut links: Vec<Link> = self.read_json(&path)?;
        links.push(Link {
            url: url.to_string(),
            title: title.to_string(),
        });
        self.write_json(&path, &links)
    }
}
