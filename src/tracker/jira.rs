use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::{Query, Tracker, Transition, TransitionRequest};
use crate::build_info;
use crate::config::TrackerConfig;
use crate::error::{MigrateError, Result};
use crate::model::{Comment, FieldBag, FieldValue, Payload, Record, RecordSummary, Status, User};
use crate::schema::{AllowedValue, FieldInfo};

const API: &str = "/rest/api/2";
const SEARCH_PAGE: usize = 50;

/// Fields read into typed `Record` slots rather than the field bag.
const SYSTEM_FIELDS: &[&str] = &[
    "project",
    "issuetype",
    "status",
    "summary",
    "description",
    "reporter",
    "versions",
    "components",
    "comment",
    "created",
    "updated",
];

/// Blocking client for a Jira-style REST API (v2).
pub struct JiraClient {
    agent: ureq::Agent,
    base: String,
    auth: String,
}

impl JiraClient {
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        let base = config.server.trim_end_matches('/').to_string();
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(MigrateError::ConfigInvalid(format!(
                "tracker server '{}' is not an http(s) url",
                config.server
            )));
        }
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(&build_info::user_agent())
            .build();
        let token = BASE64.encode(format!("{}:{}", config.user, config.api_key));
        Ok(Self {
            agent,
            base,
            auth: format!("Basic {token}"),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{API}{path}", self.base)
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        self.agent
            .request(method, &self.url(path))
            .set("Authorization", &self.auth)
            .set("Accept", "application/json")
    }

    fn get_json(&self, request: ureq::Request) -> Result<Value> {
        let response = request.call().map_err(http_error)?;
        read_json(response)
    }

    fn send(&self, request: ureq::Request, body: Value) -> Result<Value> {
        let response = request.send_json(body).map_err(http_error)?;
        if response.status() == 204 {
            return Ok(Value::Null);
        }
        read_json(response)
    }
}

fn read_json(response: ureq::Response) -> Result<Value> {
    let text = response.into_string()?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

fn http_error(err: ureq::Error) -> MigrateError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            MigrateError::Http(code, error_messages(&body).unwrap_or(body))
        }
        ureq::Error::Transport(transport) => MigrateError::Transport(transport.to_string()),
    }
}

/// Flatten `{"errorMessages": [...], "errors": {...}}` into one line.
fn error_messages(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let mut parts: Vec<String> = value
        .get("errorMessages")
        .and_then(Value::as_array)
        .map(|m| m.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    if let Some(errors) = value.get("errors").and_then(Value::as_object) {
        parts.extend(
            errors
                .iter()
                .map(|(field, msg)| format!("{field}: {}", msg.as_str().unwrap_or_default())),
        );
    }
    if parts.is_empty() { None } else { Some(parts.join("; ")) }
}

/// Jira timestamps look like `2024-05-20T10:11:12.000+0000`.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn user_from(value: &Value) -> Option<User> {
    let account_id = value
        .get("accountId")
        .or_else(|| value.get("name"))
        .and_then(Value::as_str)?;
    Some(User {
        account_id: account_id.to_string(),
        display_name: value
            .get("displayName")
            .and_then(Value::as_str)
            .map(str::to_string),
        email: value
            .get("emailAddress")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn names(value: Option<&Value>) -> Vec<String> {
    match value.and_then(FieldValue::from_json) {
        Some(FieldValue::List(items)) => items,
        _ => Vec::new(),
    }
}

/// Map an issue resource onto a `Record`.
pub(crate) fn record_from_issue(issue: &Value) -> Result<Record> {
    let key = issue
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| MigrateError::Rejected("issue response has no key".into()))?;
    let empty = Map::new();
    let fields = issue
        .get("fields")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let f = |name: &str| fields.get(name);
    let epoch = DateTime::<Utc>::default();

    let comments = f("comment")
        .and_then(|c| c.get("comments"))
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .map(|c| Comment {
                    author: str_at(c, "/author/displayName").unwrap_or("unknown").to_string(),
                    author_id: str_at(c, "/author/accountId").map(str::to_string),
                    created: c
                        .get("created")
                        .and_then(Value::as_str)
                        .and_then(parse_timestamp)
                        .unwrap_or(epoch),
                    body: c.get("body").and_then(Value::as_str).unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let bag: FieldBag = fields
        .iter()
        .filter(|(id, _)| !SYSTEM_FIELDS.contains(&id.as_str()))
        .filter_map(|(id, v)| FieldValue::from_json(v).map(|fv| (id.clone(), fv)))
        .collect();

    let timestamp = |name: &str| {
        f(name)
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or(epoch)
    };

    Ok(Record {
        key: key.to_string(),
        project: f("project")
            .and_then(|p| p.get("key"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        issue_type: f("issuetype")
            .and_then(|t| t.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        status: Status {
            id: f("status")
                .and_then(|s| s.get("id"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            name: f("status")
                .and_then(|s| s.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        summary: f("summary").and_then(Value::as_str).unwrap_or_default().to_string(),
        description: f("description").and_then(Value::as_str).map(str::to_string),
        reporter: f("reporter").and_then(user_from),
        versions: names(f("versions")),
        components: names(f("components")),
        fields: bag,
        comments,
        created: timestamp("created"),
        updated: timestamp("updated"),
    })
}

fn transition_from(value: &Value) -> Option<Transition> {
    let id = value.get("id").and_then(Value::as_str)?;
    let fields = value
        .get("fields")
        .and_then(Value::as_object)
        .map(|fields| {
            fields
                .iter()
                .map(|(field_id, meta)| {
                    let allowed = meta
                        .get("allowedValues")
                        .and_then(Value::as_array)
                        .map(|v| v.iter().filter_map(AllowedValue::from_json).collect())
                        .unwrap_or_default();
                    (field_id.clone(), allowed)
                })
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();
    Some(Transition {
        id: id.to_string(),
        name: value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        to: str_at(value, "/to/name").map(str::to_string),
        fields,
    })
}

/// The record behind a successful create. The issue exists once the POST
/// returns a key, so a failed read-back falls back to the submitted payload.
pub(crate) fn created_record(key: &str, payload: &Payload, refetched: Result<Record>) -> Record {
    match refetched {
        Ok(record) => record,
        Err(err) => {
            warn!(key, error = %err, "created record could not be read back, using payload");
            Record::from_payload(key, payload)
        }
    }
}

impl Tracker for JiraClient {
    fn server(&self) -> &str {
        &self.base
    }

    fn get_record(&self, key: &str) -> Result<Record> {
        let request = self.request("GET", &format!("/issue/{key}"));
        match self.get_json(request) {
            Ok(issue) => record_from_issue(&issue),
            Err(MigrateError::Http(404, _)) => Err(MigrateError::RecordNotFound(key.to_string())),
            Err(err) => Err(err),
        }
    }

    fn create_record(&self, payload: &Payload) -> Result<Record> {
        let created = self.send(self.request("POST", "/issue"), json!({ "fields": payload }))?;
        let key = created
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| MigrateError::Rejected("create response has no key".into()))?;
        debug!(key, "created");
        Ok(created_record(key, payload, self.get_record(key)))
    }

    fn update_record(&self, key: &str, fields: &Payload) -> Result<()> {
        self.send(
            self.request("PUT", &format!("/issue/{key}")),
            json!({ "fields": fields }),
        )?;
        Ok(())
    }

    fn add_comment(&self, key: &str, body: &str) -> Result<()> {
        self.send(
            self.request("POST", &format!("/issue/{key}/comment")),
            json!({ "body": body }),
        )?;
        Ok(())
    }

    fn search(&self, query: &Query) -> Result<Vec<RecordSummary>> {
        let jql = query.to_jql();
        debug!(jql = %jql, "search");
        let response = self.get_json(
            self.request("GET", "/search")
                .query("jql", &jql)
                .query("fields", "summary,status")
                .query("maxResults", &SEARCH_PAGE.to_string()),
        )?;
        Ok(response
            .get("issues")
            .and_then(Value::as_array)
            .map(|issues| {
                issues
                    .iter()
                    .filter_map(|issue| {
                        Some(RecordSummary {
                            key: issue.get("key").and_then(Value::as_str)?.to_string(),
                            summary: str_at(issue, "/fields/summary").unwrap_or_default().to_string(),
                            status: str_at(issue, "/fields/status/name")
                                .unwrap_or_default()
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn fields(&self) -> Result<Vec<FieldInfo>> {
        let list = self.get_json(self.request("GET", "/field"))?;
        Ok(list
            .as_array()
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| {
                        Some(FieldInfo {
                            id: f.get("id").and_then(Value::as_str)?.to_string(),
                            name: f.get("name").and_then(Value::as_str)?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn create_meta(&self, project: &str, issue_type: &str) -> Result<Value> {
        self.get_json(
            self.request("GET", "/issue/createmeta")
                .query("projectKeys", project)
                .query("issuetypeNames", issue_type)
                .query("expand", "projects.issuetypes.fields"),
        )
    }

    fn transitions(&self, key: &str) -> Result<Vec<Transition>> {
        let response = self.get_json(
            self.request("GET", &format!("/issue/{key}/transitions"))
                .query("expand", "transitions.fields"),
        )?;
        Ok(response
            .get("transitions")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(transition_from).collect())
            .unwrap_or_default())
    }

    fn transition(&self, key: &str, request: &TransitionRequest) -> Result<()> {
        let mut body = json!({ "transition": { "id": request.transition_id } });
        if !request.fields.is_empty() {
            body["fields"] = Value::Object(request.fields.clone());
        }
        if let Some(comment) = &request.comment {
            body["update"] = json!({ "comment": [ { "add": { "body": comment } } ] });
        }
        self.send(
            self.request("POST", &format!("/issue/{key}/transitions")),
            body,
        )?;
        Ok(())
    }

    fn find_users(&self, query: &str) -> Result<Vec<User>> {
        let list = self.get_json(self.request("GET", "/user/search").query("query", query))?;
        Ok(list
            .as_array()
            .map(|users| users.iter().filter_map(user_from).collect())
            .unwrap_or_default())
    }

    fn add_remote_link(&self, key: &str, url: &str, title: &str) -> Result<()> {
        self.send(
            self.request("POST", &format!("/issue/{key}/remotelink")),
            json!({ "object": { "url": url, "title": title } }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_read_back_still_yields_created_record() {
        let payload: Payload = serde_json::from_value(json!({
            "project": {"key": "IFR"},
            "issuetype": {"name": "New Feature"},
            "summary": "Add widget",
            "customfield_9": "RFE-42"
        }))
        .unwrap();
        let record = created_record(
            "IFR-7",
            &payload,
            Err(MigrateError::Transport("read timed out".into())),
        );
        assert_eq!(record.key, "IFR-7");
        assert_eq!(record.project, "IFR");
        assert_eq!(record.summary, "Add widget");

        let fetched = Record::new("IFR-7", "IFR", "from server");
        let record = created_record("IFR-7", &payload, Ok(fetched.clone()));
        assert_eq!(record, fetched);
    }

    #[test]
    fn parses_jira_timestamps() {
        let ts = parse_timestamp("2024-05-20T10:11:12.000+0000").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-20T10:11:12+00:00");
        let ts = parse_timestamp("2024-05-20T12:11:12.500+0200").unwrap();
        assert_eq!(ts.format("%H:%M:%S").to_string(), "10:11:12");
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn issue_resource_maps_to_record() {
        let issue = json!({
            "key": "RFE-42",
            "fields": {
                "project": {"key": "RFE"},
                "issuetype": {"name": "Feature Request"},
                "status": {"id": "1", "name": "Open"},
                "summary": "Add widget",
                "description": "line one\nline two",
                "reporter": {"accountId": "acc-1", "displayName": "Ada"},
                "versions": [{"name": "8.6.5"}],
                "components": [],
                "customfield_1": {"id": "5", "value": "NIOS"},
                "customfield_2": null,
                "comment": {"comments": [
                    {"author": {"displayName": "Bob", "accountId": "acc-2"},
                     "created": "2024-05-20T10:11:12.000+0000", "body": "hi"}
                ]},
                "created": "2024-05-01T00:00:00.000+0000",
                "updated": "2024-05-02T00:00:00.000+0000"
            }
        });
        let record = record_from_issue(&issue).unwrap();
        assert_eq!(record.key, "RFE-42");
        assert_eq!(record.status.name, "Open");
        assert_eq!(record.reporter.as_ref().unwrap().label(), "Ada");
        assert_eq!(record.versions, vec!["8.6.5"]);
        assert!(record.components.is_empty());
        assert_eq!(record.fields.get("customfield_1").unwrap().display(), "NIOS");
        assert!(record.fields.get("customfield_2").is_none());
        assert!(record.fields.get("summary").is_none());
        assert_eq!(record.comments[0].author, "Bob");
    }

    #[test]
    fn error_bodies_are_flattened() {
        let body = r#"{"errorMessages": ["bad"], "errors": {"customfield_1": "required"}}"#;
        assert_eq!(error_messages(body).unwrap(), "bad; customfield_1: required");
        assert!(error_messages("<html>").is_none());
    }

    #[test]
    fn transitions_carry_allowed_values() {
        let t = transition_from(&json!({
            "id": "31", "name": "Close", "to": {"name": "Closed"},
            "fields": {"resolution": {"allowedValues": [{"id": "7", "name": "Won't Do"}]}}
        }))
        .unwrap();
        assert_eq!(t.to.as_deref(), Some("Closed"));
        assert_eq!(t.fields["resolution"][0].id.as_deref(), Some("7"));
    }

    #[test]
    fn rejects_non_http_server() {
        let config = TrackerConfig {
            server: "ftp://x".into(),
            user: "u".into(),
            api_key: "k".into(),
            resolution_field: "Resolution".into(),
            timeout_secs: 5,
        };
        assert!(JiraClient::new(&config).is_err());
    }
}
