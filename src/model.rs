use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::schema::FieldCatalogue;

/// Create/update body keyed by field id (`summary`, `customfield_10010`, ...).
pub type Payload = Map<String, Value>;

/// One value in a record's field bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    /// Option/enum selection: `{"id": .., "value": ..}` on the wire.
    Choice(Choice),
    /// Multi-valued field, reduced to item names or values.
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub value: String,
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn choice(value: impl Into<String>) -> Self {
        Self::Choice(Choice {
            id: None,
            value: value.into(),
        })
    }

    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Interpret a raw tracker JSON value. `null` and empty containers are absent.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Bool(b) => Some(Self::Text(b.to_string())),
            Value::Number(n) => Some(Self::Text(n.to_string())),
            Value::Object(obj) => {
                if let Some(v) = obj.get("value").and_then(Value::as_str) {
                    return Some(Self::Choice(Choice {
                        id: obj.get("id").and_then(json_scalar),
                        value: v.to_string(),
                    }));
                }
                ["name", "displayName", "key"]
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str))
                    .map(|s| Self::Text(s.to_string()))
            }
            Value::Array(items) => {
                let names: Vec<String> = items.iter().filter_map(item_label).collect();
                if names.is_empty() {
                    None
                } else {
                    Some(Self::List(names))
                }
            }
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Choice(c) => match &c.id {
                Some(id) => json!({ "id": id, "value": c.value }),
                None => json!({ "value": c.value }),
            },
            Self::List(items) => Value::Array(
                items
                    .iter()
                    .map(|name| json!({ "name": name }))
                    .collect(),
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::Choice(c) => c.value.trim().is_empty(),
            Self::List(items) => items.iter().all(|i| i.trim().is_empty()),
        }
    }

    /// Flat human-readable rendering.
    pub fn display(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Choice(c) => c.value.clone(),
            Self::List(items) => items.join(", "),
        }
    }
}

fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn item_label(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => ["name", "value", "key"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

/// Field values keyed by field id (or by name for stores that have no ids).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldBag(BTreeMap<String, FieldValue>);

impl FieldBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look a field up by name or id: literal key first, then the catalogue's
    /// name -> id and id -> name translations.
    pub fn lookup(&self, name_or_id: &str, catalogue: &FieldCatalogue) -> Option<&FieldValue> {
        if let Some(value) = self.0.get(name_or_id) {
            return Some(value);
        }
        if let Some(id) = catalogue.id_for(name_or_id)
            && let Some(value) = self.0.get(id)
        {
            return Some(value);
        }
        catalogue
            .name_for(name_or_id)
            .and_then(|name| self.0.get(name))
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for FieldBag {
    fn from_iter<T: IntoIterator<Item = (K, FieldValue)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl User {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            display_name: None,
            email: None,
        }
    }

    /// Display name, falling back to the account id.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.account_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    pub created: DateTime<Utc>,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub id: String,
    pub name: String,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A tracker record, source or destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub project: String,
    pub issue_type: String,
    #[serde(default)]
    pub status: Status,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter: Option<User>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
    #[serde(default, skip_serializing_if = "FieldBag::is_empty")]
    pub fields: FieldBag,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated: DateTime<Utc>,
}

impl Record {
    pub fn new(key: impl Into<String>, project: impl Into<String>, summary: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            project: project.into(),
            issue_type: String::new(),
            status: Status::default(),
            summary: summary.into(),
            description: None,
            reporter: None,
            versions: Vec::new(),
            components: Vec::new(),
            fields: FieldBag::new(),
            comments: Vec::new(),
            created: now,
            updated: now,
        }
    }

    /// Build a freshly created record from a create payload.
    pub fn from_payload(key: impl Into<String>, payload: &Payload) -> Self {
        let mut record = Self::new(key, "", "");
        record.apply_payload(payload);
        record
    }

    /// Apply create/update payload entries. System fields land on their typed
    /// slots; everything else goes to the field bag, `null` clears.
    pub fn apply_payload(&mut self, payload: &Payload) {
        for (key, value) in payload {
            match key.as_str() {
                "project" => {
                    if let Some(k) = value.get("key").and_then(Value::as_str) {
                        self.project = k.to_string();
                    }
                }
                "issuetype" => {
                    if let Some(n) = value.get("name").and_then(Value::as_str) {
                        self.issue_type = n.to_string();
                    }
                }
                "summary" => self.summary = value.as_str().unwrap_or_default().to_string(),
                "description" => self.description = value.as_str().map(str::to_string),
                "versions" => self.versions = labels(value),
                "components" => self.components = labels(value),
                "reporter" => {
                    self.reporter = value
                        .get("accountId")
                        .and_then(Value::as_str)
                        .map(User::new);
                }
                _ => match FieldValue::from_json(value) {
                    Some(v) => self.fields.insert(key.clone(), v),
                    None => {
                        self.fields.remove(key);
                    }
                },
            }
        }
        self.updated = Utc::now();
    }

    pub fn summary_line(&self) -> RecordSummary {
        RecordSummary {
            key: self.key.clone(),
            summary: self.summary.clone(),
            status: self.status.name.clone(),
        }
    }
}

fn labels(value: &Value) -> Vec<String> {
    match FieldValue::from_json(value) {
        Some(FieldValue::List(items)) => items,
        Some(other) => vec![other.display()],
        None => Vec::new(),
    }
}

/// Search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub key: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldInfo;

    #[test]
    fn from_json_reads_option_objects() {
        let value = json!({"id": "10201", "value": "NIOS", "self": "https://x"});
        assert_eq!(
            FieldValue::from_json(&value),
            Some(FieldValue::Choice(Choice {
                id: Some("10201".into()),
                value: "NIOS".into()
            }))
        );
    }

    #[test]
    fn from_json_reduces_arrays_to_names() {
        let value = json!([{"name": "8.6.5"}, {"name": "9.0"}, "raw"]);
        assert_eq!(
            FieldValue::from_json(&value),
            Some(FieldValue::list(["8.6.5", "9.0", "raw"]))
        );
        assert_eq!(FieldValue::from_json(&json!([])), None);
        assert_eq!(FieldValue::from_json(&Value::Null), None);
    }

    #[test]
    fn lookup_resolves_names_through_catalogue() {
        let catalogue = FieldCatalogue::from_fields(vec![FieldInfo {
            id: "customfield_100".into(),
            name: "Product".into(),
        }]);
        let bag: FieldBag = [("customfield_100", FieldValue::choice("NIOS"))]
            .into_iter()
            .collect();
        assert_eq!(
            bag.lookup("Product", &catalogue),
            Some(&FieldValue::choice("NIOS"))
        );
        assert_eq!(
            bag.lookup("customfield_100", &catalogue),
            Some(&FieldValue::choice("NIOS"))
        );
        assert_eq!(bag.lookup("Priority", &catalogue), None);
    }

    #[test]
    fn apply_payload_routes_system_fields() {
        let payload: Payload = serde_json::from_value(json!({
            "project": {"key": "IFR"},
            "issuetype": {"name": "New Feature"},
            "summary": "Add widget",
            "description": "Needs a widget",
            "versions": [{"name": "8.6.5"}],
            "components": [{"name": "Unknown"}],
            "reporter": {"accountId": "abc"},
            "customfield_1": {"value": "Yes"}
        }))
        .unwrap();
        let record = Record::from_payload("IFR-1", &payload);
        assert_eq!(record.project, "IFR");
        assert_eq!(record.issue_type, "New Feature");
        assert_eq!(record.versions, vec!["8.6.5"]);
        assert_eq!(record.components, vec!["Unknown"]);
        assert_eq!(record.reporter.as_ref().map(|u| u.account_id.as_str()), Some("abc"));
        assert_eq!(record.fields.get("customfield_1"), Some(&FieldValue::choice("Yes")));
    }

    #[test]
    fn null_payload_entry_clears_field() {
        let mut record = Record::new("IFR-1", "IFR", "x");
        record.fields.insert("customfield_1", FieldValue::text("old"));
        let payload: Payload = serde_json::from_value(json!({"customfield_1": null})).unwrap();
        record.apply_payload(&payload);
        assert!(record.fields.get("customfield_1").is_none());
    }

    #[test]
    fn minimal_record_omits_optional_fields() {
        let record = Record::new("RFE-1", "RFE", "Minimal");
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("description"));
        assert!(!json.contains("reporter"));
        assert!(!json.contains("versions"));
        assert!(!json.contains("comments"));
    }
}
