use std::cell::{OnceCell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::tracker::Tracker;

/// Entry of the global field catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub id: String,
    pub name: String,
}

/// Bidirectional id <-> name map over every field the tracker knows.
#[derive(Debug, Clone, Default)]
pub struct FieldCatalogue {
    by_id: HashMap<String, String>,
    by_name: HashMap<String, String>,
}

impl FieldCatalogue {
    pub fn from_fields(fields: impl IntoIterator<Item = FieldInfo>) -> Self {
        let mut catalogue = Self::default();
        for field in fields {
            // First name wins; trackers allow duplicate custom field names.
            catalogue
                .by_name
                .entry(field.name.clone())
                .or_insert_with(|| field.id.clone());
            catalogue.by_id.insert(field.id, field.name);
        }
        catalogue
    }

    pub fn id_for(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    pub fn name_for(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    /// Resolve a name or id to an id, passing ids through.
    pub fn resolve_id<'a>(&'a self, name_or_id: &'a str) -> &'a str {
        if self.by_id.contains_key(name_or_id) {
            return name_or_id;
        }
        self.id_for(name_or_id).unwrap_or(name_or_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// How the destination expects array items to be keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKey {
    /// `{"name": ..}`: versions, components.
    Name,
    /// `{"value": ..}`: multi-select options.
    Value,
}

impl ItemKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Value => "value",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Option,
    ArrayOfObject(ItemKey),
    /// Anything else; transformed as `String`.
    Unknown,
}

impl FieldType {
    /// Classify a create-meta `schema` object (`{"type": "array", "items": "version"}`).
    pub fn from_schema(schema: Option<&Value>) -> Self {
        let Some(schema) = schema else {
            return Self::Unknown;
        };
        let kind = schema.get("type").and_then(Value::as_str).unwrap_or_default();
        let items = schema.get("items").and_then(Value::as_str).unwrap_or_default();
        match (kind, items) {
            ("string", _) => Self::String,
            ("option", _) => Self::Option,
            ("array", "option") => Self::ArrayOfObject(ItemKey::Value),
            ("array", "version" | "component") => Self::ArrayOfObject(ItemKey::Name),
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Option => write!(f, "option"),
            Self::ArrayOfObject(ItemKey::Name) => write!(f, "array<name>"),
            Self::ArrayOfObject(ItemKey::Value) => write!(f, "array<value>"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub label: String,
}

impl AllowedValue {
    pub fn from_json(value: &Value) -> Option<Self> {
        let label = ["name", "value"]
            .iter()
            .find_map(|k| value.get(*k).and_then(Value::as_str))?;
        Some(Self {
            id: value.get("id").and_then(Value::as_str).map(str::to_string),
            label: label.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub id: String,
    pub name: String,
    pub required: bool,
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<AllowedValue>,
}

impl FieldDescriptor {
    /// Stand-in for a field the schema does not describe.
    pub fn fallback(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            required: false,
            field_type: FieldType::Unknown,
            allowed_values: Vec::new(),
        }
    }

    pub fn allows(&self, label: &str) -> bool {
        self.allowed_values.iter().any(|v| v.label == label)
    }
}

/// Destination fields for one project/issue-type pair, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    by_name: BTreeMap<String, FieldDescriptor>,
    id_to_name: HashMap<String, String>,
}

impl Schema {
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        let mut schema = Self::default();
        for d in descriptors {
            schema.id_to_name.insert(d.id.clone(), d.name.clone());
            schema.by_name.insert(d.name.clone(), d);
        }
        schema
    }

    /// Parse a create-meta response. Missing projects, issue types or fields
    /// yield an empty schema with a warning.
    pub fn from_create_meta(
        meta: &Value,
        catalogue: &FieldCatalogue,
        project: &str,
        issue_type: &str,
    ) -> Self {
        let Some(project_meta) = meta
            .get("projects")
            .and_then(Value::as_array)
            .and_then(|p| p.first())
        else {
            warn!(project, "no projects in create-meta response");
            return Self::default();
        };
        let Some(type_meta) = project_meta
            .get("issuetypes")
            .and_then(Value::as_array)
            .and_then(|t| t.first())
        else {
            warn!(project, "no issue types found");
            return Self::default();
        };

        let entries: Vec<(String, &Value)> = match type_meta.get("fields") {
            Some(Value::Object(map)) => map.iter().map(|(id, v)| (id.clone(), v)).collect(),
            Some(Value::Array(list)) => list
                .iter()
                .filter_map(|v| {
                    let id = v
                        .get("fieldId")
                        .or_else(|| v.get("key"))
                        .and_then(Value::as_str)?;
                    Some((id.to_string(), v))
                })
                .collect(),
            _ => {
                warn!(project, issue_type, "no fields found");
                return Self::default();
            }
        };

        Self::from_descriptors(entries.into_iter().map(|(id, entry)| {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .or_else(|| catalogue.name_for(&id))
                .unwrap_or(&id)
                .to_string();
            FieldDescriptor {
                required: entry.get("required").and_then(Value::as_bool).unwrap_or(false),
                field_type: FieldType::from_schema(entry.get("schema")),
                allowed_values: entry
                    .get("allowedValues")
                    .and_then(Value::as_array)
                    .map(|values| values.iter().filter_map(AllowedValue::from_json).collect())
                    .unwrap_or_default(),
                id,
                name,
            }
        }))
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(name)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&FieldDescriptor> {
        self.id_to_name.get(id).and_then(|n| self.by_name.get(n))
    }

    /// Lookup by name, then by id.
    pub fn find(&self, name_or_id: &str) -> Option<&FieldDescriptor> {
        self.get(name_or_id).or_else(|| self.get_by_id(name_or_id))
    }

    pub fn fields(&self, required_only: bool) -> impl Iterator<Item = &FieldDescriptor> {
        self.by_name
            .values()
            .filter(move |d| !required_only || d.required)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Lazily fetched destination schema plus the global field catalogue.
pub struct SchemaCache<'t> {
    tracker: &'t dyn Tracker,
    project: String,
    issue_type: String,
    catalogue: OnceCell<FieldCatalogue>,
    schemas: RefCell<HashMap<(String, String), Rc<Schema>>>,
}

impl<'t> SchemaCache<'t> {
    pub fn new(
        tracker: &'t dyn Tracker,
        project: impl Into<String>,
        issue_type: impl Into<String>,
    ) -> Self {
        Self {
            tracker,
            project: project.into(),
            issue_type: issue_type.into(),
            catalogue: OnceCell::new(),
            schemas: RefCell::new(HashMap::new()),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn issue_type(&self) -> &str {
        &self.issue_type
    }

    /// Global field catalogue, fetched once. A failed fetch leaves it empty.
    pub fn catalogue(&self) -> &FieldCatalogue {
        self.catalogue.get_or_init(|| match self.tracker.fields() {
            Ok(fields) => {
                let catalogue = FieldCatalogue::from_fields(fields);
                debug!(fields = catalogue.len(), "field catalogue loaded");
                catalogue
            }
            Err(err) => {
                error!(error = %err, "failed to retrieve field catalogue");
                FieldCatalogue::default()
            }
        })
    }

    pub fn field_id_for(&self, name: &str) -> Option<&str> {
        self.catalogue().id_for(name)
    }

    pub fn field_name_for(&self, id: &str) -> Option<&str> {
        self.catalogue().name_for(id)
    }

    /// Schema of the configured destination pair.
    pub fn schema(&self) -> Rc<Schema> {
        self.schema_for(&self.project, &self.issue_type)
    }

    pub fn schema_for(&self, project: &str, issue_type: &str) -> Rc<Schema> {
        let key = (project.to_string(), issue_type.to_string());
        if let Some(schema) = self.schemas.borrow().get(&key) {
            return Rc::clone(schema);
        }
        let schema = match self.tracker.create_meta(project, issue_type) {
            Ok(meta) => Schema::from_create_meta(&meta, self.catalogue(), project, issue_type),
            Err(err) => {
                warn!(project, issue_type, error = %err, "failed to retrieve schema");
                Schema::default()
            }
        };
        debug!(project, issue_type, fields = schema.len(), "schema cached");
        let schema = Rc::new(schema);
        self.schemas.borrow_mut().insert(key, Rc::clone(&schema));
        schema
    }

    /// `name -> descriptor` for the destination pair.
    pub fn fields(&self, required_only: bool) -> BTreeMap<String, FieldDescriptor> {
        self.schema()
            .fields(required_only)
            .map(|d| (d.name.clone(), d.clone()))
            .collect()
    }

    /// Descriptor for a destination field by name or id, or a `String`-typed
    /// fallback when the schema does not list it.
    pub fn descriptor_or_fallback(&self, name_or_id: &str) -> FieldDescriptor {
        if let Some(d) = self.schema().find(name_or_id) {
            return d.clone();
        }
        let catalogue = self.catalogue();
        let id = catalogue.resolve_id(name_or_id).to_string();
        let name = catalogue.name_for(&id).unwrap_or(name_or_id).to_string();
        warn!(field = name_or_id, "field missing from schema, treating as string");
        FieldDescriptor::fallback(id, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::MemoryTracker;
    use crate::tracker::memory::Failures;
    use serde_json::json;

    fn catalogue() -> FieldCatalogue {
        FieldCatalogue::from_fields(vec![
            FieldInfo {
                id: "customfield_1".into(),
                name: "Product".into(),
            },
            FieldInfo {
                id: "versions".into(),
                name: "Affects versions".into(),
            },
        ])
    }

    #[test]
    fn catalogue_is_bidirectional() {
        let c = catalogue();
        assert_eq!(c.id_for("Product"), Some("customfield_1"));
        assert_eq!(c.name_for("customfield_1"), Some("Product"));
        assert_eq!(c.resolve_id("Product"), "customfield_1");
        assert_eq!(c.resolve_id("customfield_1"), "customfield_1");
        assert_eq!(c.resolve_id("nope"), "nope");
    }

    #[test]
    fn field_type_classifies_schema_tags() {
        assert_eq!(FieldType::from_schema(Some(&json!({"type": "string"}))), FieldType::String);
        assert_eq!(FieldType::from_schema(Some(&json!({"type": "option"}))), FieldType::Option);
        assert_eq!(
            FieldType::from_schema(Some(&json!({"type": "array", "items": "version"}))),
            FieldType::ArrayOfObject(ItemKey::Name)
        );
        assert_eq!(
            FieldType::from_schema(Some(&json!({"type": "array", "items": "option"}))),
            FieldType::ArrayOfObject(ItemKey::Value)
        );
        assert_eq!(FieldType::from_schema(Some(&json!({"type": "user"}))), FieldType::Unknown);
        assert_eq!(FieldType::from_schema(None), FieldType::Unknown);
    }

    #[test]
    fn create_meta_parses_descriptors() {
        let meta = json!({"projects": [{"key": "IFR", "issuetypes": [{"name": "New Feature", "fields": {
            "customfield_1": {"required": true, "schema": {"type": "option"},
                              "allowedValues": [{"id": "1", "value": "NIOS"}]},
            "versions": {"required": false, "name": "Affects versions",
                         "schema": {"type": "array", "items": "version"},
                         "allowedValues": [{"id": "10", "name": "8.6.5"}]}
        }}]}]});
        let schema = Schema::from_create_meta(&meta, &catalogue(), "IFR", "New Feature");
        assert_eq!(schema.len(), 2);
        let product = schema.get("Product").unwrap();
        assert!(product.required);
        assert_eq!(product.field_type, FieldType::Option);
        assert!(product.allows("NIOS"));
        assert_eq!(schema.fields(true).count(), 1);
        assert_eq!(schema.find("versions").unwrap().name, "Affects versions");
    }

    #[test]
    fn create_meta_without_issue_types_is_empty() {
        let meta = json!({"projects": [{"key": "IFR", "issuetypes": []}]});
        assert!(Schema::from_create_meta(&meta, &catalogue(), "IFR", "Bug").is_empty());
        assert!(Schema::from_create_meta(&json!({}), &catalogue(), "IFR", "Bug").is_empty());
    }

    #[test]
    fn create_meta_accepts_field_arrays() {
        let meta = json!({"projects": [{"issuetypes": [{"fields": [
            {"fieldId": "summary", "name": "Summary", "required": true, "schema": {"type": "string"}}
        ]}]}]});
        let schema = Schema::from_create_meta(&meta, &catalogue(), "IFR", "Task");
        assert_eq!(schema.get("Summary").unwrap().id, "summary");
    }

    fn memory_tracker() -> MemoryTracker {
        let tracker = MemoryTracker::new();
        tracker.add_field("customfield_1", "Product");
        tracker.add_field("customfield_9", "RFE #");
        tracker.set_create_meta(
            "IFR",
            "New Feature",
            json!({
                "summary": {"name": "Summary", "required": true, "schema": {"type": "string"}},
                "customfield_1": {"required": true, "schema": {"type": "option"}},
                "customfield_9": {"name": "RFE #", "required": false, "schema": {"type": "string"}}
            }),
        );
        tracker
    }

    #[test]
    fn cache_fetches_each_pair_once() {
        let tracker = memory_tracker();
        let cache = SchemaCache::new(&tracker, "IFR", "New Feature");
        assert_eq!(tracker.fetch_counts(), (0, 0));

        assert_eq!(cache.schema().len(), 3);
        cache.schema();
        cache.fields(true);
        cache.field_id_for("Product");
        assert_eq!(tracker.fetch_counts(), (1, 1));

        assert!(cache.schema_for("OPS", "Bug").is_empty());
        cache.schema_for("OPS", "Bug");
        assert_eq!(tracker.fetch_counts(), (2, 1));
    }

    #[test]
    fn fields_filter_required_and_key_by_name() {
        let tracker = memory_tracker();
        let cache = SchemaCache::new(&tracker, "IFR", "New Feature");
        let required: Vec<String> = cache.fields(true).into_keys().collect();
        assert_eq!(required, vec!["Product", "Summary"]);
        let all = cache.fields(false);
        assert_eq!(all.len(), 3);
        assert_eq!(all["RFE #"].id, "customfield_9");
    }

    #[test]
    fn catalogue_lookups_cover_all_fields() {
        let tracker = memory_tracker();
        tracker.add_field("customfield_40", "Customer Impact");
        let cache = SchemaCache::new(&tracker, "IFR", "New Feature");
        assert_eq!(cache.field_name_for("customfield_40"), Some("Customer Impact"));
        assert_eq!(cache.field_id_for("Customer Impact"), Some("customfield_40"));
        assert_eq!(cache.field_name_for("customfield_404"), None);
    }

    #[test]
    fn failed_catalogue_fetch_yields_empty_catalogue() {
        let tracker = memory_tracker();
        tracker.set_failures(Failures {
            fields: true,
            ..Failures::default()
        });
        let cache = SchemaCache::new(&tracker, "IFR", "New Feature");
        assert!(cache.catalogue().is_empty());
        assert_eq!(cache.field_id_for("Product"), None);
        // Descriptor names fall back to the id when neither meta nor catalogue has one.
        assert!(cache.fields(false).contains_key("customfield_1"));
        assert_eq!(tracker.fetch_counts().1, 1);
    }
}
