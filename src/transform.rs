use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::model::{FieldValue, Record};
use crate::remap::RemapTable;
use crate::schema::{FieldCatalogue, FieldDescriptor, FieldType, ItemKey};

/// Result of transforming one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Transformed {
    /// Value found in the source record, shaped for the destination.
    Value(Value),
    /// The sentinel placeholder, shaped for the destination.
    NotDefined(Value),
}

impl Transformed {
    pub fn into_value(self) -> Value {
        match self {
            Self::Value(v) | Self::NotDefined(v) => v,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Self::Value(_))
    }
}

/// Converts source values into the shapes destination field types demand.
#[derive(Debug, Clone)]
pub struct FieldTransformer {
    remap: RemapTable,
    sentinel: String,
    /// Placeholder item for array fields left with no allowed value.
    default_tag: String,
}

impl FieldTransformer {
    pub const DEFAULT_TAG: &'static str = "Unknown";

    pub fn new(remap: RemapTable, sentinel: impl Into<String>) -> Self {
        Self {
            remap,
            sentinel: sentinel.into(),
            default_tag: Self::DEFAULT_TAG.into(),
        }
    }

    pub fn with_default_tag(mut self, tag: impl Into<String>) -> Self {
        self.default_tag = tag.into();
        self
    }

    /// Transform the source value for `descriptor`. The field is looked up
    /// under its own name, then under its id, then under the remap table's
    /// alternate name.
    pub fn transform(
        &self,
        descriptor: &FieldDescriptor,
        record: &Record,
        catalogue: &FieldCatalogue,
    ) -> Transformed {
        let source = self.source_value(descriptor, record, catalogue);
        match descriptor.field_type {
            FieldType::String | FieldType::Unknown => self.as_string(descriptor, source),
            FieldType::Option => self.as_option(descriptor, source),
            FieldType::ArrayOfObject(item) => {
                let tags = match source {
                    Some(FieldValue::List(items)) => items.clone(),
                    Some(other) if !other.is_empty() => vec![other.display()],
                    _ => Vec::new(),
                };
                let remapped = self.remapped(&tags);
                let kept = intersect(&remapped, descriptor);
                if kept.is_empty() {
                    debug!(field = %descriptor.name, default = %self.default_tag, "no usable values");
                    Transformed::NotDefined(items(item, [self.default_tag.as_str()]))
                } else {
                    Transformed::Value(items(item, kept))
                }
            }
        }
    }

    /// Tags kept after intersecting with the descriptor's allowed values, or
    /// `[default]` when nothing survives. Items are wrapped per `item`.
    pub fn resolve_tags(
        &self,
        tags: &[String],
        descriptor: &FieldDescriptor,
        default: &str,
    ) -> Value {
        let item = match descriptor.field_type {
            FieldType::ArrayOfObject(item) => item,
            _ => ItemKey::Name,
        };
        let remapped = self.remapped(tags);
        let kept = intersect(&remapped, descriptor);
        if kept.is_empty() {
            if !tags.is_empty() {
                warn!(field = %descriptor.name, ?tags, default, "no allowed values, using default");
            }
            return items(item, [default]);
        }
        items(item, kept)
    }

    fn remapped(&self, tags: &[String]) -> Vec<String> {
        tags.iter()
            .map(|t| self.remap.remap_option(t).to_string())
            .collect()
    }

    fn source_value<'r>(
        &self,
        descriptor: &FieldDescriptor,
        record: &'r Record,
        catalogue: &FieldCatalogue,
    ) -> Option<&'r FieldValue> {
        let found = record
            .fields
            .lookup(&descriptor.name, catalogue)
            .or_else(|| record.fields.lookup(&descriptor.id, catalogue))
            .filter(|v| !v.is_empty());
        if found.is_some() {
            return found;
        }
        let alternate = self.remap.alternate_field(&descriptor.name)?;
        debug!(field = %descriptor.name, alternate, "trying alternate field");
        record
            .fields
            .lookup(alternate, catalogue)
            .filter(|v| !v.is_empty())
    }

    fn as_string(&self, descriptor: &FieldDescriptor, source: Option<&FieldValue>) -> Transformed {
        match source {
            Some(value) => Transformed::Value(Value::String(value.display())),
            None => {
                debug!(field = %descriptor.name, "not defined, using sentinel");
                Transformed::NotDefined(Value::String(self.sentinel.clone()))
            }
        }
    }

    fn as_option(&self, descriptor: &FieldDescriptor, source: Option<&FieldValue>) -> Transformed {
        let value = match source {
            Some(FieldValue::Choice(choice)) => Some(choice.value.as_str()),
            Some(FieldValue::Text(text)) => Some(text.as_str()),
            Some(FieldValue::List(items)) => items.first().map(String::as_str),
            None => None,
        };
        match value {
            Some(v) => {
                let remapped = self.remap.remap_option(v);
                if !descriptor.allowed_values.is_empty() && !descriptor.allows(remapped) {
                    warn!(field = %descriptor.name, value = remapped, "value not in allowed set");
                }
                Transformed::Value(json!({ "value": remapped }))
            }
            None => {
                debug!(field = %descriptor.name, "not defined, using sentinel");
                Transformed::NotDefined(json!({ "value": self.sentinel }))
            }
        }
    }
}

/// Source order, duplicates dropped, filtered by the allowed set.
fn intersect<'t>(tags: &'t [String], descriptor: &FieldDescriptor) -> Vec<&'t str> {
    let mut kept: Vec<&str> = Vec::new();
    for tag in tags {
        if descriptor.allows(tag) && !kept.contains(&tag.as_str()) {
            kept.push(tag);
        }
    }
    kept
}

fn items<'s>(item: ItemKey, names: impl IntoIterator<Item = &'s str>) -> Value {
    Value::Array(
        names
            .into_iter()
            .map(|n| {
                let mut entry = Map::new();
                entry.insert(item.as_str().to_string(), Value::String(n.to_string()));
                Value::Object(entry)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AllowedValue, FieldInfo};

    fn catalogue() -> FieldCatalogue {
        FieldCatalogue::from_fields(vec![
            FieldInfo {
                id: "customfield_1".into(),
                name: "Product".into(),
            },
            FieldInfo {
                id: "customfield_2".into(),
                name: "Use Case".into(),
            },
        ])
    }

    fn descriptor(id: &str, name: &str, field_type: FieldType, allowed: &[&str]) -> FieldDescriptor {
        FieldDescriptor {
            id: id.into(),
            name: name.into(),
            required: true,
            field_type,
            allowed_values: allowed
                .iter()
                .map(|l| AllowedValue {
                    id: None,
                    label: (*l).into(),
                })
                .collect(),
        }
    }

    fn transformer() -> FieldTransformer {
        FieldTransformer::new(
            RemapTable::default()
                .with_field("Product (migrated)", "Product")
                .with_option("Grid", "NIOS"),
            "Not defined in RFE",
        )
    }

    #[test]
    fn string_field_uses_literal_value() {
        let mut record = Record::new("RFE-1", "RFE", "x");
        record.fields.insert("customfield_2", FieldValue::text("DNS at scale"));
        let d = descriptor("customfield_2", "Use Case", FieldType::String, &[]);
        let out = transformer().transform(&d, &record, &catalogue());
        assert_eq!(out, Transformed::Value(json!("DNS at scale")));
    }

    #[test]
    fn missing_or_empty_string_becomes_sentinel() {
        let mut record = Record::new("RFE-1", "RFE", "x");
        let d = descriptor("customfield_9", "Business Justification", FieldType::String, &[]);
        let out = transformer().transform(&d, &record, &catalogue());
        assert_eq!(out, Transformed::NotDefined(json!("Not defined in RFE")));

        record.fields.insert("customfield_9", FieldValue::text("   "));
        let out = transformer().transform(&d, &record, &catalogue());
        assert!(!out.is_defined());
    }

    #[test]
    fn option_field_follows_alternate_name_and_remaps_value() {
        let mut record = Record::new("RFE-1", "RFE", "x");
        record.fields.insert("customfield_1", FieldValue::choice("Grid"));
        let d = descriptor("customfield_50", "Product (migrated)", FieldType::Option, &["NIOS"]);
        let out = transformer().transform(&d, &record, &catalogue());
        assert_eq!(out, Transformed::Value(json!({"value": "NIOS"})));
    }

    #[test]
    fn missing_option_is_wrapped_sentinel() {
        let record = Record::new("RFE-1", "RFE", "x");
        let d = descriptor("customfield_50", "Product (migrated)", FieldType::Option, &[]);
        let out = transformer().transform(&d, &record, &catalogue());
        assert_eq!(out.into_value(), json!({"value": "Not defined in RFE"}));
    }

    #[test]
    fn unknown_type_behaves_as_string() {
        let mut record = Record::new("RFE-1", "RFE", "x");
        record.fields.insert("customfield_1", FieldValue::choice("NIOS"));
        let d = FieldDescriptor::fallback("customfield_1", "Product");
        let out = transformer().transform(&d, &record, &catalogue());
        assert_eq!(out, Transformed::Value(json!("NIOS")));
    }

    #[test]
    fn tags_keep_allowed_values_in_source_order() {
        let d = descriptor(
            "versions",
            "Affects versions",
            FieldType::ArrayOfObject(ItemKey::Name),
            &["8.6.5", "9.0"],
        );
        let tags: Vec<String> = ["9.0", "8.6.5", "9.0", "7.0"].map(String::from).to_vec();
        let out = transformer().resolve_tags(&tags, &d, "Unknown");
        assert_eq!(out, json!([{"name": "9.0"}, {"name": "8.6.5"}]));
    }

    #[test]
    fn tags_with_no_intersection_use_default() {
        let d = descriptor(
            "versions",
            "Affects versions",
            FieldType::ArrayOfObject(ItemKey::Name),
            &["8.6.5"],
        );
        let out = transformer().resolve_tags(&["9.0-beta".to_string()], &d, "Unknown");
        assert_eq!(out, json!([{"name": "Unknown"}]));
        let out = transformer().resolve_tags(&[], &d, "Unknown");
        assert_eq!(out, json!([{"name": "Unknown"}]));
    }

    #[test]
    fn tags_are_remapped_before_intersecting() {
        let d = descriptor(
            "components",
            "Components",
            FieldType::ArrayOfObject(ItemKey::Name),
            &["NIOS", "DNS"],
        );
        let tags: Vec<String> = ["Grid", "DNS"].map(String::from).to_vec();
        let out = transformer().resolve_tags(&tags, &d, "Unknown");
        assert_eq!(out, json!([{"name": "NIOS"}, {"name": "DNS"}]));
    }

    #[test]
    fn multi_select_without_allowed_values_uses_default_tag() {
        let mut record = Record::new("RFE-1", "RFE", "x");
        record.fields.insert("customfield_5", FieldValue::list(["Initech"]));
        let d = descriptor(
            "customfield_5",
            "Prospects/Customers",
            FieldType::ArrayOfObject(ItemKey::Value),
            &["Acme"],
        );
        let out = transformer().transform(&d, &record, &catalogue());
        assert_eq!(out, Transformed::NotDefined(json!([{"value": "Unknown"}])));

        let out = transformer()
            .with_default_tag("Needs Triage")
            .transform(&d, &Record::new("RFE-2", "RFE", "y"), &catalogue());
        assert_eq!(out.into_value(), json!([{"value": "Needs Triage"}]));
    }

    #[test]
    fn multi_select_field_wraps_values() {
        let mut record = Record::new("RFE-1", "RFE", "x");
        record
            .fields
            .insert("customfield_7", FieldValue::list(["Grid", "Cloud"]));
        let d = descriptor(
            "customfield_7",
            "Platforms",
            FieldType::ArrayOfObject(ItemKey::Value),
            &["NIOS", "Cloud"],
        );
        let out = transformer().transform(&d, &record, &catalogue());
        assert_eq!(out, Transformed::Value(json!([{"value": "NIOS"}, {"value": "Cloud"}])));
    }
}
