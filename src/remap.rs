use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Static translations for fields and option values whose names differ
/// between the source and destination vocabularies.
///
/// `fields` maps a destination field name to the source field name to try
/// when the literal lookup finds nothing (`"Product (migrated)" -> "Product"`).
/// `options` maps a source option value to the destination's spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemapTable {
    fields: BTreeMap<String, String>,
    options: BTreeMap<String, String>,
}

impl RemapTable {
    pub fn new(fields: BTreeMap<String, String>, options: BTreeMap<String, String>) -> Self {
        Self { fields, options }
    }

    pub fn with_field(mut self, destination: impl Into<String>, source: impl Into<String>) -> Self {
        self.fields.insert(destination.into(), source.into());
        self
    }

    pub fn with_option(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.options.insert(from.into(), to.into());
        self
    }

    /// Alternate source field name for `field`, if one is configured.
    pub fn alternate_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Destination spelling of an option value; identity on a miss.
    pub fn remap_option<'a>(&'a self, value: &'a str) -> &'a str {
        self.options.get(value).map(String::as_str).unwrap_or(value)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.options.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remap_option_is_identity_on_miss() {
        let table = RemapTable::default().with_option("Grid", "NIOS");
        assert_eq!(table.remap_option("Grid"), "NIOS");
        assert_eq!(table.remap_option("BloxOne"), "BloxOne");
    }

    #[test]
    fn alternate_field_lookup() {
        let table = RemapTable::default().with_field("Product (migrated)", "Product");
        assert_eq!(table.alternate_field("Product (migrated)"), Some("Product"));
        assert_eq!(table.alternate_field("Product"), None);
    }

    #[test]
    fn deserializes_from_yaml() {
        let table: RemapTable = serde_yaml::from_str(
            "fields:\n  Customer Impact (migrated): Customer Impact\noptions:\n  Med: Medium\n",
        )
        .unwrap();
        assert_eq!(
            table.alternate_field("Customer Impact (migrated)"),
            Some("Customer Impact")
        );
        assert_eq!(table.remap_option("Med"), "Medium");
        assert!(!table.is_empty());
    }
}
