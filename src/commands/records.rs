//! Single-record commands: show, summary, status, comment, update-field,
//! weblink and search.

use serde_json::Value;
use tracing::error;

use crate::accessor::RecordAccessor;
use crate::commands::batch_result;
use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::output::{self, Format};
use crate::schema::SchemaCache;
use crate::tracker::Tracker;

pub(crate) fn schema_cache<'t>(tracker: &'t dyn Tracker, config: &Config) -> SchemaCache<'t> {
    SchemaCache::new(
        tracker,
        &config.migration.destination_project,
        &config.migration.issue_type,
    )
}

/// Fetch `key` into `accessor` or fail with the fetch error.
pub(crate) fn bind(accessor: &mut RecordAccessor<'_>, key: &str) -> Result<()> {
    if accessor.fetch(key) {
        return Ok(());
    }
    Err(accessor
        .take_error()
        .unwrap_or_else(|| MigrateError::RecordNotFound(key.to_string())))
}

fn rejected(what: &str, key: &str) -> MigrateError {
    MigrateError::Rejected(format!("{what} failed for {key}"))
}

pub fn show(tracker: &dyn Tracker, config: &Config, key: &str, all: bool, format: Format) -> Result<()> {
    let cache = schema_cache(tracker, config);
    let mut accessor = RecordAccessor::new(tracker, &cache);
    bind(&mut accessor, key)?;
    if let Some(record) = accessor.current() {
        output::print_record(record, format)?;
    }
    output::print_fields(key, &accessor.output(all), format)
}

pub fn summary(
    tracker: &dyn Tracker,
    config: &Config,
    key: &str,
    fields: &[String],
    format: Format,
) -> Result<()> {
    let cache = schema_cache(tracker, config);
    let mut accessor = RecordAccessor::new(tracker, &cache);
    bind(&mut accessor, key)?;
    let fields = if fields.is_empty() {
        config.migration.summary_fields.as_slice()
    } else {
        fields
    };
    output::print_fields(key, &accessor.summarise(fields), format)
}

pub fn status(tracker: &dyn Tracker, config: &Config, keys: &[String], format: Format) -> Result<()> {
    let cache = schema_cache(tracker, config);
    let mut accessor = RecordAccessor::new(tracker, &cache);
    let mut succeeded = 0;
    for key in keys {
        let ok = accessor.fetch(key);
        let detail = accessor.status().map(|s| s.name.clone()).unwrap_or_default();
        if ok {
            succeeded += 1;
        } else {
            error!(key = %key, "failed to get current status");
        }
        output::print_step(key, ok, &detail, format)?;
    }
    output::print_tally(succeeded, keys.len(), "records", format)?;
    batch_result(succeeded, keys.len())
}

pub fn comment(tracker: &dyn Tracker, config: &Config, key: &str, text: &str, format: Format) -> Result<()> {
    let cache = schema_cache(tracker, config);
    let mut accessor = RecordAccessor::new(tracker, &cache);
    bind(&mut accessor, key)?;
    if !accessor.add_comment(text) {
        return Err(rejected("comment", key));
    }
    output::print_step(key, true, "comment added", format)
}

/// Values that look like JSON objects or arrays are sent as JSON, anything
/// else as a plain string.
pub fn parse_field_value(raw: &str) -> Value {
    let trimmed = raw.trim_start();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && let Ok(value) = serde_json::from_str(raw)
    {
        return value;
    }
    Value::String(raw.to_string())
}

pub fn update_field(
    tracker: &dyn Tracker,
    config: &Config,
    key: &str,
    field: &str,
    value: &str,
    format: Format,
) -> Result<()> {
    let cache = schema_cache(tracker, config);
    let mut accessor = RecordAccessor::new(tracker, &cache);
    bind(&mut accessor, key)?;
    if !accessor.update_field(field, parse_field_value(value)) {
        return Err(rejected("update", key));
    }
    output::print_step(key, true, &format!("{field} updated"), format)
}

pub fn weblink(
    tracker: &dyn Tracker,
    config: &Config,
    key: &str,
    url: &str,
    title: &str,
    format: Format,
) -> Result<()> {
    let cache = schema_cache(tracker, config);
    let mut accessor = RecordAccessor::new(tracker, &cache);
    bind(&mut accessor, key)?;
    if !accessor.add_web_link(url, title) {
        return Err(rejected("web link", key));
    }
    output::print_step(key, true, url, format)
}

pub fn search(tracker: &dyn Tracker, config: &Config, jql: &str, format: Format) -> Result<()> {
    let cache = schema_cache(tracker, config);
    let accessor = RecordAccessor::new(tracker, &cache);
    let hits = accessor.jql_query(jql)?;
    output::print_summaries(&hits, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_values_parse_json_shapes_only() {
        assert_eq!(parse_field_value(r#"{"value": "NIOS"}"#), json!({"value": "NIOS"}));
        assert_eq!(parse_field_value(r#"[{"name": "9.0"}]"#), json!([{"name": "9.0"}]));
        assert_eq!(parse_field_value("42"), json!("42"));
        assert_eq!(parse_field_value("{not json"), json!("{not json"));
    }
}
