use std::path::Path;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::accessor::RecordAccessor;
use crate::commands::batch_result;
use crate::commands::records::{bind, schema_cache};
use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::model::FieldValue;
use crate::output::{self, Format};
use crate::tracker::Tracker;

/// Who becomes reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewReporter {
    Email(String),
    AccountId(String),
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    key: String,
    email: String,
}

pub fn update(
    tracker: &dyn Tracker,
    config: &Config,
    key: &str,
    reporter: &NewReporter,
    format: Format,
) -> Result<()> {
    let cache = schema_cache(tracker, config);
    let mut accessor = RecordAccessor::new(tracker, &cache);
    bind(&mut accessor, key)?;
    let ok = match reporter {
        NewReporter::Email(email) => accessor.update_reporter_by_email(email),
        NewReporter::AccountId(id) => accessor.update_reporter(id),
    };
    if !ok {
        return Err(match reporter {
            NewReporter::Email(email) => MigrateError::UserNotFound(email.clone()),
            NewReporter::AccountId(id) => {
                MigrateError::Rejected(format!("could not set reporter {id} on {key}"))
            }
        });
    }
    output::print_step(key, true, "reporter updated", format)
}

/// Bulk update from a CSV file with `key,email` columns.
pub fn update_from_csv(tracker: &dyn Tracker, config: &Config, path: &Path, format: Format) -> Result<()> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows: Vec<CsvRow> = reader.deserialize().collect::<std::result::Result<_, _>>()?;

    let cache = schema_cache(tracker, config);
    let mut accessor = RecordAccessor::new(tracker, &cache);
    let mut succeeded = 0;
    for row in &rows {
        let key = row.key.trim();
        let email = row.email.trim();
        let ok = accessor.fetch(key) && accessor.update_reporter_by_email(email);
        if ok {
            info!(key, email, "reporter updated");
            succeeded += 1;
        } else {
            error!(key, email, "failed to update reporter");
        }
        output::print_step(key, ok, email, format)?;
    }
    output::print_tally(succeeded, rows.len(), "records", format)?;
    batch_result(succeeded, rows.len())
}

/// For each destination record, look up its source through the provenance
/// field and copy the source's reporter across.
pub fn copy_from_source(
    tracker: &dyn Tracker,
    config: &Config,
    keys: &[String],
    format: Format,
) -> Result<()> {
    let cache = schema_cache(tracker, config);
    let mut dst = RecordAccessor::new(tracker, &cache);
    let mut src = RecordAccessor::new(tracker, &cache);
    let provenance = cache
        .descriptor_or_fallback(&config.migration.provenance_field)
        .id;

    let mut succeeded = 0;
    for key in keys {
        let ok = copy_one(&mut src, &mut dst, key, &provenance);
        if ok {
            succeeded += 1;
        }
        let detail = if ok { src.key().unwrap_or_default() } else { "" };
        output::print_step(key, ok, detail, format)?;
    }
    output::print_tally(succeeded, keys.len(), "records", format)?;
    batch_result(succeeded, keys.len())
}

fn copy_one(
    src: &mut RecordAccessor<'_>,
    dst: &mut RecordAccessor<'_>,
    key: &str,
    provenance: &str,
) -> bool {
    if !dst.fetch(key) {
        return false;
    }
    let source_key = dst
        .current()
        .and_then(|r| r.fields.lookup(provenance, dst.catalogue()))
        .map(FieldValue::display)
        .filter(|k| !k.is_empty());
    let Some(source_key) = source_key else {
        warn!(key, field = provenance, "no provenance recorded");
        return false;
    };
    if !src.fetch(&source_key) {
        return false;
    }
    match src.reporter_id().map(str::to_string) {
        Some(account_id) => dst.update_reporter(&account_id),
        None => {
            warn!(key, source = %source_key, "source has no reporter");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Overrides;
    use crate::model::{Record, User};
    use crate::tracker::MemoryTracker;
    use serde_json::json;

    #[test]
    fn copy_finds_source_by_provenance_field_id() {
        let tracker = MemoryTracker::new();
        tracker.set_create_meta(
            "IFR",
            "New Feature",
            json!({
                "customfield_9": {"name": "RFE #", "required": false, "schema": {"type": "string"}}
            }),
        );
        let mut source = Record::new("RFE-42", "RFE", "Widget support");
        source.reporter = Some(User::new("acc-1"));
        tracker.insert(source);
        let mut migrated = Record::new("IFR-1", "IFR", "Widget support");
        migrated.fields.insert("customfield_9", FieldValue::text("RFE-42"));
        tracker.insert(migrated);

        let config = Config::parse("tracker:\n  server: file:///unused\n", "inline", &Overrides::default())
            .unwrap();
        copy_from_source(&tracker, &config, &["IFR-1".to_string()], Format::Json).unwrap();
        let reporter = tracker.record("IFR-1").unwrap().reporter.unwrap();
        assert_eq!(reporter.account_id, "acc-1");
    }
}
