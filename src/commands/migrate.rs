use tracing::{error, info, info_span};
use uuid::Uuid;

use crate::commands::batch_result;
use crate::config::MigrationConfig;
use crate::error::Result;
use crate::migration::{MigrateOptions, Migrator};
use crate::output::{self, Format};
use crate::tracker::Tracker;

/// Per-invocation overrides of the configured migration options.
#[derive(Debug, Clone, Default)]
pub struct MigrateArgs {
    pub no_comments: bool,
    pub fields: Vec<String>,
    pub dry_run: bool,
}

pub fn run(
    tracker: &dyn Tracker,
    config: &MigrationConfig,
    keys: &[String],
    args: &MigrateArgs,
    format: Format,
) -> Result<()> {
    let run_id = Uuid::new_v4();
    let _span = info_span!("batch", run = %run_id).entered();
    let migrator = Migrator::new(tracker, config.clone());

    if args.dry_run {
        let mut built = 0;
        for key in keys {
            match migrator.preview(key) {
                Ok(payload) => {
                    built += 1;
                    output::print_payload(key, &payload, format)?;
                }
                Err(err) => {
                    error!(key = %key, error = %err, "preview failed");
                    output::print_step(key, false, &err.to_string(), format)?;
                }
            }
        }
        output::print_tally(built, keys.len(), "payloads", format)?;
        return batch_result(built, keys.len());
    }

    let mut options = MigrateOptions::from(config);
    if args.no_comments {
        options.copy_comments = false;
    }
    for field in &args.fields {
        if !options.additional_fields.contains(field) {
            options.additional_fields.push(field.clone());
        }
    }

    let mut succeeded = 0;
    for key in keys {
        let outcome = migrator.migrate(key, &options);
        if !outcome.is_failure() {
            succeeded += 1;
        }
        output::print_outcome(&outcome, format)?;
    }
    info!(succeeded, total = keys.len(), "migration batch finished");
    output::print_tally(succeeded, keys.len(), "records", format)?;
    batch_result(succeeded, keys.len())
}
