use crate::config::Config;
use crate::error::Result;
use crate::output::{self, Format};
use crate::schema::SchemaCache;
use crate::tracker::Tracker;

pub fn run(tracker: &dyn Tracker, config: &Config, required_only: bool, format: Format) -> Result<()> {
    let cache = SchemaCache::new(
        tracker,
        &config.migration.destination_project,
        &config.migration.issue_type,
    );
    output::print_schema(&cache.fields(required_only), format)
}
