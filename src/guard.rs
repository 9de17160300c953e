use tracing::{debug, error, info};

use crate::error::Result;
use crate::tracker::{Query, Tracker};

/// Looks for a destination record that already carries a source key in its
/// provenance field. Pass the field id the migration writes to; a name only
/// matches on trackers whose catalogue can resolve it.
pub struct IdempotencyGuard<'a> {
    tracker: &'a dyn Tracker,
    project: String,
    provenance_field: String,
}

impl<'a> IdempotencyGuard<'a> {
    pub fn new(
        tracker: &'a dyn Tracker,
        project: impl Into<String>,
        provenance_field: impl Into<String>,
    ) -> Self {
        Self {
            tracker,
            project: project.into(),
            provenance_field: provenance_field.into(),
        }
    }

    /// Key of the first destination record (in the tracker's native order)
    /// whose provenance field holds `source_key`.
    pub fn already_migrated(&self, source_key: &str) -> Result<Option<String>> {
        let query = Query::field_equals(&self.project, &self.provenance_field, source_key);
        let hits = match self.tracker.search(&query) {
            Ok(hits) => hits,
            Err(err) => {
                error!(
                    source = source_key,
                    error = %err,
                    "could not determine whether record was already migrated"
                );
                return Err(err);
            }
        };
        match hits.into_iter().next() {
            Some(hit) => {
                info!(source = source_key, destination = %hit.key, "already migrated");
                Ok(Some(hit.key))
            }
            None => {
                debug!(source = source_key, project = %self.project, "no previous migration found");
                Ok(None)
            }
        }
    }
}
