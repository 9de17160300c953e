//! Migration of one source record into the destination project.
//!
//! A run walks `fetch -> check duplicate -> build payload -> create -> enrich`.
//! The duplicate check short-circuits to [`Outcome::Skipped`]; a failure in
//! any step before `create` returns [`Outcome::Failed`] without writing.
//! Enrichment is best effort: once `create` succeeds the outcome is
//! [`Outcome::Created`] whatever the enrichment steps report.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, info_span, warn};

use crate::accessor::RecordAccessor;
use crate::config::{GuardErrorPolicy, MigrationConfig};
use crate::error::{MigrateError, Result};
use crate::guard::IdempotencyGuard;
use crate::model::{Comment, Payload, Record};
use crate::schema::{FieldDescriptor, FieldType, SchemaCache};
use crate::tracker::Tracker;
use crate::transform::FieldTransformer;

/// Fields the payload builder sets itself.
const HANDLED_FIELDS: &[&str] = &[
    "project",
    "issuetype",
    "summary",
    "description",
    "versions",
    "components",
    "reporter",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Per-run switches, defaulted from [`MigrationConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateOptions {
    pub copy_comments: bool,
    pub copy_reporter: bool,
    /// Optional destination fields written after create.
    pub additional_fields: Vec<String>,
}

impl From<&MigrationConfig> for MigrateOptions {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            copy_comments: config.copy_comments,
            copy_reporter: config.copy_reporter,
            additional_fields: config.additional_fields.clone(),
        }
    }
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self::from(&MigrationConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    CheckDuplicate,
    BuildPayload,
    Create,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::CheckDuplicate => write!(f, "check_duplicate"),
            Self::BuildPayload => write!(f, "build_payload"),
            Self::Create => write!(f, "create"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCount {
    pub succeeded: usize,
    pub failed: usize,
}

impl StepCount {
    fn record(&mut self, ok: bool) {
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// What the post-create steps managed. `None` means the step did not run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentReport {
    pub provenance_field: bool,
    pub provenance_comment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<StepCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_fields: Option<StepCount>,
}

impl EnrichmentReport {
    /// True when every step that ran succeeded.
    pub fn is_complete(&self) -> bool {
        self.provenance_field
            && self.provenance_comment
            && self.reporter.unwrap_or(true)
            && self.comments.is_none_or(|c| c.failed == 0)
            && self.additional_fields.is_none_or(|c| c.failed == 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Created {
        source: String,
        destination: String,
        enrichment: EnrichmentReport,
    },
    Skipped {
        source: String,
        existing: String,
    },
    Failed {
        source: String,
        stage: Stage,
        reason: String,
    },
}

impl Outcome {
    pub fn source(&self) -> &str {
        match self {
            Self::Created { source, .. } | Self::Skipped { source, .. } | Self::Failed { source, .. } => {
                source
            }
        }
    }

    /// Destination key, new or pre-existing.
    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::Created { destination, .. } => Some(destination),
            Self::Skipped { existing, .. } => Some(existing),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created {
                source,
                destination,
                ..
            } => write!(f, "Successfully migrated {source} to {destination}"),
            Self::Skipped { source, existing } => {
                write!(f, "{source} previously migrated as {existing}")
            }
            Self::Failed {
                source,
                stage: Stage::Create,
                reason,
            } => write!(f, "Error creating from {source}: {reason}"),
            Self::Failed {
                source,
                stage,
                reason,
            } => write!(f, "Failed to migrate {source} at {stage}: {reason}"),
        }
    }
}

/// Migrates source records into the configured destination project.
pub struct Migrator<'t> {
    tracker: &'t dyn Tracker,
    schema: SchemaCache<'t>,
    transformer: FieldTransformer,
    config: MigrationConfig,
}

impl<'t> Migrator<'t> {
    pub fn new(tracker: &'t dyn Tracker, config: MigrationConfig) -> Self {
        Self {
            tracker,
            schema: SchemaCache::new(tracker, &config.destination_project, &config.issue_type),
            transformer: FieldTransformer::new(config.remap.clone(), config.sentinel())
                .with_default_tag(&config.default_tag),
            config,
        }
    }

    pub fn schema(&self) -> &SchemaCache<'t> {
        &self.schema
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Migrate `source_key` once. Never panics on tracker errors; every
    /// failure is reported through the returned [`Outcome`].
    pub fn migrate(&self, source_key: &str, options: &MigrateOptions) -> Outcome {
        let _span = info_span!("migrate", source = source_key).entered();
        let failed = |stage: Stage, reason: String| {
            error!(%stage, reason = %reason, "migration failed");
            Outcome::Failed {
                source: source_key.to_string(),
                stage,
                reason,
            }
        };

        let mut src = RecordAccessor::new(self.tracker, &self.schema);
        if !src.fetch(source_key) {
            let reason = src
                .last_error()
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("could not fetch {source_key}"));
            return failed(Stage::Fetch, reason);
        }
        let Some(source) = src.current().cloned() else {
            return failed(Stage::Fetch, format!("could not fetch {source_key}"));
        };

        // The guard searches the same field id that enrichment writes.
        let provenance = self.schema.descriptor_or_fallback(&self.config.provenance_field);
        let guard = IdempotencyGuard::new(
            self.tracker,
            &self.config.destination_project,
            &provenance.id,
        );
        match guard.already_migrated(source_key) {
            Ok(Some(existing)) => {
                info!(existing = %existing, "skipping, previously migrated");
                return Outcome::Skipped {
                    source: source_key.to_string(),
                    existing,
                };
            }
            Ok(None) => {}
            Err(err) => match self.config.on_guard_error {
                GuardErrorPolicy::Abort => {
                    return failed(
                        Stage::CheckDuplicate,
                        format!("could not determine previous migration: {err}"),
                    );
                }
                GuardErrorPolicy::Proceed => {
                    warn!(error = %err, "duplicate check failed, creating anyway");
                }
            },
        }

        let payload = match self.build_payload(&source) {
            Ok(payload) => payload,
            Err(err) => return failed(Stage::BuildPayload, err.to_string()),
        };

        let mut dst = RecordAccessor::new(self.tracker, &self.schema);
        if !dst.create(&payload) {
            let reason = dst
                .last_error()
                .map(ToString::to_string)
                .unwrap_or_else(|| "create failed".to_string());
            return failed(Stage::Create, reason);
        }
        let Some(destination) = dst.key().map(str::to_string) else {
            return failed(Stage::Create, "created record has no key".to_string());
        };
        info!(destination = %destination, "created");

        let enrichment = self.enrich(&src, &mut dst, &source, &provenance, &payload, options);
        if !enrichment.is_complete() {
            warn!(destination = %destination, ?enrichment, "enrichment incomplete");
        }
        Outcome::Created {
            source: source_key.to_string(),
            destination,
            enrichment,
        }
    }

    /// Fetch the source and build the create payload without writing.
    pub fn preview(&self, source_key: &str) -> Result<Payload> {
        let source = self.tracker.get_record(source_key)?;
        self.build_payload(&source)
    }

    pub fn build_payload(&self, source: &Record) -> Result<Payload> {
        if source.summary.trim().is_empty() {
            return Err(MigrateError::InvalidInput(format!(
                "{} has no summary",
                source.key
            )));
        }
        let mut payload = Payload::new();
        payload.insert(
            "project".into(),
            json!({ "key": self.config.destination_project }),
        );
        payload.insert("issuetype".into(), json!({ "name": self.config.issue_type }));
        payload.insert("summary".into(), Value::String(source.summary.clone()));
        if let Some(description) = &source.description {
            payload.insert(
                "description".into(),
                Value::String(normalize_description(description)),
            );
        }

        let versions = self.schema.descriptor_or_fallback("versions");
        payload.insert(
            "versions".into(),
            self.transformer
                .resolve_tags(&source.versions, &versions, &self.config.default_version),
        );
        let components = self.schema.descriptor_or_fallback("components");
        payload.insert(
            "components".into(),
            self.transformer.resolve_tags(
                &source.components,
                &components,
                &self.config.default_component,
            ),
        );

        let catalogue = self.schema.catalogue();
        let schema = self.schema.schema();
        for descriptor in schema.fields(true) {
            if HANDLED_FIELDS.contains(&descriptor.id.as_str()) {
                continue;
            }
            let value = if self.is_provenance(descriptor) {
                shaped(descriptor, &source.key)
            } else {
                self.transformer
                    .transform(descriptor, source, catalogue)
                    .into_value()
            };
            debug!(field = %descriptor.name, id = %descriptor.id, %value, "required field");
            payload.insert(descriptor.id.clone(), value);
        }
        Ok(payload)
    }

    fn is_provenance(&self, descriptor: &FieldDescriptor) -> bool {
        descriptor.name == self.config.provenance_field
            || self.schema.field_id_for(&self.config.provenance_field) == Some(descriptor.id.as_str())
    }

    fn enrich(
        &self,
        src: &RecordAccessor<'_>,
        dst: &mut RecordAccessor<'_>,
        source: &Record,
        provenance: &FieldDescriptor,
        payload: &Payload,
        options: &MigrateOptions,
    ) -> EnrichmentReport {
        let mut report = EnrichmentReport::default();

        report.provenance_field = if payload.contains_key(&provenance.id) {
            true
        } else {
            dst.update_field(&provenance.id, shaped(provenance, &source.key))
        };
        report.provenance_comment = dst.add_comment(&provenance_comment(source));

        if options.copy_reporter {
            report.reporter = match src.reporter_id().map(str::to_string) {
                Some(account_id) => Some(dst.update_reporter(&account_id)),
                None => {
                    warn!("source reporter not resolvable, skipping reporter copy");
                    None
                }
            };
        }

        if options.copy_comments {
            let mut count = StepCount::default();
            for comment in &source.comments {
                count.record(dst.add_comment(&copied_comment(comment)));
            }
            info!(copied = count.succeeded, failed = count.failed, "comments copied");
            report.comments = Some(count);
        }

        if !options.additional_fields.is_empty() {
            let catalogue = self.schema.catalogue();
            let mut count = StepCount::default();
            for field in &options.additional_fields {
                let descriptor = self.schema.descriptor_or_fallback(field);
                let value = self.transformer.transform(&descriptor, source, catalogue);
                count.record(dst.update_field(&descriptor.id, value.into_value()));
            }
            info!(updated = count.succeeded, failed = count.failed, "additional fields written");
            report.additional_fields = Some(count);
        }
        report
    }
}

/// Drop every carriage return and newline. Spaces and tabs are kept as written.
pub fn normalize_description(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '\n' | '\r')).collect()
}

/// Wrap a plain string the way the destination field type expects.
fn shaped(descriptor: &FieldDescriptor, text: &str) -> Value {
    match descriptor.field_type {
        FieldType::String | FieldType::Unknown => Value::String(text.to_string()),
        FieldType::Option => json!({ "value": text }),
        FieldType::ArrayOfObject(item) => {
            let mut entry = Map::new();
            entry.insert(item.as_str().to_string(), Value::String(text.to_string()));
            Value::Array(vec![Value::Object(entry)])
        }
    }
}

fn provenance_comment(source: &Record) -> String {
    let reporter = source
        .reporter
        .as_ref()
        .map(|u| u.label().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "Migrated from {}\nOriginal reporter: {}\nCreated: {}\nUpdated: {}",
        source.key,
        reporter,
        source.created.format(TIMESTAMP_FORMAT),
        source.updated.format(TIMESTAMP_FORMAT),
    )
}

fn copied_comment(comment: &Comment) -> String {
    format!(
        "Comment by {} on {}:\n\n{}",
        comment.author,
        comment.created.format(TIMESTAMP_FORMAT),
        comment.body
    )
}
