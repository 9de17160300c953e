use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::remap::RemapTable;

/// What to do when the duplicate check itself fails.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardErrorPolicy {
    /// Stop the record; a later run can retry without risking a duplicate.
    #[default]
    Abort,
    /// Create anyway and log a warning.
    Proceed,
}

/// Connection settings for the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub server: String,
    pub user: String,
    pub api_key: String,
    pub resolution_field: String,
    pub timeout_secs: u64,
}

impl TrackerConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    pub fn is_local(&self) -> bool {
        self.server.starts_with("file://")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    /// Label used in sentinels: `Not defined in <source_kind>`.
    pub source_kind: String,
    pub destination_project: String,
    pub issue_type: String,
    /// Destination field carrying the source key.
    pub provenance_field: String,
    pub default_version: String,
    pub default_component: String,
    /// Placeholder for other multi-valued fields with no allowed value left.
    pub default_tag: String,
    pub copy_comments: bool,
    pub copy_reporter: bool,
    pub additional_fields: Vec<String>,
    pub on_guard_error: GuardErrorPolicy,
    pub summary_fields: Vec<String>,
    pub remap: RemapTable,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source_kind: "RFE".into(),
            destination_project: "IFR".into(),
            issue_type: "New Feature".into(),
            provenance_field: "RFE #".into(),
            default_version: "Unknown".into(),
            default_component: "Unknown".into(),
            default_tag: "Unknown".into(),
            copy_comments: true,
            copy_reporter: true,
            additional_fields: Vec::new(),
            on_guard_error: GuardErrorPolicy::Abort,
            summary_fields: [
                "Product",
                "Summary",
                "Reporter",
                "Priority",
                "Prospects/Customers",
                "RFE #",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            remap: RemapTable::default(),
        }
    }
}

impl MigrationConfig {
    pub fn sentinel(&self) -> String {
        format!("Not defined in {}", self.source_kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub migration: MigrationConfig,
}

/// Command-line values that win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub server: Option<String>,
    pub user: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    tracker: Option<RawTracker>,
    #[serde(default)]
    migration: Option<MigrationConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTracker {
    server: Option<String>,
    user: Option<String>,
    api_key: Option<String>,
    resolution_field: Option<String>,
    timeout_secs: Option<u64>,
}

impl Config {
    pub fn load(path: &Path, overrides: &Overrides) -> Result<Self> {
        let source = path.display().to_string();
        if !path.is_file() {
            return Err(MigrateError::ConfigNotFound(source));
        }
        let text = fs::read_to_string(path)?;
        Self::parse(&text, &source, overrides)
    }

    /// Parse YAML text; `source` names the origin in error messages.
    pub fn parse(text: &str, source: &str, overrides: &Overrides) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(text)
            .map_err(|e| MigrateError::ConfigInvalid(format!("{source}: {e}")))?;
        let tracker = raw
            .tracker
            .ok_or_else(|| MigrateError::ConfigMissingSection("tracker".into(), source.into()))?;

        let server = pick(overrides.server.as_deref(), tracker.server.as_deref());
        let Some(server) = server else {
            return Err(missing("server", source));
        };
        let local = server.starts_with("file://");

        let user = required(
            "user",
            pick(overrides.user.as_deref(), tracker.user.as_deref()),
            local.then_some(""),
            source,
        )?;
        let api_key = required(
            "api_key",
            pick(overrides.api_key.as_deref(), tracker.api_key.as_deref()),
            local.then_some(""),
            source,
        )?;
        let resolution_field = required(
            "resolution_field",
            pick(None, tracker.resolution_field.as_deref()),
            local.then_some("Resolution"),
            source,
        )?;

        let migration = raw.migration.unwrap_or_default();
        if migration.destination_project.trim().is_empty() {
            return Err(MigrateError::ConfigInvalid(
                "migration.destination_project cannot be empty".into(),
            ));
        }
        if migration.provenance_field.trim().is_empty() {
            return Err(MigrateError::ConfigInvalid(
                "migration.provenance_field cannot be empty".into(),
            ));
        }

        debug!(source, server = %server, "config loaded");
        Ok(Self {
            tracker: TrackerConfig {
                server,
                user,
                api_key,
                resolution_field,
                timeout_secs: tracker
                    .timeout_secs
                    .unwrap_or(TrackerConfig::DEFAULT_TIMEOUT_SECS),
            },
            migration,
        })
    }
}

/// A required tracker key; local stores fall back to `local_default`.
fn required(key: &str, value: Option<String>, local_default: Option<&str>, source: &str) -> Result<String> {
    value
        .or_else(|| local_default.map(str::to_string))
        .ok_or_else(|| missing(key, source))
}

fn missing(key: &str, source: &str) -> MigrateError {
    MigrateError::ConfigMissingKey(key.into(), "tracker".into(), source.into())
}

/// First non-empty value after trimming whitespace and surrounding quotes.
fn pick(first: Option<&str>, second: Option<&str>) -> Option<String> {
    [first, second]
        .into_iter()
        .flatten()
        .map(|v| v.trim().trim_matches(['\'', '"']).to_string())
        .find(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FULL: &str = r#"
tracker:
  server: "https://example.atlassian.net"
  user: someone@example.com
  api_key: 'secret'
  resolution_field: Resolution
migration:
  destination_project: OPS
  default_version: Triage
  remap:
    fields:
      Product (migrated): Product
"#;

    #[test]
    fn parses_full_config_and_strips_quotes() {
        let config = Config::parse(FULL, "test.yaml", &Overrides::default()).unwrap();
        assert_eq!(config.tracker.server, "https://example.atlassian.net");
        assert_eq!(config.tracker.api_key, "secret");
        assert_eq!(config.tracker.timeout_secs, 30);
        assert_eq!(config.migration.destination_project, "OPS");
        assert_eq!(config.migration.default_version, "Triage");
        assert_eq!(config.migration.default_component, "Unknown");
        assert_eq!(config.migration.provenance_field, "RFE #");
        assert_eq!(
            config.migration.remap.alternate_field("Product (migrated)"),
            Some("Product")
        );
        assert_eq!(config.migration.sentinel(), "Not defined in RFE");
    }

    #[test]
    fn missing_tracker_section_is_fatal() {
        let err = Config::parse("migration: {}\n", "x.yaml", &Overrides::default()).unwrap_err();
        assert!(matches!(err, MigrateError::ConfigMissingSection(ref s, _) if s == "tracker"));
    }

    #[test]
    fn missing_key_names_the_key() {
        let text = "tracker:\n  server: https://x\n  user: u\n  resolution_field: R\n";
        let err = Config::parse(text, "x.yaml", &Overrides::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "key 'api_key' not found within [tracker] section of config file 'x.yaml'"
        );
    }

    #[test]
    fn overrides_win_and_fill_missing_keys() {
        let text = "tracker:\n  server: https://x\n  user: u\n  resolution_field: R\n";
        let overrides = Overrides {
            server: Some("https://sandbox".into()),
            api_key: Some("k".into()),
            ..Overrides::default()
        };
        let config = Config::parse(text, "x.yaml", &overrides).unwrap();
        assert_eq!(config.tracker.server, "https://sandbox");
        assert_eq!(config.tracker.api_key, "k");
    }

    #[test]
    fn local_store_needs_only_server() {
        let config =
            Config::parse("tracker:\n  server: file:///tmp/store\n", "x.yaml", &Overrides::default())
                .unwrap();
        assert!(config.tracker.is_local());
        assert_eq!(config.tracker.resolution_field, "Resolution");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::parse(
            "tracker:\n  server: file:///x\nmigration:\n  colour: blue\n",
            "x.yaml",
            &Overrides::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "config_invalid");
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempdir().unwrap();
        let err = Config::load(&dir.path().join("nope.yaml"), &Overrides::default()).unwrap_err();
        assert!(matches!(err, MigrateError::ConfigNotFound(_)));
    }

    #[test]
    fn guard_policy_parses_snake_case() {
        let config = Config::parse(
            "tracker:\n  server: file:///x\nmigration:\n  on_guard_error: proceed\n",
            "x.yaml",
            &Overrides::default(),
        )
        .unwrap();
        assert_eq!(config.migration.on_guard_error, GuardErrorPolicy::Proceed);
    }
}
