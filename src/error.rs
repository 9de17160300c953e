use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("config file '{0}' not found")]
    ConfigNotFound(String),

    #[error("no [{0}] section found in config file '{1}'")]
    ConfigMissingSection(String, String),

    #[error("key '{0}' not found within [{1}] section of config file '{2}'")]
    ConfigMissingKey(String, String, String),

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("'{0}' is not a tracker store (run `issue-migrate init-store` first)")]
    NotInitialized(String),

    #[error("tracker store already initialized at '{0}'")]
    AlreadyInitialized(String),

    #[error("record {0} not found")]
    RecordNotFound(String),

    #[error("no record bound (fetch or create a record first)")]
    NoCurrentRecord,

    #[error("no user found matching '{0}'")]
    UserNotFound(String),

    #[error("transition '{1}' not available for {0}")]
    TransitionUnavailable(String, String),

    #[error("query not supported by this tracker: {0}")]
    UnsupportedQuery(String),

    #[error("tracker returned http {0}: {1}")]
    Http(u16, String),

    #[error("tracker transport error: {0}")]
    Transport(String),

    #[error("tracker rejected request: {0}")]
    Rejected(String),

    #[error("locked by another process: {0}")]
    Locked(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} of {1} records failed")]
    BatchFailed(usize, usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl MigrateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound(_) => "config_not_found",
            Self::ConfigMissingSection(_, _) => "config_missing_section",
            Self::ConfigMissingKey(_, _, _) => "config_missing_key",
            Self::ConfigInvalid(_) => "config_invalid",
            Self::NotInitialized(_) => "not_initialized",
            Self::AlreadyInitialized(_) => "already_initialized",
            Self::RecordNotFound(_) => "record_not_found",
            Self::NoCurrentRecord => "no_current_record",
            Self::UserNotFound(_) => "user_not_found",
            Self::TransitionUnavailable(_, _) => "transition_unavailable",
            Self::UnsupportedQuery(_) => "unsupported_query",
            Self::Http(_, _) => "http_error",
            Self::Transport(_) => "transport_error",
            Self::Rejected(_) => "rejected",
            Self::Locked(_) => "locked",
            Self::InvalidInput(_) => "invalid_input",
            Self::BatchFailed(_, _) => "batch_failed",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Yaml(_) => "yaml_error",
            Self::Csv(_) => "csv_error",
        }
    }

    /// Configuration problems are fatal at startup.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_)
                | Self::ConfigMissingSection(_, _)
                | Self::ConfigMissingKey(_, _, _)
                | Self::ConfigInvalid(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_snake_case() {
        let err = MigrateError::RecordNotFound("RFE-1".into());
        assert_eq!(err.code(), "record_not_found");
        assert_eq!(err.to_string(), "record RFE-1 not found");
    }

    #[test]
    fn config_errors_are_flagged() {
        assert!(MigrateError::ConfigNotFound("x.yaml".into()).is_config());
        assert!(!MigrateError::NoCurrentRecord.is_config());
    }
}
