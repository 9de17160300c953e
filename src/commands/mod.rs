pub mod migrate;
pub mod records;
pub mod reporter;
pub mod schema;
pub mod store;
pub mod transition;

use std::fs;
use std::path::Path;

use crate::error::{MigrateError, Result};

/// Keys from the command line followed by keys read from `file`, one per
/// line. Blank lines and `#` comments are skipped.
pub fn collect_keys(keys: Vec<String>, file: Option<&Path>) -> Result<Vec<String>> {
    let mut all: Vec<String> = keys
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if let Some(path) = file {
        let text = fs::read_to_string(path)?;
        all.extend(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }
    if all.is_empty() {
        return Err(MigrateError::InvalidInput(
            "no record keys given (pass KEYS or --file)".into(),
        ));
    }
    Ok(all)
}

/// Turn a batch tally into the command's result.
pub(crate) fn batch_result(succeeded: usize, total: usize) -> Result<()> {
    if succeeded == total {
        Ok(())
    } else {
        Err(MigrateError::BatchFailed(total - succeeded, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn keys_from_args_and_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.txt");
        fs::write(&path, "RFE-2\n\n# skipped\n  RFE-3  \n").unwrap();
        let keys = collect_keys(vec!["RFE-1".into()], Some(&path)).unwrap();
        assert_eq!(keys, vec!["RFE-1", "RFE-2", "RFE-3"]);
    }

    #[test]
    fn no_keys_is_invalid_input() {
        let err = collect_keys(Vec::new(), None).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn batch_result_reports_failures() {
        assert!(batch_result(3, 3).is_ok());
        let err = batch_result(1, 3).unwrap_err();
        assert_eq!(err.to_string(), "2 of 3 records failed");
    }
}
