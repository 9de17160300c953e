/// Build-time git commit SHA stamped by build.rs when available.
pub fn git_sha() -> Option<&'static str> {
    option_env!("ISSUE_MIGRATE_BUILD_GIT_SHA")
}

/// `issue-migrate/<version>` with the short commit appended when known.
pub fn user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match git_sha() {
        Some(sha) => format!("issue-migrate/{version}+{}", &sha[..sha.len().min(12)]),
        None => format!("issue-migrate/{version}"),
    }
}
