//! MIT license presence.

use super::{outcome, CheckError, LICENSE_CHECK};
use crate::store::NewCheckResult;
use crate::vcs::{RepoHost, RepoRef};

const MIT_MARKER: &str = "MIT";
const GRANT_CLAUSE: &str = "Permission is hereby granted";

/// Both the MIT marker and the permission grant must appear.
pub fn license_is_mit(content: &str) -> bool {
    content.contains(MIT_MARKER) && content.contains(GRANT_CLAUSE)
}

pub(crate) async fn check_license(
    host: &dyn RepoHost,
    repo: &RepoRef,
    commit: &str,
) -> Result<NewCheckResult, CheckError> {
    let content = host
        .fetch_file(repo, commit, "LICENSE")
        .await
        .map_err(|e| CheckError::RepoHost(e.to_string()))?;

    Ok(match content {
        None => outcome(LICENSE_CHECK, 0.0, "LICENSE file not found", ""),
        Some(text) if license_is_mit(&text) => {
            outcome(LICENSE_CHECK, 1.0, "MIT LICENSE found", first_line(&text))
        }
        Some(text) => outcome(
            LICENSE_CHECK,
            0.0,
            "LICENSE is not MIT",
            first_line(&text),
        ),
    })
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}
