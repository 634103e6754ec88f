use std::path::Path;

use crate::adjust::AdjustResult;
use crate::models::{CoreError, CoreErrorKind, RemovedRepository};

const BACKUP_PROPERTY: &str = "-DrepoRemovalBackup";

/// Name of the repository-removal backup file, if the tool was asked to write one.
pub fn backup_file_name(parameters: &[String]) -> Option<&str> {
    parameters.iter().find_map(|parameter| {
        let rest = parameter.strip_prefix(BACKUP_PROPERTY)?;
        rest.strip_prefix('=')
            .or_else(|| rest.strip_prefix(':'))
            .filter(|name| !name.is_empty())
    })
}

/// Repositories the tool removed from the build, in the order it reported
/// them. A backup file that was never written means nothing was removed.
pub fn read_removed_repositories(
    work_dir: &Path,
    parameters: &[String],
) -> AdjustResult<Vec<RemovedRepository>> {
    let Some(file_name) = backup_file_name(parameters) else {
        return Ok(Vec::new());
    };

    let path = work_dir.join(file_name);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(
                path = %path.display(),
                "repository removal backup not found; assuming no repositories were removed"
            );
            return Ok(Vec::new());
        }
        Err(error) => {
            return Err(CoreError::new(
                CoreErrorKind::ResultArtifact,
                format!("failed to read '{}': {error}", path.display()),
            ));
        }
    };

    parse_removed_repositories(&text).map_err(|message| {
        CoreError::new(
            CoreErrorKind::ResultArtifact,
            format!("failed to parse '{}': {message}", path.display()),
        )
    })
}

pub fn parse_removed_repositories(xml: &str) -> Result<Vec<RemovedRepository>, String> {
    let document = roxmltree::Document::parse(xml).map_err(|error| error.to_string())?;

    let repositories = document
        .descendants()
        .filter(|node| node.has_tag_name("repository") || node.has_tag_name("pluginRepository"))
        .filter_map(|node| {
            let url = child_text(node, "url")?;
            Some(RemovedRepository {
                id: child_text(node, "id").unwrap_or_default(),
                name: child_text(node, "name"),
                url,
                releases: policy_enabled(node, "releases"),
                snapshots: policy_enabled(node, "snapshots"),
            })
        })
        .collect();

    Ok(repositories)
}

fn child_text(node: roxmltree::Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|child| child.has_tag_name(tag))
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

// Maven treats a missing policy as enabled.
fn policy_enabled(node: roxmltree::Node<'_, '_>, policy: &str) -> bool {
    node.children()
        .find(|child| child.has_tag_name(policy))
        .and_then(|child| child_text(child, "enabled"))
        .is_none_or(|enabled| enabled.eq_ignore_ascii_case("true"))
}
