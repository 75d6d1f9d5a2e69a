//! Locate configuration and secrets files by walking up the directory tree.

use std::path::{Path, PathBuf};

/// Config file names, in lookup order within each directory.
pub const CONFIG_FILE_NAMES: [&str; 3] = [
    "mcp-agent.config.yaml",
    "mcp_agent.config.yaml",
    "fastagent.config.yaml",
];

/// Secrets file names, in lookup order within each directory.
pub const SECRETS_FILE_NAMES: [&str; 3] = [
    "mcp-agent.secrets.yaml",
    "mcp_agent.secrets.yaml",
    "fastagent.secrets.yaml",
];

/// Find the nearest config file, starting at `start_dir` and walking up.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    find_upwards(start_dir, &CONFIG_FILE_NAMES)
}

/// Find the secrets file belonging to `config_path`.
///
/// The search starts in the config file's own directory and stops at the
/// first match.
pub fn find_secrets(config_path: &Path) -> Option<PathBuf> {
    let dir = match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir().ok()?,
    };
    find_upwards(&dir, &SECRETS_FILE_NAMES)
}

fn find_upwards(start_dir: &Path, names: &[&str]) -> Option<PathBuf> {
    start_dir.ancestors().find_map(|dir| {
        names
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_config_in_ancestor_directory() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        let cfg = root.path().join("a/fastagent.config.yaml");
        std::fs::write(&cfg, "default_model: openai.gpt-4o\n").unwrap();

        assert_eq!(find_config(&nested), Some(cfg));
    }

    #[test]
    fn nearest_directory_wins_and_names_keep_their_order() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("project");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join("mcp-agent.config.yaml"), "").unwrap();
        std::fs::write(nested.join("fastagent.config.yaml"), "").unwrap();
        std::fs::write(nested.join("mcp_agent.config.yaml"), "").unwrap();

        assert_eq!(
            find_config(&nested),
            Some(nested.join("mcp_agent.config.yaml"))
        );
    }

    #[test]
    fn secrets_are_found_above_the_config_file() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("project");
        std::fs::create_dir_all(&nested).unwrap();
        let cfg = nested.join("fastagent.config.yaml");
        std::fs::write(&cfg, "").unwrap();
        let secrets = root.path().join("mcp-agent.secrets.yaml");
        std::fs::write(&secrets, "").unwrap();

        assert_eq!(find_secrets(&cfg), Some(secrets));
    }

    #[test]
    fn directories_with_config_names_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("fastagent.config.yaml")).unwrap();
        let found = find_config(root.path());
        assert!(found.is_none_or(|p| !p.starts_with(root.path())));
    }
}
