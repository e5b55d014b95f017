use anyhow::{bail, Context};
use async_trait::async_trait;
use auditgraph_core::{CallError, ManifestSource};
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::integrity::normalize_path;

/// Fixed file list, for callers that already know the repository contents.
#[derive(Debug, Clone, Default)]
pub struct StaticManifest {
    paths: BTreeSet<String>,
}

impl StaticManifest {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|p| normalize_path(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl ManifestSource for StaticManifest {
    async fn fetch(&self, _cancel: &CancellationToken) -> Result<BTreeSet<String>, CallError> {
        Ok(self.paths.clone())
    }
}

/// Lists every file under a checked-out repository, honouring `.gitignore`
/// and skipping the `.git` directory itself.
#[derive(Debug, Clone)]
pub struct DirectoryManifest {
    root: PathBuf,
}

impl DirectoryManifest {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ManifestSource for DirectoryManifest {
    async fn fetch(&self, _cancel: &CancellationToken) -> Result<BTreeSet<String>, CallError> {
        let root = self.root.clone();
        let paths = tokio::task::spawn_blocking(move || collect_files(&root))
            .await
            .map_err(anyhow::Error::from)??;
        Ok(paths)
    }
}

fn collect_files(root: &Path) -> anyhow::Result<BTreeSet<String>> {
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .ignore(true)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    let mut paths = BTreeSet::new();
    for dent in walker {
        let dent = match dent {
            Ok(d) => d,
            Err(e) => {
                warn!("Walker error: {}", e);
                continue;
            }
        };
        if !dent.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let relative = dent
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} escaped the walk root", dent.path().display()))?;
        let joined = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let normalized = normalize_path(&joined);
        if !normalized.is_empty() {
            debug!(path = %normalized, "manifest entry");
            paths.insert(normalized);
        }
    }

    info!(root = %root.display(), files = paths.len(), "manifest collected");
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn lists_repository_files_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nodes")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("src/nodes/judges.py"), "").unwrap();
        fs::write(dir.path().join("README.md"), "").unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();

        let paths = DirectoryManifest::new(dir.path())
            .fetch(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            paths,
            BTreeSet::from(["README.md".to_string(), "src/nodes/judges.py".to_string()])
        );
    }

    #[tokio::test]
    async fn missing_directory_is_a_call_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectoryManifest::new(dir.path().join("absent"))
            .fetch(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn static_manifest_normalizes() {
        let manifest = StaticManifest::new(["/src/a.rs", "./b.rs", ""]);
        let paths = tokio_test::block_on(manifest.fetch(&CancellationToken::new())).unwrap();
        assert_eq!(paths, BTreeSet::from(["b.rs".to_string(), "src/a.rs".to_string()]));
    }
}
