//! Workspace-scoped file access

use crate::plugins::error::CapabilityError;
use std::path::{Component, Path, PathBuf};

/// Resolves plugin-supplied paths against the workspace
#[derive(Debug, Clone)]
pub struct PathScope {
    workspace: PathBuf,
    global: bool,
}

impl PathScope {
    /// A relative workspace is anchored at the current directory
    pub fn new(workspace: impl Into<PathBuf>, global: bool) -> Self {
        let workspace = workspace.into();
        let absolute = if workspace.is_absolute() {
            workspace
        } else {
            match std::env::current_dir() {
                Ok(cwd) => cwd.join(workspace),
                Err(e) => {
                    tracing::warn!("cannot anchor workspace {}: {}", workspace.display(), e);
                    workspace
                }
            }
        };
        let workspace = normalize(&absolute).unwrap_or(absolute);
        Self { workspace, global }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Relative paths join the workspace; anything landing outside it is
    /// refused unless the scope is global.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, CapabilityError> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        };
        let resolved = normalize(&joined)
            .ok_or_else(|| CapabilityError::PathOutsideWorkspace(joined.clone()))?;

        let inside = self.workspace.is_absolute() && resolved.starts_with(&self.workspace);
        if self.global || inside {
            Ok(resolved)
        } else {
            Err(CapabilityError::PathOutsideWorkspace(resolved))
        }
    }
}

/// Lexical normalization; does not touch the filesystem. `None` when a
/// `..` climbs above the start of the path.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                );
                if !can_pop {
                    return None;
                }
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// `fs:read` capability
#[derive(Debug, Clone)]
pub struct FileReader {
    scope: PathScope,
}

impl FileReader {
    pub fn new(scope: PathScope) -> Self {
        Self { scope }
    }

    pub async fn read(&self, path: impl AsRef<Path>) -> Result<String, CapabilityError> {
        let resolved = self.scope.resolve(path)?;
        Ok(tokio::fs::read_to_string(resolved).await?)
    }

    pub async fn read_bytes(&self, path: impl AsRef<Path>) -> Result<Vec<u8>, CapabilityError> {
        let resolved = self.scope.resolve(path)?;
        Ok(tokio::fs::read(resolved).await?)
    }
}

/// `fs:write` capability
#[derive(Debug, Clone)]
pub struct FileWriter {
    scope: PathScope,
}

impl FileWriter {
    pub fn new(scope: PathScope) -> Self {
        Self { scope }
    }

    /// Write `contents`, creating parent directories as needed
    pub async fn write(
        &self,
        path: impl AsRef<Path>,
        contents: impl AsRef<[u8]>,
    ) -> Result<PathBuf, CapabilityError> {
        let resolved = self.scope.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, contents).await?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_relative_paths_join_workspace() {
        let scope = PathScope::new("/work/space", false);
        assert_eq!(
            scope.resolve("notes/a.md").unwrap(),
            PathBuf::from("/work/space/notes/a.md")
        );
        assert_eq!(
            scope.resolve("./notes/../b.md").unwrap(),
            PathBuf::from("/work/space/b.md")
        );
    }

    #[test]
    fn test_absolute_outside_rejected_without_global() {
        let scope = PathScope::new("/work/space", false);
        assert!(scope.resolve("/work/space/inside.txt").is_ok());
        assert!(matches!(
            scope.resolve("/etc/passwd"),
            Err(CapabilityError::PathOutsideWorkspace(_))
        ));
        assert!(scope.resolve("../../etc/passwd").is_err());

        let global = PathScope::new("/work/space", true);
        assert_eq!(
            global.resolve("/etc/hosts").unwrap(),
            PathBuf::from("/etc/hosts")
        );
    }

    #[test]
    fn test_relative_workspace_is_anchored() {
        let scope = PathScope::new(".", false);
        let cwd = std::env::current_dir().unwrap();
        assert!(scope.workspace().is_absolute());
        assert_eq!(scope.resolve("a.txt").unwrap(), cwd.join("a.txt"));
        assert!(matches!(
            scope.resolve("/etc/passwd"),
            Err(CapabilityError::PathOutsideWorkspace(_))
        ));
        assert!(scope.resolve("../../outside.txt").is_err());
    }

    #[test]
    fn test_climbing_above_root_is_rejected() {
        let scope = PathScope::new("/", false);
        assert!(scope.resolve("/../etc").is_err());
        assert!(PathScope::new("/work", true).resolve("/../../x").is_err());
    }

    #[tokio::test]
    async fn test_write_creates_parents_then_read_back() {
        let dir = TempDir::new().unwrap();
        let scope = PathScope::new(dir.path(), false);
        let writer = FileWriter::new(scope.clone());
        let reader = FileReader::new(scope);

        let written = writer.write("out/deep/report.txt", "done").await.unwrap();
        assert!(written.starts_with(dir.path()));
        assert_eq!(reader.read("out/deep/report.txt").await.unwrap(), "done");
    }
}
