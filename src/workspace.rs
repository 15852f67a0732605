//! Scratch directory owned by one assembly run.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{Error, Result};

/// A uniquely named directory removed by [`close`](Self::close), or on drop
/// if the run unwinds before reaching it.
#[derive(Debug)]
pub struct WorkspaceDir {
    dir: TempDir,
}

impl WorkspaceDir {
    /// Create under `root`, or under the system temp directory.
    pub fn create(root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("autoiso-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| {
            let location = root.map_or_else(
                || std::env::temp_dir().display().to_string(),
                |r| r.display().to_string(),
            );
            Error::Workspace(format!("cannot create workspace in '{location}': {e}"))
        })?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Remove the directory and everything staged in it.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|e| Error::Workspace(format!("cannot remove '{}': {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_close_removes_everything() {
        let root = TempDir::new().unwrap();
        let ws = WorkspaceDir::create(Some(root.path())).unwrap();
        let path = ws.path().to_path_buf();
        assert!(path.starts_with(root.path()));
        fs::write(ws.join("vmlinuz"), b"kernel").unwrap();

        ws.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let ws = WorkspaceDir::create(None).unwrap();
        let path = ws.path().to_path_buf();
        drop(ws);
        assert!(!path.exists());
    }

    #[test]
    fn test_concurrent_workspaces_are_distinct() {
        let root = TempDir::new().unwrap();
        let a = WorkspaceDir::create(Some(root.path())).unwrap();
        let b = WorkspaceDir::create(Some(root.path())).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_missing_root_is_workspace_error() {
        let root = TempDir::new().unwrap();
        let err = WorkspaceDir::create(Some(&root.path().join("absent"))).unwrap_err();
        assert!(matches!(err, Error::Workspace(_)));
    }
}
