use std::path::{Component, Path, PathBuf};

use crate::config::WorkspaceConfig;
use crate::error::{Error, Result};

/// Where downloaded files land.
///
/// Destination keys come from the server and are untrusted. By default they
/// are used as given (relative to `root`, absolute as-is). With `confine`
/// set, absolute keys, `..` components and symlinks leading out of `root`
/// are refused.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    confine: bool,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, confine: bool) -> Self {
        Self {
            root: root.into(),
            confine,
        }
    }

    pub fn from_config(cfg: &WorkspaceConfig) -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::configuration(format!("cwd error: {e}")))?;
        let raw = cfg.root_dir.trim();
        if raw.is_empty() {
            return Err(Error::configuration("empty workspace.root_dir"));
        }
        let pb = PathBuf::from(raw);
        let root = if pb.is_absolute() { pb } else { cwd.join(pb) };
        Ok(Self::new(root, cfg.confine))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.trim().is_empty() {
            return Err(Error::materialization("empty destination path"));
        }
        let rel = Path::new(key);
        if !self.confine {
            return Ok(if rel.is_absolute() {
                rel.to_path_buf()
            } else {
                self.root.join(rel)
            });
        }

        if rel.is_absolute() || rel.has_root() {
            return Err(Error::materialization(format!(
                "refusing destination '{key}' (absolute path outside workspace root '{}')",
                self.root.display()
            )));
        }
        if rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::Prefix(_) | Component::RootDir
            )
        }) {
            return Err(Error::materialization(format!(
                "refusing destination '{key}' (contains '..')"
            )));
        }
        let out = self.root.join(rel);

        // Symlinks inside root can still escape, either as a parent directory
        // or as the destination itself. Only the deepest existing path matters;
        // anything below it will be created fresh.
        let existing = out
            .ancestors()
            .find(|p| p.symlink_metadata().is_ok())
            .filter(|p| p.starts_with(&self.root) && *p != self.root.as_path());
        let escapes = existing.is_some_and(|anc| {
            let root_can = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
            anc.canonicalize()
                .map(|c| !c.starts_with(&root_can))
                .unwrap_or(true)
        });
        if escapes {
            return Err(Error::materialization(format!(
                "refusing destination '{key}' (resolves outside workspace root '{}')",
                self.root.display()
            )));
        }
        Ok(out)
    }
}
