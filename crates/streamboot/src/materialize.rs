use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::fetch::FetchedFiles;
use crate::marker::CompletionMarker;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Destination keys as the server sent them, in write order.
    pub keys: Vec<String>,
    pub paths: Vec<PathBuf>,
}

impl MaterializeReport {
    pub fn count(&self) -> usize {
        self.keys.len()
    }
}

/// Writes a downloaded file set to disk, then sets the completion marker.
///
/// Destinations are resolved first; a refused key writes nothing. Files are
/// then written one by one with full overwrite. There is no rollback:
/// if a write fails, earlier files stay on disk and the marker is left
/// unset, so the next start downloads everything again.
pub struct Materializer {
    workspace: Workspace,
    marker: CompletionMarker,
}

impl Materializer {
    pub fn new(workspace: Workspace, marker: CompletionMarker) -> Self {
        Self { workspace, marker }
    }

    pub fn marker(&self) -> &CompletionMarker {
        &self.marker
    }

    pub fn materialize(&self, files: &FetchedFiles) -> Result<MaterializeReport> {
        // Resolve every destination up front so a refused key aborts before
        // anything touches the disk.
        let planned = files
            .iter()
            .map(|file| Ok((file, self.workspace.resolve(&file.path)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut report = MaterializeReport::default();
        for (file, dest) in planned {
            if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::materialization(format!(
                        "failed to create directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
            fs::write(&dest, file.content.as_bytes()).map_err(|e| {
                Error::materialization(format!("failed to write {}: {e}", dest.display()))
            })?;
            tracing::debug!(path = %dest.display(), bytes = file.content.len(), "wrote file");
            report.keys.push(file.path.clone());
            report.paths.push(dest);
        }
        self.marker.mark();
        Ok(report)
    }
}
