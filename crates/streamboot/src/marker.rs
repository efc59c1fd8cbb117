use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

pub const DEFAULT_MARKER_FILE: &str = "streamdownload.lock";

/// Host-wide "download already completed" flag backed by a file.
///
/// Presence is the only thing that matters for launch decisions. The file
/// body (pid and timestamp) is for operators. The marker is created after
/// the first successful download and never removed by this crate.
///
/// This is not a lock: two processes can both observe an absent marker and
/// both download. Downloads are idempotent and writes overwrite fully, so
/// they converge on the same files.
#[derive(Debug, Clone)]
pub struct CompletionMarker {
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerStatus {
    pub present: bool,
    pub pid: Option<u32>,
    pub written_at: Option<DateTime<Utc>>,
}

impl CompletionMarker {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join(DEFAULT_MARKER_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A failed check counts as absent, so the caller downloads again rather
    /// than stalling.
    pub fn exists(&self) -> bool {
        match fs::symlink_metadata(&self.path) {
            Ok(_) => true,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), "marker check failed, treating as absent: {e}");
                }
                false
            }
        }
    }

    /// Best effort: failures are logged and swallowed.
    pub fn mark(&self) {
        let body = format!("{}\n{}\n", std::process::id(), Utc::now().to_rfc3339());
        match self.write_atomic(&body) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "completion marker written");
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "atomic marker write failed: {e}");
                if let Err(e) = fs::write(&self.path, body) {
                    tracing::warn!(path = %self.path.display(), "marker write failed: {e}");
                }
            }
        }
    }

    pub fn status(&self) -> MarkerStatus {
        if !self.exists() {
            return MarkerStatus {
                present: false,
                pid: None,
                written_at: None,
            };
        }
        let raw = fs::read_to_string(&self.path).unwrap_or_default();
        let mut lines = raw.lines().map(str::trim);
        let pid = lines.next().and_then(|l| l.parse::<u32>().ok());
        let written_at = lines
            .next()
            .and_then(|l| DateTime::parse_from_rfc3339(l).ok())
            .map(|t| t.with_timezone(&Utc));
        MarkerStatus {
            present: true,
            pid,
            written_at,
        }
    }

    fn write_atomic(&self, body: &str) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(body.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl Default for CompletionMarker {
    fn default() -> Self {
        Self::at(Self::default_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_then_present_after_mark() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let marker = CompletionMarker::at(tmp.path().join("done.lock"));
        assert!(!marker.exists());
        marker.mark();
        assert!(marker.exists());

        let st = marker.status();
        assert!(st.present);
        assert_eq!(st.pid, Some(std::process::id()));
        assert!(st.written_at.is_some());
    }

    #[test]
    fn mark_into_missing_directory_does_not_panic() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let marker = CompletionMarker::at(tmp.path().join("no/such/dir/done.lock"));
        marker.mark();
        assert!(!marker.exists());
    }

    #[test]
    fn foreign_marker_content_still_counts() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("done.lock");
        fs::write(&path, "").expect("touch");
        let marker = CompletionMarker::at(&path);
        assert!(marker.exists());
        assert_eq!(
            marker.status(),
            MarkerStatus {
                present: true,
                pid: None,
                written_at: None,
            }
        );
    }
}
