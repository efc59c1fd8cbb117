use std::io::Write;
use std::sync::Mutex;

use crate::log_sanitize::sanitize_report;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Credentials, transport or server rejected the download.
    Download,
    /// The application failed after handoff.
    EntryPoint,
    /// An error nothing else handled (e.g. writing downloaded files).
    Unhandled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchEvent {
    /// Marker present; nothing was downloaded.
    Skipped,
    Fetched {
        count: usize,
        paths: Vec<String>,
    },
    EntryStarted {
        entry: String,
    },
    EntryFinished {
        entry: String,
        ok: bool,
    },
    Failed {
        stage: FailureStage,
        message: String,
    },
}

/// Where operators see what happened. Rendering is up to the sink.
pub trait ReportSink {
    fn emit(&self, ev: LaunchEvent);
}

/// Progress on stdout, failures on stderr.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    quiet: bool,
}

impl ConsoleSink {
    /// Only failures are printed.
    pub fn quiet() -> Self {
        Self { quiet: true }
    }
}

pub fn render_failure(stage: FailureStage, message: &str) -> String {
    let message = sanitize_report(message);
    match stage {
        FailureStage::Download => format!("Download failed: {message}"),
        FailureStage::EntryPoint => format!("entry point crashed:\n{message}"),
        FailureStage::Unhandled => format!("unhandled error:\n{message}"),
    }
}

impl ReportSink for ConsoleSink {
    fn emit(&self, ev: LaunchEvent) {
        match ev {
            LaunchEvent::Failed { stage, message } => {
                let mut err = std::io::stderr().lock();
                let _ = writeln!(err, "ERROR: {}", render_failure(stage, &message));
            }
            _ if self.quiet => {}
            LaunchEvent::Skipped => println!("SKIP: application files already downloaded"),
            LaunchEvent::Fetched { count, paths } => {
                println!("FETCHED: {count} files: {paths:?}");
            }
            LaunchEvent::EntryStarted { entry } => println!("RUN: {entry}"),
            LaunchEvent::EntryFinished { entry, ok } => {
                if ok {
                    println!("DONE: {entry}");
                } else {
                    println!("FAIL: {entry}");
                }
            }
        }
    }
}

/// Keeps every event; for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LaunchEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LaunchEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn failures(&self) -> Vec<(FailureStage, String)> {
        self.events()
            .into_iter()
            .filter_map(|ev| match ev {
                LaunchEvent::Failed { stage, message } => Some((stage, message)),
                _ => None,
            })
            .collect()
    }
}

impl ReportSink for MemorySink {
    fn emit(&self, ev: LaunchEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(ev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_rendering_prefixes_stage() {
        assert_eq!(
            render_failure(FailureStage::Download, "HTTP 500: oops"),
            "Download failed: HTTP 500: oops"
        );
        assert_eq!(
            render_failure(FailureStage::EntryPoint, "python3 main.py exited with exit status: 1"),
            "entry point crashed:\npython3 main.py exited with exit status: 1"
        );
    }

    #[test]
    fn rendering_strips_terminal_escapes() {
        let got = render_failure(FailureStage::Download, "\u{1b}[2Jcleared");
        assert_eq!(got, "Download failed: cleared");
    }

    #[test]
    fn memory_sink_filters_failures() {
        let sink = MemorySink::new();
        sink.emit(LaunchEvent::Skipped);
        sink.emit(LaunchEvent::Failed {
            stage: FailureStage::Unhandled,
            message: "disk full".into(),
        });
        assert_eq!(sink.events().len(), 2);
        assert_eq!(
            sink.failures(),
            vec![(FailureStage::Unhandled, "disk full".to_string())]
        );
    }
}
