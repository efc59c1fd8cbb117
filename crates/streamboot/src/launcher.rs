use std::panic::{AssertUnwindSafe, catch_unwind};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::entry::{EntryPoint, panic_message};
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, ReqwestTransport, Transport};
use crate::marker::CompletionMarker;
use crate::materialize::Materializer;
use crate::report::{FailureStage, LaunchEvent, ReportSink};
use crate::secrets::{CredentialSource, SecretKeys};

/// What to do when the completion marker is already present.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WarmStartPolicy {
    /// Do nothing. The entry point only runs in the process that performed
    /// the download.
    #[default]
    Skip,
    /// Skip the download but still run the entry point.
    Run,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Skipped,
    Launched,
    DownloadFailed(String),
    EntryPointFailed(String),
}

impl LaunchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LaunchOutcome::Skipped | LaunchOutcome::Launched)
    }
}

// CHECK_MARKER --present--> SKIP
//      |
//    absent
//      v
//    FETCH --failure--> REPORT_FAILURE
//      |
//   success
//      v
// MATERIALIZE_AND_RUN

/// One launch pass: check marker, download, write files, hand off.
///
/// Every state is terminal after one pass. Only materialization errors
/// escape [`Launcher::run`]; everything else ends in one report.
pub struct Launcher<'a, T: Transport = ReqwestTransport> {
    secrets: &'a dyn CredentialSource,
    keys: SecretKeys,
    fetcher: &'a Fetcher<T>,
    materializer: &'a Materializer,
    entry: &'a dyn EntryPoint,
    sink: &'a dyn ReportSink,
    warm_start: WarmStartPolicy,
}

impl<'a, T: Transport> Launcher<'a, T> {
    pub fn new(
        secrets: &'a dyn CredentialSource,
        fetcher: &'a Fetcher<T>,
        materializer: &'a Materializer,
        entry: &'a dyn EntryPoint,
        sink: &'a dyn ReportSink,
    ) -> Self {
        Self {
            secrets,
            keys: SecretKeys::default(),
            fetcher,
            materializer,
            entry,
            sink,
            warm_start: WarmStartPolicy::default(),
        }
    }

    pub fn with_keys(mut self, keys: SecretKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_warm_start(mut self, policy: WarmStartPolicy) -> Self {
        self.warm_start = policy;
        self
    }

    pub fn marker(&self) -> &CompletionMarker {
        self.materializer.marker()
    }

    pub fn run(&self) -> Result<LaunchOutcome> {
        if self.marker().exists() {
            tracing::info!(
                marker = %self.marker().path().display(),
                policy = ?self.warm_start,
                "application already downloaded"
            );
            self.sink.emit(LaunchEvent::Skipped);
            return Ok(match self.warm_start {
                WarmStartPolicy::Skip => LaunchOutcome::Skipped,
                WarmStartPolicy::Run => self.hand_off(),
            });
        }

        let creds = match self.secrets.credentials(&self.keys) {
            Ok(creds) => creds,
            Err(e) => return Ok(self.download_failed(e)),
        };
        tracing::debug!(
            url = !creds.endpoint_url.is_empty(),
            streamuser = !creds.principal.is_empty(),
            key = !creds.access_key.is_empty(),
            "credentials loaded"
        );

        let files = match self.fetcher.fetch(&creds) {
            Ok(files) => files,
            Err(e) => return Ok(self.download_failed(e)),
        };

        let written = self.materializer.materialize(&files)?;
        self.sink.emit(LaunchEvent::Fetched {
            count: written.count(),
            paths: written.keys,
        });
        Ok(self.hand_off())
    }

    fn download_failed(&self, e: Error) -> LaunchOutcome {
        let message = e.to_string();
        tracing::error!(kind = %e.kind(), "download failed: {message}");
        self.sink.emit(LaunchEvent::Failed {
            stage: FailureStage::Download,
            message: message.clone(),
        });
        LaunchOutcome::DownloadFailed(message)
    }

    fn hand_off(&self) -> LaunchOutcome {
        let entry = self.entry.describe();
        self.sink.emit(LaunchEvent::EntryStarted {
            entry: entry.clone(),
        });

        let failure = match catch_unwind(AssertUnwindSafe(|| self.entry.run())) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(format!(
                "{entry} panicked: {}",
                panic_message(payload.as_ref())
            )),
        };

        self.sink.emit(LaunchEvent::EntryFinished {
            entry,
            ok: failure.is_none(),
        });
        match failure {
            None => LaunchOutcome::Launched,
            Some(message) => {
                tracing::error!("entry point failed: {message}");
                self.sink.emit(LaunchEvent::Failed {
                    stage: FailureStage::EntryPoint,
                    message: message.clone(),
                });
                LaunchOutcome::EntryPointFailed(message)
            }
        }
    }
}
