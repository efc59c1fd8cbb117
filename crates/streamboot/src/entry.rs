use std::any::Any;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::EntryConfig;
use crate::error::{Error, Result};

/// The downloaded application's start function.
pub trait EntryPoint {
    fn run(&self) -> Result<()>;

    fn describe(&self) -> String {
        "entry point".to_string()
    }
}

impl<F> EntryPoint for F
where
    F: Fn() -> Result<()>,
{
    fn run(&self) -> Result<()> {
        self()
    }
}

/// Used when nothing is configured to run after the download.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEntryPoint;

impl EntryPoint for NoEntryPoint {
    fn run(&self) -> Result<()> {
        tracing::info!("no entry point configured, nothing to hand off to");
        Ok(())
    }

    fn describe(&self) -> String {
        "none".to_string()
    }
}

/// Runs the application as a child process and waits for it.
#[derive(Debug, Clone)]
pub struct CommandEntryPoint {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl CommandEntryPoint {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl EntryPoint for CommandEntryPoint {
    fn run(&self) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).envs(&self.env);
        if let Some(dir) = self.cwd.as_deref() {
            cmd.current_dir(dir);
        }
        tracing::info!(command = %self.describe(), "starting entry point");
        let status = cmd.status().map_err(|e| {
            Error::entry_point(format!("failed to start {}: {e}", self.describe()))
        })?;
        if status.success() {
            tracing::info!(command = %self.describe(), "entry point exited cleanly");
            return Ok(());
        }
        Err(Error::entry_point(format!(
            "{} exited with {status}",
            self.describe()
        )))
    }

    fn describe(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Builds the configured entry point. `default_cwd` is used when the
/// config does not name a working directory.
pub fn from_config(cfg: &EntryConfig, default_cwd: &Path) -> Box<dyn EntryPoint> {
    let Some(program) = cfg
        .program
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return Box::new(NoEntryPoint);
    };
    Box::new(CommandEntryPoint {
        program: program.to_string(),
        args: cfg.args.clone(),
        env: cfg.env.clone(),
        cwd: Some(cfg.cwd.clone().unwrap_or_else(|| default_cwd.to_path_buf())),
    })
}

/// Text of a panic payload, for reporting.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "panic with a non-string payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_entry_points() {
        let ok = || -> Result<()> { Ok(()) };
        let failing = || -> Result<()> { Err(Error::entry_point("boom")) };
        assert!(ok.run().is_ok());
        assert_eq!(failing.run().unwrap_err().to_string(), "boom");
    }

    #[test]
    fn unconfigured_program_means_no_entry_point() {
        let ep = from_config(&EntryConfig::default(), Path::new("."));
        assert_eq!(ep.describe(), "none");
        assert!(ep.run().is_ok());
    }

    #[test]
    fn panic_payloads_render_as_text() {
        let payload = std::panic::catch_unwind(|| -> i32 { panic!("bad {}", 42) }).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "bad 42");
    }

    #[cfg(unix)]
    #[test]
    fn command_exit_status_is_checked() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let ok = CommandEntryPoint::new("sh")
            .arg("-c")
            .arg("test -f marker.txt")
            .current_dir(tmp.path());
        assert!(ok.run().is_err());

        std::fs::write(tmp.path().join("marker.txt"), "").expect("write");
        assert!(ok.run().is_ok());
    }

    #[test]
    fn missing_program_is_entry_point_error() {
        let ep = CommandEntryPoint::new("streamboot-definitely-not-a-real-binary");
        let err = ep.run().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::EntryPoint);
    }
}
