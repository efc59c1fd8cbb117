use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::FetchConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::log_sanitize::excerpt;
use crate::secrets::Credentials;

mod transport;

pub use transport::{HttpResponse, ReqwestTransport, Transport, error_chain};

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryOn {
    /// Retry connection-level failures only.
    #[default]
    Transport,
    /// Also retry non-200 responses and unusable payloads.
    Any,
    Never,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
    pub retry_on: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            retry_on: RetryOn::Transport,
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, err: &Error) -> bool {
        match (self.retry_on, err.kind()) {
            (RetryOn::Never, _) => false,
            (_, ErrorKind::Transport) => true,
            (RetryOn::Any, ErrorKind::Application) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: String,
    pub content: String,
}

/// Destination path -> content, in the order the server listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedFiles {
    files: Vec<FetchedFile>,
}

impl FetchedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, P, C>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        Self {
            files: pairs
                .into_iter()
                .map(|(p, c)| FetchedFile {
                    path: p.into(),
                    content: c.into(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FetchedFile> {
        self.files.iter()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.content.as_str())
    }

    /// Parses a 200 response body.
    ///
    /// A body that is not a JSON object counts as a malformed response
    /// (transport). A JSON object with the wrong status or shape is an
    /// application failure.
    pub fn from_response_body(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| Error::transport(format!("malformed response body: {e}")))?;
        let Value::Object(obj) = &value else {
            return Err(Error::transport(format!(
                "malformed response body: expected a JSON object, got {}",
                json_type_name(&value)
            )));
        };

        if obj.get("status").and_then(Value::as_str) != Some("ok") {
            return Err(Error::application(format!(
                "Bad status in response: {value}"
            )));
        }

        let files = match obj.get("files") {
            None | Some(Value::Null) => return Ok(Self::new()),
            Some(Value::Object(files)) => files,
            Some(other) => {
                return Err(Error::application(format!(
                    "Bad files in response: expected an object of path -> text, got {}",
                    json_type_name(other)
                )));
            }
        };

        let mut out = Vec::with_capacity(files.len());
        for (path, content) in files {
            let Some(text) = content.as_str() else {
                return Err(Error::application(format!(
                    "Bad files in response: content for '{path}' is {}, expected text",
                    json_type_name(content)
                )));
            };
            out.push(FetchedFile {
                path: path.clone(),
                content: text.to_string(),
            });
        }
        Ok(Self { files: out })
    }
}

impl<'a> IntoIterator for &'a FetchedFiles {
    type Item = &'a FetchedFile;
    type IntoIter = std::slice::Iter<'a, FetchedFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub download_path: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub user_header: String,
    pub key_header: String,
    pub body_excerpt_chars: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        let cfg = FetchConfig::default();
        Self {
            download_path: cfg.download_path,
            timeout: Duration::from_secs(cfg.timeout_secs),
            retry: RetryPolicy::default(),
            user_header: cfg.user_header,
            key_header: cfg.key_header,
            body_excerpt_chars: cfg.body_excerpt_chars,
        }
    }
}

impl FetchSettings {
    pub fn from_config(cfg: &FetchConfig) -> Result<Self> {
        let download_path = cfg.download_path.trim().trim_matches('/').to_string();
        if download_path.is_empty() {
            return Err(Error::configuration("fetch.download_path is empty"));
        }
        for (name, header) in [
            ("fetch.user_header", &cfg.user_header),
            ("fetch.key_header", &cfg.key_header),
        ] {
            if header.trim().is_empty() {
                return Err(Error::configuration(format!("{name} is empty")));
            }
        }
        Ok(Self {
            download_path,
            timeout: cfg.timeout(),
            retry: cfg.retry_policy()?,
            user_header: cfg.user_header.trim().to_string(),
            key_header: cfg.key_header.trim().to_string(),
            body_excerpt_chars: cfg.body_excerpt_chars,
        })
    }

    pub fn download_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            endpoint.trim().trim_end_matches('/'),
            self.download_path
        )
    }
}

/// Authenticated download of the application file set.
///
/// One download is a GET against `<endpoint>/<download_path>` carrying the
/// principal and access key in two headers. The server answers with
/// `{"status": "ok", "files": {"<path>": "<text>", ...}}`.
///
/// By default only failures below HTTP (connect, timeout, unreadable or
/// non-JSON body) are retried. Once a response with a usable shape arrives,
/// its verdict is final, whatever the status code. See [`RetryOn`].
pub struct Fetcher<T: Transport = ReqwestTransport> {
    transport: T,
    settings: FetchSettings,
}

impl Fetcher<ReqwestTransport> {
    pub fn from_config(cfg: &FetchConfig) -> Result<Self> {
        Ok(Self::new(ReqwestTransport::new()?, FetchSettings::from_config(cfg)?))
    }
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, settings: FetchSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Downloads the file set. Never panics; every failure, including a
    /// panicking transport, comes back as `Err` with readable text.
    pub fn fetch(&self, creds: &Credentials) -> Result<FetchedFiles> {
        creds.require_complete()?;
        match catch_unwind(AssertUnwindSafe(|| self.fetch_with_retries(creds))) {
            Ok(res) => res,
            Err(payload) => Err(Error::msg(format!(
                "download aborted unexpectedly: {}",
                crate::entry::panic_message(payload.as_ref())
            ))),
        }
    }

    fn fetch_with_retries(&self, creds: &Credentials) -> Result<FetchedFiles> {
        let url = self.settings.download_url(&creds.endpoint_url);
        let headers = [
            (self.settings.user_header.clone(), creds.principal.clone()),
            (self.settings.key_header.clone(), creds.access_key.clone()),
        ];
        let policy = &self.settings.retry;
        tracing::info!(
            %url,
            max_attempts = policy.max_attempts,
            "downloading application files"
        );

        let mut last_error = Error::msg("no download attempt was made");
        for attempt in 1..=policy.max_attempts {
            match self.attempt(&url, &headers) {
                Ok(files) => {
                    tracing::info!(
                        attempt,
                        "Downloaded {} files: {:?}",
                        files.len(),
                        files.paths()
                    );
                    return Ok(files);
                }
                Err(err) => {
                    let retry = policy.should_retry(&err);
                    let err = if err.kind() == ErrorKind::Transport {
                        err.context(format!("Attempt {attempt} error"))
                    } else {
                        err
                    };
                    if !retry {
                        tracing::warn!(attempt, kind = %err.kind(), "download failed: {err}");
                        return Err(err);
                    }
                    if attempt < policy.max_attempts {
                        tracing::warn!(
                            attempt,
                            kind = %err.kind(),
                            delay_ms = policy.delay.as_millis() as u64,
                            "download attempt failed, retrying: {err}"
                        );
                        thread::sleep(policy.delay);
                    } else {
                        tracing::warn!(attempt, kind = %err.kind(), "download attempts exhausted: {err}");
                    }
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    fn attempt(&self, url: &str, headers: &[(String, String)]) -> Result<FetchedFiles> {
        let res = self.transport.get(url, headers, self.settings.timeout)?;
        if res.status != 200 {
            return Err(Error::application(format!(
                "HTTP {}: {}",
                res.status,
                excerpt(&res.body, self.settings.body_excerpt_chars)
            )));
        }
        FetchedFiles::from_response_body(&res.body)
    }
}
