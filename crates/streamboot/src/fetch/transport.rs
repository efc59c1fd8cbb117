use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Blocking HTTP GET.
///
/// Anything that prevents a complete response from being read is an
/// `ErrorKind::Transport` error. Any status code, including 5xx, is a
/// successful call.
pub trait Transport {
    fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<HttpResponse>;
}

pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("streamboot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<HttpResponse> {
        let mut req = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }
        // A malformed endpoint URL fails here too and counts as a transport
        // failure like any other request error.
        let res = req.send().map_err(|e| {
            if e.is_builder() {
                Error::transport(format!("invalid download request: {}", error_chain(&e)))
            } else {
                Error::transport(error_chain(&e))
            }
        })?;
        let status = res.status().as_u16();
        let body = res.text().map_err(|e| {
            Error::transport(format!(
                "failed to read response body (HTTP {status}): {}",
                error_chain(&e)
            ))
        })?;
        tracing::debug!(status, bytes = body.len(), "download response received");
        Ok(HttpResponse { status, body })
    }
}

/// `err: source: source...`, since reqwest keeps the useful part (refused,
/// timed out, dns) in the source chain.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(src) = cur {
        let s = src.to_string();
        if !out.contains(&s) {
            out.push_str(": ");
            out.push_str(&s);
        }
        cur = src.source();
    }
    out
}
