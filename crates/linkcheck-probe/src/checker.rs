//! URL probe logic.
//!
//! Fetches a URL and classifies it by HTTP status and, when failure texts
//! are given, by scanning the (decompressed) body line by line.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CACHE_CONTROL, USER_AGENT};
use reqwest::{Client, Method, redirect};
use tracing::debug;

use linkcheck_state::{NO_HTTP_STATUS, UrlCheckOutcome};

use crate::error::{ProbeError, ProbeResult};
use crate::quota::OutboundQuota;

/// Connect and read timeout for every probe.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Redirect hops followed before the fetch is treated as a transport error.
const MAX_REDIRECTS: usize = 10;

/// Classifies one URL.
#[async_trait]
pub trait UrlProbe: Send + Sync {
    /// Fetch `url` and classify it.
    ///
    /// URL-level problems are reported inside the outcome. An `Err` means
    /// the probe did not run and the URL must be left unmarked.
    async fn probe(
        &self,
        url: &str,
        failure_match_texts: &[String],
        user_agent: &str,
    ) -> ProbeResult<UrlCheckOutcome>;
}

/// HTTP probe configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Connect timeout and per-read timeout.
    pub timeout: Duration,
    /// Outbound call budget per minute; `None` disables the quota.
    pub max_calls_per_minute: Option<NonZeroU32>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_calls_per_minute: None,
        }
    }
}

/// reqwest-backed [`UrlProbe`].
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    quota: Option<OutboundQuota>,
}

impl HttpProbe {
    pub fn new(config: &ProbeConfig) -> ProbeResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            // Every probe opens a fresh connection.
            .pool_max_idle_per_host(0)
            .gzip(true)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;

        Ok(Self {
            client,
            quota: config.max_calls_per_minute.map(OutboundQuota::per_minute),
        })
    }
}

#[async_trait]
impl UrlProbe for HttpProbe {
    async fn probe(
        &self,
        url: &str,
        failure_match_texts: &[String],
        user_agent: &str,
    ) -> ProbeResult<UrlCheckOutcome> {
        if let Some(quota) = &self.quota {
            quota.try_acquire()?;
        }

        // Without texts to scan for, the headers alone decide the result.
        let method = if failure_match_texts.is_empty() {
            Method::HEAD
        } else {
            Method::GET
        };

        let response = match self
            .client
            .request(method, url)
            .header(USER_AGENT, user_agent)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                debug!(error = %e, %url, "probe request failed");
                return Ok(UrlCheckOutcome::failure(NO_HTTP_STATUS, e.to_string()));
            }
        };

        let status = i32::from(response.status().as_u16());
        if status >= 400 {
            debug!(status, %url, "probe got error status");
            return Ok(UrlCheckOutcome::failure(status, status.to_string()));
        }
        if failure_match_texts.is_empty() {
            return Ok(UrlCheckOutcome::success(status));
        }

        match scan_body(response, failure_match_texts).await {
            Ok(Some(text)) => {
                debug!(status, %url, %text, "probe found failure text");
                Ok(UrlCheckOutcome::failure(
                    status,
                    format!("Content contains '{text}'"),
                ))
            }
            Ok(None) => Ok(UrlCheckOutcome::success(status)),
            Err(e) => {
                debug!(error = %e, %url, "probe body read failed");
                Ok(UrlCheckOutcome::failure(NO_HTTP_STATUS, e.to_string()))
            }
        }
    }
}

/// Stream the body and return the first failure text found on any line.
///
/// Stops reading as soon as a line matches.
async fn scan_body(
    response: reqwest::Response,
    failure_match_texts: &[String],
) -> Result<Option<String>, reqwest::Error> {
    let mut stream = response.bytes_stream();
    let mut scanner = LineScanner::new(failure_match_texts);

    while let Some(chunk) = stream.next().await {
        if let Some(text) = scanner.push(&chunk?) {
            return Ok(Some(text));
        }
    }
    Ok(scanner.finish())
}

/// Bytes held for one line before it is scanned in pieces.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Incremental line-by-line search for failure texts.
///
/// A line longer than [`MAX_LINE_BYTES`] is scanned as it arrives and
/// only its tail is kept, long enough to catch a text split across the
/// cut. Memory stays bounded on bodies without newlines.
struct LineScanner<'a> {
    texts: &'a [String],
    buffer: Vec<u8>,
    /// Bytes carried over when a long line is cut.
    overlap: usize,
}

impl<'a> LineScanner<'a> {
    fn new(texts: &'a [String]) -> Self {
        let longest = texts.iter().map(String::len).max().unwrap_or(0);
        Self {
            texts,
            buffer: Vec::new(),
            overlap: longest.saturating_sub(1),
        }
    }

    /// Feed the next chunk of body bytes.
    fn push(&mut self, chunk: &[u8]) -> Option<String> {
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(text) = find_text(&line, self.texts) {
                return Some(text);
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            if let Some(text) = find_text(&self.buffer, self.texts) {
                return Some(text);
            }
            let cut = self.buffer.len() - self.overlap.min(self.buffer.len());
            self.buffer.drain(..cut);
        }
        None
    }

    /// Scan the trailing line that had no newline.
    fn finish(self) -> Option<String> {
        find_text(&self.buffer, self.texts)
    }
}

fn find_text(line: &[u8], failure_match_texts: &[String]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    failure_match_texts
        .iter()
        .find(|text| line.contains(text.as_str()))
        .cloned()
}
