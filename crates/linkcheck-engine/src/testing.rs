//! Test doubles shared by the engine's unit tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use linkcheck_probe::{ProbeError, ProbeResult, UrlProbe};
use linkcheck_state::{Settings, UrlCheckOutcome};

use crate::dispatch::{Dispatcher, WorkItem};
use crate::error::{EngineError, EngineResult};
use crate::settings::SettingsProvider;

/// Probe that answers instantly from a script.
///
/// URLs in `failing` get a 404, everything else a 200. Once `quota` probes
/// have been answered, further calls report an exhausted quota.
#[derive(Default)]
pub struct ScriptedProbe {
    pub failing: HashSet<String>,
    pub quota: Option<usize>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = Some(quota);
        self
    }

    /// URLs probed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl UrlProbe for ScriptedProbe {
    async fn probe(
        &self,
        url: &str,
        _failure_match_texts: &[String],
        _user_agent: &str,
    ) -> ProbeResult<UrlCheckOutcome> {
        let mut calls = self.calls.lock().unwrap();
        if self.quota.is_some_and(|q| calls.len() >= q) {
            return Err(ProbeError::QuotaExceeded);
        }
        calls.push(url.to_string());
        if self.failing.contains(url) {
            Ok(UrlCheckOutcome::failure(404, "404"))
        } else {
            Ok(UrlCheckOutcome::success(200))
        }
    }
}

/// Dispatcher that records every batch it is handed.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub fail: bool,
    batches: Mutex<Vec<Vec<WorkItem>>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn batches(&self) -> Vec<Vec<WorkItem>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn items(&self) -> Vec<WorkItem> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn enqueue(&self, items: &[WorkItem]) -> EngineResult<()> {
        self.batches.lock().unwrap().push(items.to_vec());
        if self.fail {
            return Err(EngineError::Dispatch("queue unavailable".to_string()));
        }
        Ok(())
    }
}

/// Settings provider returning a fixed value.
pub struct FixedSettings(pub Settings);

#[async_trait]
impl SettingsProvider for FixedSettings {
    async fn current(&self) -> EngineResult<Settings> {
        Ok(self.0.clone())
    }
}

pub fn urls(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("https://example.com/page/{i}")).collect()
}
