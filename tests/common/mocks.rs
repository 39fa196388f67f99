use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use validate_metadata::{Fetcher, UrlProbe, ValidationError};

#[derive(Clone, Debug)]
pub enum MockResponse {
    Body(Vec<u8>),
    Status(u16),
    Timeout,
}

/// Fetcher serving canned responses by exact location; unknown locations 404.
#[derive(Default)]
pub struct StaticFetcher {
    responses: Mutex<HashMap<String, MockResponse>>,
    request_log: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(self, location: impl Into<String>, body: impl AsRef<[u8]>) -> Self {
        self.set(location, MockResponse::Body(body.as_ref().to_vec()));
        self
    }

    pub fn with_status(self, location: impl Into<String>, status: u16) -> Self {
        self.set(location, MockResponse::Status(status));
        self
    }

    pub fn with_timeout(self, location: impl Into<String>) -> Self {
        self.set(location, MockResponse::Timeout);
        self
    }

    /// Replace the response for `location` between runs
    pub fn set(&self, location: impl Into<String>, response: MockResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(location.into(), response);
    }

    pub fn requests(&self) -> Vec<String> {
        self.request_log.lock().unwrap().clone()
    }

    pub fn request_count(&self, location: &str) -> usize {
        self.request_log
            .lock()
            .unwrap()
            .iter()
            .filter(|l| *l == location)
            .count()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, ValidationError> {
        self.request_log.lock().unwrap().push(location.to_string());
        let response = self.responses.lock().unwrap().get(location).cloned();

        match response {
            Some(MockResponse::Body(body)) => Ok(body),
            Some(MockResponse::Status(status)) => Err(ValidationError::HttpStatus {
                url: location.to_string(),
                status,
                message: format!("HTTP {}", status),
            }),
            Some(MockResponse::Timeout) => Err(ValidationError::Timeout {
                url: location.to_string(),
                timeout_seconds: 30,
            }),
            None => Err(ValidationError::HttpStatus {
                url: location.to_string(),
                status: 404,
                message: "HTTP 404: Not Found".to_string(),
            }),
        }
    }
}

/// Probe answering from a fixed set of live URLs
#[derive(Default)]
pub struct StaticProbe {
    live: HashSet<String>,
    probes: Mutex<Vec<String>>,
}

impl StaticProbe {
    pub fn new<I, S>(live: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            live: live.into_iter().map(Into::into).collect(),
            probes: Mutex::new(Vec::new()),
        }
    }

    pub fn probe_count(&self) -> usize {
        self.probes.lock().unwrap().len()
    }
}

#[async_trait]
impl UrlProbe for StaticProbe {
    async fn resolves(&self, url: &str) -> bool {
        self.probes.lock().unwrap().push(url.to_string());
        self.live.contains(url)
    }
}
