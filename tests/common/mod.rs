//! Test utilities shared by the scheduler integration tests

use crawl_scheduler::{FetchError, FetchResponse, Fetcher};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// What the fetcher does for one request
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum Step {
    Status(u16),
    /// Never completes; the dispatcher's timeout cancels it
    Hang,
    Fail(FetchError),
}

/// Fetcher answering from per-URL scripts
///
/// Page URLs pop their script front to back and fall back to `200`. robots.txt
/// requests answer from the robots table, or `404` when the domain has none.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    robots: Mutex<HashMap<String, (u16, String)>>,
    robots_latency: Duration,
    calls: Mutex<Vec<(String, Instant)>>,
    robots_fetches: AtomicU64,
}

#[allow(dead_code)]
impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_robots_latency(mut self, latency: Duration) -> Self {
        self.robots_latency = latency;
        self
    }

    pub fn script(&self, url: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .entry(url.to_string())
            .or_default()
            .extend(steps);
    }

    pub fn robots(&self, domain: &str, status: u16, body: &str) {
        self.robots
            .lock()
            .insert(domain.to_string(), (status, body.to_string()));
    }

    /// Page fetches in dispatch order
    pub fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, domain: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .iter()
            .filter(|(url, _)| url.contains(&format!("://{domain}/")))
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn robots_fetches(&self) -> u64 {
        self.robots_fetches.load(Ordering::SeqCst)
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<FetchResponse, FetchError>> {
        Box::pin(async move {
            if let Some(rest) = url.strip_suffix("/robots.txt") {
                self.robots_fetches.fetch_add(1, Ordering::SeqCst);
                if !self.robots_latency.is_zero() {
                    tokio::time::sleep(self.robots_latency).await;
                }
                let domain = rest.rsplit('/').next().unwrap_or_default();
                let (status, body) = self
                    .robots
                    .lock()
                    .get(domain)
                    .cloned()
                    .unwrap_or((404, String::new()));
                return Ok(FetchResponse {
                    status,
                    body,
                    elapsed_ms: 0,
                });
            }

            self.calls.lock().push((url.to_string(), Instant::now()));
            let step = self
                .scripts
                .lock()
                .get_mut(url)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Step::Status(200));
            match step {
                Step::Status(status) => Ok(FetchResponse {
                    status,
                    body: String::new(),
                    elapsed_ms: 0,
                }),
                Step::Hang => futures::future::pending().await,
                Step::Fail(e) => Err(e),
            }
        })
    }
}
