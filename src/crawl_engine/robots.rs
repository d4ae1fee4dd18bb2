//! robots.txt compliance cache
//!
//! Rules are parsed per user-agent group, matched longest-pattern-wins with
//! `*` wildcards and `$` anchors, and cached per domain with a TTL. Refreshes
//! are single-flight: while one caller fetches robots.txt for a domain, the
//! others read the stale entry or, when there is none, wait for the result.

use log::{debug, warn};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::domain_table::DomainTable;
use super::fetch::{Fetcher, with_fetch_timeout};
use crate::config::SchedulerConfig;

/// Cache lifetime of a fallback entry produced by an unreachable robots.txt
const UNAVAILABLE_RETRY_SECS: u64 = 300;

/// What to do when robots.txt cannot be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotsFallback {
    #[default]
    AllowAll,
    DisallowAll,
}

#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    /// Pattern length, the specificity used for longest-match-wins
    specificity: usize,
    regex: Regex,
}

impl Rule {
    fn new(allow: bool, pattern: &str) -> Option<Self> {
        let mut regex_pattern = regex::escape(pattern).replace("\\*", ".*");
        if regex_pattern.ends_with("\\$") {
            regex_pattern.truncate(regex_pattern.len() - 2);
            regex_pattern.push('$');
        }
        let regex = Regex::new(&format!("^{regex_pattern}")).ok()?;
        Some(Self {
            allow,
            specificity: pattern.len(),
            regex,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
}

/// Parsed robots.txt rules that apply to one crawler
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
    disallow_all: bool,
    /// Produced by the unavailable fallback rather than a real robots.txt
    unavailable: bool,
}

/// Outcome of a robots.txt check for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotsVerdict {
    Allowed,
    /// The domain's rules forbid the path
    Disallowed,
    /// robots.txt could not be retrieved and the fallback policy denies
    Unavailable,
}

impl RobotsVerdict {
    #[must_use]
    pub fn is_allowed(self) -> bool {
        self == Self::Allowed
    }
}

impl RobotsRules {
    /// No restrictions
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Everything forbidden
    #[must_use]
    pub fn disallow_all() -> Self {
        Self {
            disallow_all: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_fallback(fallback: RobotsFallback) -> Self {
        match fallback {
            RobotsFallback::AllowAll => Self::allow_all(),
            RobotsFallback::DisallowAll => Self::disallow_all(),
        }
    }

    /// Parse robots.txt for `agent_token`
    ///
    /// The group naming the longest agent that is a case-insensitive prefix
    /// of our token wins; otherwise the `*` group applies; otherwise nothing
    /// is restricted.
    #[must_use]
    pub fn parse(content: &str, agent_token: &str) -> Self {
        let token = agent_token.to_ascii_lowercase();
        let mut groups: Vec<Group> = Vec::new();
        let mut current = Group::default();
        let mut in_agent_lines = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !in_agent_lines && !current.agents.is_empty() {
                        groups.push(std::mem::take(&mut current));
                    }
                    current.agents.push(value.to_ascii_lowercase());
                    in_agent_lines = true;
                }
                "allow" | "disallow" => {
                    in_agent_lines = false;
                    // An empty Disallow means "nothing disallowed"
                    if value.is_empty() {
                        continue;
                    }
                    if let Some(rule) = Rule::new(key == "allow", value) {
                        current.rules.push(rule);
                    }
                }
                "crawl-delay" => {
                    in_agent_lines = false;
                    if let Ok(secs) = value.parse::<f64>()
                        && secs.is_finite()
                        && secs >= 0.0
                    {
                        current.crawl_delay = Some(Duration::from_secs_f64(secs));
                    }
                }
                _ => {}
            }
        }
        if !current.agents.is_empty() {
            groups.push(current);
        }

        let specific = groups
            .iter()
            .filter_map(|g| {
                g.agents
                    .iter()
                    .filter(|a| a.as_str() != "*" && token.starts_with(a.as_str()))
                    .map(String::len)
                    .max()
                    .map(|len| (len, g))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, g)| g);

        let chosen = specific.or_else(|| groups.iter().find(|g| g.agents.iter().any(|a| a == "*")));

        match chosen {
            Some(group) => Self {
                rules: group.rules.clone(),
                crawl_delay: group.crawl_delay,
                disallow_all: false,
                unavailable: false,
            },
            None => Self::allow_all(),
        }
    }

    /// Whether `path` (path plus query) may be fetched
    ///
    /// Longest matching pattern wins; on a tie allow wins; no match allows.
    #[must_use]
    pub fn is_allowed(&self, path: &str) -> bool {
        if self.disallow_all {
            return false;
        }
        let mut best: Option<(usize, bool)> = None;
        for rule in &self.rules {
            if !rule.regex.is_match(path) {
                continue;
            }
            best = match best {
                Some((len, allow)) if len > rule.specificity => Some((len, allow)),
                Some((len, allow)) if len == rule.specificity => Some((len, allow || rule.allow)),
                _ => Some((rule.specificity, rule.allow)),
            };
        }
        best.is_none_or(|(_, allow)| allow)
    }

    #[must_use]
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }

    /// Verdict for `path`, separating real rules from an unavailable fallback
    #[must_use]
    pub fn verdict(&self, path: &str) -> RobotsVerdict {
        if self.is_allowed(path) {
            RobotsVerdict::Allowed
        } else if self.unavailable {
            RobotsVerdict::Unavailable
        } else {
            RobotsVerdict::Disallowed
        }
    }
}

/// Agent token used for robots.txt group matching: the product name of the
/// user agent, lower-cased (`WebCrawler/1.0 (...)` becomes `webcrawler`)
#[must_use]
pub fn agent_token(user_agent: &str) -> String {
    user_agent
        .split(['/', ' '])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[derive(Debug, Clone)]
struct CachedRules {
    rules: Arc<RobotsRules>,
    expires_at: Instant,
}

#[derive(Default)]
struct RobotsSlot {
    cached: RwLock<Option<CachedRules>>,
    refresh: tokio::sync::Mutex<()>,
}

impl RobotsSlot {
    fn fresh(&self, now: Instant) -> Option<Arc<RobotsRules>> {
        self.cached
            .read()
            .as_ref()
            .filter(|c| now < c.expires_at)
            .map(|c| Arc::clone(&c.rules))
    }

    fn any(&self) -> Option<Arc<RobotsRules>> {
        self.cached.read().as_ref().map(|c| Arc::clone(&c.rules))
    }
}

/// Per-domain robots.txt cache with single-flight refresh
pub struct RobotsCache {
    slots: DomainTable<RobotsSlot>,
    fetcher: Arc<dyn Fetcher>,
    agent_token: String,
    ttl: Duration,
    fetch_timeout: Duration,
    unauthorized_policy: RobotsFallback,
    unavailable_policy: RobotsFallback,
    refreshes: AtomicU64,
    unavailable: AtomicU64,
}

impl RobotsCache {
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>, config: &SchedulerConfig) -> Self {
        Self {
            slots: DomainTable::new(config.domain_cache_capacity(), config.queue_shards()),
            fetcher,
            agent_token: agent_token(config.user_agent()),
            ttl: config.robots_ttl(),
            fetch_timeout: config.fetch_timeout(),
            unauthorized_policy: config.robots_unauthorized_policy(),
            unavailable_policy: config.robots_unavailable_policy(),
            refreshes: AtomicU64::new(0),
            unavailable: AtomicU64::new(0),
        }
    }

    /// Check `path` on `domain`, refreshing robots.txt if the cached copy is
    /// missing or expired
    pub async fn check(&self, domain: &str, path: &str) -> RobotsVerdict {
        self.rules_for(domain).await.verdict(path)
    }

    /// Whether `path` on `domain` may be fetched
    pub async fn can_fetch(&self, domain: &str, path: &str) -> bool {
        self.check(domain, path).await.is_allowed()
    }

    /// Crawl-delay advertised by the cached robots.txt, if any
    #[must_use]
    pub fn crawl_delay(&self, domain: &str) -> Option<Duration> {
        self.slots.peek(domain)?.any()?.crawl_delay()
    }

    /// robots.txt fetches performed so far
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Refreshes that fell back to `robots_unavailable_policy`
    #[must_use]
    pub fn unavailable_count(&self) -> u64 {
        self.unavailable.load(Ordering::Relaxed)
    }

    async fn rules_for(&self, domain: &str) -> Arc<RobotsRules> {
        let slot = self.slots.get_or_insert_with(domain, RobotsSlot::default);
        loop {
            if let Some(rules) = slot.fresh(Instant::now()) {
                return rules;
            }

            match slot.refresh.try_lock() {
                Ok(_guard) => {
                    // Another caller may have finished between the check and the lock
                    if let Some(rules) = slot.fresh(Instant::now()) {
                        return rules;
                    }
                    let (rules, lifetime) = self.fetch_rules(domain).await;
                    let rules = Arc::new(rules);
                    *slot.cached.write() = Some(CachedRules {
                        rules: Arc::clone(&rules),
                        expires_at: Instant::now() + lifetime,
                    });
                    return rules;
                }
                Err(_) => {
                    if let Some(stale) = slot.any() {
                        return stale;
                    }
                    // Wait for the in-flight refresh, then re-check
                    let _ = slot.refresh.lock().await;
                }
            }
        }
    }

    async fn fetch_rules(&self, domain: &str) -> (RobotsRules, Duration) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        let url = format!("https://{domain}/robots.txt");
        let fetch = self.fetcher.fetch(&url, self.fetch_timeout);

        match with_fetch_timeout(fetch, self.fetch_timeout).await {
            Ok(resp) => match resp.status {
                200..=299 => {
                    debug!("Fetched robots.txt for {domain} ({} bytes)", resp.body.len());
                    (RobotsRules::parse(&resp.body, &self.agent_token), self.ttl)
                }
                401 | 403 => {
                    debug!("robots.txt for {domain} returned {}", resp.status);
                    (RobotsRules::from_fallback(self.unauthorized_policy), self.ttl)
                }
                500..=599 => self.unavailable(domain, &format!("HTTP {}", resp.status)),
                status => {
                    debug!("No robots.txt for {domain} (HTTP {status}), allowing all");
                    (RobotsRules::allow_all(), self.ttl)
                }
            },
            Err(e) => self.unavailable(domain, &e.to_string()),
        }
    }

    fn unavailable(&self, domain: &str, detail: &str) -> (RobotsRules, Duration) {
        self.unavailable.fetch_add(1, Ordering::Relaxed);
        warn!(
            "RobotsUnavailable for {domain}: {detail}; applying {:?}",
            self.unavailable_policy
        );
        let rules = RobotsRules {
            unavailable: true,
            ..RobotsRules::from_fallback(self.unavailable_policy)
        };
        (
            rules,
            self.ttl.min(Duration::from_secs(UNAVAILABLE_RETRY_SECS)),
        )
    }
}
