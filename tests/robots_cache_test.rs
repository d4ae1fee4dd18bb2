//! robots.txt cache behaviour against a scripted fetcher

mod common;

use common::ScriptedFetcher;
use crawl_scheduler::crawl_engine::RobotsCache;
use crawl_scheduler::{RobotsFallback, SchedulerConfig};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_concurrent_lookups_share_one_fetch() {
    let fetcher = Arc::new(ScriptedFetcher::new().with_robots_latency(Duration::from_millis(200)));
    fetcher.robots("s.com", 200, "User-agent: *\nDisallow: /admin\n");
    let cache = Arc::new(RobotsCache::new(fetcher.clone(), &SchedulerConfig::default()));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let path = if i % 2 == 0 { "/admin/users" } else { "/articles/1" };
            tokio::spawn(async move { cache.can_fetch("s.com", path).await })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let allowed = handle.await.expect("task joins");
        assert_eq!(allowed, i % 2 == 1, "lookup {i}");
    }
    assert_eq!(fetcher.robots_fetches(), 1);
    assert_eq!(cache.refresh_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_refreshed() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.robots("e.com", 200, "User-agent: *\nDisallow: /old\n");
    let config = SchedulerConfig::builder()
        .robots_ttl(Duration::from_secs(60))
        .build()
        .expect("valid");
    let cache = RobotsCache::new(fetcher.clone(), &config);

    assert!(!cache.can_fetch("e.com", "/old/page").await);
    assert!(!cache.can_fetch("e.com", "/old/page").await);
    assert_eq!(fetcher.robots_fetches(), 1);

    fetcher.robots("e.com", 200, "User-agent: *\nDisallow: /new\n");
    tokio::time::advance(Duration::from_secs(61)).await;

    assert!(cache.can_fetch("e.com", "/old/page").await);
    assert!(!cache.can_fetch("e.com", "/new/page").await);
    assert_eq!(fetcher.robots_fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_policies() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.robots("locked.com", 403, "");
    fetcher.robots("down.com", 503, "");

    let lenient = RobotsCache::new(fetcher.clone(), &SchedulerConfig::default());
    assert!(lenient.can_fetch("locked.com", "/").await);
    assert!(lenient.can_fetch("down.com", "/").await);
    assert!(lenient.can_fetch("missing.com", "/").await);
    assert_eq!(lenient.unavailable_count(), 1);

    let strict_config = SchedulerConfig::builder()
        .robots_unauthorized_policy(RobotsFallback::DisallowAll)
        .robots_unavailable_policy(RobotsFallback::DisallowAll)
        .build()
        .expect("valid");
    let strict = RobotsCache::new(fetcher.clone(), &strict_config);
    assert!(!strict.can_fetch("locked.com", "/").await);
    assert!(!strict.can_fetch("down.com", "/").await);
    // 404 means there is no robots.txt at all
    assert!(strict.can_fetch("missing.com", "/").await);
}

#[tokio::test(start_paused = true)]
async fn test_crawl_delay_is_exposed_after_fetch() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.robots(
        "polite.com",
        200,
        "User-agent: webcrawler\nCrawl-delay: 2\nDisallow:\n\nUser-agent: *\nDisallow: /\n",
    );
    let cache = RobotsCache::new(fetcher.clone(), &SchedulerConfig::default());

    assert_eq!(cache.crawl_delay("polite.com"), None);
    assert!(cache.can_fetch("polite.com", "/page").await);
    assert_eq!(cache.crawl_delay("polite.com"), Some(Duration::from_secs(2)));
}
