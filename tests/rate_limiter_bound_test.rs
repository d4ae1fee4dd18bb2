//! Token bucket bound under real thread contention
//!
//! Over any window the number of permits granted to one domain never exceeds
//! `burst + rate * elapsed`.

use crawl_scheduler::RatePolicy;
use crawl_scheduler::crawl_engine::RateLimiter;
use proptest::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Instant;

fn hammer(limiter: &Arc<RateLimiter>, domain: &str, threads: usize, attempts: usize) -> (u64, f64) {
    let granted = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(threads));
    let started = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let limiter = Arc::clone(limiter);
            let granted = Arc::clone(&granted);
            let barrier = Arc::clone(&barrier);
            let domain = domain.to_string();
            std::thread::spawn(move || {
                barrier.wait();
                for _ in 0..attempts {
                    if limiter.try_acquire(&domain).is_allowed() {
                        granted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread joins");
    }

    (granted.load(Ordering::Relaxed), started.elapsed().as_secs_f64())
}

#[test]
fn test_concurrent_acquires_never_exceed_burst_plus_refill() {
    let limiter = Arc::new(RateLimiter::new(RatePolicy::new(5.0, 5)));
    let (granted, elapsed) = hammer(&limiter, "busy.com", 8, 200);

    let bound = 5 + (5.0 * elapsed).ceil() as u64;
    assert!(granted >= 5, "the full burst is available up front");
    assert!(granted <= bound, "{granted} permits exceed bound {bound}");
}

#[test]
fn test_domains_have_independent_buckets() {
    let limiter = Arc::new(
        RateLimiter::new(RatePolicy::new(1.0, 2))
            .with_domain_override("big.com", RatePolicy::new(1.0, 10)),
    );
    let (small, _) = hammer(&limiter, "small.com", 4, 50);
    let (big, elapsed) = hammer(&limiter, "big.com", 4, 50);

    assert!(small >= 2 && small <= 2 + elapsed.ceil() as u64 + 1);
    assert!(big >= 10 && big <= 10 + (elapsed.ceil() as u64) + 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_granted_permits_are_bounded(
        rate in 1.0f64..50.0,
        burst in 1u32..20,
        threads in 2usize..6,
    ) {
        let limiter = Arc::new(RateLimiter::new(RatePolicy::new(rate, burst)));
        let (granted, elapsed) = hammer(&limiter, "prop.com", threads, 100);
        let bound = u64::from(burst) + (rate * elapsed).ceil() as u64;
        prop_assert!(granted >= u64::from(burst).min((threads * 100) as u64));
        prop_assert!(granted <= bound, "{} > {}", granted, bound);
    }
}
