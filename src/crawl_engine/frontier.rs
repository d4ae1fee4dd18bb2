//! Partitioned priority queue of pending work
//!
//! Items live in one of `queue_shards` shards chosen by a hash of their
//! domain, so all of a domain's items share a shard and one lock. Inside a
//! shard every tier keeps a min-heap per domain ordered by
//! `(not_before, sequence)` and a ready index over domains:
//!
//! - `ready` holds domains whose head item is due and which are not
//!   deferred, ordered by the tick of their last dispatch;
//! - `waiting` is a min-heap of the instant each other domain becomes
//!   dispatchable, either its head's `not_before` or its deferral.
//!
//! Dequeue scans tiers HIGH → NORMAL → LOW → RETRY. Within a tier it visits
//! shards from a rotating cursor, promotes due `waiting` domains and takes the
//! least recently dispatched ready domain. Every step is logarithmic in the
//! number of domains; a domain found suspended is deferred instead of being
//! re-checked on every dequeue.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tokio::time::Instant;

use super::crawl_types::{PriorityTier, WorkItem};
use super::domain_table::shard_for;

const TIERS: usize = PriorityTier::ALL.len();

#[derive(Debug)]
struct Queued {
    not_before: Instant,
    seq: u64,
    item: WorkItem,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.not_before, self.seq).cmp(&(other.not_before, other.seq))
    }
}

/// Where a domain is listed in its tier's index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Ready,
    Waiting(Instant),
}

#[derive(Debug, Default)]
struct DomainQueue {
    heap: BinaryHeap<Reverse<Queued>>,
    /// Dispatch tick of the last item taken from this domain in this tier
    last_dispatch: u64,
    slot: Option<Slot>,
}

#[derive(Debug, Default)]
struct TierIndex {
    queues: HashMap<String, DomainQueue>,
    ready: BTreeSet<(u64, String)>,
    /// Entries whose domain has since moved to another slot are stale and
    /// skipped when popped
    waiting: BinaryHeap<Reverse<(Instant, String)>>,
}

impl TierIndex {
    /// List `domain` as ready or waiting according to its head item
    fn schedule(&mut self, domain: &str, deferred: Option<Instant>, now: Instant) {
        let Some(queue) = self.queues.get_mut(domain) else {
            return;
        };
        let Some(Reverse(head)) = queue.heap.peek() else {
            return;
        };
        let at = deferred.map_or(head.not_before, |d| d.max(head.not_before));
        let slot = if at <= now { Slot::Ready } else { Slot::Waiting(at) };
        if queue.slot == Some(slot) {
            return;
        }
        if queue.slot == Some(Slot::Ready) {
            self.ready.remove(&(queue.last_dispatch, domain.to_string()));
        }
        match slot {
            Slot::Ready => {
                self.ready.insert((queue.last_dispatch, domain.to_string()));
            }
            Slot::Waiting(at) => self.waiting.push(Reverse((at, domain.to_string()))),
        }
        queue.slot = Some(slot);
    }

    /// Move domains whose wait is over into `ready`
    fn promote(&mut self, now: Instant, deferrals: &HashMap<String, Instant>) {
        loop {
            match self.waiting.peek() {
                Some(Reverse((at, _))) if *at <= now => {}
                _ => break,
            }
            let Some(Reverse((at, domain))) = self.waiting.pop() else {
                break;
            };
            let Some(queue) = self.queues.get_mut(&domain) else {
                continue;
            };
            if queue.slot != Some(Slot::Waiting(at)) {
                continue;
            }
            queue.slot = None;
            let deferred = deferrals.get(&domain).copied().filter(|d| *d > now);
            self.schedule(&domain, deferred, now);
        }
    }

    /// Earliest instant a domain of this tier becomes dispatchable
    fn next_ready_at(&self, now: Instant) -> Option<Instant> {
        if self.queues.is_empty() {
            return None;
        }
        if !self.ready.is_empty() {
            return Some(now);
        }
        self.waiting.peek().map(|Reverse((at, _))| *at)
    }
}

#[derive(Debug, Default)]
struct Shard {
    tiers: [TierIndex; TIERS],
    /// Per-domain deferral from the rate limiter, crawl-delay or breaker
    next_eligible: HashMap<String, Instant>,
    /// Expiry order of `next_eligible`; stale entries are skipped
    expiries: BinaryHeap<Reverse<(Instant, String)>>,
}

impl Shard {
    fn deferred_until(&self, domain: &str, now: Instant) -> Option<Instant> {
        self.next_eligible
            .get(domain)
            .copied()
            .filter(|until| *until > now)
    }

    fn push(&mut self, seq: u64, item: WorkItem, now: Instant) {
        let tier = item.tier.index();
        let domain = item.domain().to_string();
        let deferred = self.deferred_until(&domain, now);
        let index = &mut self.tiers[tier];
        index
            .queues
            .entry(domain.clone())
            .or_default()
            .heap
            .push(Reverse(Queued {
                not_before: item.not_before,
                seq,
                item,
            }));
        index.schedule(&domain, deferred, now);
    }

    /// Keep `domain` out of every tier until `until`; a later deferral wins
    fn defer(&mut self, domain: &str, until: Instant, now: Instant) {
        let until = self
            .next_eligible
            .get(domain)
            .map_or(until, |existing| (*existing).max(until));
        self.next_eligible.insert(domain.to_string(), until);
        self.expiries.push(Reverse((until, domain.to_string())));
        let deferred = Some(until).filter(|u| *u > now);
        for index in &mut self.tiers {
            index.schedule(domain, deferred, now);
        }
    }

    fn purge_deferrals(&mut self, now: Instant) {
        loop {
            match self.expiries.peek() {
                Some(Reverse((at, _))) if *at <= now => {}
                _ => break,
            }
            let Some(Reverse((at, domain))) = self.expiries.pop() else {
                break;
            };
            if self.next_eligible.get(&domain) == Some(&at) {
                self.next_eligible.remove(&domain);
            }
        }
    }

    /// Head item of the least recently dispatched ready domain in `tier`
    ///
    /// A candidate for which `blocked` returns a future instant is deferred
    /// until then and skipped.
    fn take<F>(&mut self, tier: usize, now: Instant, tick: u64, blocked: &F) -> Option<Queued>
    where
        F: Fn(&str) -> Option<Instant>,
    {
        self.purge_deferrals(now);
        self.tiers[tier].promote(now, &self.next_eligible);

        loop {
            let (last, domain) = self.tiers[tier].ready.first().cloned()?;
            if let Some(until) = blocked(&domain)
                && until > now
            {
                self.defer(&domain, until, now);
                continue;
            }

            let index = &mut self.tiers[tier];
            index.ready.remove(&(last, domain.clone()));
            let Some(queue) = index.queues.get_mut(&domain) else {
                continue;
            };
            queue.slot = None;
            let Some(Reverse(queued)) = queue.heap.pop() else {
                index.queues.remove(&domain);
                continue;
            };
            queue.last_dispatch = tick;
            if queue.heap.is_empty() {
                index.queues.remove(&domain);
                if index.queues.is_empty() {
                    index.waiting.clear();
                }
            } else {
                index.schedule(&domain, None, now);
            }
            return Some(queued);
        }
    }

    /// Earliest instant any item in this shard becomes dispatchable
    fn next_ready_at(&self, now: Instant) -> Option<Instant> {
        self.tiers
            .iter()
            .filter_map(|index| index.next_ready_at(now))
            .min()
    }
}

/// A dispatched item on loan from the queue
///
/// Counted as in flight until it is handed back through
/// [`Frontier::requeue`] or resolved with [`Frontier::finish`].
#[derive(Debug)]
pub struct Lease {
    item: WorkItem,
    seq: u64,
}

impl Lease {
    #[must_use]
    pub fn item(&self) -> &WorkItem {
        &self.item
    }

    #[must_use]
    pub fn into_item(self) -> WorkItem {
        self.item
    }
}

/// How a dispatched item left the worker
///
/// Terminal variants carry the item's ingestion offset so the committed
/// watermark can advance.
#[derive(Debug)]
pub enum Completion {
    /// Fetched successfully; terminal
    Succeeded { source_offset: Option<u64> },
    /// Failed transiently; re-enters the queue with a fresh sequence number
    Retried(WorkItem),
    /// Handed to the dead-letter sink; terminal
    DeadLettered { source_offset: Option<u64> },
}

/// Durable progress counters, the source of checkpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierCounters {
    /// Position in the ingestion source up to which every URL was consumed
    pub ingested_offset: u64,
    /// Every ingested item before this offset reached a terminal state;
    /// ingestion resumes here after a restart
    pub committed_offset: u64,
    pub enqueued: u64,
    pub completed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub pending: u64,
    pub in_flight: u64,
}

/// The partitioned priority queue
pub struct Frontier {
    shards: Vec<Mutex<Shard>>,
    /// Items per shard and tier, read without the shard lock to skip empties
    tier_lens: Vec<[AtomicUsize; TIERS]>,
    cursor: AtomicUsize,
    sequence: AtomicU64,
    dispatch_tick: AtomicU64,
    pending: AtomicU64,
    in_flight: AtomicU64,
    enqueued: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    ingested_offset: AtomicU64,
    /// Source offsets of items not yet in a terminal state
    outstanding: Mutex<BTreeSet<u64>>,
    changed: Notify,
}

impl Frontier {
    #[must_use]
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(Shard::default())).collect(),
            tier_lens: (0..shards).map(|_| Default::default()).collect(),
            cursor: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
            dispatch_tick: AtomicU64::new(0),
            pending: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            ingested_offset: AtomicU64::new(0),
            outstanding: Mutex::new(BTreeSet::new()),
            changed: Notify::new(),
        }
    }

    fn shard_index(&self, domain: &str) -> usize {
        shard_for(domain, self.shards.len())
    }

    fn push(&self, seq: u64, item: WorkItem) {
        let shard = self.shard_index(item.domain());
        let tier = item.tier.index();
        // Counts rise under the shard lock so a racing pop never sees the
        // item before they include it
        let mut guard = self.shards[shard].lock();
        guard.push(seq, item, Instant::now());
        self.tier_lens[shard][tier].fetch_add(1, Ordering::AcqRel);
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Add a new item behind everything already queued for its domain
    pub fn enqueue(&self, item: WorkItem) {
        if let Some(offset) = item.source_offset() {
            self.outstanding.lock().insert(offset);
        }
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.push(seq, item);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.changed.notify_waiters();
    }

    /// Take the next dispatchable item
    ///
    /// `blocked` reports a suspension deadline for a domain (an open circuit);
    /// such a domain is deferred until then. Deferred domains and domains
    /// whose head item is not yet due are skipped.
    pub fn dequeue_ready<F>(&self, blocked: F) -> Option<Lease>
    where
        F: Fn(&str) -> Option<Instant>,
    {
        let now = Instant::now();
        let shards = self.shards.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % shards;

        for tier in 0..TIERS {
            for offset in 0..shards {
                let idx = (start + offset) % shards;
                if self.tier_lens[idx][tier].load(Ordering::Acquire) == 0 {
                    continue;
                }
                let tick = self.dispatch_tick.fetch_add(1, Ordering::Relaxed) + 1;
                let mut shard = self.shards[idx].lock();
                let Some(queued) = shard.take(tier, now, tick, &blocked) else {
                    continue;
                };
                drop(shard);

                self.tier_lens[idx][tier].fetch_sub(1, Ordering::AcqRel);
                // in_flight rises before pending falls so is_drained never
                // observes the item in neither
                self.in_flight.fetch_add(1, Ordering::AcqRel);
                self.pending.fetch_sub(1, Ordering::AcqRel);
                return Some(Lease {
                    item: queued.item,
                    seq: queued.seq,
                });
            }
        }
        None
    }

    /// Return a leased item to its original position, without penalty
    pub fn requeue(&self, lease: Lease) {
        self.push(lease.seq, lease.item);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.changed.notify_waiters();
    }

    /// Resolve a lease after its fetch outcome was routed
    pub fn finish(&self, completion: Completion) {
        match completion {
            Completion::Succeeded { source_offset } => {
                self.settle(source_offset);
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Completion::Retried(item) => {
                let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                self.push(seq, item);
                self.retried.fetch_add(1, Ordering::Relaxed);
            }
            Completion::DeadLettered { source_offset } => {
                self.settle(source_offset);
                self.dead_lettered.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.changed.notify_waiters();
    }

    fn settle(&self, source_offset: Option<u64>) {
        if let Some(offset) = source_offset {
            self.outstanding.lock().remove(&offset);
        }
    }

    /// Keep `domain` out of selection until `until`
    ///
    /// An existing later deferral is kept.
    pub fn defer_domain(&self, domain: &str, until: Instant) {
        let mut shard = self.shards[self.shard_index(domain)].lock();
        shard.defer(domain, until, Instant::now());
    }

    /// Earliest instant at which some queued item becomes eligible
    ///
    /// May be early, never late; circuit-breaker state is not consulted.
    #[must_use]
    pub fn next_ready_at(&self) -> Option<Instant> {
        if self.len() == 0 {
            return None;
        }
        let now = Instant::now();
        self.shards
            .iter()
            .filter_map(|shard| shard.lock().next_ready_at(now))
            .min()
    }

    /// Wait handle resolved on enqueue, requeue and lease completion
    ///
    /// Call `enable()` on the pinned future before re-checking the queue.
    pub fn notified(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Items waiting in the queue
    #[must_use]
    pub fn len(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Nothing queued and nothing leased
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.in_flight() == 0 && self.len() == 0
    }

    /// Record how far the ingestion source has been consumed
    pub fn set_ingested_offset(&self, offset: u64) {
        self.ingested_offset.fetch_max(offset, Ordering::AcqRel);
    }

    /// Snapshot of the progress counters
    #[must_use]
    pub fn counters(&self) -> FrontierCounters {
        let ingested_offset = self.ingested_offset.load(Ordering::Acquire);
        let committed_offset = self
            .outstanding
            .lock()
            .first()
            .copied()
            .map_or(ingested_offset, |lowest| lowest.min(ingested_offset));
        FrontierCounters {
            ingested_offset,
            committed_offset,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            pending: self.len(),
            in_flight: self.in_flight(),
        }
    }
}
