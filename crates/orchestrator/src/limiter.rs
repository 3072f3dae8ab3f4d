//! Per-user sliding-window usage limiter.
//!
//! Each user has a queue of `(timestamp, tokens)` entries. Admission expires
//! entries older than the window, then checks the request count and the token
//! sum. The map is guarded by a `std::sync::Mutex` that is only held for the
//! bookkeeping itself, never across an await.

use parley_config::LimitsConfig;
use parley_core::error::RejectionReason;
use parley_core::message::UserId;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Number of tracked users above which idle users are evicted.
const CLEANUP_THRESHOLD: usize = 10_000;

#[derive(Debug)]
struct Entry {
    id: u64,
    at: Instant,
    tokens: u64,
}

/// Outcome of [`UsageLimiter::admit`].
#[derive(Debug)]
pub enum Admission {
    Admitted(AdmissionTicket),
    Rejected {
        reason: RejectionReason,
        /// How long until the rejected condition could clear.
        retry_after: Duration,
    },
}

/// Handle to an admitted request's window entry, used to reconcile its
/// estimated token charge with the real count.
#[derive(Debug)]
pub struct AdmissionTicket {
    user_id: UserId,
    entry_id: u64,
    estimated_tokens: u64,
}

impl AdmissionTicket {
    pub fn estimated_tokens(&self) -> u64 {
        self.estimated_tokens
    }
}

/// Current window usage for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub requests: u32,
    pub tokens: u64,
    pub max_requests: u32,
    pub max_tokens: u64,
    pub window_secs: u64,
}

pub struct UsageLimiter {
    max_requests: u32,
    max_tokens: u64,
    window: Duration,
    next_id: AtomicU64,
    users: Mutex<HashMap<UserId, VecDeque<Entry>>>,
}

impl UsageLimiter {
    pub fn new(max_requests: u32, max_tokens: u64, window: Duration) -> Self {
        Self {
            max_requests,
            max_tokens,
            window,
            next_id: AtomicU64::new(1),
            users: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(limits: &LimitsConfig) -> Self {
        Self::new(limits.max_requests_per_window, limits.max_tokens_per_window, limits.window())
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Gate a request. On admission the estimate is charged immediately.
    pub fn admit(&self, user_id: &UserId, estimated_tokens: u64) -> Admission {
        let now = Instant::now();
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());

        if users.len() > CLEANUP_THRESHOLD {
            users.retain(|_, entries| entries.back().is_some_and(|e| now.duration_since(e.at) < self.window));
        }

        let entries = users.entry(user_id.clone()).or_default();
        expire(entries, now, self.window);

        if entries.len() >= self.max_requests as usize {
            let retry_after = entries
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(oldest.at)))
                .unwrap_or(self.window);
            return Admission::Rejected {
                reason: RejectionReason::RequestRateExceeded,
                retry_after,
            };
        }

        let used: u64 = entries.iter().fold(0u64, |acc, e| acc.saturating_add(e.tokens));
        if used.saturating_add(estimated_tokens) > self.max_tokens {
            return Admission::Rejected {
                reason: RejectionReason::TokenBudgetExceeded,
                retry_after: self.token_retry_after(entries, used, estimated_tokens, now),
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.push_back(Entry {
            id,
            at: now,
            tokens: estimated_tokens,
        });

        Admission::Admitted(AdmissionTicket {
            user_id: user_id.clone(),
            entry_id: id,
            estimated_tokens,
        })
    }

    /// Replace the ticket's estimated charge with the authoritative count.
    ///
    /// Never rejects after the fact. If the entry already expired there is
    /// nothing left to correct.
    pub fn reconcile(&self, ticket: AdmissionTicket, actual_tokens: u64) {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = users
            .get_mut(&ticket.user_id)
            .and_then(|entries| entries.iter_mut().find(|e| e.id == ticket.entry_id))
        {
            entry.tokens = actual_tokens;
        }
    }

    /// Give back an admission for a request that never reached the upstream.
    pub fn release(&self, ticket: AdmissionTicket) {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entries) = users.get_mut(&ticket.user_id) {
            entries.retain(|e| e.id != ticket.entry_id);
        }
    }

    pub fn snapshot(&self, user_id: &UserId) -> UsageSnapshot {
        let now = Instant::now();
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let (requests, tokens) = match users.get_mut(user_id) {
            Some(entries) => {
                expire(entries, now, self.window);
                (
                    u32::try_from(entries.len()).unwrap_or(u32::MAX),
                    entries.iter().fold(0u64, |acc, e| acc.saturating_add(e.tokens)),
                )
            }
            None => (0, 0),
        };
        UsageSnapshot {
            requests,
            tokens,
            max_requests: self.max_requests,
            max_tokens: self.max_tokens,
            window_secs: self.window.as_secs(),
        }
    }

    /// Time until enough of the oldest entries expire to fit `estimated`.
    fn token_retry_after(&self, entries: &VecDeque<Entry>, used: u64, estimated: u64, now: Instant) -> Duration {
        if estimated > self.max_tokens {
            return self.window;
        }
        let mut remaining = used;
        for entry in entries {
            remaining = remaining.saturating_sub(entry.tokens);
            if remaining.saturating_add(estimated) <= self.max_tokens {
                return self.window.saturating_sub(now.duration_since(entry.at));
            }
        }
        self.window
    }
}

fn expire(entries: &mut VecDeque<Entry>, now: Instant, window: Duration) {
    while entries.front().is_some_and(|e| now.duration_since(e.at) >= window) {
        entries.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> UserId {
        UserId::from(name)
    }

    fn admitted(admission: Admission) -> AdmissionTicket {
        match admission {
            Admission::Admitted(ticket) => ticket,
            Admission::Rejected { reason, .. } => panic!("unexpected rejection: {reason}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_request_over_rate() {
        let limiter = UsageLimiter::new(3, 1_000_000, Duration::from_secs(60));
        for _ in 0..3 {
            admitted(limiter.admit(&user("a"), 10));
        }
        match limiter.admit(&user("a"), 10) {
            Admission::Rejected { reason, retry_after } => {
                assert_eq!(reason, RejectionReason::RequestRateExceeded);
                assert_eq!(retry_after, Duration::from_secs(60));
            }
            Admission::Admitted(_) => panic!("fourth request should be rejected"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn users_are_independent() {
        let limiter = UsageLimiter::new(1, 1_000, Duration::from_secs(60));
        admitted(limiter.admit(&user("a"), 10));
        admitted(limiter.admit(&user("b"), 10));
        assert!(matches!(limiter.admit(&user("a"), 10), Admission::Rejected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_readmits() {
        let limiter = UsageLimiter::new(2, 1_000, Duration::from_secs(60));
        admitted(limiter.admit(&user("a"), 10));
        tokio::time::advance(Duration::from_secs(30)).await;
        admitted(limiter.admit(&user("a"), 10));
        assert!(matches!(limiter.admit(&user("a"), 10), Admission::Rejected { .. }));

        // The first entry expires at exactly 60s.
        tokio::time::advance(Duration::from_secs(30)).await;
        admitted(limiter.admit(&user("a"), 10));
        assert!(matches!(limiter.admit(&user("a"), 10), Admission::Rejected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_over_token_budget() {
        let limiter = UsageLimiter::new(100, 1_000, Duration::from_secs(60));
        admitted(limiter.admit(&user("a"), 600));
        tokio::time::advance(Duration::from_secs(10)).await;
        admitted(limiter.admit(&user("a"), 300));

        match limiter.admit(&user("a"), 200) {
            Admission::Rejected { reason, retry_after } => {
                assert_eq!(reason, RejectionReason::TokenBudgetExceeded);
                // Freed once the 600-token entry leaves the window.
                assert_eq!(retry_after, Duration::from_secs(50));
            }
            Admission::Admitted(_) => panic!("budget should be exceeded"),
        }

        // Exactly at the budget is fine.
        admitted(limiter.admit(&user("a"), 100));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_estimate_waits_a_full_window() {
        let limiter = UsageLimiter::new(10, 100, Duration::from_secs(60));
        match limiter.admit(&user("a"), 500) {
            Admission::Rejected { retry_after, .. } => assert_eq!(retry_after, Duration::from_secs(60)),
            Admission::Admitted(_) => panic!("estimate larger than the budget"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_replaces_estimate() {
        let limiter = UsageLimiter::new(10, 1_000, Duration::from_secs(60));
        let ticket = admitted(limiter.admit(&user("a"), 900));
        assert_eq!(ticket.estimated_tokens(), 900);
        limiter.reconcile(ticket, 12);

        let snapshot = limiter.snapshot(&user("a"));
        assert_eq!(snapshot.requests, 1);
        assert_eq!(snapshot.tokens, 12);
        admitted(limiter.admit(&user("a"), 900));
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_above_budget_is_not_retroactive() {
        let limiter = UsageLimiter::new(10, 100, Duration::from_secs(60));
        let ticket = admitted(limiter.admit(&user("a"), 50));
        limiter.reconcile(ticket, 5_000);
        assert_eq!(limiter.snapshot(&user("a")).tokens, 5_000);
        assert!(matches!(
            limiter.admit(&user("a"), 1),
            Admission::Rejected {
                reason: RejectionReason::TokenBudgetExceeded,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn release_returns_the_slot() {
        let limiter = UsageLimiter::new(1, 1_000, Duration::from_secs(60));
        let ticket = admitted(limiter.admit(&user("a"), 10));
        limiter.release(ticket);
        admitted(limiter.admit(&user("a"), 10));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_of_unknown_user_is_empty() {
        let limiter = UsageLimiter::new(5, 500, Duration::from_secs(30));
        let snapshot = limiter.snapshot(&user("nobody"));
        assert_eq!(
            snapshot,
            UsageSnapshot {
                requests: 0,
                tokens: 0,
                max_requests: 5,
                max_tokens: 500,
                window_secs: 30,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_admissions_never_exceed_cap() {
        let limiter = std::sync::Arc::new(UsageLimiter::new(25, u64::MAX, Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..100 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                matches!(limiter.admit(&UserId::from("shared"), 1), Admission::Admitted(_))
            }));
        }
        let mut admitted_count = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted_count += 1;
            }
        }
        assert_eq!(admitted_count, 25);
    }
}
