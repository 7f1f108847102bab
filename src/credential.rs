//! Round-robin pool of API credentials with per-credential rate-limit windows
//!
//! The pool is the only piece of shared mutable state in the crate. The
//! rotation cursor and the quota table sit behind a single mutex so that
//! `acquire` and `report` can be called from many tasks at once.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::error::CredentialError;

/// An API token handed out by [`CredentialPool::acquire`]
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    index: usize,
    token: Arc<str>,
}

impl Credential {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Token reduced to its last four characters, safe to log
    pub fn masked(&self) -> String {
        mask(&self.token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("token", &self.masked())
            .finish()
    }
}

fn mask(token: &str) -> String {
    let tail: String = token
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{}", tail)
}

/// Last quota snapshot reported for a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl Quota {
    fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.remaining > 0 || now >= self.reset_at
    }
}

/// Point-in-time view of one credential, for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStatus {
    pub token: String,
    pub quota: Option<Quota>,
    pub available: bool,
}

struct PoolState {
    cursor: usize,
    quotas: Vec<Option<Quota>>,
}

impl PoolState {
    fn shortest_wait(&self, now: DateTime<Utc>) -> Duration {
        self.quotas
            .iter()
            .flatten()
            .map(|quota| (quota.reset_at - now).to_std().unwrap_or(Duration::ZERO))
            .min()
            .unwrap_or(Duration::ZERO)
    }
}

pub struct CredentialPool {
    tokens: Vec<Arc<str>>,
    state: Mutex<PoolState>,
    default_backoff: Duration,
}

impl CredentialPool {
    /// Builds a pool over `tokens`. An empty list is rejected immediately.
    pub fn new(tokens: Vec<String>, default_backoff: Duration) -> Result<Self, CredentialError> {
        if tokens.is_empty() {
            return Err(CredentialError::Empty);
        }

        info!("Credential pool initialized with {} tokens", tokens.len());
        let quotas = vec![None; tokens.len()];

        Ok(Self {
            tokens: tokens.into_iter().map(Arc::from).collect(),
            state: Mutex::new(PoolState { cursor: 0, quotas }),
            default_backoff,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.tokens.len()
    }

    // Quota bookkeeping stays consistent even if a holder panicked.
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn acquire(&self) -> Result<Credential, CredentialError> {
        self.acquire_at(Utc::now())
    }

    /// Returns the next available credential starting at the cursor.
    ///
    /// The cursor always moves past the credential that was handed out, so
    /// consecutive calls rotate through the pool. When every credential is
    /// rate limited the error carries the shortest wait until one resets.
    pub fn acquire_at(&self, now: DateTime<Utc>) -> Result<Credential, CredentialError> {
        let mut state = self.lock_state();
        let count = self.tokens.len();

        for offset in 0..count {
            let index = (state.cursor + offset) % count;
            let available = state.quotas[index].is_none_or(|quota| quota.is_available(now));
            if available {
                state.cursor = (index + 1) % count;
                let credential = Credential {
                    index,
                    token: Arc::clone(&self.tokens[index]),
                };
                debug!("Using credential {} (index {})", credential.masked(), index);
                return Ok(credential);
            }
        }

        let wait = state.shortest_wait(now);
        warn!("All {} credentials are rate limited, next reset in {:?}", count, wait);
        Err(CredentialError::Exhausted { wait })
    }

    /// Time until the earliest tracked reset, zero if one already passed
    pub fn shortest_wait(&self) -> Duration {
        self.lock_state().shortest_wait(Utc::now())
    }

    /// Overwrites the stored quota snapshot for `credential`
    pub fn report(&self, credential: &Credential, remaining: u64, reset_at: DateTime<Utc>) {
        let mut state = self.lock_state();
        if let Some(slot) = state.quotas.get_mut(credential.index) {
            *slot = Some(Quota {
                remaining,
                reset_at,
            });
            debug!(
                "Updated quota for {}: remaining={}, reset_at={}",
                credential.masked(),
                remaining,
                reset_at
            );
        }
    }

    pub fn mark_exhausted(&self, credential: &Credential, retry_after: Option<Duration>) {
        self.mark_exhausted_at(credential, retry_after, Utc::now());
    }

    /// Records an explicit rate-limit rejection for a credential that local
    /// bookkeeping still considered available.
    pub fn mark_exhausted_at(
        &self,
        credential: &Credential,
        retry_after: Option<Duration>,
        now: DateTime<Utc>,
    ) {
        let backoff = retry_after.unwrap_or(self.default_backoff);
        let reset_at = TimeDelta::from_std(backoff)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        warn!(
            "Credential {} hit its rate limit, backing off until {}",
            credential.masked(),
            reset_at
        );
        self.report(credential, 0, reset_at);
    }

    pub fn status(&self) -> Vec<CredentialStatus> {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> Vec<CredentialStatus> {
        let state = self.lock_state();
        self.tokens
            .iter()
            .zip(state.quotas.iter())
            .map(|(token, quota)| CredentialStatus {
                token: mask(token),
                quota: *quota,
                available: quota.is_none_or(|q| q.is_available(now)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::{HashMap, HashSet};

    fn pool(tokens: &[&str]) -> CredentialPool {
        CredentialPool::new(
            tokens.iter().map(|t| t.to_string()).collect(),
            Duration::from_secs(60),
        )
        .unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn new_rejects_empty_token_list() {
        let result = CredentialPool::new(vec![], Duration::from_secs(60));
        assert!(matches!(result, Err(CredentialError::Empty)));
    }

    #[test]
    fn acquire_rotates_through_fresh_credentials() {
        let pool = pool(&["token-a", "token-b", "token-c"]);
        let now = at(1_000);

        let tokens: Vec<String> = (0..4)
            .map(|_| pool.acquire_at(now).unwrap().token().to_string())
            .collect();

        assert_eq!(tokens, vec!["token-a", "token-b", "token-c", "token-a"]);
    }

    #[test]
    fn acquire_skips_credentials_without_remaining_quota() {
        let pool = pool(&["token-a", "token-b"]);
        let now = at(1_000);

        let first = pool.acquire_at(now).unwrap();
        pool.report(&first, 0, at(2_000));

        for _ in 0..3 {
            assert_eq!(pool.acquire_at(now).unwrap().token(), "token-b");
        }
    }

    #[rstest]
    #[case(5, 2_000, true)] // quota left
    #[case(0, 2_000, false)] // exhausted and not yet reset
    #[case(0, 1_000, true)] // reset time reached
    #[case(0, 500, true)] // reset time passed
    fn acquire_honours_reported_quota(
        #[case] remaining: u64,
        #[case] reset_secs: i64,
        #[case] available: bool,
    ) {
        let pool = pool(&["only"]);
        let now = at(1_000);
        let credential = pool.acquire_at(now).unwrap();
        pool.report(&credential, remaining, at(reset_secs));

        assert_eq!(pool.acquire_at(now).is_ok(), available);
    }

    #[test]
    fn acquire_returns_minimum_wait_when_all_exhausted() {
        let pool = pool(&["token-a", "token-b"]);
        let now = at(1_000);

        let a = pool.acquire_at(now).unwrap();
        let b = pool.acquire_at(now).unwrap();
        pool.report(&a, 0, at(1_300));
        pool.report(&b, 0, at(1_120));

        let result = pool.acquire_at(now);
        assert!(matches!(
            result,
            Err(CredentialError::Exhausted { wait }) if wait == Duration::from_secs(120)
        ));
    }

    #[test]
    fn report_is_last_write_wins() {
        let pool = pool(&["only"]);
        let now = at(1_000);
        let credential = pool.acquire_at(now).unwrap();

        pool.report(&credential, 0, at(5_000));
        pool.report(&credential, 10, at(4_000));

        let status = pool.status_at(now);
        assert_eq!(
            status[0].quota,
            Some(Quota {
                remaining: 10,
                reset_at: at(4_000)
            })
        );
        assert!(status[0].available);
    }

    #[test]
    fn mark_exhausted_uses_default_backoff_without_retry_after() {
        let pool = pool(&["only"]);
        let now = at(1_000);
        let credential = pool.acquire_at(now).unwrap();

        pool.mark_exhausted_at(&credential, None, now);

        assert!(matches!(
            pool.acquire_at(now),
            Err(CredentialError::Exhausted { wait }) if wait == Duration::from_secs(60)
        ));
        assert!(pool.acquire_at(at(1_060)).is_ok());
    }

    #[test]
    fn mark_exhausted_prefers_server_retry_after() {
        let pool = pool(&["only"]);
        let now = at(1_000);
        let credential = pool.acquire_at(now).unwrap();

        pool.mark_exhausted_at(&credential, Some(Duration::from_secs(5)), now);

        assert!(pool.acquire_at(at(1_004)).is_err());
        assert!(pool.acquire_at(at(1_005)).is_ok());
    }

    #[test]
    fn never_hands_out_exhausted_credential_while_another_is_available() {
        let pool = pool(&["t0", "t1", "t2", "t3"]);
        let now = at(1_000);
        let exhausted: HashSet<&str> = HashSet::from(["t0", "t2"]);

        for _ in 0..4 {
            let credential = pool.acquire_at(now).unwrap();
            if exhausted.contains(credential.token()) {
                pool.report(&credential, 0, at(9_000));
            }
        }

        for _ in 0..10 {
            let credential = pool.acquire_at(now).unwrap();
            assert!(!exhausted.contains(credential.token()));
        }
    }

    #[test]
    fn debug_output_masks_token() {
        let pool = pool(&["ghp_secretvalue1234"]);
        let credential = pool.acquire_at(at(0)).unwrap();

        let rendered = format!("{:?}", credential);
        assert!(rendered.contains("...1234"));
        assert!(!rendered.contains("secret"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_acquire_and_report_keep_pool_consistent() {
        let pool = Arc::new(pool(&["t0", "t1", "t2"]));
        let now = at(1_000);

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    let credential = pool.acquire_at(now).unwrap();
                    pool.report(&credential, 100 + i, at(2_000));
                    credential.token().to_string()
                })
            })
            .collect();

        let mut handed_out: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            *handed_out.entry(handle.await.unwrap()).or_default() += 1;
        }

        assert_eq!(handed_out.len(), 3);
        assert!(handed_out.values().all(|&count| count >= 10));
        let status = pool.status_at(now);
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|s| s.available));
    }
}
