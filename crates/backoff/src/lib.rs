#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Retry backoff and peer-attempt quota for upd
//!
//! Whole-payload failures push the next attempt out on a bounded doubling
//! curve: `min(2^(attempts-1), 16)` days, fuzzed by up to six hours in
//! either direction so a fleet of devices does not retry in lockstep.
//! Peer sharing is additionally quota-bound: at most [`MAX_PEER_ATTEMPTS`]
//! tries per payload, and only within [`MAX_PEER_ATTEMPT_WINDOW_DAYS`] of
//! the first peer attempt - whichever limit trips first permanently
//! disables the peer source for that payload.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::Rng;
use upd_errors::Error;
use upd_progress::{keys, ProgressStore};

/// Maximum number of times one payload may be attempted via peer sharing
pub const MAX_PEER_ATTEMPTS: u32 = 10;

/// Wall-clock window for peer attempts, measured from the first one
pub const MAX_PEER_ATTEMPT_WINDOW_DAYS: i64 = 5;

/// Ceiling for the backoff curve
const MAX_BACKOFF_DAYS: u32 = 16;

/// Fuzz applied to each expiry so devices spread out
const FUZZ_HOURS: i64 = 6;

/// Persisted backoff bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackoffState {
    pub payload_attempt_number: u32,
    pub backoff_expiry: Option<DateTime<Utc>>,
    pub first_peer_attempt: Option<DateTime<Utc>>,
    pub peer_attempt_count: u32,
}

/// Time/attempt-bounded gate deciding whether a source may be retried now
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    state: BackoffState,
}

impl BackoffPolicy {
    /// Start from an explicit state (tests, or a caller that already loaded)
    #[must_use]
    pub fn new(state: BackoffState) -> Self {
        Self { state }
    }

    /// Load persisted state; missing keys mean "never failed"
    ///
    /// # Errors
    /// Returns an error on store I/O failure.
    pub async fn load(store: &ProgressStore) -> Result<Self, Error> {
        let mut state = BackoffState::default();
        if let Some(attempts) = store.get_i64(keys::PAYLOAD_ATTEMPT_NUMBER).await? {
            state.payload_attempt_number = u32::try_from(attempts).unwrap_or(0);
        }
        if let Some(secs) = store.get_i64(keys::BACKOFF_EXPIRY_TIME).await? {
            state.backoff_expiry = Utc.timestamp_opt(secs, 0).single();
        }
        if let Some(secs) = store.get_i64(keys::PEER_FIRST_ATTEMPT_TIMESTAMP).await? {
            state.first_peer_attempt = Utc.timestamp_opt(secs, 0).single();
        }
        if let Some(count) = store.get_i64(keys::PEER_NUM_ATTEMPTS).await? {
            state.peer_attempt_count = u32::try_from(count).unwrap_or(0);
        }
        Ok(Self { state })
    }

    /// Persist the current state
    ///
    /// # Errors
    /// Returns an error on store I/O failure.
    pub async fn save(&self, store: &ProgressStore) -> Result<(), Error> {
        store
            .set_i64(
                keys::PAYLOAD_ATTEMPT_NUMBER,
                i64::from(self.state.payload_attempt_number),
            )
            .await?;
        match self.state.backoff_expiry {
            Some(expiry) => {
                store
                    .set_i64(keys::BACKOFF_EXPIRY_TIME, expiry.timestamp())
                    .await?;
            }
            None => store.remove(keys::BACKOFF_EXPIRY_TIME).await?,
        }
        match self.state.first_peer_attempt {
            Some(first) => {
                store
                    .set_i64(keys::PEER_FIRST_ATTEMPT_TIMESTAMP, first.timestamp())
                    .await?;
            }
            None => store.remove(keys::PEER_FIRST_ATTEMPT_TIMESTAMP).await?,
        }
        store
            .set_i64(
                keys::PEER_NUM_ATTEMPTS,
                i64::from(self.state.peer_attempt_count),
            )
            .await?;
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> &BackoffState {
        &self.state
    }

    /// Whether any attempt may start now
    #[must_use]
    pub fn is_allowed(&self, now: DateTime<Utc>) -> bool {
        match self.state.backoff_expiry {
            Some(expiry) => now >= expiry,
            None => true,
        }
    }

    /// Time remaining until the gate opens, `None` when already open
    #[must_use]
    pub fn time_until_allowed(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self.state.backoff_expiry {
            Some(expiry) if now < expiry => Some(expiry - now),
            _ => None,
        }
    }

    /// Register a whole-payload failure: bump the attempt counter and push
    /// the expiry out on the bounded doubling curve
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.state.payload_attempt_number = self.state.payload_attempt_number.saturating_add(1);
        let fuzz_secs =
            rand::rng().random_range(-FUZZ_HOURS * 3600..=FUZZ_HOURS * 3600);
        self.state.backoff_expiry = Some(expiry_after(
            self.state.payload_attempt_number,
            now,
            Duration::seconds(fuzz_secs),
        ));
    }

    /// Forget all backoff state (payload applied or abandoned)
    pub fn reset(&mut self) {
        self.state = BackoffState::default();
    }

    /// Whether the peer source may be attempted now. Once either quota is
    /// exhausted this stays false for the payload's lifetime.
    #[must_use]
    pub fn peer_attempt_allowed(&self, now: DateTime<Utc>) -> bool {
        if self.state.peer_attempt_count >= MAX_PEER_ATTEMPTS {
            return false;
        }
        match self.state.first_peer_attempt {
            Some(first) => now - first <= Duration::days(MAX_PEER_ATTEMPT_WINDOW_DAYS),
            None => true,
        }
    }

    /// Register a peer attempt, stamping the window start on the first one
    pub fn record_peer_attempt(&mut self, now: DateTime<Utc>) {
        if self.state.first_peer_attempt.is_none() {
            self.state.first_peer_attempt = Some(now);
        }
        self.state.peer_attempt_count = self.state.peer_attempt_count.saturating_add(1);
    }
}

/// `min(2^(attempts-1), 16)` days after `now`, plus fuzz
fn expiry_after(attempts: u32, now: DateTime<Utc>, fuzz: Duration) -> DateTime<Utc> {
    let days = 1u32
        .checked_shl(attempts.saturating_sub(1))
        .unwrap_or(MAX_BACKOFF_DAYS)
        .min(MAX_BACKOFF_DAYS);
    now + Duration::days(i64::from(days)) + fuzz
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn curve_doubles_and_caps() {
        let now = at(0);
        let no_fuzz = Duration::zero();
        assert_eq!(expiry_after(1, now, no_fuzz), now + Duration::days(1));
        assert_eq!(expiry_after(2, now, no_fuzz), now + Duration::days(2));
        assert_eq!(expiry_after(3, now, no_fuzz), now + Duration::days(4));
        assert_eq!(expiry_after(5, now, no_fuzz), now + Duration::days(16));
        // Ceiling holds far beyond the doubling range
        assert_eq!(expiry_after(40, now, no_fuzz), now + Duration::days(16));
    }

    #[test]
    fn failure_gates_until_expiry() {
        let mut policy = BackoffPolicy::new(BackoffState::default());
        let now = at(1_000_000);
        assert!(policy.is_allowed(now));

        policy.record_failure(now);
        assert_eq!(policy.state().payload_attempt_number, 1);
        assert!(!policy.is_allowed(now));
        assert!(policy.time_until_allowed(now).is_some());

        // Well past one day plus maximum fuzz
        let later = now + Duration::days(2);
        assert!(policy.is_allowed(later));
        assert_eq!(policy.time_until_allowed(later), None);
    }

    #[test]
    fn peer_quota_by_count() {
        let mut policy = BackoffPolicy::new(BackoffState::default());
        let now = at(0);
        for _ in 0..MAX_PEER_ATTEMPTS {
            assert!(policy.peer_attempt_allowed(now));
            policy.record_peer_attempt(now);
        }
        assert!(!policy.peer_attempt_allowed(now));
        // Count exhaustion is permanent, time does not help
        assert!(!policy.peer_attempt_allowed(now + Duration::days(30)));
    }

    #[test]
    fn peer_quota_by_window() {
        let mut policy = BackoffPolicy::new(BackoffState::default());
        let first = at(0);
        policy.record_peer_attempt(first);

        let within = first + Duration::days(MAX_PEER_ATTEMPT_WINDOW_DAYS);
        assert!(policy.peer_attempt_allowed(within));

        let past = within + Duration::seconds(1);
        assert!(!policy.peer_attempt_allowed(past));
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();
        let now = at(500_000);

        let mut policy = BackoffPolicy::new(BackoffState::default());
        policy.record_failure(now);
        policy.record_peer_attempt(now);
        policy.save(&store).await.unwrap();

        let reloaded = BackoffPolicy::load(&store).await.unwrap();
        assert_eq!(reloaded.state().payload_attempt_number, 1);
        assert_eq!(reloaded.state().peer_attempt_count, 1);
        assert_eq!(
            reloaded.state().first_peer_attempt.map(|t| t.timestamp()),
            Some(500_000)
        );
        assert!(!reloaded.is_allowed(now));
    }

    #[tokio::test]
    async fn reset_clears_persisted_gate() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();
        let now = at(0);

        let mut policy = BackoffPolicy::new(BackoffState::default());
        policy.record_failure(now);
        policy.save(&store).await.unwrap();

        policy.reset();
        policy.save(&store).await.unwrap();

        let reloaded = BackoffPolicy::load(&store).await.unwrap();
        assert!(reloaded.is_allowed(now));
        assert_eq!(reloaded.state(), &BackoffState::default());
    }
}
