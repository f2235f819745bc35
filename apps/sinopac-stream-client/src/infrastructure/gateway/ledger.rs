//! Sequence & Retry Ledger
//!
//! Allocates per-connection sequence numbers and remembers every outstanding
//! non-heartbeat request so its response can be correlated, and so a request
//! the gateway timed out can be replayed verbatim.
//!
//! # Resolution Rules
//!
//! | Status on `sn`        | Entry    | Follow-up                        |
//! |-----------------------|----------|----------------------------------|
//! | success (`000`)       | removed  | none                             |
//! | timeout (`408`)       | removed  | one replay, if not a replay      |
//! | anything else         | removed  | none (logged as failure)         |
//! | never answered        | kept     | cleared on the next reset        |
//!
//! A replay is recorded under a fresh sequence number with `attempt = 1`, so
//! a second timeout on it is terminal. Sequence numbers are never reused
//! within one connection; [`SequenceLedger::reset`] restarts them at 1.

use std::collections::BTreeMap;
use std::time::Instant;

use super::messages::{GatewayRequest, StatusCode};

/// Replays allowed per original request.
pub const MAX_REPLAYS: u8 = 1;

/// An outstanding request awaiting its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Sequence number it was sent under.
    pub sn: u64,
    /// The request itself, kept for replay.
    pub request: GatewayRequest,
    /// When it was sent.
    pub submitted_at: Instant,
    /// 0 for the original send, 1 for a replay.
    pub attempt: u8,
}

/// Outcome of resolving a response against the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No entry for the sequence number (push, heartbeat, stale or unknown).
    Untracked,
    /// Success; the entry was removed.
    Completed(PendingRequest),
    /// Timeout; the entry was removed and should be replayed.
    Replay(PendingRequest),
    /// Timeout on a request that may not be replayed again.
    Exhausted(PendingRequest),
    /// Any other status; the entry was removed.
    Failed(PendingRequest, String),
}

/// Per-connection sequence counter and pending-request table.
#[derive(Debug)]
pub struct SequenceLedger {
    next_sn: u64,
    pending: BTreeMap<u64, PendingRequest>,
}

impl Default for SequenceLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceLedger {
    /// Create a ledger whose first sequence number is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_sn: 1,
            pending: BTreeMap::new(),
        }
    }

    /// Forget every pending entry and restart numbering at 1.
    pub fn reset(&mut self) {
        self.next_sn = 1;
        self.pending.clear();
    }

    /// Allocate the next sequence number.
    pub const fn allocate(&mut self) -> u64 {
        let sn = self.next_sn;
        self.next_sn += 1;
        sn
    }

    /// Record a sent request. Heartbeats are not recorded.
    ///
    /// Returns `true` if the request was recorded.
    pub fn record(&mut self, sn: u64, request: GatewayRequest, attempt: u8) -> bool {
        if !request.kind().is_tracked() {
            return false;
        }

        self.pending.insert(
            sn,
            PendingRequest {
                sn,
                request,
                submitted_at: Instant::now(),
                attempt,
            },
        );
        true
    }

    /// Resolve a response status against the entry for `sn`.
    pub fn resolve(&mut self, sn: u64, status: &StatusCode) -> Resolution {
        let Some(entry) = self.pending.remove(&sn) else {
            return Resolution::Untracked;
        };

        match status {
            StatusCode::Success => Resolution::Completed(entry),
            StatusCode::Timeout
                if entry.request.kind().is_replayable() && entry.attempt < MAX_REPLAYS =>
            {
                Resolution::Replay(entry)
            }
            StatusCode::Timeout => Resolution::Exhausted(entry),
            StatusCode::Failure(code) => Resolution::Failed(entry, code.clone()),
        }
    }

    /// Check whether `sn` is pending.
    #[must_use]
    pub fn contains(&self, sn: u64) -> bool {
        self.pending.contains_key(&sn)
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::infrastructure::config::PermissionFlag;
    use crate::infrastructure::gateway::messages::AuthParams;

    #[test]
    fn numbering_starts_at_one_and_resets() {
        let mut ledger = SequenceLedger::new();
        assert_eq!(ledger.allocate(), 1);
        assert_eq!(ledger.allocate(), 2);
        ledger.record(2, GatewayRequest::quote("AAPL.US"), 0);

        ledger.reset();
        assert!(ledger.is_empty());
        assert_eq!(ledger.allocate(), 1);
    }

    #[test]
    fn heartbeats_are_not_recorded() {
        let mut ledger = SequenceLedger::new();
        let sn = ledger.allocate();
        assert!(!ledger.record(sn, GatewayRequest::Heartbeat, 0));
        assert!(ledger.is_empty());
        assert_eq!(ledger.resolve(sn, &StatusCode::Success), Resolution::Untracked);
    }

    #[test]
    fn success_removes_entry_without_replay() {
        let mut ledger = SequenceLedger::new();
        ledger.record(5, GatewayRequest::quote("AAPL.US"), 0);

        let resolution = ledger.resolve(5, &StatusCode::Success);
        assert!(matches!(resolution, Resolution::Completed(ref p) if p.sn == 5));
        assert!(!ledger.contains(5));
    }

    #[test]
    fn timeout_removes_entry_and_requests_one_replay() {
        let mut ledger = SequenceLedger::new();
        ledger.record(5, GatewayRequest::quote("AAPL.US"), 0);

        let Resolution::Replay(entry) = ledger.resolve(5, &StatusCode::Timeout) else {
            panic!("expected replay");
        };
        assert_eq!(entry.request, GatewayRequest::quote("AAPL.US"));
        assert!(!ledger.contains(5));

        // The replay times out too: no further replay.
        ledger.record(9, entry.request, entry.attempt + 1);
        assert!(matches!(
            ledger.resolve(9, &StatusCode::Timeout),
            Resolution::Exhausted(_)
        ));
        assert!(ledger.is_empty());
    }

    #[test]
    fn auth_timeout_is_not_replayed() {
        let mut ledger = SequenceLedger::new();
        let auth = GatewayRequest::Auth(AuthParams {
            auth_key: String::new(),
            us: PermissionFlag::RealTime,
            hk: PermissionFlag::None,
            tw: PermissionFlag::None,
        });
        ledger.record(1, auth, 0);
        assert!(matches!(
            ledger.resolve(1, &StatusCode::Timeout),
            Resolution::Exhausted(_)
        ));
    }

    #[test]
    fn failure_removes_entry() {
        let mut ledger = SequenceLedger::new();
        ledger.record(3, GatewayRequest::trend("0700.HK"), 0);

        let resolution = ledger.resolve(3, &StatusCode::Failure("500".to_string()));
        assert!(matches!(resolution, Resolution::Failed(_, ref code) if code == "500"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn unanswered_entries_stay_until_reset() {
        let mut ledger = SequenceLedger::new();
        ledger.record(1, GatewayRequest::quote("A.US"), 0);
        ledger.record(2, GatewayRequest::quote("B.US"), 0);
        ledger.resolve(2, &StatusCode::Success);

        assert!(ledger.contains(1));
        assert_eq!(ledger.len(), 1);
        ledger.reset();
        assert!(ledger.is_empty());
    }

    proptest! {
        #[test]
        fn allocations_increase_by_one_between_resets(ops in proptest::collection::vec(any::<bool>(), 1..200)) {
            let mut ledger = SequenceLedger::new();
            let mut last = 0;
            for reset in ops {
                if reset {
                    ledger.reset();
                    last = 0;
                }
                let sn = ledger.allocate();
                prop_assert_eq!(sn, last + 1);
                last = sn;
            }
        }
    }
}
