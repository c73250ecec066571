//! History sampling: turns each probe result into durable state while
//! keeping history writes proportional to status changes, not probe count.

use crate::db::{keys, KvStore, ProbeRecord, PutOptions, RecordError, StoreError};

use std::time::Duration;
use thiserror::Error;

/// Maximum gap between history entries for a target whose status is stable.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// How long a history entry is kept before the store expires it.
pub const HISTORY_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Errors that abort recording one probe.
#[derive(Error, Debug)]
pub enum SampleError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to encode record: {0}")]
    Encode(#[from] RecordError),
}

/// Why a probe was or was not written to history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDecision {
    /// No marker exists for the target.
    FirstObservation,
    /// A marker exists but is not a valid record.
    CorruptMarker,
    StatusChanged,
    IntervalElapsed,
    /// Same status as the marker, within the sample interval.
    Suppressed,
}

impl SampleDecision {
    pub fn should_write(self) -> bool {
        !matches!(self, SampleDecision::Suppressed)
    }
}

/// Sampling thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPolicy {
    pub sample_interval: Duration,
    pub history_retention: Duration,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            sample_interval: SAMPLE_INTERVAL,
            history_retention: HISTORY_RETENTION,
        }
    }
}

impl SamplingPolicy {
    /// Decide whether `record` goes to history given the raw marker value.
    pub fn decide(&self, marker: Option<&[u8]>, record: &ProbeRecord) -> SampleDecision {
        let Some(bytes) = marker else {
            return SampleDecision::FirstObservation;
        };

        let last = match ProbeRecord::decode(bytes) {
            Ok(last) => last,
            Err(e) => {
                tracing::warn!("Unreadable last-seen marker, sampling anyway: {}", e);
                return SampleDecision::CorruptMarker;
            }
        };

        if last.status != record.status {
            return SampleDecision::StatusChanged;
        }

        let interval_ms = i64::try_from(self.sample_interval.as_millis()).unwrap_or(i64::MAX);
        if record.timestamp.saturating_sub(last.timestamp) > interval_ms {
            return SampleDecision::IntervalElapsed;
        }

        SampleDecision::Suppressed
    }

    /// Persist one probe result for `target`.
    ///
    /// The current slot is always overwritten. The history entry and the
    /// marker are written only when [`decide`](Self::decide) says so.
    pub fn record(
        &self,
        store: &dyn KvStore,
        target: &str,
        record: &ProbeRecord,
    ) -> Result<SampleDecision, SampleError> {
        let encoded = record.encode()?;

        store.put(&keys::current(target), &encoded, PutOptions::default())?;

        let marker = store.get(&keys::last_seen(target))?;
        let decision = self.decide(marker.as_deref(), record);

        if decision.should_write() {
            store.put(
                &keys::history(target, record.timestamp),
                &encoded,
                PutOptions::with_ttl(self.history_retention),
            )?;
            store.put(&keys::last_seen(target), &encoded, PutOptions::default())?;
        }

        tracing::debug!(
            target_name = target,
            status = %record.status,
            ?decision,
            "Recorded probe"
        );

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, ProbeStatus};

    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn up(ts: i64) -> ProbeRecord {
        ProbeRecord::response(200, true, 12, ts)
    }

    fn down(ts: i64) -> ProbeRecord {
        ProbeRecord::failure("timeout", 5000, ts)
    }

    fn read(store: &MemoryStore, key: &str) -> Option<ProbeRecord> {
        store
            .get(key)
            .unwrap()
            .map(|b| ProbeRecord::decode(&b).unwrap())
    }

    fn history_len(store: &MemoryStore, target: &str) -> usize {
        store.list(&keys::history_prefix(target), None).unwrap().keys.len()
    }

    fn seed_marker(store: &MemoryStore, target: &str, record: &ProbeRecord) {
        store
            .put(&keys::last_seen(target), &record.encode().unwrap(), PutOptions::default())
            .unwrap();
    }

    #[test]
    fn test_first_observation_writes_everything() {
        for record in [up(1000), down(1000)] {
            let store = MemoryStore::new();
            let decision = SamplingPolicy::default().record(&store, "t1", &record).unwrap();

            assert_eq!(decision, SampleDecision::FirstObservation);
            assert_eq!(read(&store, &keys::current("t1")), Some(record.clone()));
            assert_eq!(read(&store, &keys::history("t1", 1000)), Some(record.clone()));
            assert_eq!(read(&store, &keys::last_seen("t1")), Some(record));
        }
    }

    #[test]
    fn test_stable_status_within_interval_is_suppressed() {
        let store = MemoryStore::new();
        seed_marker(&store, "t1", &up(1000));

        let next = up(1000 + HOUR_MS);
        let decision = SamplingPolicy::default().record(&store, "t1", &next).unwrap();

        assert_eq!(decision, SampleDecision::Suppressed);
        assert_eq!(read(&store, &keys::current("t1")), Some(next));
        assert_eq!(history_len(&store, "t1"), 0);
        assert_eq!(read(&store, &keys::last_seen("t1")), Some(up(1000)));
    }

    #[test]
    fn test_status_change_forces_write() {
        let store = MemoryStore::new();
        seed_marker(&store, "t1", &up(1000));

        let next = down(1000 + HOUR_MS);
        let decision = SamplingPolicy::default().record(&store, "t1", &next).unwrap();

        assert_eq!(decision, SampleDecision::StatusChanged);
        assert_eq!(read(&store, &keys::history("t1", next.timestamp)), Some(next.clone()));
        let marker = read(&store, &keys::last_seen("t1")).unwrap();
        assert_eq!(marker.status, ProbeStatus::Down);
        assert_eq!(marker, next);
    }

    #[test]
    fn test_status_change_writes_even_without_elapsed_time() {
        let store = MemoryStore::new();
        seed_marker(&store, "t1", &down(1000));

        let next = up(1001);
        let decision = SamplingPolicy::default().record(&store, "t1", &next).unwrap();
        assert_eq!(decision, SampleDecision::StatusChanged);
        assert_eq!(history_len(&store, "t1"), 1);
    }

    #[test]
    fn test_stale_marker_forces_write() {
        let store = MemoryStore::new();
        seed_marker(&store, "t1", &up(1000));

        let next = up(1000 + 2 * HOUR_MS + 1);
        let decision = SamplingPolicy::default().record(&store, "t1", &next).unwrap();

        assert_eq!(decision, SampleDecision::IntervalElapsed);
        assert_eq!(read(&store, &keys::history("t1", next.timestamp)), Some(next.clone()));
        assert_eq!(read(&store, &keys::last_seen("t1")), Some(next));
    }

    #[test]
    fn test_exactly_interval_is_not_elapsed() {
        let policy = SamplingPolicy::default();
        let marker = up(0).encode().unwrap();
        assert_eq!(
            policy.decide(Some(&marker), &up(2 * HOUR_MS)),
            SampleDecision::Suppressed
        );
    }

    #[test]
    fn test_extreme_marker_timestamp_is_stale() {
        let policy = SamplingPolicy::default();
        // Decodes fine: any i64 is a valid timestamp.
        let encoded = up(i64::MIN).encode().unwrap();
        let marker = encoded.as_slice();
        assert_eq!(
            policy.decide(Some(marker), &up(1_700_000_000_000)),
            SampleDecision::IntervalElapsed
        );

        let store = MemoryStore::new();
        store
            .put(&keys::last_seen("t1"), marker, PutOptions::default())
            .unwrap();
        let next = up(1_700_000_000_000);
        policy.record(&store, "t1", &next).unwrap();
        assert_eq!(read(&store, &keys::last_seen("t1")), Some(next));
    }

    #[test]
    fn test_future_marker_timestamp_does_not_overflow() {
        let policy = SamplingPolicy::default();
        let marker = up(i64::MAX).encode().unwrap();
        assert_eq!(
            policy.decide(Some(&marker), &up(i64::MIN)),
            SampleDecision::Suppressed
        );
    }

    #[test]
    fn test_huge_interval_keeps_suppressing() {
        let policy = SamplingPolicy {
            sample_interval: Duration::from_secs(u64::MAX),
            ..SamplingPolicy::default()
        };
        let marker = up(1000).encode().unwrap();
        assert_eq!(policy.decide(Some(&marker), &up(1001)), SampleDecision::Suppressed);
    }

    #[test]
    fn test_corrupt_marker_fails_open() {
        let store = MemoryStore::new();
        store
            .put(&keys::last_seen("t1"), b"{\"status\":", PutOptions::default())
            .unwrap();

        let next = up(5000);
        let decision = SamplingPolicy::default().record(&store, "t1", &next).unwrap();

        assert_eq!(decision, SampleDecision::CorruptMarker);
        assert_eq!(read(&store, &keys::history("t1", 5000)), Some(next.clone()));
        assert_eq!(read(&store, &keys::last_seen("t1")), Some(next));
    }

    #[test]
    fn test_down_code_change_is_not_a_transition() {
        let policy = SamplingPolicy::default();
        let marker = ProbeRecord::response(500, false, 1, 0).encode().unwrap();
        let next = ProbeRecord::response(503, false, 1, HOUR_MS);
        assert_eq!(policy.decide(Some(&marker), &next), SampleDecision::Suppressed);
    }

    #[test]
    fn test_marker_tracks_last_persisted_not_last_probe() {
        let store = MemoryStore::new();
        let policy = SamplingPolicy::default();

        policy.record(&store, "t1", &up(0)).unwrap();
        for i in 1..=3 {
            policy.record(&store, "t1", &up(i * HOUR_MS / 2)).unwrap();
        }
        assert_eq!(read(&store, &keys::last_seen("t1")), Some(up(0)));
        assert_eq!(history_len(&store, "t1"), 1);

        // Measured from the marker, so the staleness window does not slide.
        policy.record(&store, "t1", &up(2 * HOUR_MS + 1)).unwrap();
        assert_eq!(history_len(&store, "t1"), 2);
    }

    #[test]
    fn test_history_entries_carry_retention_ttl() {
        let store = MemoryStore::new();
        let policy = SamplingPolicy {
            history_retention: Duration::ZERO,
            ..SamplingPolicy::default()
        };

        policy.record(&store, "t1", &up(1000)).unwrap();
        assert_eq!(history_len(&store, "t1"), 0);
        assert!(read(&store, &keys::current("t1")).is_some());
        assert!(read(&store, &keys::last_seen("t1")).is_some());
    }
}
