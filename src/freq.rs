//! Rolling per-fingerprint event-frequency windows.

use std::collections::{HashMap, VecDeque};

/// A `(count, period_seconds)` pair parsed from the `"count/period"` configuration grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreqSpec {
    pub count: u64,
    pub period_secs: u64,
}

impl FreqSpec {
    pub fn new(count: u64, period_secs: u64) -> Self {
        Self { count, period_secs }
    }

    /// Parses the `"count/period"` grammar used by `upbound_freq`/`downbound_freq`.
    pub fn parse(s: &str) -> Result<Self, FreqSpecError> {
        let (count_str, period_str) = s
            .split_once('/')
            .ok_or_else(|| FreqSpecError::Malformed(s.to_string()))?;
        let count: u64 = count_str
            .trim()
            .parse()
            .map_err(|_| FreqSpecError::Malformed(s.to_string()))?;
        let period_secs: u64 = period_str
            .trim()
            .parse()
            .map_err(|_| FreqSpecError::Malformed(s.to_string()))?;
        if period_secs < 1 {
            return Err(FreqSpecError::ZeroPeriod);
        }
        Ok(Self { count, period_secs })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FreqSpecError {
    #[error("malformed frequency expression {0:?}, expected \"count/period\"")]
    Malformed(String),
    #[error("frequency period must be at least 1 second")]
    ZeroPeriod,
}

/// Rolling counter of event timestamps, bucketed by a content fingerprint (0 = unsharded).
///
/// A soft cap of `count_limit + 10` elements per bucket bounds memory under flood; the oldest
/// timestamps are dropped first.
#[derive(Debug)]
pub struct FrequencyWindow {
    count_limit: u64,
    period_secs: u64,
    buckets: HashMap<u32, VecDeque<u64>>,
}

impl FrequencyWindow {
    pub fn new(spec: FreqSpec) -> Self {
        Self {
            count_limit: spec.count,
            period_secs: spec.period_secs,
            buckets: HashMap::new(),
        }
    }

    pub fn count_limit(&self) -> u64 {
        self.count_limit
    }

    pub fn period_secs(&self) -> u64 {
        self.period_secs
    }

    /// Records one event at `now` (epoch seconds) under `fingerprint`.
    pub fn push(&mut self, fingerprint: u32, now: u64) {
        let cap = self.count_limit as usize + 10;
        let bucket = self.buckets.entry(fingerprint).or_default();
        bucket.push_back(now);
        while bucket.len() > cap {
            bucket.pop_front();
        }
    }

    /// Drops timestamps older than `now - period`; removes buckets left empty.
    pub fn deprecate(&mut self, now: u64) {
        let period = self.period_secs;
        self.buckets.retain(|_, bucket| {
            while let Some(&oldest) = bucket.front() {
                if now.saturating_sub(oldest) > period {
                    bucket.pop_front();
                } else {
                    break;
                }
            }
            !bucket.is_empty()
        });
    }

    /// Size of `fingerprint`'s bucket; `count(0)` sums every bucket regardless of mode.
    pub fn count(&self, fingerprint: u32) -> u64 {
        if fingerprint == 0 {
            self.buckets.values().map(|b| b.len() as u64).sum()
        } else {
            self.buckets.get(&fingerprint).map_or(0, |b| b.len() as u64)
        }
    }

    /// Empties `fingerprint`'s bucket; `reset(0)` empties every bucket.
    pub fn reset(&mut self, fingerprint: u32) {
        if fingerprint == 0 {
            self.buckets.clear();
        } else {
            self.buckets.remove(&fingerprint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(count: u64, period: u64) -> FrequencyWindow {
        FrequencyWindow::new(FreqSpec::new(count, period))
    }

    #[test]
    fn parses_freq_spec() {
        assert_eq!(FreqSpec::parse("2/60").unwrap(), FreqSpec::new(2, 60));
        assert!(FreqSpec::parse("2/0").is_err());
        assert!(FreqSpec::parse("nope").is_err());
        assert!(FreqSpec::parse("2").is_err());
    }

    #[test]
    fn deprecate_drops_only_stale_timestamps() {
        let mut w = window(10, 5);
        w.push(0, 100);
        w.push(0, 103);
        w.push(0, 110);
        w.deprecate(110);
        assert_eq!(w.count(0), 2); // 100 is older than 110-5=105
    }

    #[test]
    fn fingerprint_isolation() {
        let mut w = window(10, 60);
        for t in 0..5 {
            w.push(1, t);
        }
        for t in 0..3 {
            w.push(2, t);
        }
        assert_eq!(w.count(1), 5);
        assert_eq!(w.count(2), 3);
        w.reset(1);
        assert_eq!(w.count(1), 0);
        assert_eq!(w.count(2), 3);
    }

    #[test]
    fn soft_cap_drops_oldest() {
        let mut w = window(3, 1000);
        for t in 0..20u64 {
            w.push(7, t);
        }
        assert_eq!(w.count(7), 13); // cap is count_limit + 10 = 13
    }

    #[test]
    fn reset_zero_clears_every_bucket() {
        let mut w = window(5, 60);
        w.push(1, 0);
        w.push(2, 0);
        w.reset(0);
        assert_eq!(w.count(1), 0);
        assert_eq!(w.count(2), 0);
    }

    #[test]
    fn count_zero_sums_every_bucket() {
        let mut w = window(5, 60);
        w.push(1, 0);
        w.push(1, 0);
        w.push(2, 0);
        assert_eq!(w.count(0), 3);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Invariant #3: after deprecate(now), every retained timestamp t satisfies now - t <= period.
        #[test]
        fn window_deprecation_never_retains_stale_timestamps(
            events in prop::collection::vec((1u32..5, 0u64..1000), 0..50),
            period in 1u64..100,
            now in 0u64..2000,
        ) {
            let mut w = FrequencyWindow::new(FreqSpec::new(1000, period));
            for (fp, t) in &events {
                w.push(*fp, *t);
            }
            w.deprecate(now);
            for fp in 1u32..5 {
                if let Some(bucket) = w.buckets.get(&fp) {
                    for &t in bucket {
                        prop_assert!(now.saturating_sub(t) <= period);
                    }
                }
            }
        }

        // Invariant #4: pushing k events into bucket A never affects count(B) for B != A.
        #[test]
        fn fingerprint_isolation_holds(
            count_a in 0usize..20,
            count_b in 0usize..20,
        ) {
            let mut w = FrequencyWindow::new(FreqSpec::new(1000, 1000));
            for t in 0..count_a as u64 {
                w.push(7, t);
            }
            for t in 0..count_b as u64 {
                w.push(11, t);
            }
            prop_assert_eq!(w.count(7), count_a as u64);
            prop_assert_eq!(w.count(11), count_b as u64);
        }
    }
}
