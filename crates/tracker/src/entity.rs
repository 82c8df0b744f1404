//! Tagged-variant tracked entities with a uniform `evaluate` contract.
//!
//! The upstream implementation this is modeled on dispatches through
//! per-kind function pointers; a tagged enum gets the same behavior
//! without virtual dispatch.

use std::path::PathBuf;
use std::time::Duration;

/// Raw result of probing one source, before rise/fall debouncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Satisfied,
    Failed,
}

/// What a tracked entity actually watches.
#[derive(Debug, Clone)]
pub enum Source {
    Interface { index: u32 },
    Script { command: String, args: Vec<String>, timeout: Duration },
    File { path: PathBuf },
    Process { pattern: String },
    PeerInstance { instance_id: u64 },
}

/// One configured tracking relationship: a source, a priority delta, and
/// the rise/fall debounce that turns raw probes into a stable outcome.
#[derive(Debug, Clone)]
pub struct TrackedEntity {
    pub id: u64,
    pub source: Source,
    /// Signed delta applied when failed; `0` means binary (any failure
    /// forces effective priority to 0 regardless of magnitude).
    pub weight: i16,
    pub reverse: bool,
    pub rise: u32,
    pub fall: u32,

    consecutive_ok: u32,
    consecutive_bad: u32,
    current: Outcome,

    /// For `Source::File` only: the last `integer * weight` delta,
    /// applied directly rather than through the rise/fall outcome.
    numeric_delta: i64,
}

impl TrackedEntity {
    pub fn new(id: u64, source: Source, weight: i16, reverse: bool, rise: u32, fall: u32) -> Self {
        Self {
            id,
            source,
            weight,
            reverse,
            rise: rise.max(1),
            fall: fall.max(1),
            consecutive_ok: 0,
            consecutive_bad: 0,
            current: Outcome::Satisfied,
            numeric_delta: 0,
        }
    }

    pub fn current(&self) -> Outcome {
        self.current
    }

    pub fn numeric_delta(&self) -> i64 {
        self.numeric_delta
    }

    /// A tracked file has no rise/fall debounce: the content read is
    /// trusted on sight. A missing/unparseable file carries no delta.
    pub fn record_numeric(&mut self, raw: Option<i64>) {
        self.numeric_delta = raw.map(|v| v.saturating_mul(self.weight as i64)).unwrap_or(0);
    }

    /// Feed one raw probe result and return the debounced outcome. A
    /// `reverse` entity treats a raw success as a tracking failure
    /// (useful for "fail over while this peer IS up" semantics).
    pub fn record_raw(&mut self, raw_ok: bool) -> Outcome {
        let ok = raw_ok != self.reverse;

        if ok {
            self.consecutive_ok += 1;
            self.consecutive_bad = 0;
            if self.consecutive_ok >= self.rise {
                self.current = Outcome::Satisfied;
            }
        } else {
            self.consecutive_bad += 1;
            self.consecutive_ok = 0;
            if self.consecutive_bad >= self.fall {
                self.current = Outcome::Failed;
            }
        }

        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_fall_consecutive_failures_before_flipping() {
        let mut e = TrackedEntity::new(1, Source::Interface { index: 2 }, -30, false, 1, 3);
        assert_eq!(e.record_raw(false), Outcome::Satisfied);
        assert_eq!(e.record_raw(false), Outcome::Satisfied);
        assert_eq!(e.record_raw(false), Outcome::Failed);
    }

    #[test]
    fn reverse_inverts_raw_result() {
        let mut e = TrackedEntity::new(2, Source::PeerInstance { instance_id: 9 }, -10, true, 1, 1);
        assert_eq!(e.record_raw(true), Outcome::Failed);
        assert_eq!(e.record_raw(false), Outcome::Satisfied);
    }
}
