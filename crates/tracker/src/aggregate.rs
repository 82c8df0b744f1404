//! Effective-priority aggregation (rule in the tracker design notes).

use crate::entity::{Outcome, Source, TrackedEntity};

/// Result of folding a set of tracked entities against a base priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregated {
    pub effective_priority: u8,
    /// Set when a weight-0 ("binary") tracker failed: the instance must
    /// go to FAULT regardless of what the arithmetic sum would say.
    pub must_fault: bool,
}

/// Fold `entities` against `base_priority`. An owner (`base_priority ==
/// 255`) is never adjusted: ownership is absolute per the data model.
pub fn aggregate(base_priority: u8, entities: &[TrackedEntity]) -> Aggregated {
    if base_priority == 255 {
        return Aggregated {
            effective_priority: 255,
            must_fault: false,
        };
    }

    let mut total: i32 = base_priority as i32;
    let mut must_fault = false;

    for entity in entities {
        if matches!(entity.source, Source::File { .. }) {
            total += entity.numeric_delta() as i32;
            continue;
        }

        if entity.current() != Outcome::Failed {
            continue;
        }
        if entity.weight == 0 {
            must_fault = true;
            continue;
        }
        // A failed tracker's weight is added directly: a negative weight
        // (the common case, e.g. "-30") lowers priority on failure, a
        // positive weight raises it.
        total += entity.weight as i32;
    }

    let clamped = total.clamp(1, 254) as u8;
    Aggregated {
        effective_priority: if must_fault { 0 } else { clamped },
        must_fault,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Source;
    use std::time::Duration;

    fn failed(weight: i16) -> TrackedEntity {
        let mut e = TrackedEntity::new(
            1,
            Source::Script {
                command: "check".into(),
                args: vec![],
                timeout: Duration::from_secs(1),
            },
            weight,
            false,
            1,
            1,
        );
        e.record_raw(false);
        e
    }

    #[test]
    fn negative_weight_subtracts_from_base() {
        let agg = aggregate(120, &[failed(-30)]);
        assert_eq!(agg.effective_priority, 90);
        assert!(!agg.must_fault);
    }

    #[test]
    fn zero_weight_failure_forces_fault() {
        let agg = aggregate(120, &[failed(0)]);
        assert_eq!(agg.effective_priority, 0);
        assert!(agg.must_fault);
    }

    #[test]
    fn owner_priority_is_never_adjusted() {
        let agg = aggregate(255, &[failed(-200)]);
        assert_eq!(agg.effective_priority, 255);
    }

    #[test]
    fn clamps_to_minimum_of_one() {
        let agg = aggregate(20, &[failed(100)]);
        assert_eq!(agg.effective_priority, 1);
    }
}
