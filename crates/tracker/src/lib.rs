//! Aggregates interface/script/file/process/peer signals into an
//! effective priority per VRRP instance.
//!
//! Instances register and unregister their tracked entities by id;
//! nothing here knows about VRRP itself, only about priority deltas.

mod aggregate;
mod entity;
mod probe;

pub use aggregate::{aggregate, Aggregated};
pub use entity::{Outcome, Source, TrackedEntity};

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::info;

/// Stable id for one instance's tracking set, independent of its VRRP
/// identity (name/vrid) so the tracker stays decoupled from that crate.
pub type InstanceId = u64;

/// Central registry mapping instances to their tracked entities.
#[derive(Default)]
pub struct Tracker {
    entities: DashMap<InstanceId, Vec<TrackedEntity>>,
    next_entity_id: AtomicU64,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_entity_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register one tracked entity for `instance`, returning its id.
    pub fn register(
        &self,
        instance: InstanceId,
        source: Source,
        weight: i16,
        reverse: bool,
        rise: u32,
        fall: u32,
    ) -> u64 {
        let id = self.next_id();
        let entity = TrackedEntity::new(id, source, weight, reverse, rise, fall);
        self.entities.entry(instance).or_default().push(entity);
        id
    }

    /// Drop every tracked entity belonging to `instance` (called on
    /// instance stop/reload).
    pub fn unregister_instance(&self, instance: InstanceId) {
        self.entities.remove(&instance);
    }

    /// Feed a raw probe result for one entity of `instance`, returning
    /// the newly debounced outcome.
    pub fn record(&self, instance: InstanceId, entity_id: u64, raw_ok: bool) -> Option<Outcome> {
        let mut entry = self.entities.get_mut(&instance)?;
        let entity = entry.iter_mut().find(|e| e.id == entity_id)?;
        let outcome = entity.record_raw(raw_ok);
        if outcome == Outcome::Failed {
            info!(instance, entity_id, "tracked entity failed");
        }
        Some(outcome)
    }

    /// Fold `instance`'s current tracked-entity outcomes into an
    /// effective priority for `base_priority`.
    pub fn effective_priority(&self, instance: InstanceId, base_priority: u8) -> Aggregated {
        match self.entities.get(&instance) {
            Some(entry) => aggregate(base_priority, &entry),
            None => Aggregated {
                effective_priority: base_priority,
                must_fault: false,
            },
        }
    }

    pub fn entity_ids(&self, instance: InstanceId) -> Vec<u64> {
        self.entities
            .get(&instance)
            .map(|e| e.iter().map(|t| t.id).collect())
            .unwrap_or_default()
    }
}

/// Probe a script-backed entity and feed its result back into `tracker`.
/// Split out of [`Tracker`] itself because it needs `.await`, and
/// `DashMap` guards must not be held across one.
pub async fn poll_script(tracker: &Tracker, instance: InstanceId, entity_id: u64, command: &str, args: &[String], timeout: std::time::Duration) -> Option<Outcome> {
    let ok = probe::script_probe(command, args, timeout).await;
    tracker.record(instance, entity_id, ok)
}

/// Re-read a tracked file and update its numeric delta. Unlike the other
/// probes this never produces a rise/fall outcome: the value read is
/// applied directly by [`aggregate`].
pub fn poll_file(tracker: &Tracker, instance: InstanceId, entity_id: u64, path: &std::path::Path) {
    let raw = probe::file_probe(path);
    if let Some(mut entry) = tracker.entities.get_mut(&instance) {
        if let Some(entity) = entry.iter_mut().find(|e| e.id == entity_id) {
            entity.record_numeric(raw);
        }
    }
}

pub fn poll_process(tracker: &Tracker, instance: InstanceId, entity_id: u64, pattern: &str) -> Option<Outcome> {
    let present = probe::process_probe(pattern);
    tracker.record(instance, entity_id, present)
}

pub fn poll_interface(tracker: &Tracker, instance: InstanceId, entity_id: u64, up_and_running: bool) -> Option<Outcome> {
    let ok = probe::interface_probe(up_and_running);
    tracker.record(instance, entity_id, ok)
}

pub fn poll_peer(tracker: &Tracker, instance: InstanceId, entity_id: u64, peer_is_master: bool) -> Option<Outcome> {
    tracker.record(instance, entity_id, peer_is_master)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn registering_and_failing_adjusts_effective_priority() {
        let tracker = Tracker::new();
        let id = tracker.register(1, Source::Interface { index: 2 }, -30, false, 1, 1);
        assert_eq!(tracker.effective_priority(1, 120).effective_priority, 120);

        poll_interface(&tracker, 1, id, false);
        assert_eq!(tracker.effective_priority(1, 120).effective_priority, 90);
    }

    #[test]
    fn unregistering_clears_all_entities() {
        let tracker = Tracker::new();
        tracker.register(1, Source::Interface { index: 2 }, -30, false, 1, 1);
        tracker.unregister_instance(1);
        assert!(tracker.entity_ids(1).is_empty());
    }

    #[tokio::test]
    async fn script_polling_round_trips_through_tracker() {
        let tracker = Tracker::new();
        let id = tracker.register(
            7,
            Source::Script {
                command: "false".into(),
                args: vec![],
                timeout: Duration::from_secs(1),
            },
            0,
            false,
            1,
            1,
        );
        let outcome = poll_script(&tracker, 7, id, "false", &[], Duration::from_secs(1)).await;
        assert_eq!(outcome, Some(Outcome::Failed));
        assert!(tracker.effective_priority(7, 120).must_fault);
    }
}
