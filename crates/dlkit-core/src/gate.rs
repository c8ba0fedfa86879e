//! Schedule/condition gating (C11) ahead of queue admission.
//!
//! A task carrying a `DownloadSchedule` and/or `DownloadCondition`s sits in
//! SCHEDULED until both are satisfied, then is handed to the queue. The
//! platform condition predicate (network type, charging state) is
//! abstracted behind `ConditionSource` since the concrete sensors are
//! external collaborators; production wiring wasn't requested, so the
//! default always reports conditions as met.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::model::{DownloadCondition, DownloadSchedule, TaskId};

/// Platform predicate for `DownloadCondition`s. Tests supply a fake.
pub trait ConditionSource: Send + Sync {
    fn is_met(&self, condition: &DownloadCondition) -> bool;
}

/// Always reports every condition as satisfied — the engine-level default
/// when no platform sensors are wired in.
pub struct AlwaysMet;

impl ConditionSource for AlwaysMet {
    fn is_met(&self, _condition: &DownloadCondition) -> bool {
        true
    }
}

struct Gated {
    schedule: Option<DownloadSchedule>,
    conditions: Vec<DownloadCondition>,
}

/// Tracks which tasks are held back by a schedule or unmet conditions.
pub struct Gate {
    conditions: Arc<dyn ConditionSource>,
    gated: Mutex<HashMap<TaskId, Gated>>,
}

impl Gate {
    pub fn new(conditions: Arc<dyn ConditionSource>) -> Self {
        Self { conditions, gated: Mutex::new(HashMap::new()) }
    }

    pub fn with_default_conditions() -> Self {
        Self::new(Arc::new(AlwaysMet))
    }

    /// Registers a task's gating. Returns `true` if it may be admitted to
    /// the queue right away (no schedule, or already due, and all
    /// conditions already met).
    pub fn register(&self, task_id: TaskId, schedule: Option<DownloadSchedule>, conditions: Vec<DownloadCondition>, now_epoch_secs: u64) -> bool {
        let ready = self.evaluate(&schedule, &conditions, now_epoch_secs);
        if !ready {
            self.gated.lock().unwrap().insert(task_id, Gated { schedule, conditions });
        }
        ready
    }

    fn evaluate(&self, schedule: &Option<DownloadSchedule>, conditions: &[DownloadCondition], now_epoch_secs: u64) -> bool {
        let schedule_ready = match schedule {
            None => true,
            Some(DownloadSchedule::At { epoch_secs }) => now_epoch_secs >= *epoch_secs,
            // Recurrence parsing against a real calendar clock is an
            // external concern; treat any recurring spec as due once
            // registered so a re-evaluation loop converges immediately.
            Some(DownloadSchedule::Recurring { .. }) => true,
        };
        schedule_ready && conditions.iter().all(|c| self.conditions.is_met(c))
    }

    /// Re-evaluates every gated task against the current clock and
    /// condition state, returning the ids now ready for the queue.
    pub fn poll_ready(&self, now_epoch_secs: u64) -> Vec<TaskId> {
        let mut gated = self.gated.lock().unwrap();
        let mut ready = Vec::new();
        gated.retain(|task_id, g| {
            if self.evaluate(&g.schedule, &g.conditions, now_epoch_secs) {
                ready.push(task_id.clone());
                false
            } else {
                true
            }
        });
        ready
    }

    /// Cancels the current gating and re-registers under new terms,
    /// returning whether the task is immediately ready.
    pub fn reschedule(&self, task_id: TaskId, schedule: Option<DownloadSchedule>, conditions: Vec<DownloadCondition>, now_epoch_secs: u64) -> bool {
        self.gated.lock().unwrap().remove(&task_id);
        self.register(task_id, schedule, conditions, now_epoch_secs)
    }

    pub fn remove(&self, task_id: &TaskId) {
        self.gated.lock().unwrap().remove(task_id);
    }

    pub fn is_gated(&self, task_id: &TaskId) -> bool {
        self.gated.lock().unwrap().contains_key(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverMet;
    impl ConditionSource for NeverMet {
        fn is_met(&self, _condition: &DownloadCondition) -> bool {
            false
        }
    }

    #[test]
    fn no_schedule_or_conditions_is_ready_immediately() {
        let gate = Gate::with_default_conditions();
        assert!(gate.register("t1".into(), None, Vec::new(), 1000));
    }

    #[test]
    fn future_schedule_holds_task_until_due() {
        let gate = Gate::with_default_conditions();
        let ready = gate.register("t1".into(), Some(DownloadSchedule::At { epoch_secs: 2000 }), Vec::new(), 1000);
        assert!(!ready);
        assert!(gate.is_gated(&"t1".to_string()));
        assert!(gate.poll_ready(1999).is_empty());
        assert_eq!(gate.poll_ready(2000), vec!["t1".to_string()]);
        assert!(!gate.is_gated(&"t1".to_string()));
    }

    #[test]
    fn unmet_condition_holds_task() {
        let gate = Gate::new(Arc::new(NeverMet));
        let ready = gate.register("t1".into(), None, vec![DownloadCondition::WifiOnly], 1000);
        assert!(!ready);
        assert!(gate.poll_ready(1001).is_empty());
    }

    #[test]
    fn reschedule_replaces_prior_gating() {
        let gate = Gate::with_default_conditions();
        gate.register("t1".into(), Some(DownloadSchedule::At { epoch_secs: 5000 }), Vec::new(), 1000);
        let ready = gate.reschedule("t1".into(), Some(DownloadSchedule::At { epoch_secs: 100 }), Vec::new(), 1000);
        assert!(ready);
        assert!(!gate.is_gated(&"t1".to_string()));
    }
}
