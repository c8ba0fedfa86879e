//! Admission queue (C10): priority + FIFO waiting list, global and
//! per-host concurrency caps, URGENT preemption.
//!
//! The active set, waiting list, and per-host counters share one mutex —
//! the same single-lock discipline the engine's global connection budget
//! used, now serving as the queue's admission check instead of a separate
//! redundant cap.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::model::{Priority, TaskId};

#[derive(Debug, Clone)]
struct Waiting {
    task_id: TaskId,
    host: Option<String>,
    priority: Priority,
    created_at: Instant,
    /// True if this entry was paused mid-flight by a preemption and should
    /// resume (not start fresh) once admitted again.
    preempted: bool,
}

/// What the caller should do once `enqueue`/`on_task_finished` decides a
/// task may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Start immediately (fresh if `preempted` is false, resume otherwise).
    Start { task_id: TaskId, preempted: bool },
    /// No slot available; task sits in the waiting list.
    Wait,
    /// Start immediately after pausing `victim` to make room.
    Preempt { victim: TaskId, start: TaskId },
}

struct Inner {
    active: HashMap<TaskId, (Option<String>, Priority)>,
    waiting: Vec<Waiting>,
    host_count: HashMap<String, usize>,
}

/// Priority-ordered admission queue with global and per-host caps.
pub struct Queue {
    max_concurrent: usize,
    max_per_host: usize,
    inner: Mutex<Inner>,
}

impl Queue {
    pub fn new(max_concurrent: usize, max_per_host: usize) -> Self {
        Self {
            max_concurrent,
            max_per_host,
            inner: Mutex::new(Inner { active: HashMap::new(), waiting: Vec::new(), host_count: HashMap::new() }),
        }
    }

    fn host_ok(&self, inner: &Inner, host: &Option<String>) -> bool {
        if self.max_per_host == 0 {
            return true;
        }
        match host {
            Some(h) => inner.host_count.get(h).copied().unwrap_or(0) < self.max_per_host,
            None => true,
        }
    }

    fn has_room(&self, inner: &Inner, host: &Option<String>) -> bool {
        let under_global = self.max_concurrent == 0 || inner.active.len() < self.max_concurrent;
        under_global && self.host_ok(inner, host)
    }

    fn mark_active(&self, inner: &mut Inner, task_id: &TaskId, host: Option<String>, priority: Priority) {
        if let Some(h) = &host {
            *inner.host_count.entry(h.clone()).or_insert(0) += 1;
        }
        inner.active.insert(task_id.clone(), (host, priority));
    }

    /// Admits `task_id`, or enqueues it. `host` is the scheme/port-stripped
    /// hostname; `None` for sources without one (e.g. BitTorrent).
    pub fn enqueue(&self, task_id: TaskId, host: Option<String>, priority: Priority) -> Admission {
        let mut inner = self.inner.lock().unwrap();

        if self.has_room(&inner, &host) {
            self.mark_active(&mut inner, &task_id, host, priority);
            return Admission::Start { task_id, preempted: false };
        }

        if priority == Priority::Urgent {
            if let Some(victim) = lowest_priority_non_urgent_active(&inner) {
                let (victim_host, victim_priority) = inner.active.remove(&victim).unwrap();
                if let Some(h) = &victim_host {
                    if let Some(c) = inner.host_count.get_mut(h) {
                        *c = c.saturating_sub(1);
                    }
                }
                // Sorts to the head of its own priority band, not the tail:
                // stamp it older than every current waiter of the same
                // priority so a preempted task is promoted ahead of
                // later-arriving same-priority waiters (4.10 step 2).
                let head_of_band = inner
                    .waiting
                    .iter()
                    .filter(|w| w.priority == victim_priority)
                    .map(|w| w.created_at)
                    .min()
                    .and_then(|t| t.checked_sub(Duration::from_nanos(1)))
                    .unwrap_or_else(Instant::now);
                inner.waiting.push(Waiting {
                    task_id: victim.clone(),
                    host: victim_host,
                    priority: victim_priority,
                    created_at: head_of_band,
                    preempted: true,
                });
                sort_waiting(&mut inner.waiting);
                if self.has_room(&inner, &host) {
                    self.mark_active(&mut inner, &task_id, host, priority);
                    return Admission::Preempt { victim, start: task_id };
                }
            }
        }

        inner.waiting.push(Waiting { task_id, host, priority, created_at: Instant::now(), preempted: false });
        sort_waiting(&mut inner.waiting);
        Admission::Wait
    }

    /// Call when a running task completes, fails, or is canceled. Returns
    /// the next task (if any) that should now start.
    pub fn on_task_finished(&self, task_id: &TaskId) -> Option<Admission> {
        let mut inner = self.inner.lock().unwrap();
        if let Some((host, _)) = inner.active.remove(task_id) {
            if let Some(h) = &host {
                if let Some(c) = inner.host_count.get_mut(h) {
                    *c = c.saturating_sub(1);
                }
            }
        }
        self.promote_next(&mut inner)
    }

    fn promote_next(&self, inner: &mut Inner) -> Option<Admission> {
        let idx = inner.waiting.iter().position(|w| self.host_ok(inner, &w.host))?;
        let w = inner.waiting.remove(idx);
        self.mark_active(inner, &w.task_id, w.host, w.priority);
        Some(Admission::Start { task_id: w.task_id, preempted: w.preempted })
    }

    /// Reorders the waiting list after a priority change; no effect on an
    /// already-active task.
    pub fn set_priority(&self, task_id: &TaskId, priority: Priority) -> Option<Admission> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(w) = inner.waiting.iter_mut().find(|w| &w.task_id == task_id) {
            w.priority = priority;
        }
        sort_waiting(&mut inner.waiting);
        self.promote_next(&mut inner)
    }

    pub fn is_active(&self, task_id: &TaskId) -> bool {
        self.inner.lock().unwrap().active.contains_key(task_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().unwrap().active.len()
    }

    /// Removes a waiting task outright (e.g. user canceled before it ran).
    pub fn remove_waiting(&self, task_id: &TaskId) {
        let mut inner = self.inner.lock().unwrap();
        inner.waiting.retain(|w| &w.task_id != task_id);
    }
}

fn lowest_priority_non_urgent_active(inner: &Inner) -> Option<TaskId> {
    inner
        .active
        .iter()
        .filter(|(_, (_, p))| *p != Priority::Urgent)
        .min_by_key(|(_, (_, p))| *p)
        .map(|(id, _)| id.clone())
}

fn sort_waiting(waiting: &mut [Waiting]) {
    waiting.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_immediately_under_cap() {
        let q = Queue::new(2, 0);
        assert_eq!(q.enqueue("a".into(), None, Priority::Normal), Admission::Start { task_id: "a".into(), preempted: false });
        assert_eq!(q.active_count(), 1);
    }

    #[test]
    fn queues_past_global_cap() {
        let q = Queue::new(1, 0);
        q.enqueue("a".into(), None, Priority::Normal);
        assert_eq!(q.enqueue("b".into(), None, Priority::Normal), Admission::Wait);
    }

    #[test]
    fn per_host_cap_is_enforced() {
        let q = Queue::new(4, 1);
        q.enqueue("a".into(), Some("x.com".into()), Priority::Normal);
        assert_eq!(q.enqueue("b".into(), Some("x.com".into()), Priority::Normal), Admission::Wait);
        assert_eq!(
            q.enqueue("c".into(), Some("y.com".into()), Priority::Normal),
            Admission::Start { task_id: "c".into(), preempted: false }
        );
    }

    #[test]
    fn finishing_a_task_promotes_the_next_waiter() {
        let q = Queue::new(1, 0);
        q.enqueue("a".into(), None, Priority::Normal);
        q.enqueue("b".into(), None, Priority::Normal);
        let next = q.on_task_finished(&"a".to_string());
        assert_eq!(next, Some(Admission::Start { task_id: "b".into(), preempted: false }));
    }

    #[test]
    fn higher_priority_waiter_promoted_first() {
        let q = Queue::new(1, 0);
        q.enqueue("a".into(), None, Priority::Normal);
        q.enqueue("low".into(), None, Priority::Low);
        q.enqueue("high".into(), None, Priority::High);
        let next = q.on_task_finished(&"a".to_string());
        assert_eq!(next, Some(Admission::Start { task_id: "high".into(), preempted: false }));
    }

    #[test]
    fn urgent_preempts_lowest_priority_active() {
        let q = Queue::new(1, 0);
        q.enqueue("normal".into(), None, Priority::Normal);
        let admission = q.enqueue("urgent".into(), None, Priority::Urgent);
        assert_eq!(admission, Admission::Preempt { victim: "normal".into(), start: "urgent".into() });
        assert!(q.is_active(&"urgent".to_string()));
        assert!(!q.is_active(&"normal".to_string()));
    }

    #[test]
    fn preempted_task_resumes_rather_than_restarts() {
        let q = Queue::new(1, 0);
        q.enqueue("normal".into(), None, Priority::Normal);
        q.enqueue("urgent".into(), None, Priority::Urgent);
        let next = q.on_task_finished(&"urgent".to_string());
        assert_eq!(next, Some(Admission::Start { task_id: "normal".into(), preempted: true }));
    }

    #[test]
    fn all_urgent_active_means_newcomer_waits() {
        let q = Queue::new(1, 0);
        q.enqueue("u1".into(), None, Priority::Urgent);
        assert_eq!(q.enqueue("u2".into(), None, Priority::Urgent), Admission::Wait);
    }

    #[test]
    fn preempted_victim_is_promoted_ahead_of_later_same_priority_waiters() {
        let q = Queue::new(1, 0);
        q.enqueue("normal".into(), None, Priority::Normal);
        // Preempts "normal" into the waiting list.
        q.enqueue("urgent".into(), None, Priority::Urgent);
        // Arrives after the preemption, same priority band as the victim.
        q.enqueue("late".into(), None, Priority::Normal);

        let next = q.on_task_finished(&"urgent".to_string());
        assert_eq!(next, Some(Admission::Start { task_id: "normal".into(), preempted: true }));
    }
}
