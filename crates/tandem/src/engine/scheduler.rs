use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Probe,
    Prediction,
}

/// Handle to one scheduled task. A handle is never reused: rescheduling the
/// same kind yields a new handle, and the old one stays cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    kind: TaskKind,
    id: u64,
}

impl TaskHandle {
    pub fn kind(&self) -> TaskKind {
        self.kind
    }
}

#[derive(Debug)]
struct ScheduledTask {
    handle: TaskHandle,
    interval: Duration,
    next_fire: Instant,
}

/// Fixed-interval task table driven by an external clock.
///
/// The scheduler never sleeps on its own. The owner waits until
/// [`next_deadline`](Self::next_deadline) and then drains [`pop_due`](Self::pop_due),
/// running each task before asking for the next one. Cancelling removes the
/// entry right away, so a task cancelled by an earlier task in the same drain
/// is never returned.
#[derive(Debug, Default)]
pub struct PeriodicScheduler {
    tasks: Vec<ScheduledTask>,
    next_id: u64,
}

impl PeriodicScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, kind: TaskKind, interval: Duration, now: Instant) -> TaskHandle {
        let handle = TaskHandle {
            kind,
            id: self.next_id,
        };
        self.next_id = self.next_id.wrapping_add(1);

        let interval = interval.max(Duration::from_millis(1));
        self.tasks.push(ScheduledTask {
            handle,
            interval,
            next_fire: now + interval,
        });

        handle
    }

    /// Returns `true` if the handle was still scheduled.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.handle != handle);
        self.tasks.len() != before
    }

    pub fn is_scheduled(&self, handle: TaskHandle) -> bool {
        self.tasks.iter().any(|task| task.handle == handle)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.iter().map(|task| task.next_fire).min()
    }

    /// Takes the earliest task due at `now` and moves its next firing past `now`.
    /// Firings missed while the owner was busy are skipped rather than replayed.
    pub fn pop_due(&mut self, now: Instant) -> Option<TaskHandle> {
        let task = self
            .tasks
            .iter_mut()
            .filter(|task| task.next_fire <= now)
            .min_by_key(|task| task.next_fire)?;

        task.next_fire += task.interval;
        if task.next_fire <= now {
            let behind = now.duration_since(task.next_fire);
            let skipped = behind.as_nanos() / task.interval.as_nanos() + 1;
            task.next_fire += task.interval * skipped as u32;
        }

        Some(task.handle)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}
