#[derive(Debug, Clone)]
struct Slot<T> {
    task: T,
    interval_ms: u64,
    last_run_ms: Option<u64>,
}

/// Cooperative round-robin scheduler over fixed-interval tasks.
///
/// A task that has never run is due immediately. When a task runs its
/// last-run mark moves to the current time, so a stalled loop does not
/// replay missed intervals.
#[derive(Debug, Clone)]
pub struct IntervalScheduler<T> {
    slots: Vec<Slot<T>>,
}

impl<T> Default for IntervalScheduler<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T: Copy + PartialEq> IntervalScheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: T, interval_ms: u64) -> Self {
        self.add(task, interval_ms);
        self
    }

    pub fn add(&mut self, task: T, interval_ms: u64) {
        self.slots.push(Slot {
            task,
            interval_ms,
            last_run_ms: None,
        });
    }

    /// Returns due tasks in registration order and marks them as run.
    pub fn due(&mut self, now_ms: u64) -> Vec<T> {
        let mut due = Vec::new();
        for slot in &mut self.slots {
            let ready = slot
                .last_run_ms
                .map(|last| now_ms.saturating_sub(last) >= slot.interval_ms)
                .unwrap_or(true);
            if ready {
                slot.last_run_ms = Some(now_ms);
                due.push(slot.task);
            }
        }
        due
    }

    pub fn last_run_ms(&self, task: T) -> Option<u64> {
        self.slots
            .iter()
            .find(|slot| slot.task == task)
            .and_then(|slot| slot.last_run_ms)
    }

    /// Milliseconds until the earliest task becomes due; zero if one already is.
    pub fn until_next_due_ms(&self, now_ms: u64) -> Option<u64> {
        self.slots
            .iter()
            .map(|slot| match slot.last_run_ms {
                Some(last) => slot
                    .interval_ms
                    .saturating_sub(now_ms.saturating_sub(last)),
                None => 0,
            })
            .min()
    }
}
