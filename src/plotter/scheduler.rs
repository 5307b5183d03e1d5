use crate::error::PlotterError;

/// One computed batch waiting for a writer: which device holds the data,
/// which file it belongs to, and where in that file it starts.
///
/// `start_offset` counts nonces from the file's own start, so it compares
/// directly with the context's `written` counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingTask {
    pub device: usize,
    pub context: usize,
    pub start_offset: u64,
    pub work_size: usize,
}

#[derive(Debug)]
pub(crate) struct ContextProgress {
    pub total: u64,
    pub distributed: u64,
    pub written: u64,
    pub available: bool,
}

impl ContextProgress {
    fn pending(&self) -> u64 {
        self.distributed - self.written
    }
}

/// Everything the pipeline shares, guarded by the one job mutex.
///
/// `active` holds indices of contexts that still have undistributed nonces;
/// a context leaves it in the same critical section that hands out its last
/// nonce. `pending` is unordered; writers pick by readiness, not position.
#[derive(Debug)]
pub(crate) struct JobState {
    pub fatal: Option<PlotterError>,
    pub active: Vec<usize>,
    pub pending: Vec<PendingTask>,
    /// Batches dispatched to a device but not yet enqueued as tasks. A
    /// context whose last nonces are on the GPU is in neither `active` nor
    /// `pending`; without this count the job would look finished while the
    /// final batch is still being computed.
    pub in_flight: usize,
    pub device_available: Vec<bool>,
    pub contexts: Vec<ContextProgress>,
}

impl JobState {
    pub fn new(devices: usize, totals: &[u64]) -> Self {
        Self {
            fatal: None,
            active: (0..totals.len()).collect(),
            pending: Vec::new(),
            in_flight: 0,
            device_available: vec![true; devices],
            contexts: totals
                .iter()
                .map(|&total| ContextProgress {
                    total,
                    distributed: 0,
                    written: 0,
                    available: true,
                })
                .collect(),
        }
    }

    /// Terminal state: nothing left to distribute, compute or write.
    pub fn finished(&self) -> bool {
        self.active.is_empty() && self.pending.is_empty() && self.in_flight == 0
    }

    /// First failure wins; in-flight batches are dropped so every worker
    /// unwinds on its next wakeup.
    pub fn record_fatal(&mut self, err: PlotterError) {
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
        self.pending.clear();
    }

    /// Picks the context with the smallest writer backlog, so compute keeps
    /// feeding the files whose writers are keeping up. Ties go to the least
    /// distributed context, which guarantees fresh files get started.
    pub fn select_context(&self) -> Option<usize> {
        self.active.iter().copied().min_by_key(|&idx| {
            let ctx = &self.contexts[idx];
            (ctx.pending(), ctx.distributed)
        })
    }

    /// Reserves up to `preferred` nonces on `ctx`, retiring it from the
    /// active set once its last nonce is handed out. Returns the batch's
    /// start offset and size.
    pub fn request_work(&mut self, ctx: usize, preferred: usize) -> (u64, usize) {
        let progress = &mut self.contexts[ctx];
        let work = (progress.total - progress.distributed).min(preferred as u64) as usize;
        let start = progress.distributed;
        progress.distributed += work as u64;
        if progress.distributed == progress.total {
            self.active.retain(|&idx| idx != ctx);
        }
        (start, work)
    }

    pub fn append_work(&mut self, ctx: usize, work: usize) {
        self.contexts[ctx].written += work as u64;
    }

    /// Claims a task that is next in file order for a free context, if any.
    /// The claimed context is marked unavailable in the same step.
    pub fn take_ready_task(&mut self) -> Option<PendingTask> {
        let pos = self.pending.iter().position(|task| {
            let ctx = &self.contexts[task.context];
            ctx.available && ctx.written == task.start_offset
        })?;
        let task = self.pending.swap_remove(pos);
        self.contexts[task.context].available = false;
        Some(task)
    }

    pub fn written_total(&self) -> u64 {
        self.contexts.iter().map(|ctx| ctx.written).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_lowest_pending_then_lowest_distributed() {
        let mut state = JobState::new(1, &[100, 100, 100]);
        state.contexts[0].distributed = 50;
        state.contexts[0].written = 20;
        state.contexts[1].distributed = 40;
        state.contexts[1].written = 30;
        state.contexts[2].distributed = 10;
        state.contexts[2].written = 0;

        // pending: 30, 10, 10 -> tie between 1 and 2, lower distributed wins
        assert_eq!(state.select_context(), Some(2));

        state.contexts[2].written = 10;
        // pending: 30, 10, 0
        assert_eq!(state.select_context(), Some(2));
    }

    #[test]
    fn request_work_clamps_to_remaining_and_retires_context() {
        let mut state = JobState::new(1, &[10]);
        assert_eq!(state.request_work(0, 8), (0, 8));
        assert_eq!(state.active, vec![0]);

        // tail batch smaller than the preferred size
        assert_eq!(state.request_work(0, 8), (8, 2));
        assert!(state.active.is_empty());
        assert_eq!(state.contexts[0].distributed, 10);
    }

    #[test]
    fn ready_task_respects_file_order_over_queue_order() {
        let mut state = JobState::new(2, &[16]);
        state.contexts[0].distributed = 16;
        state.active.clear();
        state.pending = vec![
            PendingTask {
                device: 0,
                context: 0,
                start_offset: 8,
                work_size: 8,
            },
            PendingTask {
                device: 1,
                context: 0,
                start_offset: 0,
                work_size: 8,
            },
        ];

        let first = state.take_ready_task().unwrap();
        assert_eq!(first.start_offset, 0);
        assert!(!state.contexts[0].available);

        // second batch is in order now, but the context is still held
        assert!(state.take_ready_task().is_none());

        state.append_work(0, first.work_size);
        state.contexts[0].available = true;
        let second = state.take_ready_task().unwrap();
        assert_eq!(second.start_offset, 8);
        assert!(state.pending.is_empty());
    }

    #[test]
    fn ready_tasks_for_distinct_files_are_independent() {
        let mut state = JobState::new(2, &[8, 8]);
        state.pending = vec![
            PendingTask {
                device: 0,
                context: 0,
                start_offset: 0,
                work_size: 8,
            },
            PendingTask {
                device: 1,
                context: 1,
                start_offset: 0,
                work_size: 8,
            },
        ];

        let first = state.take_ready_task().unwrap();
        let second = state.take_ready_task().unwrap();
        assert_ne!(first.context, second.context);
    }

    #[test]
    fn job_is_not_finished_while_a_batch_is_on_a_device() {
        let mut state = JobState::new(1, &[8]);
        assert!(!state.finished());

        // last nonces handed to the device: neither active nor pending
        state.request_work(0, 8);
        state.in_flight += 1;
        assert!(state.active.is_empty());
        assert!(!state.finished());

        state.in_flight -= 1;
        state.pending.push(PendingTask {
            device: 0,
            context: 0,
            start_offset: 0,
            work_size: 8,
        });
        assert!(!state.finished());

        let task = state.take_ready_task().unwrap();
        state.append_work(0, task.work_size);
        assert!(state.finished());
    }

    #[test]
    fn first_fatal_wins_and_clears_the_queue() {
        let mut state = JobState::new(1, &[8]);
        state.pending.push(PendingTask {
            device: 0,
            context: 0,
            start_offset: 0,
            work_size: 8,
        });

        state.record_fatal(PlotterError::Interrupted);
        state.record_fatal(PlotterError::Config("late".into()));

        assert!(state.pending.is_empty());
        assert!(matches!(state.fatal, Some(PlotterError::Interrupted)));
    }
}
