pub mod ui;

mod scheduler;
mod sink;
mod writer;

use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use burst_plot_spec::{PlotFileSpec, PLOT_SIZE};
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::backend::GenerationDevice;
use crate::error::{PlotterError, Result};
use scheduler::{JobState, PendingTask};
use sink::PlotSink;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum JobEvent {
    FileCompleted { context: usize },
    DeviceFault { device: usize, message: String },
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub nonces_written: u64,
    pub nonces_total: u64,
    pub elapsed: Duration,
}

pub(crate) struct ContextIo {
    pub sink: PlotSink,
    pub buffer: Vec<u8>,
}

/// Per-file state. Counters live in the shared `JobState`; the sink and the
/// stagger buffer are borrowed by one writer at a time under the context's
/// availability flag.
pub(crate) struct PlotContext {
    pub spec: PlotFileSpec,
    pub io: Mutex<ContextIo>,
}

/// A plotting job: fixed sets of devices and output files, one shared mutex
/// and condition variable coordinating compute workers, writer workers and
/// the progress loop.
pub struct GenerationJob {
    pub(crate) devices: Vec<GenerationDevice>,
    pub(crate) contexts: Vec<PlotContext>,
    state: Mutex<JobState>,
    wake: Condvar,
    events: Sender<JobEvent>,
    nonces_total: u64,
    started_at: Instant,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl GenerationJob {
    /// Opens every sink and sizes every stagger buffer up front, before any
    /// thread exists.
    pub fn new(
        devices: Vec<GenerationDevice>,
        specs: Vec<PlotFileSpec>,
    ) -> Result<(Self, Receiver<JobEvent>)> {
        if devices.is_empty() {
            return Err(PlotterError::Config("no usable device configured".into()));
        }
        if specs.is_empty() {
            return Err(PlotterError::Config("no output file given".into()));
        }

        let contexts = specs
            .into_iter()
            .map(|spec| {
                let sink = PlotSink::create(&spec.path)?;
                let buffer = vec![0u8; spec.stagger_bytes()];
                Ok(PlotContext {
                    spec,
                    io: Mutex::new(ContextIo { sink, buffer }),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let totals: Vec<u64> = contexts.iter().map(|ctx| ctx.spec.nonces).collect();
        let (events, receiver) = unbounded();
        let job = Self {
            state: Mutex::new(JobState::new(devices.len(), &totals)),
            devices,
            contexts,
            wake: Condvar::new(),
            events,
            nonces_total: totals.iter().sum(),
            started_at: Instant::now(),
        };
        Ok((job, receiver))
    }

    /// Runs the job to completion: one compute thread per device, `writers`
    /// writer threads, the progress loop on the calling thread. Re-raises
    /// the first fatal error after all workers have exited.
    pub fn run(&self, writers: usize, events: &Receiver<JobEvent>) -> Result<()> {
        thread::scope(|scope| {
            for device in 0..self.devices.len() {
                thread::Builder::new()
                    .name(format!("plot-gpu-{device}"))
                    .spawn_scoped(scope, move || self.compute_loop(device))
                    .expect("compute worker should spawn");
            }
            for writer in 0..writers.max(1) {
                thread::Builder::new()
                    .name(format!("plot-writer-{writer}"))
                    .spawn_scoped(scope, move || writer::writer_loop(self))
                    .expect("writer worker should spawn");
            }

            self.progress_loop(events);
        });

        for event in events.try_iter() {
            self.log_event(event);
        }

        match lock(&self.state).fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            nonces_written: lock(&self.state).written_total(),
            nonces_total: self.nonces_total,
            elapsed: self.started_at.elapsed(),
        }
    }

    /// Cooperative cancellation, e.g. from a Ctrl-C handler.
    pub fn interrupt(&self) {
        self.fail(PlotterError::Interrupted);
    }

    pub fn max_device_batch_bytes(&self) -> usize {
        self.devices
            .iter()
            .map(|device| device.spec.buffer_bytes())
            .max()
            .unwrap_or(PLOT_SIZE)
    }

    pub fn max_stagger_bytes(&self) -> usize {
        self.contexts
            .iter()
            .map(|ctx| ctx.spec.stagger_bytes())
            .max()
            .unwrap_or(PLOT_SIZE)
    }

    fn compute_loop(&self, device_idx: usize) {
        loop {
            let Some((context_idx, start_offset, work_size)) = self.claim_assignment(device_idx)
            else {
                return;
            };

            let spec = &self.contexts[context_idx].spec;
            let computed = {
                let mut engine = lock(&self.devices[device_idx].engine);
                engine.compute_plots(
                    spec.account_id,
                    spec.start_nonce + start_offset,
                    work_size,
                )
            };

            match computed {
                Ok(()) => {
                    let mut state = lock(&self.state);
                    state.in_flight -= 1;
                    state.pending.push(PendingTask {
                        device: device_idx,
                        context: context_idx,
                        start_offset,
                        work_size,
                    });
                    self.wake.notify_all();
                }
                Err(err) => {
                    self.emit(JobEvent::DeviceFault {
                        device: device_idx,
                        message: err.to_string(),
                    });
                    let mut state = lock(&self.state);
                    state.in_flight -= 1;
                    state.record_fatal(PlotterError::Device(err));
                    self.wake.notify_all();
                    return;
                }
            }
        }
    }

    /// Blocks until this device can serve a context with undistributed
    /// nonces; returns `None` on fatal error or when distribution is done.
    fn claim_assignment(&self, device_idx: usize) -> Option<(usize, u64, usize)> {
        let mut state = lock(&self.state);
        loop {
            if state.fatal.is_some() || state.active.is_empty() {
                return None;
            }
            if state.device_available[device_idx] {
                let context = state.select_context()?;
                let (start_offset, work_size) =
                    state.request_work(context, self.devices[device_idx].spec.global_work_size);
                state.device_available[device_idx] = false;
                state.in_flight += 1;
                return Some((context, start_offset, work_size));
            }
            state = self.wake.wait(state).unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Blocks until some pending task is next in file order for a free
    /// context; returns `None` on fatal error or when the job is finished.
    pub(crate) fn claim_ready_task(&self) -> Option<PendingTask> {
        let mut state = lock(&self.state);
        loop {
            if state.fatal.is_some() || state.finished() {
                return None;
            }
            if let Some(task) = state.take_ready_task() {
                return Some(task);
            }
            state = self.wake.wait(state).unwrap_or_else(|p| p.into_inner());
        }
    }

    pub(crate) fn release_device(&self, device: usize) {
        let mut state = lock(&self.state);
        state.device_available[device] = true;
        self.wake.notify_all();
    }

    /// Credits a finished batch to its context and frees the context; true
    /// when the file just received its last nonce.
    pub(crate) fn finish_batch(&self, task: &PendingTask) -> bool {
        let mut state = lock(&self.state);
        state.append_work(task.context, task.work_size);
        state.contexts[task.context].available = true;
        let done = state.contexts[task.context].written == self.contexts[task.context].spec.nonces;
        self.wake.notify_all();
        done
    }

    pub(crate) fn fail(&self, err: PlotterError) {
        let mut state = lock(&self.state);
        state.record_fatal(err);
        self.wake.notify_all();
    }

    pub(crate) fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }

    fn progress_loop(&self, events: &Receiver<JobEvent>) {
        let mut last_render = Instant::now();
        loop {
            for event in events.try_iter() {
                self.log_event(event);
            }

            let state = lock(&self.state);
            if state.fatal.is_some() || state.finished() {
                return;
            }

            if last_render.elapsed() < PROGRESS_INTERVAL {
                let (guard, _) = self
                    .wake
                    .wait_timeout(state, PROGRESS_INTERVAL)
                    .unwrap_or_else(|p| p.into_inner());
                drop(guard);
                continue;
            }

            let written = state.written_total();
            drop(state);
            last_render = Instant::now();
            self.render_progress(written);
        }
    }

    fn render_progress(&self, written: u64) {
        let total = self.nonces_total;
        let elapsed = self.started_at.elapsed().as_secs_f64().max(0.001);
        let percent = 100.0 * written as f64 / total as f64;
        let per_minute = written as f64 * 60.0 / elapsed;
        let eta = if written > 0 {
            ui::format_duration(((total - written) as f64 * elapsed / written as f64) as u64)
        } else {
            "--".to_string()
        };
        ui::info(
            "PLOT",
            format!("{percent:.2}% ({written}/{total} nonces), {per_minute:.2} nonces/min, ETA {eta}"),
        );
    }

    fn log_event(&self, event: JobEvent) {
        match event {
            JobEvent::FileCompleted { context } => {
                let spec = &self.contexts[context].spec;
                ui::success(
                    "PLOT",
                    format!("{} complete ({} nonces)", spec.path.display(), spec.nonces),
                );
            }
            JobEvent::DeviceFault { device, message } => {
                let spec = &self.devices[device].spec;
                ui::error(
                    "DEVICE",
                    format!("platform {} device {}: {message}", spec.platform, spec.device),
                );
            }
        }
    }
}
