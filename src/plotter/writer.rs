use burst_plot_spec::{stagger_scoop_offset, PLOT_SIZE, SCOOPS_PER_PLOT, SCOOP_SIZE};

use crate::backend::{DeviceError, PlotEngine};
use crate::error::{PlotterError, Result};

use super::{lock, ContextIo, GenerationJob, JobEvent};

/// Writer worker: claims batches that are next in file order, drains the
/// device, transposes into the file's stagger buffer and flushes completed
/// staggers.
pub(super) fn writer_loop(job: &GenerationJob) {
    let mut scratch = vec![0u8; PLOT_SIZE];
    let mut drain = vec![0u8; job.max_device_batch_bytes()];

    loop {
        let Some(task) = job.claim_ready_task() else {
            return;
        };

        let batch = &mut drain[..task.work_size * PLOT_SIZE];
        let drained = {
            let mut engine = lock(&job.devices[task.device].engine);
            drain_device(engine.as_mut(), &mut scratch, batch, task.work_size)
        };
        if let Err(err) = drained {
            job.fail(PlotterError::Device(err));
            return;
        }
        // The drain is a plain memcpy; the transpose below is the slow part.
        // Handing the device back first keeps it computing meanwhile.
        job.release_device(task.device);

        let context = &job.contexts[task.context];
        let transposed = {
            let mut io = lock(&context.io);
            transpose_batch(&mut io, context.spec.stagger, task.start_offset, batch)
        };
        if let Err(err) = transposed {
            job.fail(err);
            return;
        }

        if job.finish_batch(&task) {
            if let Err(err) = lock(&context.io).sink.flush() {
                job.fail(err);
                return;
            }
            job.emit(JobEvent::FileCompleted {
                context: task.context,
            });
        }
    }
}

fn drain_device(
    engine: &mut dyn PlotEngine,
    scratch: &mut [u8],
    batch: &mut [u8],
    work_size: usize,
) -> std::result::Result<(), DeviceError> {
    for plot in 0..work_size {
        engine.read_plots(scratch, plot, 1)?;
        batch[plot * PLOT_SIZE..(plot + 1) * PLOT_SIZE].copy_from_slice(scratch);
    }
    Ok(())
}

/// Scoop-interleaves `batch` into the context's stagger buffer, appending the
/// buffer to the sink every time a stagger fills up.
///
/// `start_offset` must equal the context's written counter; a stagger left
/// half-filled by one batch is completed in place by the next.
pub(super) fn transpose_batch(
    io: &mut ContextIo,
    stagger: u64,
    start_offset: u64,
    batch: &[u8],
) -> Result<()> {
    let ContextIo { sink, buffer } = io;
    for (index, plot) in batch.chunks_exact(PLOT_SIZE).enumerate() {
        let nonce = start_offset + index as u64;
        for scoop in 0..SCOOPS_PER_PLOT {
            let dst = stagger_scoop_offset(nonce, scoop, stagger);
            buffer[dst..dst + SCOOP_SIZE]
                .copy_from_slice(&plot[scoop * SCOOP_SIZE..(scoop + 1) * SCOOP_SIZE]);
        }
        if nonce % stagger == stagger - 1 {
            sink.append(buffer)?;
        }
    }
    Ok(())
}
