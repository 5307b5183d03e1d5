//! OpenCL execution engine behind the `PlotEngine` port.
//!
//! NOTE: `ocl::Kernel` contains raw pointers and is not Sync; engines are
//! driven through the scheduler's per-device exclusion, never concurrently.

use std::fs;

use burst_plot_spec::{HASHES_PER_PLOT, PLOT_SIZE};
use ocl::core::{DeviceInfo, DeviceInfoResult};
use ocl::flags::DeviceType;
use ocl::{Buffer, Context, Device, Kernel, Platform, Program, Queue};

use crate::backend::{
    DeviceEntry, DeviceError, DeviceLimits, DeviceSpec, GenerationDevice, PlotEngine,
};
use crate::error::{PlotterError, Result};
use crate::plotter::ui;

/// Kernels are deployment artifacts shipped next to the executable, loaded
/// and compiled at startup.
const KERNEL_FILE: &str = "kernels/nonce.cl";
const KERNEL_NAME: &str = "generate_nonces";

fn device_error(err: ocl::Error) -> DeviceError {
    let code = err.api_status().map(|status| status as i64).unwrap_or(-1);
    DeviceError::new(code, err.to_string())
}

fn device_limits(device: &Device) -> Result<DeviceLimits> {
    let max_work_group_size = match device
        .info(DeviceInfo::MaxWorkGroupSize)
        .map_err(|err| PlotterError::Device(device_error(err)))?
    {
        DeviceInfoResult::MaxWorkGroupSize(size) => size,
        _ => 1,
    };
    Ok(DeviceLimits {
        max_work_group_size,
    })
}

/// Prints every platform and GPU device with the ids expected by the
/// devices file.
pub fn print_devices() -> Result<()> {
    let platforms = Platform::list();
    if platforms.is_empty() {
        return Err(PlotterError::Config("no OpenCL platform found".into()));
    }
    for (platform_id, platform) in platforms.iter().enumerate() {
        let name = platform
            .name()
            .map_err(|err| PlotterError::Device(device_error(err)))?;
        ui::info("OPENCL", format!("platform {platform_id}: {name}"));

        let devices = Device::list(*platform, Some(DeviceType::GPU))
            .map_err(|err| PlotterError::Device(device_error(err)))?;
        for (device_id, device) in devices.iter().enumerate() {
            let device_name = device
                .name()
                .map_err(|err| PlotterError::Device(device_error(err)))?;
            let limits = device_limits(device)?;
            ui::info(
                "OPENCL",
                format!(
                    "  device {device_id}: {device_name} (max work group size {})",
                    limits.max_work_group_size
                ),
            );
        }
    }
    Ok(())
}

/// Builds one `GenerationDevice` per usable config entry.
///
/// Entries naming a platform or device that does not exist are dropped with
/// a warning so a partial fleet still runs; nothing usable at all is fatal.
pub fn open_configured_devices(entries: &[DeviceEntry]) -> Result<Vec<GenerationDevice>> {
    let kernel_src = fs::read_to_string(KERNEL_FILE).map_err(|err| {
        PlotterError::Config(format!("cannot read kernel source {KERNEL_FILE}: {err}"))
    })?;

    let platforms = Platform::list();
    let mut devices = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let Some(platform) = platforms.get(entry.platform) else {
            ui::warn(
                "CONFIG",
                format!(
                    "entry {index}: no platform with id {}, ignoring device",
                    entry.platform
                ),
            );
            continue;
        };
        let listed = Device::list(*platform, Some(DeviceType::GPU))
            .map_err(|err| PlotterError::Device(device_error(err)))?;
        let Some(device) = listed.get(entry.device).copied() else {
            ui::warn(
                "CONFIG",
                format!(
                    "entry {index}: no device with id {} on platform {}, ignoring device",
                    entry.device, entry.platform
                ),
            );
            continue;
        };

        let spec = entry.normalize(&device_limits(&device)?);
        let engine =
            OclEngine::create(*platform, device, &spec, &kernel_src).map_err(PlotterError::Device)?;
        ui::info(
            "DEVICE",
            format!(
                "[{index}] {}, batch {} nonces, device memory {}",
                engine.name,
                spec.global_work_size,
                ui::format_mib((spec.buffer_bytes() >> 20) as u64)
            ),
        );
        devices.push(GenerationDevice::new(spec, Box::new(engine)));
    }

    if devices.is_empty() {
        return Err(PlotterError::Config(
            "no properly configured device found".into(),
        ));
    }
    Ok(devices)
}

struct OclEngine {
    name: String,
    queue: Queue,
    kernel: Kernel,
    buffer: Buffer<u8>,
    global_work_size: usize,
    local_work_size: usize,
    hashes_per_step: usize,
}

impl OclEngine {
    fn create(
        platform: Platform,
        device: Device,
        spec: &DeviceSpec,
        kernel_src: &str,
    ) -> std::result::Result<Self, DeviceError> {
        let context = Context::builder()
            .platform(platform)
            .devices(device)
            .build()
            .map_err(device_error)?;
        let queue = Queue::new(&context, device, None).map_err(device_error)?;
        let program = Program::builder()
            .src(kernel_src)
            .devices(device)
            .build(&context)
            .map_err(device_error)?;
        let buffer = Buffer::<u8>::builder()
            .queue(queue.clone())
            .len(spec.buffer_bytes())
            .build()
            .map_err(device_error)?;
        let kernel = Kernel::builder()
            .program(&program)
            .name(KERNEL_NAME)
            .queue(queue.clone())
            .arg(&buffer)
            .arg(0u64) // account address
            .arg(0u64) // first nonce of the batch
            .arg(0u32) // first hash of this step
            .arg(0u32) // hashes in this step
            .build()
            .map_err(device_error)?;
        let name = device.name().map_err(device_error)?;

        Ok(Self {
            name,
            queue,
            kernel,
            buffer,
            global_work_size: spec.global_work_size,
            local_work_size: spec.local_work_size,
            hashes_per_step: spec.hashes_per_step,
        })
    }

    /// A tail batch is padded up to the local work size for the launch; the
    /// device buffer covers the padding and the surplus plots are never read
    /// back.
    fn launch_size(&self, count: usize) -> usize {
        (count.div_ceil(self.local_work_size) * self.local_work_size).min(self.global_work_size)
    }
}

impl PlotEngine for OclEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute_plots(
        &mut self,
        account_id: u64,
        start_nonce: u64,
        count: usize,
    ) -> std::result::Result<(), DeviceError> {
        let global = self.launch_size(count);
        self.kernel.set_arg(1, account_id).map_err(device_error)?;
        self.kernel.set_arg(2, start_nonce).map_err(device_error)?;

        let mut first_hash = 0;
        while first_hash < HASHES_PER_PLOT {
            let step = self.hashes_per_step.min(HASHES_PER_PLOT - first_hash);
            self.kernel
                .set_arg(3, first_hash as u32)
                .map_err(device_error)?;
            self.kernel.set_arg(4, step as u32).map_err(device_error)?;
            unsafe {
                self.kernel
                    .cmd()
                    .global_work_size(global)
                    .local_work_size(self.local_work_size)
                    .enq()
                    .map_err(device_error)?;
            }
            first_hash += step;
        }
        self.queue.finish().map_err(device_error)
    }

    fn read_plots(
        &mut self,
        out: &mut [u8],
        plot_offset: usize,
        count: usize,
    ) -> std::result::Result<(), DeviceError> {
        self.buffer
            .read(&mut out[..count * PLOT_SIZE])
            .offset(plot_offset * PLOT_SIZE)
            .enq()
            .map_err(device_error)
    }
}
