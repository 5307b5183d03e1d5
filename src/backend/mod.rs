use std::sync::Mutex;

use burst_plot_spec::{HASHES_PER_PLOT, PLOT_SIZE};
use serde::Deserialize;
use thiserror::Error;

#[cfg(feature = "opencl")]
pub mod opencl;

/// GPU failure, carrying the backend's numeric status code.
#[derive(Debug, Error)]
#[error("device error {code}: {message}")]
pub struct DeviceError {
    pub code: i64,
    pub message: String,
}

impl DeviceError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// One record of the devices configuration file, as written by the user.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub platform: usize,
    pub device: usize,
    pub global_work_size: usize,
    pub local_work_size: usize,
    pub hashes_per_step: usize,
}

/// Limits reported by device enumeration, used to normalize entries.
#[derive(Debug, Clone, Copy)]
pub struct DeviceLimits {
    pub max_work_group_size: usize,
}

/// A normalized, immutable launch configuration for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub platform: usize,
    pub device: usize,
    pub global_work_size: usize,
    pub local_work_size: usize,
    pub hashes_per_step: usize,
}

impl DeviceEntry {
    /// Clamps the entry to what the device can actually run: local work size
    /// within the device's group limit, global work size a positive multiple
    /// of it, hash step within one plot.
    pub fn normalize(&self, limits: &DeviceLimits) -> DeviceSpec {
        let local = self.local_work_size.clamp(1, limits.max_work_group_size.max(1));
        let global = (self.global_work_size - self.global_work_size % local).max(local);
        DeviceSpec {
            platform: self.platform,
            device: self.device,
            global_work_size: global,
            local_work_size: local,
            hashes_per_step: self.hashes_per_step.clamp(1, HASHES_PER_PLOT),
        }
    }
}

impl DeviceSpec {
    /// Device-side plot buffer size for a full batch.
    pub fn buffer_bytes(&self) -> usize {
        self.global_work_size * PLOT_SIZE
    }
}

/// Port between the generation pipeline and a device-side plot computer.
///
/// A batch lives in device memory between `compute_plots` and `read_plots`;
/// the scheduler guarantees the two are never in flight at the same time for
/// one device.
pub trait PlotEngine: Send {
    fn name(&self) -> &str;

    /// Computes `count` consecutive plots starting at `start_nonce` into the
    /// device buffer. Blocks until the device is done.
    fn compute_plots(
        &mut self,
        account_id: u64,
        start_nonce: u64,
        count: usize,
    ) -> Result<(), DeviceError>;

    /// Copies `count` plots out of the device buffer, starting at plot index
    /// `plot_offset` of the last computed batch.
    fn read_plots(
        &mut self,
        out: &mut [u8],
        plot_offset: usize,
        count: usize,
    ) -> Result<(), DeviceError>;
}

/// One GPU worker: a normalized launch config plus its engine.
///
/// The engine lock is never contended in steady state; the scheduler's
/// availability flag admits one user at a time.
pub struct GenerationDevice {
    pub spec: DeviceSpec,
    pub engine: Mutex<Box<dyn PlotEngine>>,
}

impl GenerationDevice {
    pub fn new(spec: DeviceSpec, engine: Box<dyn PlotEngine>) -> Self {
        Self {
            spec,
            engine: Mutex::new(engine),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(global: usize, local: usize, hashes: usize) -> DeviceEntry {
        DeviceEntry {
            platform: 0,
            device: 0,
            global_work_size: global,
            local_work_size: local,
            hashes_per_step: hashes,
        }
    }

    #[test]
    fn normalize_rounds_global_down_to_local_multiple() {
        let limits = DeviceLimits {
            max_work_group_size: 256,
        };
        let spec = entry(1000, 64, 256).normalize(&limits);
        assert_eq!(spec.local_work_size, 64);
        assert_eq!(spec.global_work_size, 960);
    }

    #[test]
    fn normalize_clamps_local_to_device_limit() {
        let limits = DeviceLimits {
            max_work_group_size: 128,
        };
        let spec = entry(4096, 512, 256).normalize(&limits);
        assert_eq!(spec.local_work_size, 128);
        assert_eq!(spec.global_work_size, 4096);
    }

    #[test]
    fn normalize_keeps_global_positive() {
        let limits = DeviceLimits {
            max_work_group_size: 256,
        };
        let spec = entry(3, 8, 0).normalize(&limits);
        assert_eq!(spec.global_work_size, 8);
        assert_eq!(spec.hashes_per_step, 1);

        let spec = entry(64, 8, 100_000).normalize(&limits);
        assert_eq!(spec.hashes_per_step, HASHES_PER_PLOT);
    }
}
