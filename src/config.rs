use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::backend::DeviceEntry;
use crate::error::{PlotterError, Result};

pub const DEFAULT_DEVICES_FILE: &str = "devices.json";

#[derive(Debug, Parser)]
#[command(
    name = "burstplot",
    version,
    about = "GPU plot generator for Burst-style proof-of-capacity files"
)]
pub struct Cli {
    /// Device configuration file
    #[arg(long, value_name = "PATH", default_value = DEFAULT_DEVICES_FILE)]
    pub devices_file: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate plot files on the configured devices
    Generate {
        /// Writer buffers: a positive integer, or `auto` for one per file
        #[arg(long, default_value = "auto", value_name = "N|auto", value_parser = parse_buffer_count)]
        buffers: BufferCount,

        /// Output files named <address>_<startNonce>_<noncesNumber>_<staggerSize>
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },
    /// List OpenCL platforms and devices
    Devices,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferCount {
    Auto,
    Fixed(NonZeroUsize),
}

impl BufferCount {
    pub fn resolve(self, files: usize) -> usize {
        match self {
            BufferCount::Auto => files.max(1),
            BufferCount::Fixed(count) => count.get(),
        }
    }
}

fn parse_buffer_count(raw: &str) -> std::result::Result<BufferCount, String> {
    match raw {
        "auto" => Ok(BufferCount::Auto),
        // `none` was reserved by the historical generator for a direct-write
        // mode that never shipped; refusing beats guessing its semantics.
        "none" => Err("`none` (unbuffered direct writes) is not supported".into()),
        other => other
            .parse::<NonZeroUsize>()
            .map(BufferCount::Fixed)
            .map_err(|_| format!("expected a positive integer or `auto`, got {other:?}")),
    }
}

pub fn load_device_entries(path: &Path) -> Result<Vec<DeviceEntry>> {
    let raw = fs::read_to_string(path)
        .map_err(|err| PlotterError::Config(format!("cannot read {}: {err}", path.display())))?;
    let entries: Vec<DeviceEntry> = serde_json::from_str(&raw)
        .map_err(|err| PlotterError::Config(format!("{}: {err}", path.display())))?;
    if entries.is_empty() {
        return Err(PlotterError::Config(format!(
            "{}: no devices configured",
            path.display()
        )));
    }
    Ok(entries)
}
