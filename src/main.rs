use std::path::{Path, PathBuf};
use std::process;
#[cfg(feature = "opencl")]
use std::sync::Arc;

#[cfg(not(feature = "opencl"))]
use anyhow::bail;
#[cfg(feature = "opencl")]
use anyhow::Context;
use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;

#[cfg(feature = "opencl")]
use burst_plot_spec::{PlotFileSpec, PLOT_SIZE};
use burstplot::config::{BufferCount, Cli, Command};
#[cfg(feature = "opencl")]
use burstplot::error::PlotterError;
use burstplot::plotter::ui;
#[cfg(feature = "opencl")]
use burstplot::plotter::GenerationJob;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            return;
        }
        Err(err) => {
            let _ = err.print();
            process::exit(-1);
        }
    };

    if let Err(err) = run(cli) {
        ui::error("FATAL", format!("{err:#}"));
        process::exit(-1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Devices => list_devices(),
        Command::Generate { buffers, files } => generate(&cli.devices_file, buffers, &files),
    }
}

#[cfg(feature = "opencl")]
fn list_devices() -> Result<()> {
    burstplot::backend::opencl::print_devices().context("listing OpenCL devices")?;
    Ok(())
}

#[cfg(feature = "opencl")]
fn generate(devices_file: &Path, buffers: BufferCount, files: &[PathBuf]) -> Result<()> {
    let entries = burstplot::config::load_device_entries(devices_file)?;
    let devices = burstplot::backend::opencl::open_configured_devices(&entries)?;
    let device_count = devices.len();

    let mut specs = Vec::with_capacity(files.len());
    for path in files {
        let spec = PlotFileSpec::from_path(path).map_err(PlotterError::from)?;
        ui::info(
            "PLOT",
            format!(
                "{}: nonces {} to {} ({})",
                path.display(),
                spec.start_nonce,
                spec.end_nonce(),
                ui::format_mib(spec.file_bytes() >> 20)
            ),
        );
        specs.push(spec);
    }

    let writers = buffers.resolve(specs.len());
    let file_count = specs.len();
    let (job, events) = GenerationJob::new(devices, specs)?;
    let job = Arc::new(job);

    let host_memory =
        (job.max_device_batch_bytes() + job.max_stagger_bytes() + PLOT_SIZE) * writers;
    ui::startup_banner(
        "burstplot - GPU plot generator",
        &[
            ("Devices", device_count.to_string()),
            ("Plot files", file_count.to_string()),
            ("Writers", writers.to_string()),
            ("Host memory", ui::format_mib((host_memory >> 20) as u64)),
        ],
    );

    {
        let job = Arc::clone(&job);
        ctrlc::set_handler(move || job.interrupt()).context("installing Ctrl-C handler")?;
    }

    ui::info("PLOT", "generating nonces...");
    job.run(writers, &events)?;

    let progress = job.progress();
    ui::success(
        "PLOT",
        format!(
            "generated {} nonces in {}",
            progress.nonces_written,
            ui::format_duration(progress.elapsed.as_secs())
        ),
    );
    Ok(())
}

#[cfg(not(feature = "opencl"))]
fn list_devices() -> Result<()> {
    bail!("this build has no OpenCL support; rebuild with `--features opencl`");
}

#[cfg(not(feature = "opencl"))]
fn generate(_devices_file: &Path, _buffers: BufferCount, _files: &[PathBuf]) -> Result<()> {
    bail!("this build has no OpenCL support; rebuild with `--features opencl`");
}
