//! End-to-end pipeline scenarios driven through a deterministic in-memory
//! engine, checked against a reference scoop-by-scoop layout.

use std::fs;
use std::path::PathBuf;

use burst_plot_spec::{file_scoop_offset, PlotFileSpec, PLOT_SIZE, SCOOPS_PER_PLOT, SCOOP_SIZE};
use burstplot::backend::{DeviceError, DeviceSpec, GenerationDevice, PlotEngine};
use burstplot::config::BufferCount;
use burstplot::error::PlotterError;
use burstplot::plotter::GenerationJob;

/// Deterministic plot filler shared by the mock engine and the reference
/// writer.
fn plot_bytes(account_id: u64, nonce: u64) -> Vec<u8> {
    let mut plot = vec![0u8; PLOT_SIZE];
    let mut state = account_id ^ nonce.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    for chunk in plot.chunks_exact_mut(8) {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        chunk.copy_from_slice(&state.to_le_bytes());
    }
    plot
}

struct MockEngine {
    buffer: Vec<u8>,
    fail_on_call: Option<usize>,
    calls: usize,
}

impl MockEngine {
    fn new(batch: usize) -> Self {
        Self {
            buffer: vec![0u8; batch * PLOT_SIZE],
            fail_on_call: None,
            calls: 0,
        }
    }

    fn failing_after(batch: usize, ok_calls: usize) -> Self {
        Self {
            fail_on_call: Some(ok_calls),
            ..Self::new(batch)
        }
    }
}

impl PlotEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn compute_plots(
        &mut self,
        account_id: u64,
        start_nonce: u64,
        count: usize,
    ) -> Result<(), DeviceError> {
        if self.fail_on_call.is_some_and(|limit| self.calls >= limit) {
            return Err(DeviceError::new(-36, "simulated device failure"));
        }
        self.calls += 1;
        for index in 0..count {
            let plot = plot_bytes(account_id, start_nonce + index as u64);
            self.buffer[index * PLOT_SIZE..(index + 1) * PLOT_SIZE].copy_from_slice(&plot);
        }
        Ok(())
    }

    fn read_plots(
        &mut self,
        out: &mut [u8],
        plot_offset: usize,
        count: usize,
    ) -> Result<(), DeviceError> {
        let bytes = count * PLOT_SIZE;
        out[..bytes]
            .copy_from_slice(&self.buffer[plot_offset * PLOT_SIZE..plot_offset * PLOT_SIZE + bytes]);
        Ok(())
    }
}

fn device_spec(batch: usize) -> DeviceSpec {
    DeviceSpec {
        platform: 0,
        device: 0,
        global_work_size: batch,
        local_work_size: 1,
        hashes_per_step: 8192,
    }
}

fn mock_device(batch: usize) -> GenerationDevice {
    GenerationDevice::new(device_spec(batch), Box::new(MockEngine::new(batch)))
}

/// Expected file image built nonce by nonce at the interleaved offsets.
fn reference_file(spec: &PlotFileSpec) -> Vec<u8> {
    let mut bytes = vec![0u8; spec.file_bytes() as usize];
    for local in 0..spec.nonces {
        let plot = plot_bytes(spec.account_id, spec.start_nonce + local);
        for scoop in 0..SCOOPS_PER_PLOT {
            let dst = file_scoop_offset(local, scoop, spec.stagger) as usize;
            bytes[dst..dst + SCOOP_SIZE]
                .copy_from_slice(&plot[scoop * SCOOP_SIZE..(scoop + 1) * SCOOP_SIZE]);
        }
    }
    bytes
}

fn run_job(
    devices: Vec<GenerationDevice>,
    dir: &tempfile::TempDir,
    names: &[&str],
    writers: usize,
) -> (Result<(), PlotterError>, Vec<PathBuf>) {
    let specs: Vec<PlotFileSpec> = names
        .iter()
        .map(|name| PlotFileSpec::from_path(&dir.path().join(name)).unwrap())
        .collect();
    let paths = specs.iter().map(|spec| spec.path.clone()).collect();
    let (job, events) = GenerationJob::new(devices, specs).unwrap();
    (job.run(writers, &events), paths)
}

#[test]
fn single_device_single_file_matches_reference() {
    let dir = tempfile::tempdir().unwrap();
    let (result, paths) = run_job(vec![mock_device(4)], &dir, &["1_0_8_4"], 1);
    result.unwrap();

    let spec = PlotFileSpec::from_path(&paths[0]).unwrap();
    let bytes = fs::read(&paths[0]).unwrap();
    assert_eq!(bytes.len() as u64, spec.file_bytes());
    assert_eq!(bytes, reference_file(&spec));

    // spot-check the interleaving directly: scoop 0 of nonces 0 and 3 open
    // the first stagger, scoop 1 follows the four scoop-0 slots, nonce 4
    // opens the second stagger group
    let plot0 = plot_bytes(1, 0);
    let plot3 = plot_bytes(1, 3);
    let plot4 = plot_bytes(1, 4);
    assert_eq!(&bytes[0..SCOOP_SIZE], &plot0[0..SCOOP_SIZE]);
    assert_eq!(
        &bytes[3 * SCOOP_SIZE..4 * SCOOP_SIZE],
        &plot3[0..SCOOP_SIZE]
    );
    assert_eq!(
        &bytes[4 * SCOOP_SIZE..5 * SCOOP_SIZE],
        &plot0[SCOOP_SIZE..2 * SCOOP_SIZE]
    );
    assert_eq!(
        &bytes[4 * PLOT_SIZE..4 * PLOT_SIZE + SCOOP_SIZE],
        &plot4[0..SCOOP_SIZE]
    );
}

#[test]
fn two_files_on_one_device_both_complete() {
    let dir = tempfile::tempdir().unwrap();
    let (result, paths) = run_job(
        vec![mock_device(4)],
        &dir,
        &["1_0_4_4", "2_100_4_4"],
        BufferCount::Auto.resolve(2),
    );
    result.unwrap();

    for path in &paths {
        let spec = PlotFileSpec::from_path(path).unwrap();
        assert_eq!(fs::read(path).unwrap(), reference_file(&spec));
    }
}

#[test]
fn two_devices_one_file_write_in_stagger_order() {
    let dir = tempfile::tempdir().unwrap();
    let (result, paths) = run_job(
        vec![mock_device(8), mock_device(8)],
        &dir,
        &["1_0_16_8"],
        1,
    );
    result.unwrap();

    let spec = PlotFileSpec::from_path(&paths[0]).unwrap();
    let two_device_bytes = fs::read(&paths[0]).unwrap();
    assert_eq!(two_device_bytes, reference_file(&spec));

    // same inputs on a single device must produce the identical file
    let single_dir = tempfile::tempdir().unwrap();
    let (result, single_paths) = run_job(vec![mock_device(8)], &single_dir, &["1_0_16_8"], 1);
    result.unwrap();
    assert_eq!(fs::read(&single_paths[0]).unwrap(), two_device_bytes);
}

#[test]
fn tail_batch_smaller_than_device_batch_is_correct() {
    let dir = tempfile::tempdir().unwrap();
    // 10 nonces against a device batch of 4: two full batches and a tail of 2
    let (result, paths) = run_job(vec![mock_device(4)], &dir, &["7_5_10_5"], 1);
    result.unwrap();

    let spec = PlotFileSpec::from_path(&paths[0]).unwrap();
    assert_eq!(fs::read(&paths[0]).unwrap(), reference_file(&spec));
}

#[test]
fn unaligned_stagger_is_rejected_before_any_compute() {
    let dir = tempfile::tempdir().unwrap();
    let err = PlotFileSpec::from_path(&dir.path().join("1_0_10_4")).unwrap_err();
    let err = PlotterError::from(err);
    assert!(matches!(err, PlotterError::InvalidPlotSpec(_)));
    // nothing was created on disk
    assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn device_error_mid_job_aborts_and_leaves_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    let device = GenerationDevice::new(
        device_spec(4),
        Box::new(MockEngine::failing_after(4, 1)),
    );
    let (result, paths) = run_job(vec![device], &dir, &["1_0_16_4"], 1);

    match result.unwrap_err() {
        PlotterError::Device(err) => assert_eq!(err.code, -36),
        other => panic!("unexpected error: {other}"),
    }

    // whatever hit the disk before the fault stays there, whole staggers only
    let spec = PlotFileSpec::from_path(&paths[0]).unwrap();
    let len = fs::metadata(&paths[0]).unwrap().len();
    assert!(len < spec.file_bytes());
    assert_eq!(len % spec.stagger_bytes() as u64, 0);
}

#[test]
fn faulty_device_in_a_two_device_job_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let healthy = mock_device(8);
    let faulty = GenerationDevice::new(device_spec(8), Box::new(MockEngine::failing_after(8, 0)));
    let (result, _) = run_job(vec![faulty, healthy], &dir, &["1_0_32_8"], 2);

    assert!(matches!(result, Err(PlotterError::Device(_))));
}

#[test]
fn files_of_very_different_sizes_all_make_progress() {
    let dir = tempfile::tempdir().unwrap();
    let names = ["1_0_4_4", "2_0_16_4", "3_0_64_4"];
    let (result, paths) = run_job(
        vec![mock_device(4)],
        &dir,
        &names,
        BufferCount::Auto.resolve(names.len()),
    );
    result.unwrap();

    for path in &paths {
        let spec = PlotFileSpec::from_path(path).unwrap();
        assert_eq!(fs::metadata(path).unwrap().len(), spec.file_bytes());
        assert_eq!(fs::read(path).unwrap(), reference_file(&spec));
    }
}

#[test]
fn rejects_empty_device_or_file_lists() {
    let dir = tempfile::tempdir().unwrap();
    let spec = PlotFileSpec::from_path(&dir.path().join("1_0_4_4")).unwrap();

    assert!(matches!(
        GenerationJob::new(Vec::new(), vec![spec]),
        Err(PlotterError::Config(_))
    ));
    assert!(matches!(
        GenerationJob::new(vec![mock_device(4)], Vec::new()),
        Err(PlotterError::Config(_))
    ));
}
