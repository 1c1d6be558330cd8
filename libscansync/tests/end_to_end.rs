//! Full-pipeline tests: a synthetic acquisition (image stack plus logs)
//! is generated on disk, then pushed through the whole engine.

use std::io::Write;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tempfile::TempDir;

use libscansync::error::SyncError;
use libscansync::header::SchemaVersion;
use libscansync::reader::TiffStackReader;
use libscansync::sync::SyncEngine;
use libscansync::writer::TiffStackWriter;

const SOFTWARE_TAG: &str = "SI.hChannels.channelSave = 1\n\
SI.hChannels.channelActive = 1\n\
SI.hChannels.channelDisplay = 1\n\
SI.hChannels.channelLUT = {[0 32767]}\n\
SI.hChannels.channelOffset = [0]\n";

fn current_description(frame_number: usize) -> String {
    format!(
        "frameNumbers = {frame_number}\n\
         frameTimestamps_sec = {:.3}\n\
         acqTriggerTimestamps_sec = 0.000\n\
         epoch = [2022  1 18 15 21 21]\n",
        (frame_number - 1) as f64 * 0.1
    )
}

fn frame_pixels(seed: i16) -> Array2<i16> {
    Array2::from_shape_fn((16, 16), |(row, col)| {
        seed.wrapping_mul(37) + (row * 16 + col) as i16 - 128
    })
}

/// A 10-directory, single-channel, Current-schema stack with frames
/// 100 ms apart.
fn write_current_stack(path: &Path, n_frames: usize) {
    let mut writer = TiffStackWriter::open(path).unwrap();
    for n in 1..=n_frames {
        writer.stage_si_header(SOFTWARE_TAG, &current_description(n));
        writer.write_frame(&frame_pixels(n as i16)).unwrap();
    }
    writer.close();
}

/// A position log whose trigger line precedes ten samples 100 ms apart
/// starting at the epoch instant. Z is constant to exercise the
/// constant-series normalization rule; one duplicated timestamp
/// exercises the dedup rule.
fn write_position_log(dir: &Path) -> PathBuf {
    let path = dir.join("position_log.txt");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "2022-01-18 15:21:20.000 Angular reference: 500").unwrap();
    writeln!(file, "2022-01-18 15:21:20.500 Started with SpaceBar").unwrap();
    for k in 0..10 {
        writeln!(
            file,
            "2022-01-18 15:21:21.{:03} X={:.2} Z=2.00 Rot={} MouseMove",
            k * 100,
            0.1 * k as f64,
            920 * k
        )
        .unwrap();
    }
    // the logging kit occasionally repeats a sample; values differ but
    // the line must be dropped whole
    writeln!(file, "2022-01-18 15:21:21.900 X=9.99 Z=9.99 Rot=9 MouseMove").unwrap();
    path
}

fn write_rotary_log(dir: &Path) -> PathBuf {
    let path = dir.join("rotary_log.txt");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "2022-01-18 15:21:20.900 Rot=0.0").unwrap();
    writeln!(file, "2022-01-18 15:21:21.000 Trigger=1.000000").unwrap();
    for k in 1..10 {
        writeln!(file, "2022-01-18 15:21:21.{:03} Rot={:.1}", k * 100, 10.0 * k as f64).unwrap();
    }
    path
}

#[test]
fn test_ten_frame_synchronization() {
    let dir = TempDir::new().unwrap();
    let tiff_path = dir.path().join("run_0001.tif");
    write_current_stack(&tiff_path, 10);
    let log_path = write_position_log(dir.path());

    let mut engine = SyncEngine::new();
    engine.open_tiff_reader(&tiff_path).unwrap();
    assert_eq!(engine.n_channels(), 1);
    assert!(engine.open_position_log(&log_path).unwrap());
    assert_eq!(engine.count_frames(), 10);

    engine.interpolate_indices(0).unwrap();
    let transforms = engine.transforms().unwrap();
    assert_eq!(transforms.len(), 10);
    assert_eq!(engine.get_frame_numbers(), (1..=10u32).collect::<Vec<_>>());

    // image timestamps are relative to the epoch; first ~0.0 s, last ~0.9 s
    let timestamps = engine.get_tiff_timestamps();
    assert!(timestamps[0].abs() < 1e-6);
    assert!((timestamps[9] - 0.9).abs() < 1e-6);

    // the duplicated log sample was dropped
    assert_eq!(engine.position_log().unwrap().len(), 10);
    // log durations run from the trigger sample
    let log = engine.position_log().unwrap();
    assert!(log.time(0).abs() < 1e-9);
    assert!((log.time(9) - 0.9).abs() < 1e-9);

    // X normalized across the file, constant Z pinned to the midpoint
    let x = engine.get_x();
    assert_eq!(x[0], 0.0);
    assert_eq!(x[9], 1.0);
    assert!(engine.get_z().iter().all(|&z| z == 0.5));
    assert!(engine.get_raw_z().iter().all(|&z| z == 2.0));
    assert!((engine.get_raw_x()[9] - 0.9).abs() < 1e-9);

    // rotation from encoder units: 920 units of 36800 per frame step
    let theta = engine.get_theta();
    let per_step = std::f64::consts::TAU * 920.0 / 36800.0;
    for (k, th) in theta.iter().enumerate() {
        assert!((th - per_step * k as f64).abs() < 1e-9, "frame {k}");
    }

    // per-frame queries agree with the series
    let (px, pz, pr) = engine.get_pos(1).unwrap();
    assert_eq!((px, pz), (0.0, 0.5));
    assert!(pr.abs() < 1e-9);
    assert!(engine.get_pos(11).is_none());

    assert_eq!(
        engine.get_epoch_time(),
        Some(time::macros::datetime!(2022-01-18 15:21:21))
    );
    assert_eq!(
        engine.get_log_trigger_time(),
        Some(time::macros::datetime!(2022-01-18 15:21:21))
    );
}

#[test]
fn test_rotary_rotation_overrides_position_rotation() {
    let dir = TempDir::new().unwrap();
    let tiff_path = dir.path().join("run_0001.tif");
    write_current_stack(&tiff_path, 10);
    let log_path = write_position_log(dir.path());
    let rotary_path = write_rotary_log(dir.path());

    let mut engine = SyncEngine::new();
    engine.open_tiff_reader(&tiff_path).unwrap();
    engine.open_position_log(&log_path).unwrap();
    assert!(engine.open_rotary_log(&rotary_path).unwrap());
    engine.interpolate_indices(0).unwrap();

    // rotation now comes from the rotary stream in degrees->radians,
    // while position still comes from the position log
    let theta = engine.get_theta();
    assert!((theta[5] - 50.0_f64.to_radians()).abs() < 1e-9);
    assert_eq!(engine.get_x()[0], 0.0);
    // the rotary trigger line is stamped 21.000; it resolves forward
    // to the first sample at or after that instant
    assert!(engine
        .get_rotary_trigger_time()
        .is_some_and(|t| t == time::macros::datetime!(2022-01-18 15:21:21.100)));
}

#[test]
fn test_sync_requires_a_triggered_log() {
    let dir = TempDir::new().unwrap();
    let tiff_path = dir.path().join("run_0001.tif");
    write_current_stack(&tiff_path, 3);

    let mut engine = SyncEngine::new();
    engine.open_tiff_reader(&tiff_path).unwrap();
    assert!(matches!(
        engine.interpolate_indices(0),
        Err(SyncError::NoLogLoaded)
    ));

    // a log with samples but no acquisition marker parses but cannot
    // be synchronized against
    let log_path = dir.path().join("no_trigger.txt");
    std::fs::write(
        &log_path,
        "2022-01-18 15:21:21.000 X=0.10 Z=1.00 Rot=5 MouseMove\n",
    )
    .unwrap();
    assert!(!engine.open_position_log(&log_path).unwrap());
    assert!(matches!(
        engine.interpolate_indices(0),
        Err(SyncError::NoAcquisition(_))
    ));
}

#[test]
fn test_frame_round_trip_through_writer() {
    let dir = TempDir::new().unwrap();
    let tiff_path = dir.path().join("run_0001.tif");
    write_current_stack(&tiff_path, 5);

    let mut engine = SyncEngine::new();
    engine.open_tiff_reader(&tiff_path).unwrap();
    let original = engine.read_frame(3).unwrap();
    assert_eq!(original.dim(), (16, 16));

    let out_path = dir.path().join("derived.tif");
    engine.open_tiff_writer(&out_path).unwrap();
    engine.write_frame(&original, 3).unwrap();
    assert!(engine.close_tiff_writer());

    // byte-identical samples and carried-over metadata
    let mut round = TiffStackReader::open(&out_path).unwrap();
    assert_eq!(round.read_frame(0), original);
    let desc = round.image_description_tag(0).unwrap();
    assert!(desc.contains("frameNumbers = 3"));
    let software = round.software_tag(0).unwrap().unwrap();
    assert!(software.contains("SI.hChannels.channelSave = [1]"));
}

#[test]
fn test_tail_and_save_tail() {
    let dir = TempDir::new().unwrap();
    let tiff_path = dir.path().join("run_0001.tif");
    write_current_stack(&tiff_path, 10);
    let log_path = write_position_log(dir.path());

    let mut engine = SyncEngine::new();
    engine.open_tiff_reader(&tiff_path).unwrap();
    engine.open_position_log(&log_path).unwrap();

    let (frames, angles) = engine.tail(3).unwrap();
    assert_eq!(frames.len(), 3);
    assert_eq!(angles.len(), 3);
    assert_eq!(frames[0], frame_pixels(8));
    assert_eq!(frames[2], frame_pixels(10));

    assert!(matches!(
        engine.tail(99),
        Err(SyncError::NotEnoughFrames { .. })
    ));

    let out_path = engine.save_tiff_tail(2, None).unwrap();
    assert_eq!(
        out_path.file_name().unwrap().to_string_lossy(),
        "run_0001_tail.tif"
    );
    let mut tail_reader = TiffStackReader::open(&out_path).unwrap();
    assert_eq!(tail_reader.count_directories(), 2);
    assert_eq!(tail_reader.read_frame(0), frame_pixels(9));
    assert_eq!(tail_reader.read_frame(1), frame_pixels(10));
}

#[test]
fn test_legacy_schema_detection() {
    let dir = TempDir::new().unwrap();
    let tiff_path = dir.path().join("legacy.tif");

    let mut writer = TiffStackWriter::open(&tiff_path).unwrap();
    for n in 1..=2_usize {
        let description = format!(
            "Frame Number = {n}\n\
             Frame Timestamp(s) = {:.3}\n\
             scanimage.SI5.channelsSave = 1\n\
             scanimage.SI5.chan1LUT = [0 32767]\n\
             scanimage.SI5.channelOffsets = [-11]\n",
            (n - 1) as f64 * 0.1
        );
        // legacy files leave the Software tag unused; everything lives
        // in the description text
        writer.stage_si_header("", &description);
        writer.write_frame(&frame_pixels(n as i16)).unwrap();
    }
    writer.close();

    let mut reader = TiffStackReader::open(&tiff_path).unwrap();
    assert_eq!(reader.header().version(), Some(SchemaVersion::Legacy));
    // the kept channel is inferred for legacy files
    assert_eq!(reader.header().chan_saved().len(), 1);
    assert_eq!(reader.header().chan_saved()[&0], 1);
    assert_eq!(reader.header().chan_lut()[&1], (0, 32767));
    assert_eq!(reader.header().chan_offsets()[&1], -11);

    let (frame_number, ts) = reader.frame_number_and_timestamp(1).unwrap().unwrap();
    assert_eq!(frame_number, 2);
    assert!((ts - 0.1).abs() < 1e-9);
    // no epoch vector in legacy headers
    assert_eq!(reader.epoch_time(), None);
}

#[test]
fn test_unknown_schema_reads_soft_fail() {
    let dir = TempDir::new().unwrap();
    let tiff_path = dir.path().join("foreign.tif");

    let mut writer = TiffStackWriter::open(&tiff_path).unwrap();
    writer.stage_si_header("SomeOtherScope 2.1", "acquired with something else entirely\n");
    writer.write_frame(&frame_pixels(1)).unwrap();
    writer.close();

    let mut reader = TiffStackReader::open(&tiff_path).unwrap();
    assert_eq!(reader.header().version(), None);
    assert!(reader.header().chan_saved().is_empty());
    assert_eq!(reader.frame_number_and_timestamp(0).unwrap(), None);
    assert!(reader.all_timestamps().is_empty());
    // pixel data still decodes
    assert_eq!(reader.read_frame(0), frame_pixels(1));
}
