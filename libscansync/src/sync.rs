//! The synchronization engine: fuses the image file's per-frame
//! metadata with the log streams into one ordered set of per-frame
//! transform records.
//!
//! The engine owns at most one open reader, one open writer and one
//! parsed copy of each log. A synchronization pass walks the image
//! directories channel-stride at a time, converts each frame's
//! epoch-relative timestamp to absolute wall-clock time, looks up the
//! nearest log sample at or after that instant in each loaded stream
//! and records position (from the position log) and rotation (from the
//! rotary log when present, the position log otherwise). The finished
//! record set is built into a fresh map and swapped in whole, so
//! readers of a previous pass never observe a half-built one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{arr2, Array2};
use time::{Duration, PrimitiveDateTime};

use super::error::SyncError;
use super::position_log::PositionLog;
use super::reader::TiffStackReader;
use super::rotary_log::RotaryLog;
use super::transform::{FrameTransform, TransformKind};
use super::writer::TiffStackWriter;

pub struct SyncEngine {
    reader: Option<TiffStackReader>,
    writer: Option<TiffStackWriter>,
    position_log: Option<PositionLog>,
    rotary_log: Option<RotaryLog>,
    n_channels: u32,
    channel: u32,
    encoder_units_per_turn: u32,
    transforms: Option<BTreeMap<u32, FrameTransform>>,
}

impl Default for SyncEngine {
    fn default() -> Self {
        SyncEngine {
            reader: None,
            writer: None,
            position_log: None,
            rotary_log: None,
            n_channels: 1,
            channel: 1,
            encoder_units_per_turn: super::constants::DEFAULT_ENCODER_UNITS_PER_TURN,
            transforms: None,
        }
    }
}

impl SyncEngine {
    pub fn new() -> Self {
        SyncEngine::default()
    }

    /// As [`SyncEngine::new`] but for a rig whose rotary encoder counts
    /// a different number of units per full turn.
    pub fn with_encoder_units_per_turn(units_per_turn: u32) -> Self {
        SyncEngine {
            encoder_units_per_turn: units_per_turn,
            ..SyncEngine::default()
        }
    }

    /// Open an image file for reading. The channel count is taken from
    /// the saved-channel metadata of directory 0; files with no channel
    /// metadata are treated as single-channel.
    pub fn open_tiff_reader(&mut self, path: &Path) -> Result<(), SyncError> {
        let reader = TiffStackReader::open(path)?;
        let n_saved = reader.header().chan_saved().len() as u32;
        if n_saved == 0 {
            log::warn!(
                "No saved-channel metadata in {}; assuming a single channel",
                path.to_string_lossy()
            );
        }
        self.n_channels = n_saved.max(1);
        self.reader = Some(reader);
        Ok(())
    }

    pub fn close_tiff_reader(&mut self) -> bool {
        self.reader.take().is_some()
    }

    /// Open an image file for writing derived frames.
    pub fn open_tiff_writer(&mut self, path: &Path) -> Result<(), SyncError> {
        self.writer = Some(TiffStackWriter::open(path)?);
        Ok(())
    }

    pub fn close_tiff_writer(&mut self) -> bool {
        match self.writer.take() {
            Some(mut writer) => writer.close(),
            None => false,
        }
    }

    /// Load the position/rotation log. Ok(false) means the file parsed
    /// but carries no acquisition trigger and cannot be synchronized
    /// against.
    pub fn open_position_log(&mut self, path: &Path) -> Result<bool, SyncError> {
        let mut position_log = PositionLog::new(path, self.encoder_units_per_turn);
        let loaded = position_log.load()?;
        self.position_log = Some(position_log);
        Ok(loaded)
    }

    /// Load the rotary encoder log. Same contract as
    /// [`Self::open_position_log`].
    pub fn open_rotary_log(&mut self, path: &Path) -> Result<bool, SyncError> {
        let mut rotary_log = RotaryLog::new(path);
        let loaded = rotary_log.load()?;
        self.rotary_log = Some(rotary_log);
        Ok(loaded)
    }

    pub fn position_log(&self) -> Option<&PositionLog> {
        self.position_log.as_ref()
    }

    pub fn rotary_log(&self) -> Option<&RotaryLog> {
        self.rotary_log.as_ref()
    }

    /// Select which channel frame reads/writes address (1-based).
    pub fn set_channel(&mut self, channel: u32) {
        self.channel = channel;
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn n_channels(&self) -> u32 {
        self.n_channels
    }

    /// LUT bounds of the active channel, when the file records them.
    pub fn channel_lut(&self) -> Option<(i32, i32)> {
        let Some(reader) = self.reader.as_ref() else {
            log::warn!("No image file open; channel LUT unavailable");
            return None;
        };
        match reader.header().chan_lut().get(&self.channel) {
            Some(lut) => Some(*lut),
            None => {
                log::warn!("Channel {} has no LUT in the header", self.channel);
                None
            }
        }
    }

    /// Logical frame count: physical directories divided by the number
    /// of interleaved channels.
    pub fn count_frames(&mut self) -> u32 {
        match self.reader.as_mut() {
            Some(reader) => reader.count_directories() / self.n_channels.max(1),
            None => 0,
        }
    }

    /// Map a 1-based frame number to the physical directory holding the
    /// active channel's samples for that frame.
    fn dir_for_frame(&self, frame_number: u32) -> Option<usize> {
        let n = i64::from(self.n_channels.max(1));
        let dir = i64::from(frame_number) * n - (n - i64::from(self.channel)) - 1;
        usize::try_from(dir).ok()
    }

    /// Decode the active channel of one frame. None when no file is
    /// open or the frame number precedes frame 1.
    pub fn read_frame(&mut self, frame_number: u32) -> Option<Array2<i16>> {
        let dirnum = self.dir_for_frame(frame_number)?;
        match self.reader.as_mut() {
            Some(reader) => Some(reader.read_frame(dirnum)),
            None => {
                log::warn!("No image file open for reading");
                None
            }
        }
    }

    /// Write one frame to the open writer, carrying across the source
    /// directory's metadata tags with the channel-selection keys
    /// rewritten to the active channel.
    pub fn write_frame(&mut self, frame: &Array2<i16>, frame_number: u32) -> Result<(), SyncError> {
        if self.writer.is_none() {
            return Err(SyncError::NoWriterOpen);
        }
        let dirnum = self.dir_for_frame(frame_number);
        let channel = self.channel;
        let mut staged = None;
        if let (Some(reader), Some(dirnum)) = (self.reader.as_mut(), dirnum) {
            let software = reader.software_tag(dirnum)?;
            let description = reader.image_description_tag(dirnum);
            if let (Some(software), Some(description)) = (software, description) {
                staged = Some((
                    TiffStackWriter::modify_channels(&software, &[channel]),
                    description,
                ));
            }
        }
        let writer = self.writer.as_mut().ok_or(SyncError::NoWriterOpen)?;
        if let Some((software, description)) = staged {
            writer.stage_si_header(&software, &description);
        }
        writer.write_frame(frame)?;
        Ok(())
    }

    /// Run a synchronization pass from `start_frame` (0-based logical
    /// frame index) to the end of the file, rebuilding the per-frame
    /// record set.
    ///
    /// Requires an open image file carrying an epoch, and at least one
    /// loaded log stream carrying an acquisition trigger. A stream that
    /// is loaded but triggerless fails the pass; a stream that simply
    /// is not loaded leaves its fields zeroed in every record.
    pub fn interpolate_indices(&mut self, start_frame: u32) -> Result<(), SyncError> {
        if self.reader.is_none() {
            return Err(SyncError::NoTiffOpen);
        }
        if self.position_log.is_none() && self.rotary_log.is_none() {
            return Err(SyncError::NoLogLoaded);
        }
        if let Some(position_log) = &self.position_log {
            if !position_log.is_loaded() {
                return Err(SyncError::NoAcquisition(position_log.filename().to_path_buf()));
            }
        }
        if let Some(rotary_log) = &self.rotary_log {
            if !rotary_log.is_loaded() {
                return Err(SyncError::NoAcquisition(rotary_log.filename().to_path_buf()));
            }
        }

        let n_channels = self.n_channels.max(1) as usize;
        let reader = self.reader.as_mut().ok_or(SyncError::NoTiffOpen)?;
        let epoch = reader.epoch_time().ok_or(SyncError::MissingEpoch)?;
        let end_frame = reader.count_directories() as usize / n_channels;
        log::info!("Counted {end_frame} frames");

        let mut transforms = BTreeMap::new();
        for frame_idx in (start_frame as usize)..end_frame {
            let dirnum = frame_idx * n_channels;
            let Some((frame_number, tiff_ts)) = reader.frame_number_and_timestamp(dirnum)? else {
                log::warn!(
                    "Directory {dirnum} is missing its frame metadata; stopping the scrape"
                );
                break;
            };
            let frame_time = epoch + Duration::microseconds((tiff_ts * 1_000_000.0) as i64);

            let (mut x, mut z, mut r) = (0.0, 0.0, 0.0);
            let (mut raw_x, mut raw_z) = (0.0, 0.0);
            if let Some(position_log) = &self.position_log {
                if let Some(idx) = clamp_to_last(
                    position_log.find_nearest_ptime_index(&frame_time),
                    position_log.len(),
                ) {
                    x = position_log.x_translation(idx);
                    raw_x = position_log.raw_x_translation(idx);
                    z = position_log.z_translation(idx);
                    raw_z = position_log.raw_z_translation(idx);
                    r = position_log.radian_rotation(idx);
                }
            }
            if let Some(rotary_log) = &self.rotary_log {
                if let Some(idx) = clamp_to_last(
                    rotary_log.find_nearest_ptime_index(&frame_time),
                    rotary_log.len(),
                ) {
                    r = rotary_log.radian_rotation(idx);
                }
            }

            let mut record = FrameTransform::new(frame_number, tiff_ts);
            record.set_pos_data(x, z, r);
            record.set_raw_pos_data(raw_x, raw_z);
            record.add_transform(TransformKind::InitialRotation, arr2(&[[r]]));
            transforms.insert(frame_number, record);
        }
        // swap the finished map in whole
        self.transforms = Some(transforms);
        Ok(())
    }

    /// The fused record set from the last synchronization pass.
    pub fn transforms(&self) -> Option<&BTreeMap<u32, FrameTransform>> {
        self.transforms.as_ref()
    }

    pub fn get_pos(&self, frame_number: u32) -> Option<(f64, f64, f64)> {
        self.transforms
            .as_ref()?
            .get(&frame_number)
            .map(FrameTransform::pos_data)
    }

    pub fn get_tiff_timestamps(&self) -> Vec<f64> {
        self.collect_records(|record| record.timestamp)
    }

    pub fn get_frame_numbers(&self) -> Vec<u32> {
        self.collect_records(|record| record.frame_number)
    }

    pub fn get_x(&self) -> Vec<f64> {
        self.collect_records(|record| record.x)
    }

    pub fn get_z(&self) -> Vec<f64> {
        self.collect_records(|record| record.z)
    }

    pub fn get_raw_x(&self) -> Vec<f64> {
        self.collect_records(|record| record.raw_x)
    }

    pub fn get_raw_z(&self) -> Vec<f64> {
        self.collect_records(|record| record.raw_z)
    }

    pub fn get_theta(&self) -> Vec<f64> {
        self.collect_records(|record| record.r)
    }

    fn collect_records<T>(&self, f: impl Fn(&FrameTransform) -> T) -> Vec<T> {
        match &self.transforms {
            Some(transforms) => transforms.values().map(f).collect(),
            None => Vec::new(),
        }
    }

    /// Accumulated tracker translation of one frame, when downstream
    /// tooling has attached one.
    pub fn get_tracker_translation(&self, frame_number: u32) -> Option<(f64, f64)> {
        let record = self.transforms.as_ref()?.get(&frame_number)?;
        let m = record.transform(TransformKind::TrackerTranslation)?;
        Some((m[[0, 0]], m[[0, 1]]))
    }

    pub fn get_all_tracker_translation(&self) -> (Vec<f64>, Vec<f64>) {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        if let Some(transforms) = &self.transforms {
            for record in transforms.values() {
                if let Some(m) = record.transform(TransformKind::TrackerTranslation) {
                    xs.push(m[[0, 0]]);
                    ys.push(m[[0, 1]]);
                }
            }
        }
        (xs, ys)
    }

    pub fn get_epoch_time(&self) -> Option<PrimitiveDateTime> {
        self.reader.as_ref().and_then(TiffStackReader::epoch_time)
    }

    pub fn get_log_times(&self) -> Option<&[PrimitiveDateTime]> {
        self.position_log.as_ref().map(PositionLog::ptimes)
    }

    pub fn get_rotary_times(&self) -> Option<&[PrimitiveDateTime]> {
        self.rotary_log.as_ref().map(RotaryLog::ptimes)
    }

    pub fn get_log_trigger_time(&self) -> Option<PrimitiveDateTime> {
        self.position_log.as_ref().and_then(PositionLog::trigger_time)
    }

    pub fn get_rotary_trigger_time(&self) -> Option<PrimitiveDateTime> {
        self.rotary_log.as_ref().and_then(RotaryLog::trigger_time)
    }

    /// Decode the last `n` frames and return them with their rotation
    /// angles, re-running the synchronization pass over that range.
    pub fn tail(&mut self, n: usize) -> Result<(Vec<Array2<i16>>, Vec<f64>), SyncError> {
        if self.reader.is_none() {
            return Err(SyncError::NoTiffOpen);
        }
        let n_frames = self.count_frames() as usize;
        if n == 0 || n > n_frames {
            return Err(SyncError::NotEnoughFrames {
                requested: n,
                available: n_frames,
            });
        }
        let start = n_frames - n;
        let mut frames = Vec::with_capacity(n);
        for frame_idx in start..n_frames {
            if let Some(frame) = self.read_frame(frame_idx as u32 + 1) {
                frames.push(frame);
            }
        }
        self.interpolate_indices(start as u32)?;
        let angles = self.get_theta();
        Ok((frames, angles))
    }

    /// Write the last `n` frames of the open file to a new image file,
    /// carrying across each frame's metadata tags. The output lands at
    /// `fname`, or next to the source with a `_tail` suffix when None.
    pub fn save_tiff_tail(&mut self, n: usize, fname: Option<&Path>) -> Result<PathBuf, SyncError> {
        let Some(reader_path) = self.reader.as_ref().map(|r| r.path().to_path_buf()) else {
            return Err(SyncError::NoTiffOpen);
        };
        let n_frames = self.count_frames() as usize;
        if n == 0 || n > n_frames {
            return Err(SyncError::NotEnoughFrames {
                requested: n,
                available: n_frames,
            });
        }

        let out_path = match fname {
            Some(p) => p.to_path_buf(),
            None => {
                let stem = reader_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let ext = reader_path
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_else(|| String::from("tif"));
                reader_path.with_file_name(format!("{stem}_tail.{ext}"))
            }
        };
        if self.writer.is_none() {
            self.open_tiff_writer(&out_path)?;
        }

        let mut written = 0;
        for frame_idx in (n_frames - n)..n_frames {
            let frame_number = frame_idx as u32 + 1;
            let Some(frame) = self.read_frame(frame_number) else {
                continue;
            };
            if frame.is_empty() {
                log::warn!("Frame {frame_number} did not decode; skipping");
                continue;
            }
            self.write_frame(&frame, frame_number)?;
            written += 1;
        }
        self.close_tiff_writer();
        log::info!("Written {} frames to {}", written, out_path.to_string_lossy());
        Ok(out_path)
    }

    /// Find the maximal runs of frames whose rotation is constant to
    /// within `tolerance`, keeping runs strictly longer than
    /// `min_frames`. Intervals are (start, end) frame indices into the
    /// fused record set, end exclusive.
    pub fn find_stable_frames(&self, min_frames: usize, tolerance: f64) -> Vec<(usize, usize)> {
        stable_intervals(&self.get_theta(), min_frames, tolerance)
    }
}

/// Clamp a lower-bound miss (query past every sample) to the final
/// sample of a non-empty stream.
fn clamp_to_last(idx: Option<usize>, len: usize) -> Option<usize> {
    match idx {
        Some(i) => Some(i),
        None if len > 0 => Some(len - 1),
        None => None,
    }
}

/// Discrete difference keeping the first element, applied twice to get
/// a second difference whose zeros mark constant rotation.
fn adjacent_difference(series: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(series.len());
    for (i, v) in series.iter().enumerate() {
        if i == 0 {
            out.push(*v);
        } else {
            out.push(v - series[i - 1]);
        }
    }
    out
}

/// Maximal runs where |second difference| stays below `tolerance`,
/// filtered to runs strictly longer than `min_frames`.
fn stable_intervals(theta: &[f64], min_frames: usize, tolerance: f64) -> Vec<(usize, usize)> {
    let d2 = adjacent_difference(&adjacent_difference(theta));
    let stable: Vec<bool> = d2.iter().map(|v| v.abs() < tolerance).collect();

    let mut intervals = Vec::new();
    let mut i = 0;
    while i < stable.len() {
        if !stable[i] {
            i += 1;
            continue;
        }
        let start = i;
        while i < stable.len() && stable[i] {
            i += 1;
        }
        if i - start > min_frames {
            intervals.push((start, i));
        }
    }
    intervals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_to_last() {
        assert_eq!(clamp_to_last(Some(3), 10), Some(3));
        assert_eq!(clamp_to_last(None, 10), Some(9));
        assert_eq!(clamp_to_last(None, 0), None);
    }

    #[test]
    fn test_adjacent_difference_keeps_first_element() {
        assert_eq!(
            adjacent_difference(&[1.0, 4.0, 9.0]),
            vec![1.0, 3.0, 5.0]
        );
        assert!(adjacent_difference(&[]).is_empty());
    }

    #[test]
    fn test_stable_intervals_single_run() {
        // ramp, hold for five frames, ramp again
        let theta = [0.0, 0.1, 0.2, 0.2, 0.2, 0.2, 0.2, 0.4, 0.8];
        let intervals = stable_intervals(&theta, 2, 1e-3);
        assert_eq!(intervals.len(), 1);
        let (start, end) = intervals[0];
        // the held run is stable from where the second difference
        // settles to the frame before the ramp resumes
        assert!(start >= 2 && start <= 4);
        assert_eq!(end, 7);
        assert!(end - start > 2);
    }

    #[test]
    fn test_stable_intervals_short_runs_dropped() {
        let theta = [0.0, 0.1, 0.2, 0.2, 0.4, 0.1, 0.9];
        assert!(stable_intervals(&theta, 3, 1e-3).is_empty());
    }

    #[test]
    fn test_stable_intervals_constant_series() {
        // the first two entries of the twice-differenced series carry
        // the raw value and its negation, so the run starts at index 2
        let theta = [0.5; 6];
        let intervals = stable_intervals(&theta, 2, 1e-3);
        assert_eq!(intervals, vec![(2, 6)]);
    }

    #[test]
    fn test_engine_requires_inputs() {
        let mut engine = SyncEngine::new();
        assert!(matches!(
            engine.interpolate_indices(0),
            Err(SyncError::NoTiffOpen)
        ));
        assert_eq!(engine.count_frames(), 0);
        assert!(engine.read_frame(1).is_none());
        assert!(engine.get_theta().is_empty());
        assert!(engine.channel_lut().is_none());
    }

    #[test]
    fn test_dir_for_frame_channel_interleave() {
        let mut engine = SyncEngine::new();
        engine.n_channels = 2;
        engine.set_channel(1);
        assert_eq!(engine.dir_for_frame(1), Some(0));
        assert_eq!(engine.dir_for_frame(2), Some(2));
        engine.set_channel(2);
        assert_eq!(engine.dir_for_frame(1), Some(1));
        assert_eq!(engine.dir_for_frame(2), Some(3));
        // single channel maps frame n to directory n-1
        engine.n_channels = 1;
        engine.set_channel(1);
        assert_eq!(engine.dir_for_frame(10), Some(9));
        assert_eq!(engine.dir_for_frame(0), None);
    }
}
