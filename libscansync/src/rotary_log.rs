//! Parser for the standalone rotary encoder log.
//!
//! Structurally the same single-pass parse as the position log but
//! against the rotary logger's own vocabulary: each sample line carries
//! a date-time prefix and an accumulated rotation in degrees, and the
//! acquisition start is marked by a `Trigger=1.000000` line. Rotation
//! converts to radians without any range reduction so full turns stay
//! countable.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use time::PrimitiveDateTime;

use super::constants::{EQUAL_TOKEN, ROTARY_TRIGGER_TOKEN, ROT_TOKEN};
use super::error::LogError;
use super::vr_data::{parse_line_time, RotationUnits, SampleStream};

#[derive(Debug)]
pub struct RotaryLog {
    filename: PathBuf,
    stream: SampleStream,
    is_loaded: bool,
}

impl RotaryLog {
    pub fn new(filename: &Path) -> Self {
        RotaryLog {
            filename: filename.to_path_buf(),
            stream: SampleStream::default(),
            is_loaded: false,
        }
    }

    /// Read the whole file in a single pass. Same contract as
    /// [`crate::position_log::PositionLog::load`].
    pub fn load(&mut self) -> Result<bool, LogError> {
        if !self.filename.exists() {
            return Err(LogError::BadFilePath(self.filename.clone()));
        }
        log::info!(
            "Loading rotary encoder file: {}",
            self.filename.to_string_lossy()
        );

        let file = BufReader::new(File::open(&self.filename)?);
        let mut last_seen: Option<PrimitiveDateTime> = None;
        for (line_index, line) in file.lines().enumerate() {
            let line = line?;

            if let Some(rot_pos) = line.find(ROT_TOKEN) {
                let t = parse_line_time(&line)?;
                last_seen = Some(t);
                if self.stream.accepts(&t) {
                    let after_rot = &line[rot_pos..];
                    let Some(eq) = after_rot.find(EQUAL_TOKEN) else {
                        return Err(LogError::MalformedLine(line_index));
                    };
                    let rot_text = after_rot[eq + EQUAL_TOKEN.len()..].trim();
                    let rotation: f64 = rot_text.parse().map_err(|_| LogError::BadFloat {
                        line: line_index,
                        field: "Rot",
                        value: rot_text.to_string(),
                    })?;
                    self.stream.push_sample(t, rotation);
                }
            }

            if line.contains(ROTARY_TRIGGER_TOKEN) {
                let marker_time = parse_line_time(&line).ok().or(last_seen);
                self.stream.latch_trigger(marker_time);
            }
        }
        self.stream.resolve_trigger();
        self.is_loaded = self.calculate_durations_and_rotations();
        Ok(self.is_loaded)
    }

    pub fn calculate_durations_and_rotations(&mut self) -> bool {
        if !self.stream.contains_acquisition() {
            log::warn!(
                "The file {} has no acquisition trigger associated",
                self.filename.to_string_lossy()
            );
            return false;
        }
        log::info!("Calculating rotations and times from rotary encoder data...");
        if !self.stream.derive_durations_and_rotations(RotationUnits::Degrees) {
            log::warn!(
                "The trigger in {} precedes no usable sample",
                self.filename.to_string_lossy()
            );
            return false;
        }
        log::info!(
            "The rotary encoder file has {} timestamps in it",
            self.stream.len()
        );
        true
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    pub fn contains_acquisition(&self) -> bool {
        self.stream.contains_acquisition()
    }

    pub fn len(&self) -> usize {
        self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    pub fn trigger_index(&self) -> Option<usize> {
        self.stream.trigger_index()
    }

    pub fn trigger_time(&self) -> Option<PrimitiveDateTime> {
        self.stream.trigger_time()
    }

    pub fn ptimes(&self) -> &[PrimitiveDateTime] {
        self.stream.ptimes()
    }

    pub fn times(&self) -> &[f64] {
        self.stream.times()
    }

    pub fn theta(&self) -> &[f64] {
        self.stream.rotations_in_rads()
    }

    /// Raw rotation in degrees
    pub fn rotation(&self, i: usize) -> f64 {
        self.stream.rotation(i)
    }

    pub fn radian_rotation(&self, i: usize) -> f64 {
        self.stream.radian_rotation(i)
    }

    pub fn time(&self, i: usize) -> f64 {
        self.stream.time(i)
    }

    pub fn find_nearest_index(&self, duration: f64) -> Option<usize> {
        self.stream.find_nearest_index(duration)
    }

    pub fn find_nearest_ptime_index(&self, t: &PrimitiveDateTime) -> Option<usize> {
        self.stream.find_nearest_ptime_index(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use time::macros::datetime;

    fn write_log(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const ROTARY_LOG: &str = "\
2022-01-18 15:21:20.900 Rot=0.0\n\
2022-01-18 15:21:21.000 Trigger=1.000000\n\
2022-01-18 15:21:21.000 Rot=90.0\n\
2022-01-18 15:21:21.000 Rot=91.5\n\
2022-01-18 15:21:21.100 Rot=450.0\n\
2022-01-18 15:21:21.200 Trigger=1.000000\n";

    #[test]
    fn test_load_rotary_log() {
        let file = write_log(ROTARY_LOG);
        let mut log = RotaryLog::new(file.path());
        assert!(log.load().unwrap());
        assert!(log.contains_acquisition());
        // the repeated 21.000 sample is dropped
        assert_eq!(log.len(), 3);
        // the marker line is stamped 21.000; the trigger resolves to
        // the accepted sample at that instant, and the second marker
        // line is ignored
        assert_eq!(log.trigger_index(), Some(1));
        assert_eq!(log.trigger_time(), Some(datetime!(2022-01-18 15:21:21.000)));
        // degrees convert to radians with no wraparound applied
        assert!((log.radian_rotation(1) - 90.0_f64.to_radians()).abs() < 1e-9);
        assert!((log.radian_rotation(2) - 450.0_f64.to_radians()).abs() < 1e-9);
        assert!(log.radian_rotation(2) > std::f64::consts::TAU);
        // durations run from the trigger sample; the pre-roll sample
        // is negative
        assert!((log.time(0) + 0.1).abs() < 1e-9);
        assert!((log.time(2) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_rotary_without_trigger() {
        let file = write_log("2022-01-18 15:21:20.900 Rot=12.5\n");
        let mut log = RotaryLog::new(file.path());
        assert!(!log.load().unwrap());
        assert_eq!(log.len(), 1);
        assert_eq!(log.rotation(0), 12.5);
        assert!(log.times().is_empty());
    }
}
